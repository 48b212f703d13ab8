use std::{
    fmt,
    sync::{Mutex, Weak},
};

use rand::Rng;
use uuid::Uuid;

use crate::{client::ClientInner, decision_tree::BestOption};

/// Callback invoked once the completion report containing an experiment has been sent (or has
/// failed to send).
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Payoff used by [`Autotune::complete`](crate::Autotune::complete) when the caller doesn't
/// specify one.
pub const DEFAULT_PAYOFF: f64 = 1.0;

/// Per-experiment exploitation hint, computed once per client.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExperimentOptions {
    pub best_option: Option<String>,
    /// Probability of exploring instead of picking `best_option`.
    pub epsilon: f64,
}

impl Default for ExperimentOptions {
    fn default() -> ExperimentOptions {
        ExperimentOptions {
            best_option: None,
            epsilon: 1.0,
        }
    }
}

impl From<BestOption> for ExperimentOptions {
    fn from(best: BestOption) -> ExperimentOptions {
        ExperimentOptions {
            best_option: best.option,
            epsilon: best.epsilon.unwrap_or(1.0),
        }
    }
}

/// Outcome of the epsilon-greedy decision for one experiment.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Decision {
    pub pick: String,
    pub picked_best: bool,
    /// The pick was taken from the session rather than decided now.
    pub sticky: bool,
}

/// Decide which of `options` to show.
///
/// A pick remembered from the session wins as long as it's still one of `options`. Otherwise,
/// explore (uniformly random pick) with probability `epsilon`, or always when there is no best
/// option among `options`; exploit (pick the best option) the rest of the time.
///
/// Returns `None` if `options` is empty.
pub(crate) fn decide<R: Rng>(
    options: &[String],
    prior_pick: Option<&str>,
    experiment_options: &ExperimentOptions,
    rng: &mut R,
) -> Option<Decision> {
    if options.is_empty() {
        return None;
    }

    let best_option = experiment_options.best_option.as_deref();

    if let Some(prior_pick) = prior_pick.filter(|&pick| options.iter().any(|o| o == pick)) {
        return Some(Decision {
            pick: prior_pick.to_owned(),
            picked_best: Some(prior_pick) == best_option,
            sticky: true,
        });
    }

    // The best option may have been removed from the option set.
    let best_option = best_option.filter(|&best| options.iter().any(|o| o == best));

    let decision = match best_option {
        Some(best) if rng.gen::<f64>() >= experiment_options.epsilon => Decision {
            pick: best.to_owned(),
            picked_best: true,
            sticky: false,
        },
        _ => Decision {
            pick: options[rng.gen_range(0..options.len())].clone(),
            picked_best: false,
            sticky: false,
        },
    };
    Some(decision)
}

/// A running experiment: the option picked for this visitor and, once completed, its payoff.
///
/// Experiments are created by [`Client::experiment`](crate::Client::experiment), which returns the
/// same instance for every call with the same name.
pub struct Experiment {
    name: String,
    options: Vec<String>,
    key: Uuid,
    pick: String,
    picked_best: bool,
    payoff: Mutex<Option<f64>>,
    client: Weak<ClientInner>,
}

impl Experiment {
    pub(crate) fn new(
        client: Weak<ClientInner>,
        name: String,
        options: Vec<String>,
        pick: String,
        picked_best: bool,
    ) -> Experiment {
        Experiment {
            name,
            options,
            key: Uuid::new_v4(),
            pick,
            picked_best,
            payoff: Mutex::new(None),
            client,
        }
    }

    /// Experiment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Candidate options, as passed to [`Client::experiment`](crate::Client::experiment).
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Unique key of this experiment instance, reported with starts and completions.
    pub fn key(&self) -> Uuid {
        self.key
    }

    /// The picked option. Empty if the experiment has no options.
    pub fn pick(&self) -> &str {
        &self.pick
    }

    /// `true` if the best known option was picked deliberately rather than at random.
    pub fn picked_best(&self) -> bool {
        self.picked_best
    }

    /// Payoff of the latest completion, if the experiment has been completed.
    pub fn payoff(&self) -> Option<f64> {
        *self
            .payoff
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_payoff(&self, payoff: f64) {
        *self
            .payoff
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(payoff);
    }

    /// Record `payoff` for this experiment and queue it for reporting.
    ///
    /// Completing again overwrites the payoff. Completions are batched: when several experiments
    /// are completed in quick succession, only the callback passed with the last completion is
    /// invoked, once, after the batch has been reported. Experiments without options are never
    /// reported, so completing one only logs an error and drops `then`.
    pub fn complete(&self, payoff: f64, then: Option<CompletionCallback>) {
        self.set_payoff(payoff);

        match self.client.upgrade() {
            Some(client) => client.complete_experiment(&self.name, then),
            None => {
                log::warn!(target: "autotune", experiment = self.name.as_str(); "completing an experiment after its client was dropped");
            }
        }
    }
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("key", &self.key)
            .field("pick", &self.pick)
            .field("picked_best", &self.picked_best)
            .field("payoff", &self.payoff())
            .finish_non_exhaustive()
    }
}

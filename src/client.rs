use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, OnceLock},
    time::Duration,
};

use tokio::{runtime::Handle, sync::watch};
use url::Url;

use crate::{
    config::{parse_base_url, ReadyCallback},
    context,
    debounce::Debouncer,
    decision_tree::lookup_best_option,
    experiment::{decide, CompletionCallback, ExperimentOptions},
    models::{
        CompleteExperimentsRequest, CompletedExperiment, FetchedOutcomes, StartExperimentsRequest,
        StartedExperiment, TryParse,
    },
    state::{storage_key, SerializedState},
    ClientConfig, ClientContext, Environment, Error, Experiment, Method, PayoffCallback, Result,
};

const START_EXPERIMENTS_DEBOUNCE: Duration = Duration::from_millis(100);
const COMPLETE_EXPERIMENTS_DEBOUNCE: Duration = Duration::from_millis(10);
const PERSIST_STATE_DEBOUNCE: Duration = Duration::from_millis(100);

/// A client for the Autotune API.
///
/// In order to create a client instance, first create [`ClientConfig`]. The client is cheap to
/// clone; clones share the same experiments and reporting queues.
///
/// # Examples
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> autotune::Result<()> {
/// # use autotune::ClientConfig;
/// let client = ClientConfig::from_app_key("app-key").to_client()?;
///
/// let headline = client.experiment("headline", &["Save time", "Save money"]);
/// println!("{}", headline.pick());
/// headline.complete(1.0, None);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client(Arc<ClientInner>);

pub(crate) struct ClientInner {
    app_key: String,
    outcomes_url: Url,
    start_experiments_url: Url,
    complete_experiments_url: Url,
    state_key: String,
    environment: Arc<dyn Environment>,
    runtime: Handle,
    context: OnceLock<ClientContext>,
    state: Mutex<ClientState>,
    persist_state: Debouncer,
    start_experiments: Debouncer,
    complete_experiments: Debouncer,
    ready: watch::Sender<bool>,
}

#[derive(Default)]
struct ClientState {
    serialized: SerializedState,
    experiment_options: HashMap<String, ExperimentOptions>,
    experiments: HashMap<String, Arc<Experiment>>,
    queued_started: HashMap<String, Arc<Experiment>>,
    queued_completed: HashMap<String, Arc<Experiment>>,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// Fails if a base URL is invalid or if called outside of a Tokio runtime. Everything else
    /// (missing outcomes, unavailable storage) degrades gracefully.
    pub fn new(mut config: ClientConfig) -> Result<Client> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let environment = config.take_environment();

        let outcomes_url = parse_base_url(&config.outcomes_base_url)?
            .join(&format!("{}.tree.json", config.app_key))
            .map_err(Error::InvalidBaseUrl)?;
        let api_base_url = parse_base_url(&config.api_base_url)?;
        let start_experiments_url = api_base_url
            .join("startExperiments")
            .map_err(Error::InvalidBaseUrl)?;
        let complete_experiments_url = api_base_url
            .join("completeExperiments")
            .map_err(Error::InvalidBaseUrl)?;

        let state_key = storage_key(&config.app_key, "state");
        let mut serialized = SerializedState::load(&*environment, &state_key);
        if serialized.begin_session(chrono::Utc::now().timestamp_millis()) {
            environment.log(format_args!("starting a new session"));
        }

        let inner = Arc::new(ClientInner {
            app_key: config.app_key,
            outcomes_url,
            start_experiments_url,
            complete_experiments_url,
            state_key,
            environment,
            persist_state: Debouncer::new(runtime.clone(), PERSIST_STATE_DEBOUNCE),
            start_experiments: Debouncer::new(runtime.clone(), START_EXPERIMENTS_DEBOUNCE),
            complete_experiments: Debouncer::new(runtime.clone(), COMPLETE_EXPERIMENTS_DEBOUNCE),
            runtime,
            context: OnceLock::new(),
            state: Mutex::new(ClientState {
                serialized,
                ..ClientState::default()
            }),
            ready: watch::Sender::new(false),
        });
        inner.schedule_persist();

        let on_ready = config.on_ready;
        match config.outcomes {
            Some(outcomes) => {
                log::debug!(target: "autotune", app_key = inner.app_key.as_str(); "using pre-initialized outcomes");
                let outcomes = outcomes
                    .into_iter()
                    .map(|(name, outcome)| (name, TryParse::Parsed(outcome)))
                    .collect();
                inner.finish_init(outcomes);

                inner.environment.start_html_experiments();
                inner
                    .environment
                    .autocomplete(ClientInner::payoff_callback(&inner));

                inner.become_ready(on_ready);
            }
            None => {
                let fetching = Arc::clone(&inner);
                inner.runtime.spawn(async move {
                    let outcomes = fetching.fetch_outcomes().await;
                    fetching.finish_init(outcomes);
                    fetching.become_ready(on_ready);
                });
            }
        }

        Ok(Client(inner))
    }

    /// Get the experiment `name`, picking one of `option_names` for it on first use.
    ///
    /// The pick sticks for the rest of the client's lifetime, and across clients for as long as
    /// the session lasts. Later calls with the same name return the same experiment regardless of
    /// `option_names`.
    pub fn experiment<S: AsRef<str>>(&self, name: &str, option_names: &[S]) -> Arc<Experiment> {
        let options: Vec<String> = option_names
            .iter()
            .map(|option| option.as_ref().to_owned())
            .collect();
        self.0.experiment(name, options)
    }

    /// Complete every experiment this client has handed out with `payoff`.
    ///
    /// `then` runs once after the completions have been reported. If there is nothing to complete,
    /// nothing is reported and `then` is dropped.
    pub fn complete_defaults(&self, payoff: f64, then: Option<CompletionCallback>) {
        self.0.complete_defaults(payoff, then);
    }

    /// Wait until outcomes have been loaded (or failed to load).
    pub async fn wait_for_ready(&self) {
        let mut ready = self.0.ready.subscribe();
        // The sender lives as long as `self`, so this can't fail.
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// `true` once outcomes have been loaded (or failed to load).
    pub fn is_ready(&self) -> bool {
        *self.0.ready.borrow()
    }

    /// The application key this client was created with.
    pub fn app_key(&self) -> &str {
        &self.0.app_key
    }

    /// Client context that decision trees are evaluated against and that is reported with
    /// experiment starts. Computed on first use.
    pub fn context(&self) -> &ClientContext {
        self.0.context()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("app_key", &self.0.app_key)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        // Every update leaves the maps consistent, so poisoning is ignored.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn context(&self) -> &ClientContext {
        self.context.get_or_init(|| context::collect(&*self.environment))
    }

    fn payoff_callback(inner: &Arc<ClientInner>) -> PayoffCallback {
        let inner = Arc::downgrade(inner);
        Arc::new(move |payoff: f64| {
            if let Some(inner) = inner.upgrade() {
                inner.complete_defaults(payoff, None);
            }
        })
    }

    async fn fetch_outcomes(&self) -> FetchedOutcomes {
        log::debug!(target: "autotune", url:display = self.outcomes_url; "fetching outcomes");

        let result = self
            .environment
            .http(Method::Get, self.outcomes_url.clone(), None)
            .await
            .and_then(|body| {
                serde_json::from_value::<FetchedOutcomes>(body).map_err(Error::from)
            });

        match result {
            Ok(outcomes) => outcomes,
            Err(err) => {
                self.environment
                    .error(format_args!("could not get outcomes: {err}"));
                FetchedOutcomes::new()
            }
        }
    }

    /// Evaluate decision trees for every experiment that doesn't have options yet.
    fn finish_init(&self, outcomes: FetchedOutcomes) {
        let context = self.context();

        let mut evaluated = Vec::with_capacity(outcomes.len());
        for (name, outcome) in outcomes {
            match outcome {
                TryParse::Parsed(outcome) => {
                    let best = lookup_best_option(context, Some(&outcome));
                    evaluated.push((name, ExperimentOptions::from(best)));
                }
                TryParse::ParseFailed(_) => {
                    self.environment
                        .error(format_args!("could not finish init for experiment {name}"));
                }
            }
        }

        let mut state = self.lock_state();
        for (name, experiment_options) in evaluated {
            state
                .experiment_options
                .entry(name)
                .or_insert(experiment_options);
        }
    }

    fn become_ready(self: &Arc<Self>, on_ready: Option<ReadyCallback>) {
        self.ready.send_replace(true);
        log::debug!(target: "autotune", app_key = self.app_key.as_str(); "client is ready");

        if let Some(on_ready) = on_ready {
            on_ready(Client(Arc::clone(self)));
        }
    }

    fn experiment(self: &Arc<Self>, name: &str, options: Vec<String>) -> Arc<Experiment> {
        let mut state = self.lock_state();
        if let Some(experiment) = state.experiments.get(name) {
            return Arc::clone(experiment);
        }

        let experiment_options = state
            .experiment_options
            .entry(name.to_owned())
            .or_default()
            .clone();

        let decision = decide(
            &options,
            state.serialized.load_pick(name),
            &experiment_options,
            &mut rand::thread_rng(),
        );
        let Some(decision) = decision else {
            let experiment = Arc::new(Experiment::new(
                Arc::downgrade(self),
                name.to_owned(),
                options,
                String::new(),
                false,
            ));
            state
                .experiments
                .insert(name.to_owned(), Arc::clone(&experiment));
            drop(state);

            self.environment
                .error(format_args!("experiment {name} has no options to pick from"));
            return experiment;
        };

        if !decision.sticky {
            state.serialized.save_pick(name, &decision.pick);
        }

        let experiment = Arc::new(Experiment::new(
            Arc::downgrade(self),
            name.to_owned(),
            options,
            decision.pick,
            decision.picked_best,
        ));
        state
            .experiments
            .insert(name.to_owned(), Arc::clone(&experiment));
        state
            .queued_started
            .insert(name.to_owned(), Arc::clone(&experiment));
        drop(state);

        log::trace!(target: "autotune",
                    experiment = name,
                    pick = experiment.pick(),
                    picked_best = experiment.picked_best(),
                    sticky = decision.sticky;
                    "picked an option");

        if !decision.sticky {
            self.schedule_persist();
        }
        self.schedule_start_experiments();

        experiment
    }

    pub(crate) fn complete_experiment(
        self: &Arc<Self>,
        name: &str,
        then: Option<CompletionCallback>,
    ) {
        {
            let mut state = self.lock_state();
            let Some(experiment) = state.experiments.get(name).cloned() else {
                return;
            };
            if experiment.options().is_empty() {
                drop(state);
                self.environment.error(format_args!(
                    "experiment {name} has no options, not reporting its completion"
                ));
                return;
            }
            state.queued_completed.insert(name.to_owned(), experiment);
        }
        self.schedule_complete_experiments(then);
    }

    fn complete_defaults(self: &Arc<Self>, payoff: f64, then: Option<CompletionCallback>) {
        let mut queued = 0;
        {
            let mut state = self.lock_state();
            let state = &mut *state;
            for (name, experiment) in &state.experiments {
                if experiment.options().is_empty() {
                    continue;
                }
                experiment.set_payoff(payoff);
                state
                    .queued_completed
                    .insert(name.clone(), Arc::clone(experiment));
                queued += 1;
            }
        }
        if queued == 0 {
            log::debug!(target: "autotune", "no experiments to complete");
            return;
        }
        self.schedule_complete_experiments(then);
    }

    fn schedule_persist(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.persist_state.call(move || inner.persist());
    }

    fn persist(&self) {
        let serialized = self.lock_state().serialized.clone();
        if let Err(err) = serialized.save(&*self.environment, &self.state_key) {
            self.environment
                .error(format_args!("could not save state: {err}"));
        }
    }

    fn schedule_start_experiments(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.start_experiments
            .call(move || inner.flush_started_experiments());
    }

    fn flush_started_experiments(self: &Arc<Self>) {
        let started = std::mem::take(&mut self.lock_state().queued_started);
        if started.is_empty() {
            return;
        }

        let experiments = started
            .into_iter()
            .map(|(name, experiment)| {
                let record = StartedExperiment {
                    instance_key: experiment.key().to_string(),
                    options: experiment.options().to_vec(),
                    pick: experiment.pick().to_owned(),
                    picked_best: experiment.picked_best(),
                };
                (name, record)
            })
            .collect::<HashMap<_, _>>();
        let count = experiments.len();

        let request = StartExperimentsRequest {
            version: 2,
            app_key: &self.app_key,
            experiments,
            ctx: self.context(),
        };

        let inner = Arc::clone(self);
        self.post(self.start_experiments_url.clone(), &request, move |result| {
            match result {
                Ok(()) => {
                    log::debug!(target: "autotune", count; "reported started experiments");
                }
                Err(err) => inner
                    .environment
                    .error(format_args!("could not report started experiments: {err}")),
            }
        });
    }

    fn schedule_complete_experiments(self: &Arc<Self>, then: Option<CompletionCallback>) {
        let inner = Arc::clone(self);
        self.complete_experiments
            .call(move || inner.flush_completed_experiments(then));
    }

    fn flush_completed_experiments(self: &Arc<Self>, then: Option<CompletionCallback>) {
        let completed = std::mem::take(&mut self.lock_state().queued_completed);

        let experiments = completed
            .into_values()
            .filter_map(|experiment| {
                let payoff = experiment.payoff()?;
                let record = CompletedExperiment {
                    pick: experiment.pick().to_owned(),
                    payoff,
                };
                Some((experiment.key().to_string(), record))
            })
            .collect::<HashMap<_, _>>();
        let count = experiments.len();

        let request = CompleteExperimentsRequest {
            version: 1,
            app_key: &self.app_key,
            experiments,
        };

        let inner = Arc::clone(self);
        self.post(self.complete_experiments_url.clone(), &request, move |result| {
            match result {
                Ok(()) => {
                    log::debug!(target: "autotune", count; "reported completed experiments");
                }
                Err(err) => inner
                    .environment
                    .error(format_args!("could not report completed experiments: {err}")),
            }
            if let Some(then) = then {
                then();
            }
        });
    }

    /// Send `body` to `url` in the background and pass the outcome to `on_done`.
    fn post(
        &self,
        url: Url,
        body: &impl serde::Serialize,
        on_done: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        let body = match serde_json::to_value(body) {
            Ok(body) => body,
            Err(err) => {
                on_done(Err(err.into()));
                return;
            }
        };

        let response = self.environment.http(Method::Post, url, Some(body));
        self.runtime.spawn(async move {
            on_done(response.await.map(|_| ()));
        });
    }
}

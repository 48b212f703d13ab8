//! Convenience entry point for applications that use a single client.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    OnceLock,
};

use crate::{
    experiment::{CompletionCallback, DEFAULT_PAYOFF},
    Client, ClientConfig, Result,
};

/// A lazily initialized [`Client`] with shorthand helpers.
///
/// Helpers called before [`Autotune::initialize`] log an error and fall back to a fixed answer
/// instead of failing, so an application keeps working when Autotune is misconfigured.
///
/// # Examples
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> autotune::Result<()> {
/// use autotune::{Autotune, ClientConfig};
///
/// static AUTOTUNE: Autotune = Autotune::new();
///
/// AUTOTUNE.initialize(ClientConfig::from_app_key("app-key"))?;
///
/// let headline = AUTOTUNE.one_of("headline", &["Save time", "Save money"]);
/// let show_banner = AUTOTUNE.flip_coin("show-banner");
/// AUTOTUNE.complete(None, None);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Autotune {
    client: OnceLock<Client>,
    /// Set by the first `initialize` call; cleared again only if it fails.
    initializing: AtomicBool,
}

impl Autotune {
    /// Create an uninitialized instance.
    pub const fn new() -> Autotune {
        Autotune {
            client: OnceLock::new(),
            initializing: AtomicBool::new(false),
        }
    }

    /// Create the client. Initializing more than once keeps the first client and logs an error;
    /// the extra configuration is never turned into a client.
    ///
    /// If creating the client fails, the error is returned and `initialize` may be called again.
    pub fn initialize(&self, config: ClientConfig) -> Result<()> {
        if self
            .initializing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::error!(target: "autotune", "autotune initialized more than once");
            return Ok(());
        }

        match config.to_client() {
            Ok(client) => {
                // Only the call that won the flag gets here.
                let _ = self.client.set(client);
                Ok(())
            }
            Err(err) => {
                self.initializing.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    /// The client, if initialized.
    pub fn client(&self) -> Option<&Client> {
        self.client.get()
    }

    /// Pick `true` or `false` for experiment `name`. Returns `true` if not initialized.
    pub fn flip_coin(&self, name: &str) -> bool {
        let Some(client) = self.client.get() else {
            log::error!(target: "autotune", experiment = name; "autotune must be initialized before calling flip_coin");
            return true;
        };
        client.experiment(name, &["true", "false"]).pick() == "true"
    }

    /// Pick one of `options` for experiment `name`. Returns the first option if not initialized.
    pub fn one_of<S: AsRef<str>>(&self, name: &str, options: &[S]) -> String {
        let Some(client) = self.client.get() else {
            log::error!(target: "autotune", experiment = name; "autotune must be initialized before calling one_of");
            return options
                .first()
                .map(|option| option.as_ref().to_owned())
                .unwrap_or_default();
        };
        client.experiment(name, options).pick().to_owned()
    }

    /// Pick one of the labeled `options` for experiment `name` and return its value. Labels are
    /// what gets reported and remembered.
    ///
    /// Returns the first value if not initialized, and `None` if `options` is empty or the
    /// experiment was started earlier with different labels.
    ///
    /// ```
    /// # use autotune::Autotune;
    /// let autotune = Autotune::new();
    /// let price = autotune.one_of_labeled("price", &[("cheap", 5), ("premium", 20)]);
    /// assert_eq!(price, Some(&5));
    /// ```
    pub fn one_of_labeled<'a, T>(&self, name: &str, options: &'a [(&str, T)]) -> Option<&'a T> {
        let Some(client) = self.client.get() else {
            log::error!(target: "autotune", experiment = name; "autotune must be initialized before calling one_of");
            return options.first().map(|(_, value)| value);
        };

        let labels: Vec<&str> = options.iter().map(|(label, _)| *label).collect();
        let experiment = client.experiment(name, &labels);
        options
            .iter()
            .find(|(label, _)| *label == experiment.pick())
            .map(|(_, value)| value)
    }

    /// Complete every experiment picked so far with `payoff` (1 by default). `then` runs once the
    /// completions have been reported.
    pub fn complete(&self, payoff: Option<f64>, then: Option<CompletionCallback>) {
        let Some(client) = self.client.get() else {
            log::error!(target: "autotune", "autotune must be initialized before calling complete");
            return;
        };
        client.complete_defaults(payoff.unwrap_or(DEFAULT_PAYOFF), then);
    }
}

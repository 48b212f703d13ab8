//! Trailing-edge debouncing on a Tokio runtime.
use std::{sync::Mutex, time::Duration};

use tokio::{runtime::Handle, task::JoinHandle};

/// Runs the most recently scheduled action once no new action has been scheduled for `wait`.
///
/// Every call to [`Debouncer::call`] cancels the pending action (if it hasn't started yet) and
/// restarts the timer, so a burst of calls results in a single run of the last action.
pub(crate) struct Debouncer {
    wait: Duration,
    runtime: Handle,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub(crate) fn new(runtime: Handle, wait: Duration) -> Debouncer {
        Debouncer {
            wait,
            runtime,
            pending: Mutex::new(None),
        }
    }

    /// Schedule `action`, replacing any action that hasn't run yet.
    ///
    /// `action` runs synchronously on a runtime worker once the timer fires. Aborting only takes
    /// effect at the timer's await point, so an action that started always runs to completion.
    pub(crate) fn call(&self, action: impl FnOnce() + Send + 'static) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = pending.take() {
            previous.abort();
        }

        let wait = self.wait;
        *pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            action();
        }));
    }
}

//! Session state persisted in local storage: when the client was last initialized and which option
//! each experiment picked during the current session.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Environment, Result};

/// Picks are forgotten once the client hasn't been initialized for this long.
pub(crate) const SESSION_EXPIRES_AFTER_MS: i64 = 24 * 60 * 60 * 1000;

/// Serialized form of the session, stored under `autotune.v1.<appKey>.state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedState {
    /// Milliseconds since the Unix epoch.
    pub last_initialized: i64,
    /// Experiment name to picked option name.
    pub experiment_picks: HashMap<String, String>,
}

impl SerializedState {
    /// Load the state from storage. Any failure yields the default state.
    pub(crate) fn load(environment: &dyn Environment, key: &str) -> SerializedState {
        match SerializedState::try_load(environment, key) {
            Ok(Some(state)) => state,
            Ok(None) => SerializedState::default(),
            Err(err) => {
                environment.log(format_args!("could not load state: {err}"));
                SerializedState::default()
            }
        }
    }

    fn try_load(environment: &dyn Environment, key: &str) -> Result<Option<SerializedState>> {
        let Some(json) = environment.get_local_storage(key)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Save the state to storage.
    pub(crate) fn save(&self, environment: &dyn Environment, key: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        environment.set_local_storage(key, &json)
    }

    /// Mark the state as initialized at `now_ms`, clearing picks if the previous session has
    /// expired. Returns `true` if a new session began.
    pub(crate) fn begin_session(&mut self, now_ms: i64) -> bool {
        let expired = now_ms.saturating_sub(self.last_initialized) > SESSION_EXPIRES_AFTER_MS;
        if expired {
            self.experiment_picks.clear();
        }
        self.last_initialized = now_ms;
        expired
    }

    pub(crate) fn load_pick(&self, name: &str) -> Option<&str> {
        self.experiment_picks.get(name).map(String::as_str)
    }

    pub(crate) fn save_pick(&mut self, name: &str, pick: &str) {
        self.experiment_picks.insert(name.to_owned(), pick.to_owned());
    }
}

/// Storage key for `path` under `app_key`.
pub(crate) fn storage_key(app_key: &str, path: &str) -> String {
    format!("autotune.v1.{app_key}.{path}")
}

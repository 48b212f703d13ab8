use std::sync::Arc;

/// Represents a result type for operations in the Autotune SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Autotune SDK.
///
/// Errors never escape experiment selection or completion: those degrade to a random pick and log
/// instead. `Error` is returned by client construction and by [`Environment`](crate::Environment)
/// implementations, which the client recovers from.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The client was created outside of a Tokio runtime, so it has nowhere to run its timers.
    #[error("autotune client must be created inside a Tokio runtime")]
    NoRuntime,

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    Json(Arc<serde_json::Error>),

    /// An I/O error.
    #[error(transparent)]
    Io(Arc<std::io::Error>),

    /// Local storage is unavailable or refused the operation.
    #[error("local storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Json(Arc::new(value))
    }
}

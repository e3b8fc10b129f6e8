//! Crate-wide error types.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the component runtime.
///
/// Most of these never escape [`crate::runtime::ComponentRuntime`] — the
/// runtime catches them and synthesizes a [`crate::model::CheckerResult`]
/// instead (see §7 of the design doc). They exist so that the boundary
/// types (`Collector`, `Checker`, spec/config loaders) have something
/// concrete to return.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("spec catalog error: {0}")]
    Spec(String),

    #[error("collect failed: {0}")]
    Collect(String),

    #[error("native handle invalidated: {0}")]
    HandleInvalidated(String),

    #[error("checker {name} failed: {source}")]
    Checker {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("component {0} already registered")]
    AlreadyRegistered(String),

    #[error("config update rejected: expected {expected}, got {actual}")]
    ConfigTypeMismatch { expected: String, actual: String },
}

impl Error {
    /// True when this error class should be treated as a native-handle
    /// invalidation by the component runtime (§4.C).
    pub fn is_handle_invalidation(&self) -> bool {
        matches!(self, Error::HandleInvalidated(_))
    }
}

//! Fetch and binding error types.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Error recorded on a cache entry when a fetch fails.
///
/// Entries are shared between observers and shipped to the client in the
/// transfer state, so the error is cloneable and serializable and keeps
/// only a rendered message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FetchError {
    /// The fetcher (or the client behind it) rejected the request.
    #[error("fetch rejected: {0}")]
    Rejected(String),

    /// The response could not be turned into the bound value type.
    #[error("decode error: {0}")]
    Decode(String),

    /// The entry was marked as failed without a recorded cause.
    #[error("fetch failed without a recorded cause")]
    Unknown,
}

impl FetchError {
    /// Create a rejection from any displayable error.
    pub fn rejected(error: impl Display) -> Self {
        Self::Rejected(error.to_string())
    }

    /// Create a decode error from any displayable error.
    pub fn decode(error: impl Display) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<anyhow::Error> for FetchError {
    fn from(e: anyhow::Error) -> Self {
        FetchError::Rejected(format!("{e:#}"))
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Decode(e.to_string())
    }
}

/// Errors raised synchronously while setting up a binding.
///
/// These are programmer or configuration errors and are never recovered
/// into entry state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// The scope has been disposed.
    #[error("binding scope has been disposed; bindings must be created within a live scope")]
    ScopeDisposed,

    /// No content client was provided to the scope.
    #[error("no content client provided; call provide_client before binding queries")]
    MissingClient,

    /// No tokio runtime is running on the current thread.
    #[error("bindings must be created from within a tokio runtime")]
    NoRuntime,
}

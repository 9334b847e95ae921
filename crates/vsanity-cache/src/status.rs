//! Fetch status and execution side classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStatus {
    /// Entry exists but has never been fetched.
    #[default]
    Initialised,
    /// A fetch is in flight.
    Loading,
    /// Value was produced by a server-side fetch.
    #[serde(alias = "server loaded")]
    ServerLoaded,
    /// Value was produced by a client-side fetch.
    #[serde(alias = "client loaded")]
    ClientLoaded,
    /// The last fetch failed.
    Error,
}

impl FetchStatus {
    /// Get the wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialised => "initialised",
            Self::Loading => "loading",
            Self::ServerLoaded => "server-loaded",
            Self::ClientLoaded => "client-loaded",
            Self::Error => "error",
        }
    }

    /// Check if the entry holds a successfully fetched value.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::ServerLoaded | Self::ClientLoaded)
    }

    /// Check if the last fetch has finished, successfully or not.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::ServerLoaded | Self::ClientLoaded | Self::Error)
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a server-rendered application a binding runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    /// Server-side rendering.
    Server,
    /// Browser / hydrated client.
    #[default]
    Client,
}

impl ExecutionContext {
    /// Status assigned to an entry after a successful fetch on this side.
    pub fn loaded_status(&self) -> FetchStatus {
        match self {
            Self::Server => FetchStatus::ServerLoaded,
            Self::Client => FetchStatus::ClientLoaded,
        }
    }

    /// Check if this is the server side.
    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server)
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

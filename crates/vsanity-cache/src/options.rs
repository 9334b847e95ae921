//! De-duplication and fetch strategy policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::entry::CacheEntry;
use crate::status::FetchStatus;

/// Policy for suppressing redundant fetches of the same key.
///
/// Serialized the way it is written in configuration: `false`, `true`,
/// or a window in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "DeduplicateRepr", into = "DeduplicateRepr")]
pub enum Deduplicate {
    /// Every fetch issues a new request.
    #[default]
    Off,
    /// Join the in-flight request instead of starting another one.
    Always,
    /// Suppress fetches within this window of the entry's last update.
    Window(Duration),
}

impl Deduplicate {
    /// Create a windowed policy from milliseconds.
    pub fn window_ms(ms: u64) -> Self {
        Self::Window(Duration::from_millis(ms))
    }

    /// Decide whether a non-forced fetch of `entry` should be skipped.
    pub fn should_skip<T>(&self, entry: &CacheEntry<T>, now: Instant) -> bool {
        match self {
            Self::Off => false,
            Self::Always => entry.status == FetchStatus::Loading,
            Self::Window(window) => {
                !matches!(entry.status, FetchStatus::Initialised | FetchStatus::Error)
                    && entry
                        .touched
                        .is_some_and(|touched| now.saturating_duration_since(touched) < *window)
            }
        }
    }
}

impl From<bool> for Deduplicate {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::Always
        } else {
            Self::Off
        }
    }
}

impl From<Duration> for Deduplicate {
    fn from(window: Duration) -> Self {
        Self::Window(window)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DeduplicateRepr {
    Flag(bool),
    Millis(u64),
}

impl From<DeduplicateRepr> for Deduplicate {
    fn from(repr: DeduplicateRepr) -> Self {
        match repr {
            DeduplicateRepr::Flag(flag) => flag.into(),
            DeduplicateRepr::Millis(ms) => Self::window_ms(ms),
        }
    }
}

impl From<Deduplicate> for DeduplicateRepr {
    fn from(policy: Deduplicate) -> Self {
        match policy {
            Deduplicate::Off => Self::Flag(false),
            Deduplicate::Always => Self::Flag(true),
            Deduplicate::Window(window) => Self::Millis(window.as_millis() as u64),
        }
    }
}

/// Which side of the application fetches a binding's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Fetch on the server and refetch after hydration.
    #[default]
    Both,
    /// Do not refetch on the client once the server produced a value.
    Server,
    /// Skip server-side fetching entirely.
    Client,
}

impl Strategy {
    /// Check if server prefetch and hydration are enabled.
    pub fn allows_ssr(&self) -> bool {
        !matches!(self, Self::Client)
    }
}

/// Options for a cache binding.
#[derive(Debug, Clone)]
pub struct CacheOptions<T> {
    /// Value reported before any successful fetch.
    pub initial_value: T,
    /// De-duplication policy.
    pub deduplicate: Deduplicate,
    /// Server/client fetch strategy.
    pub strategy: Strategy,
}

impl<T: Default> Default for CacheOptions<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> CacheOptions<T> {
    /// Create options with the given initial value.
    pub fn new(initial_value: T) -> Self {
        Self {
            initial_value,
            deduplicate: Deduplicate::Off,
            strategy: Strategy::Both,
        }
    }

    /// Set the de-duplication policy.
    pub fn with_deduplicate(mut self, deduplicate: impl Into<Deduplicate>) -> Self {
        self.deduplicate = deduplicate.into();
        self
    }

    /// Set the fetch strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
}

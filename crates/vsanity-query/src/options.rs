//! Query binding options.

use serde::{Deserialize, Serialize};
use vsanity_cache::{CacheOptions, Deduplicate, Strategy};

use crate::client::ListenOptions;

/// Whether, and how, a query follows live updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListenSetting {
    /// Listen with default options, or not at all.
    Enabled(bool),
    /// Listen with these options.
    Configured(ListenOptions),
}

impl Default for ListenSetting {
    fn default() -> Self {
        Self::Enabled(false)
    }
}

impl ListenSetting {
    /// Options to listen with, if listening is on.
    pub fn options(&self) -> Option<ListenOptions> {
        match self {
            Self::Enabled(true) => Some(ListenOptions::default()),
            Self::Enabled(false) => None,
            Self::Configured(options) => Some(options.clone()),
        }
    }
}

impl From<bool> for ListenSetting {
    fn from(enabled: bool) -> Self {
        Self::Enabled(enabled)
    }
}

impl From<ListenOptions> for ListenSetting {
    fn from(options: ListenOptions) -> Self {
        Self::Configured(options)
    }
}

/// Options for a query binding. Unset fields fall back to scope defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryOptions {
    /// De-duplication policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduplicate: Option<Deduplicate>,
    /// Server/client fetch strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    /// Live update subscription.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<ListenSetting>,
}

impl QueryOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the de-duplication policy.
    pub fn with_deduplicate(mut self, deduplicate: impl Into<Deduplicate>) -> Self {
        self.deduplicate = Some(deduplicate.into());
        self
    }

    /// Set the fetch strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Set live update behavior.
    pub fn with_listen(mut self, listen: impl Into<ListenSetting>) -> Self {
        self.listen = Some(listen.into());
        self
    }

    /// Overlay `other` on top of these options; fields set in `other` win.
    pub fn merge(&self, other: &QueryOptions) -> QueryOptions {
        QueryOptions {
            deduplicate: other.deduplicate.or(self.deduplicate),
            strategy: other.strategy.or(self.strategy),
            listen: other.listen.clone().or_else(|| self.listen.clone()),
        }
    }

    /// Options to listen with, if listening is on.
    pub fn listen_options(&self) -> Option<ListenOptions> {
        self.listen.as_ref().and_then(ListenSetting::options)
    }

    /// Cache options for a binding with this initial value.
    pub fn cache_options<T>(&self, initial_value: T) -> CacheOptions<T> {
        CacheOptions::new(initial_value)
            .with_deduplicate(self.deduplicate.unwrap_or_default())
            .with_strategy(self.strategy.unwrap_or_default())
    }
}

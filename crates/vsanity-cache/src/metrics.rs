//! Fetch activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters for a single cache instance.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    started: AtomicU64,
    deduplicated: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    superseded: AtomicU64,
    hydrated: AtomicU64,
    patched: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Fetcher invocations started.
    pub fetches_started: u64,
    /// Fetches suppressed or joined by de-duplication.
    pub fetches_deduplicated: u64,
    /// Fetches that settled successfully and were applied.
    pub fetches_succeeded: u64,
    /// Fetches that failed and were applied.
    pub fetches_failed: u64,
    /// Settlements discarded because a newer fetch had started.
    pub settlements_superseded: u64,
    /// Entries restored from transfer state.
    pub entries_hydrated: u64,
    /// Imperative `set_cache` patches.
    pub entries_patched: u64,
}

impl CacheMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_superseded(&self) {
        self.superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hydrated(&self) {
        self.hydrated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_patched(&self) {
        self.patched.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fetches_started: self.started.load(Ordering::Relaxed),
            fetches_deduplicated: self.deduplicated.load(Ordering::Relaxed),
            fetches_succeeded: self.succeeded.load(Ordering::Relaxed),
            fetches_failed: self.failed.load(Ordering::Relaxed),
            settlements_superseded: self.superseded.load(Ordering::Relaxed),
            entries_hydrated: self.hydrated.load(Ordering::Relaxed),
            entries_patched: self.patched.load(Ordering::Relaxed),
        }
    }
}

//! Key-addressed fetch cache with request de-duplication.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::entry::{CacheEntry, EntryPatch};
use crate::error::FetchError;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::options::Deduplicate;
use crate::status::{ExecutionContext, FetchStatus};

/// A fetch that any number of callers can await for the same settlement.
pub type PendingFetch<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

/// Asynchronous loader for the value stored under a key.
pub type Fetcher<T> =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;

/// Wrap an async closure as a [`Fetcher`].
pub fn fetcher<T, F, Fut>(f: F) -> Fetcher<T>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    Arc::new(move |key: String| f(key).boxed())
}

/// Parameters of a single fetch.
pub struct FetchRequest<'a, T> {
    /// Key to fetch.
    pub key: &'a str,
    /// Value used if the entry has to be created.
    pub initial: &'a T,
    /// De-duplication policy for this call.
    pub deduplicate: Deduplicate,
    /// Side the fetch runs on; decides the success status.
    pub execution: ExecutionContext,
    /// Bypass de-duplication.
    pub force: bool,
}

impl<'a, T> FetchRequest<'a, T> {
    /// Create a client-side, non-forced request without de-duplication.
    pub fn new(key: &'a str, initial: &'a T) -> Self {
        Self {
            key,
            initial,
            deduplicate: Deduplicate::Off,
            execution: ExecutionContext::Client,
            force: false,
        }
    }

    /// Set the de-duplication policy.
    pub fn with_deduplicate(mut self, deduplicate: Deduplicate) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Set the execution side.
    pub fn with_execution(mut self, execution: ExecutionContext) -> Self {
        self.execution = execution;
        self
    }

    /// Bypass de-duplication.
    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

struct InFlight<T> {
    generation: u64,
    future: PendingFetch<T>,
}

struct Slot<T> {
    state: watch::Sender<CacheEntry<T>>,
    in_flight: Option<InFlight<T>>,
}

impl<T> Slot<T> {
    fn new(entry: CacheEntry<T>) -> Self {
        let (state, _) = watch::channel(entry);
        Self {
            state,
            in_flight: None,
        }
    }
}

struct CacheInner<T> {
    slots: DashMap<String, Slot<T>>,
    generation: AtomicU64,
    metrics: CacheMetrics,
}

/// Process-wide cache of fetched values, addressed by string key.
///
/// Cloning yields another handle to the same cache. Entries are created
/// lazily and live as long as the cache. Every entry publishes its state
/// through a watch channel so bindings can observe it.
pub struct FetchCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for FetchCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for FetchCache<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(CacheInner {
                slots: DashMap::new(),
                generation: AtomicU64::new(0),
                metrics: CacheMetrics::new(),
            }),
        }
    }
}

impl<T> fmt::Debug for FetchCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCache")
            .field("entries", &self.inner.slots.len())
            .finish()
    }
}

impl<T> FetchCache<T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    /// Check if the cache has no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Check if an entry exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.slots.contains_key(key)
    }

    /// Current status of `key`, if the entry exists.
    pub fn status(&self, key: &str) -> Option<FetchStatus> {
        self.inner.slots.get(key).map(|slot| slot.state.borrow().status)
    }

    /// Counters for this cache.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl<T> FetchCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn slot_mut(&self, key: &str, initial: &T) -> RefMut<'_, String, Slot<T>> {
        self.inner
            .slots
            .entry(key.to_owned())
            .or_insert_with(|| Slot::new(CacheEntry::initial(initial.clone())))
    }

    /// Create an `Initialised` entry for `key` if none exists.
    ///
    /// Returns `true` if the entry is fresh: just created, or never fetched.
    pub fn verify_key(&self, key: &str, initial: &T) -> bool {
        match self.inner.slots.entry(key.to_owned()) {
            Entry::Occupied(occupied) => {
                occupied.get().state.borrow().status == FetchStatus::Initialised
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(CacheEntry::initial(initial.clone())));
                trace!(key, "cache entry created");
                true
            }
        }
    }

    /// Snapshot of the entry for `key`, if it exists.
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        self.inner
            .slots
            .get(key)
            .map(|slot| slot.state.borrow().clone())
    }

    /// Snapshot of the entry for `key`, creating it if needed.
    pub fn entry_or_init(&self, key: &str, initial: &T) -> CacheEntry<T> {
        self.slot_mut(key, initial).state.borrow().clone()
    }

    /// Subscribe to changes of the entry for `key`, creating it if needed.
    pub fn watch(&self, key: &str, initial: &T) -> watch::Receiver<CacheEntry<T>> {
        self.slot_mut(key, initial).state.subscribe()
    }

    /// The outstanding fetch for `key`, if any.
    pub fn pending(&self, key: &str) -> Option<PendingFetch<T>> {
        self.inner
            .slots
            .get(key)
            .and_then(|slot| slot.in_flight.as_ref().map(|f| f.future.clone()))
    }

    /// Check if a fetch is outstanding for `key`.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner
            .slots
            .get(key)
            .is_some_and(|slot| slot.in_flight.is_some())
    }

    /// Run the fetcher for a key, subject to de-duplication.
    ///
    /// A skipped fetch returns the in-flight request if there is one, or
    /// an already resolved future holding the current value. A started
    /// fetch puts the entry into `Loading` and issues the request before
    /// returning. It is then spawned onto the current tokio runtime, so it
    /// progresses even if the returned future is dropped.
    pub fn fetch(&self, request: FetchRequest<'_, T>, fetcher: &Fetcher<T>) -> PendingFetch<T> {
        let FetchRequest {
            key,
            initial,
            deduplicate,
            execution,
            force,
        } = request;

        let mut slot = self.slot_mut(key, initial);

        if !force && deduplicate.should_skip(&*slot.state.borrow(), Instant::now()) {
            self.inner.metrics.record_deduplicated();

            if let Some(in_flight) = &slot.in_flight {
                debug!(key, generation = in_flight.generation, "joining in-flight fetch");
                return in_flight.future.clone();
            }

            debug!(key, "fetch suppressed by de-duplication");
            let value = slot.state.borrow().value.clone();
            return future::ready(Ok(value)).boxed().shared();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cache = Arc::downgrade(&self.inner);
        let owned_key = key.to_owned();
        let request = fetcher(owned_key.clone()).shared();

        let pending = {
            let request = request.clone();
            async move {
                let result = request.await;
                if let Some(inner) = Weak::upgrade(&cache) {
                    FetchCache { inner }.settle(&owned_key, generation, execution, &result);
                }
                result
            }
            .boxed()
            .shared()
        };

        if let Some(previous) = slot.in_flight.replace(InFlight {
            generation,
            future: pending.clone(),
        }) {
            debug!(
                key,
                previous = previous.generation,
                generation,
                "fetch superseding in-flight request"
            );
        }
        slot.state.send_modify(CacheEntry::begin_loading);
        drop(slot);

        self.inner.metrics.record_started();
        debug!(key, generation, %execution, force, "fetch started");

        // Issue the request now; its settlement is still applied asynchronously.
        let _ = request.now_or_never();

        if let Ok(runtime) = Handle::try_current() {
            runtime.spawn(pending.clone().map(|_| ()));
        }

        pending
    }

    fn settle(
        &self,
        key: &str,
        generation: u64,
        execution: ExecutionContext,
        result: &Result<T, FetchError>,
    ) {
        let Some(mut slot) = self.inner.slots.get_mut(key) else {
            return;
        };

        let current = slot.in_flight.as_ref().map(|f| f.generation);
        if current != Some(generation) {
            self.inner.metrics.record_superseded();
            debug!(key, generation, ?current, "discarding superseded settlement");
            return;
        }

        slot.in_flight = None;
        match result {
            Ok(value) => {
                let status = execution.loaded_status();
                slot.state
                    .send_modify(|entry| entry.resolve(value.clone(), status));
                self.inner.metrics.record_succeeded();
                debug!(key, generation, %status, "fetch settled");
            }
            Err(error) => {
                slot.state.send_modify(|entry| entry.reject(error.clone()));
                self.inner.metrics.record_failed();
                warn!(key, generation, %error, "fetch failed");
            }
        }
    }

    /// Overwrite fields of an entry without running the fetcher.
    ///
    /// If the patch moves the entry out of `Loading`, the outstanding
    /// fetch is dropped and its settlement will be discarded.
    pub fn set_cache(&self, key: &str, initial: &T, patch: EntryPatch<T>) {
        let mut slot = self.slot_mut(key, initial);
        slot.state.send_modify(|entry| entry.apply(patch));

        let status = slot.state.borrow().status;
        if status != FetchStatus::Loading {
            if let Some(dropped) = slot.in_flight.take() {
                debug!(key, generation = dropped.generation, "patch superseded in-flight fetch");
            }
        }
        drop(slot);

        self.inner.metrics.record_patched();
        trace!(key, %status, "cache entry patched");
    }

    /// Restore an entry produced elsewhere, typically by server rendering.
    ///
    /// Only absent or never-fetched entries are replaced; returns whether
    /// the entry was restored.
    pub fn hydrate(&self, key: &str, entry: CacheEntry<T>) -> bool {
        let status = entry.status;

        match self.inner.slots.entry(key.to_owned()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(entry));
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get().state.borrow().status != FetchStatus::Initialised {
                    trace!(key, "hydration skipped for live entry");
                    return false;
                }
                let slot = occupied.get_mut();
                slot.in_flight = None;
                slot.state.send_replace(entry);
            }
        }

        self.inner.metrics.record_hydrated();
        debug!(key, %status, "cache entry hydrated");
        true
    }
}

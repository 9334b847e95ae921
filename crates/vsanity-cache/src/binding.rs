//! Reactive bindings of a (possibly changing) key to a cache entry.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::cache::{FetchCache, FetchRequest, Fetcher, PendingFetch};
use crate::entry::{CacheEntry, EntryPatch};
use crate::error::{BindingError, FetchError};
use crate::options::{CacheOptions, Deduplicate, Strategy};
use crate::scope::Scope;
use crate::status::{ExecutionContext, FetchStatus};
use crate::transfer::HydratedEntry;

/// Values that can be cached and handed from server to client.
pub trait CacheValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

type KeyMap = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Mutable key source that bindings follow.
#[derive(Clone)]
pub struct KeyRef {
    sender: Arc<watch::Sender<String>>,
}

impl KeyRef {
    /// Create a key source with an initial key.
    pub fn new(initial: impl Into<String>) -> Self {
        let (sender, _) = watch::channel(initial.into());
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Current key.
    pub fn get(&self) -> String {
        self.sender.borrow().clone()
    }

    /// Change the key; bindings are only notified if it actually differs.
    pub fn set(&self, key: impl Into<String>) {
        let key = key.into();
        self.sender.send_if_modified(|current| {
            if *current == key {
                false
            } else {
                *current = key;
                true
            }
        });
    }

    /// Subscribe to key changes.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.sender.subscribe()
    }
}

impl fmt::Debug for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyRef").field(&*self.sender.borrow()).finish()
    }
}

/// Key a binding is attached to.
#[derive(Clone)]
pub enum BoundKey {
    /// Fixed key.
    Static(String),
    /// Key that follows a [`KeyRef`], optionally transformed.
    Reactive {
        /// Raw key source.
        source: watch::Receiver<String>,
        /// Transformation applied to every raw key.
        map: Option<KeyMap>,
    },
}

impl BoundKey {
    /// Follow `source` through a transformation.
    pub fn mapped<F>(source: &KeyRef, map: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::Reactive {
            source: source.subscribe(),
            map: Some(Arc::new(map)),
        }
    }

    /// Apply a further transformation to every resolved key.
    pub fn map_key<F>(self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        match self {
            Self::Static(key) => Self::Static(f(&key)),
            Self::Reactive { source, map } => {
                let composed: KeyMap = match map {
                    Some(inner) => Arc::new(move |raw: &str| f(&inner(raw))),
                    None => Arc::new(f),
                };
                Self::Reactive {
                    source,
                    map: Some(composed),
                }
            }
        }
    }

    /// Resolve the current key.
    pub fn current(&self) -> String {
        match self {
            Self::Static(key) => key.clone(),
            Self::Reactive { source, map } => resolve(map, &source.borrow()),
        }
    }

    /// Check if the key can change.
    pub fn is_reactive(&self) -> bool {
        matches!(self, Self::Reactive { .. })
    }

    fn into_source(self) -> (String, Option<KeySource>) {
        match self {
            Self::Static(key) => (key, None),
            Self::Reactive { mut source, map } => {
                let key = resolve(&map, &source.borrow_and_update());
                (key, Some(KeySource { source, map }))
            }
        }
    }
}

fn resolve(map: &Option<KeyMap>, raw: &str) -> String {
    match map {
        Some(map) => map(raw),
        None => raw.to_owned(),
    }
}

impl fmt::Debug for BoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(key) => f.debug_tuple("Static").field(key).finish(),
            Self::Reactive { map, .. } => f
                .debug_struct("Reactive")
                .field("current", &self.current())
                .field("mapped", &map.is_some())
                .finish(),
        }
    }
}

impl From<&str> for BoundKey {
    fn from(key: &str) -> Self {
        Self::Static(key.to_owned())
    }
}

impl From<String> for BoundKey {
    fn from(key: String) -> Self {
        Self::Static(key)
    }
}

impl From<&KeyRef> for BoundKey {
    fn from(key: &KeyRef) -> Self {
        Self::Reactive {
            source: key.subscribe(),
            map: None,
        }
    }
}

impl From<KeyRef> for BoundKey {
    fn from(key: KeyRef) -> Self {
        Self::from(&key)
    }
}

struct KeySource {
    source: watch::Receiver<String>,
    map: Option<KeyMap>,
}

/// Wait for the next resolved key; `None` once the source is gone.
async fn next_key(source: &mut Option<KeySource>) -> Option<String> {
    match source {
        Some(KeySource { source, map }) => match source.changed().await {
            Ok(()) => {
                let raw = source.borrow_and_update().clone();
                Some(resolve(map, &raw))
            }
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

struct BindingCore<T> {
    cache: FetchCache<T>,
    fetcher: Fetcher<T>,
    initial: T,
    deduplicate: Deduplicate,
    strategy: Strategy,
    execution: ExecutionContext,
    key: watch::Sender<String>,
    view: watch::Sender<CacheEntry<T>>,
}

impl<T: CacheValue> BindingCore<T> {
    fn request<'a>(&'a self, key: &'a str, force: bool) -> FetchRequest<'a, T> {
        FetchRequest::new(key, &self.initial)
            .with_deduplicate(self.deduplicate)
            .with_execution(self.execution)
            .forced(force)
    }

    /// Fetch triggered by binding or by a key change on the client.
    fn auto_fetch(&self, key: &str) {
        if self.strategy == Strategy::Server
            && self.cache.status(key) == Some(FetchStatus::ServerLoaded)
        {
            trace!(key, "server-loaded entry kept, skipping client fetch");
            return;
        }
        let force = self.cache.verify_key(key, &self.initial);
        drop(self.cache.fetch(self.request(key, force), &self.fetcher));
    }

    fn restore(&self, scope: &Scope, key: &str) {
        let Some(captured) = scope.transfer_state().get(key) else {
            return;
        };
        match captured.into_entry::<T>() {
            Ok(entry) => {
                self.cache.hydrate(key, entry);
            }
            Err(error) => warn!(key, %error, "ignoring undecodable transfer state"),
        }
    }

    fn retarget(&self, scope: &Scope, key: String) -> watch::Receiver<CacheEntry<T>> {
        debug!(key = %key, "binding retargeted");
        let entry = self.cache.watch(&key, &self.initial);
        if !self.execution.is_server() {
            if self.strategy.allows_ssr() {
                self.restore(scope, &key);
            }
            self.auto_fetch(&key);
        }
        self.key.send_replace(key);
        entry
    }
}

async fn drive<T: CacheValue>(
    core: Arc<BindingCore<T>>,
    scope: Scope,
    mut source: Option<KeySource>,
    mut entry: watch::Receiver<CacheEntry<T>>,
) {
    loop {
        tokio::select! {
            next = next_key(&mut source) => match next {
                Some(key) => {
                    if key == *core.key.borrow() {
                        continue;
                    }
                    entry = core.retarget(&scope, key);
                }
                None => {
                    source = None;
                    continue;
                }
            },
            changed = entry.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let snapshot = entry.borrow_and_update().clone();
        core.view.send_replace(snapshot);
    }
}

struct DriverGuard(AbortHandle);

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Live view of the cache entry for a binding's current key.
///
/// Cloning yields another handle to the same binding. The background task
/// that follows key changes stops when the last handle is dropped or the
/// owning scope is disposed.
pub struct CacheBinding<T> {
    core: Arc<BindingCore<T>>,
    _driver: Arc<DriverGuard>,
}

impl<T> Clone for CacheBinding<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _driver: Arc::clone(&self._driver),
        }
    }
}

impl<T> fmt::Debug for CacheBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBinding")
            .field("key", &*self.core.key.borrow())
            .field("execution", &self.core.execution)
            .field("strategy", &self.core.strategy)
            .finish()
    }
}

impl<T: CacheValue> CacheBinding<T> {
    /// Key the binding is attached to.
    ///
    /// Follows the key source once the binding has retargeted, and stays
    /// put after the owning scope is disposed.
    pub fn key(&self) -> String {
        self.core.key.borrow().clone()
    }

    /// Snapshot of the entry for the current key.
    pub fn entry(&self) -> CacheEntry<T> {
        self.core.cache.entry_or_init(&self.key(), &self.core.initial)
    }

    /// Current value.
    pub fn data(&self) -> T {
        self.entry().value
    }

    /// Current status.
    pub fn status(&self) -> FetchStatus {
        self.entry().status
    }

    /// Error from the last failed fetch of the current key.
    pub fn error(&self) -> Option<FetchError> {
        self.entry().error
    }

    /// Run the fetcher for `query`, or the current key if `None`.
    ///
    /// De-duplication applies unless `force` is set. The returned future
    /// yields the settled value or the fetch error; the entry itself
    /// records the outcome either way.
    pub fn fetch(&self, query: Option<&str>, force: bool) -> PendingFetch<T> {
        let key = query.map_or_else(|| self.key(), str::to_owned);
        self.core
            .cache
            .fetch(self.core.request(&key, force), &self.core.fetcher)
    }

    /// Patch the entry for the current key.
    pub fn set_cache(&self, patch: EntryPatch<T>) {
        self.set_cache_for(&self.key(), patch);
    }

    /// Patch the entry for another key.
    pub fn set_cache_for(&self, key: &str, patch: EntryPatch<T>) {
        self.core.cache.set_cache(key, &self.core.initial, patch);
    }

    /// Wait for the outstanding fetch of the current key, if any, and
    /// return the resulting entry.
    pub async fn settled(&self) -> CacheEntry<T> {
        if let Some(pending) = self.core.cache.pending(&self.key()) {
            let _ = pending.await;
        }
        self.entry()
    }

    /// Subscribe to the entry of the current key, following key changes.
    pub fn subscribe(&self) -> watch::Receiver<CacheEntry<T>> {
        self.core.view.subscribe()
    }

    /// Subscribe to the key the binding is attached to.
    pub fn watch_key(&self) -> watch::Receiver<String> {
        self.core.key.subscribe()
    }

    /// Cache backing the binding.
    pub fn cache(&self) -> &FetchCache<T> {
        &self.core.cache
    }

    /// Value reported before any successful fetch.
    pub fn initial_value(&self) -> &T {
        &self.core.initial
    }

    /// Side the binding runs on.
    pub fn execution(&self) -> ExecutionContext {
        self.core.execution
    }
}

/// Bind a key to a cache entry.
///
/// On the client the entry is restored from transfer state when allowed by
/// the strategy, then fetched unless de-duplication or strategy says
/// otherwise. On the server nothing is fetched immediately; a prefetch
/// hook is registered on the scope instead, and its result is recorded in
/// the transfer state.
///
/// Must be called inside a tokio runtime, in a live scope.
pub fn use_cache<T: CacheValue>(
    scope: &Scope,
    cache: &FetchCache<T>,
    key: impl Into<BoundKey>,
    fetcher: Fetcher<T>,
    options: CacheOptions<T>,
) -> Result<CacheBinding<T>, BindingError> {
    scope.ensure_live()?;
    let runtime = Handle::try_current().map_err(|_| BindingError::NoRuntime)?;

    let bound: BoundKey = key.into();
    let (key, source) = bound.into_source();
    let execution = scope.execution();
    let CacheOptions {
        initial_value,
        deduplicate,
        strategy,
    } = options;

    let (key_tx, _) = watch::channel(key.clone());
    let (view, _) = watch::channel(CacheEntry::initial(initial_value.clone()));
    let core = Arc::new(BindingCore {
        cache: cache.clone(),
        fetcher,
        initial: initial_value,
        deduplicate,
        strategy,
        execution,
        key: key_tx,
        view,
    });

    debug!(key = %key, %execution, ?strategy, "binding created");

    let mut entry = cache.watch(&key, &core.initial);
    if execution.is_server() {
        if strategy.allows_ssr() {
            register_prefetch(scope, &core, key.clone());
        }
    } else {
        if strategy.allows_ssr() {
            core.restore(scope, &key);
        }
        core.auto_fetch(&key);
    }
    core.view.send_replace(entry.borrow_and_update().clone());

    let task = runtime.spawn(drive(Arc::clone(&core), scope.clone(), source, entry));
    scope.track_task(task.abort_handle());

    Ok(CacheBinding {
        core,
        _driver: Arc::new(DriverGuard(task.abort_handle())),
    })
}

fn register_prefetch<T: CacheValue>(scope: &Scope, core: &Arc<BindingCore<T>>, key: String) {
    let core = Arc::clone(core);
    let transfer = scope.transfer_state().clone();

    scope.on_server_prefetch(async move {
        let force = core.cache.verify_key(&key, &core.initial);
        let _ = core.cache.fetch(core.request(&key, force), &core.fetcher).await;

        let Some(entry) = core.cache.get(&key) else {
            return;
        };
        match HydratedEntry::from_entry(&entry) {
            Ok(captured) => {
                trace!(key = %key, status = %entry.status, "captured entry for transfer");
                transfer.insert(key, captured);
            }
            Err(error) => warn!(key = %key, %error, "entry could not be captured for transfer"),
        }
    });
}

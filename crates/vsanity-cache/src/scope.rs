//! Binding scopes: lifecycle, provide/inject and server prefetch.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{join_all, BoxFuture, FutureExt};
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::error::BindingError;
use crate::status::ExecutionContext;
use crate::transfer::TransferState;

type Provision = Arc<dyn Any + Send + Sync>;
type Cleanup = Box<dyn FnOnce() + Send>;

struct ScopeInner {
    execution: ExecutionContext,
    parent: Option<Scope>,
    transfer: TransferState,
    provisions: Mutex<HashMap<TypeId, Provision>>,
    prefetch: Mutex<Vec<BoxFuture<'static, ()>>>,
    cleanups: Mutex<Vec<Cleanup>>,
    tasks: Mutex<Vec<AbortHandle>>,
    disposed: AtomicBool,
}

/// Context that bindings are created in.
///
/// A scope knows which side it runs on, carries values provided by the
/// application, collects server prefetch work and owns the background
/// tasks of its bindings. Disposing a scope stops those tasks.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scope {
    fn with_parts(
        execution: ExecutionContext,
        parent: Option<Scope>,
        transfer: TransferState,
    ) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                execution,
                parent,
                transfer,
                provisions: Mutex::new(HashMap::new()),
                prefetch: Mutex::new(Vec::new()),
                cleanups: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a root scope for server-side rendering.
    pub fn server() -> Self {
        Self::with_parts(ExecutionContext::Server, None, TransferState::new())
    }

    /// Create a root client scope with no transferred state.
    pub fn client() -> Self {
        Self::with_parts(ExecutionContext::Client, None, TransferState::new())
    }

    /// Create a root client scope that hydrates from server state.
    pub fn client_with_state(state: TransferState) -> Self {
        Self::with_parts(ExecutionContext::Client, None, state)
    }

    /// Create a nested scope.
    ///
    /// The child sees everything provided to its ancestors, shares their
    /// transfer state and is disposed together with the parent.
    pub fn child(&self) -> Self {
        let child = Self::with_parts(
            self.inner.execution,
            Some(self.clone()),
            self.inner.transfer.clone(),
        );

        let weak: Weak<ScopeInner> = Arc::downgrade(&child.inner);
        self.on_dispose(move || {
            if let Some(inner) = weak.upgrade() {
                Scope { inner }.dispose();
            }
        });

        child
    }

    /// Side this scope runs on.
    pub fn execution(&self) -> ExecutionContext {
        self.inner.execution
    }

    /// Check if this scope renders on the server.
    pub fn is_server(&self) -> bool {
        self.inner.execution.is_server()
    }

    /// State shared between server rendering and client hydration.
    pub fn transfer_state(&self) -> &TransferState {
        &self.inner.transfer
    }

    /// Check if the scope has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Fail if the scope can no longer host bindings.
    pub fn ensure_live(&self) -> Result<(), BindingError> {
        if self.is_disposed() {
            Err(BindingError::ScopeDisposed)
        } else {
            Ok(())
        }
    }

    /// Make a value available to this scope and its descendants.
    ///
    /// Providing the same type again replaces the earlier value.
    pub fn provide<V>(&self, value: V) -> Arc<V>
    where
        V: Send + Sync + 'static,
    {
        let value = Arc::new(value);
        let provision: Provision = value.clone();
        lock(&self.inner.provisions).insert(TypeId::of::<V>(), provision);
        value
    }

    /// Look up a provided value, searching ancestors from nearest to root.
    pub fn inject<V>(&self) -> Option<Arc<V>>
    where
        V: Send + Sync + 'static,
    {
        let mut scope = Some(self);
        while let Some(current) = scope {
            let found = lock(&current.inner.provisions)
                .get(&TypeId::of::<V>())
                .cloned();
            if let Some(found) = found {
                return found.downcast::<V>().ok();
            }
            scope = current.inner.parent.as_ref();
        }
        None
    }

    fn root(&self) -> &Scope {
        let mut scope = self;
        while let Some(parent) = &scope.inner.parent {
            scope = parent;
        }
        scope
    }

    /// Register work that must finish before the server renders.
    ///
    /// Hooks from nested scopes are collected on the root scope.
    pub fn on_server_prefetch<F>(&self, hook: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_disposed() {
            return;
        }
        lock(&self.root().inner.prefetch).push(hook.boxed());
    }

    /// Number of prefetch hooks waiting to run.
    pub fn pending_prefetch(&self) -> usize {
        lock(&self.root().inner.prefetch).len()
    }

    /// Run all registered prefetch hooks to completion.
    ///
    /// Hooks registered while others are running are picked up too.
    pub async fn run_server_prefetch(&self) {
        let root = self.root();
        let mut rounds = 0usize;
        loop {
            let hooks = mem::take(&mut *lock(&root.inner.prefetch));
            if hooks.is_empty() {
                break;
            }
            rounds += 1;
            debug!(hooks = hooks.len(), round = rounds, "running server prefetch");
            join_all(hooks).await;
        }
    }

    /// Register a cleanup to run when the scope is disposed.
    ///
    /// Runs immediately if the scope is already disposed.
    pub fn on_dispose<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_disposed() {
            cleanup();
            return;
        }
        lock(&self.inner.cleanups).push(Box::new(cleanup));
    }

    /// Tie a background task to the scope; it is aborted on dispose.
    ///
    /// Handles of tasks that already finished are dropped on every call, so
    /// a long-lived scope only holds the tasks that are still running.
    pub fn track_task(&self, task: AbortHandle) {
        if self.is_disposed() {
            task.abort();
            return;
        }
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|tracked| !tracked.is_finished());
        tasks.push(task);
        trace!(tasks = tasks.len(), "task tracked");
    }

    /// Number of tracked tasks that are still running.
    pub fn active_tasks(&self) -> usize {
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|tracked| !tracked.is_finished());
        tasks.len()
    }

    /// Dispose the scope, aborting tracked tasks and then running cleanups
    /// in reverse registration order.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        for task in mem::take(&mut *lock(&self.inner.tasks)) {
            task.abort();
        }

        let cleanups = mem::take(&mut *lock(&self.inner.cleanups));
        let count = cleanups.len();
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
        if self.inner.parent.is_none() {
            lock(&self.inner.prefetch).clear();
        }

        debug!(cleanups = count, execution = %self.inner.execution, "scope disposed");
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("execution", &self.inner.execution)
            .field("nested", &self.inner.parent.is_some())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

//! Cached query bindings.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use vsanity_cache::{
    fetcher, use_cache, BindingError, BoundKey, CacheBinding, CacheEntry, CacheValue, FetchCache,
    FetchError, FetchStatus, PendingFetch, Scope,
};

use crate::context::{use_client, use_defaults, use_listen_client};
use crate::listen::{self, ListenGuard};
use crate::minify::minify_query;
use crate::options::QueryOptions;

/// Transformation from a raw query result to the bound value.
pub type Mapper<T> = Arc<dyn Fn(Value) -> Result<T, FetchError> + Send + Sync>;

/// Mapper that deserializes the result into `T`.
pub fn decode<T: DeserializeOwned>(result: Value) -> Result<T, FetchError> {
    Ok(serde_json::from_value(result)?)
}

/// A query bound to the cache, optionally following live updates.
pub struct QueryResult<T> {
    binding: CacheBinding<T>,
    _listener: Option<Arc<ListenGuard>>,
}

impl<T> Clone for QueryResult<T> {
    fn clone(&self) -> Self {
        Self {
            binding: self.binding.clone(),
            _listener: self._listener.clone(),
        }
    }
}

impl<T> fmt::Debug for QueryResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("binding", &self.binding)
            .field("listening", &self._listener.is_some())
            .finish()
    }
}

impl<T: CacheValue> QueryResult<T> {
    /// Current value.
    pub fn data(&self) -> T {
        self.binding.data()
    }

    /// Current status.
    pub fn status(&self) -> FetchStatus {
        self.binding.status()
    }

    /// Error from the last failed fetch.
    pub fn error(&self) -> Option<FetchError> {
        self.binding.error()
    }

    /// Minified query the result currently follows.
    pub fn query(&self) -> String {
        self.binding.key()
    }

    /// Refetch the current query, subject to de-duplication.
    pub fn fetch(&self) -> PendingFetch<T> {
        self.binding.fetch(None, false)
    }

    /// Wait for the outstanding fetch, if any.
    pub async fn settled(&self) -> CacheEntry<T> {
        self.binding.settled().await
    }

    /// Check if live updates are being applied.
    pub fn is_listening(&self) -> bool {
        self._listener.is_some()
    }

    /// Underlying cache binding.
    pub fn binding(&self) -> &CacheBinding<T> {
        &self.binding
    }
}

/// Bind a query to the cache.
///
/// The query is minified and used as the cache key. An empty query
/// resolves to `initial_value` without touching the client. Results go
/// through `mapper` before they are stored. `options` are layered over the
/// scope defaults.
///
/// Fails with [`BindingError::MissingClient`] if no client was provided.
pub fn use_fetcher<T, M>(
    scope: &Scope,
    cache: &FetchCache<T>,
    query: impl Into<BoundKey>,
    initial_value: T,
    mapper: M,
    options: Option<QueryOptions>,
) -> Result<QueryResult<T>, BindingError>
where
    T: CacheValue,
    M: Fn(Value) -> Result<T, FetchError> + Send + Sync + 'static,
{
    scope.ensure_live()?;
    let client = use_client(scope).ok_or(BindingError::MissingClient)?;

    let defaults = use_defaults(scope);
    let options = match &options {
        Some(options) => defaults.merge(options),
        None => defaults,
    };
    let mapper: Mapper<T> = Arc::new(mapper);
    let key: BoundKey = query.into();
    let key = key.map_key(minify_query);

    let fetch = {
        let client = Arc::clone(&client);
        let mapper = Arc::clone(&mapper);
        let initial = initial_value.clone();
        fetcher(move |query: String| {
            let client = Arc::clone(&client);
            let mapper = Arc::clone(&mapper);
            let initial = initial.clone();
            async move {
                if query.is_empty() {
                    return Ok(initial);
                }
                let result = client.fetch(&query).await?;
                mapper(result)
            }
        })
    };

    let binding = use_cache(scope, cache, key, fetch, options.cache_options(initial_value))?;

    let listener = match options.listen_options() {
        Some(listen_options) => {
            let listen_client = use_listen_client(scope).unwrap_or(client);
            listen::attach(scope, &binding, listen_client, listen_options, mapper)
        }
        None => None,
    };
    debug!(
        query = %binding.key(),
        listening = listener.is_some(),
        "query bound"
    );

    Ok(QueryResult {
        binding,
        _listener: listener.map(Arc::new),
    })
}

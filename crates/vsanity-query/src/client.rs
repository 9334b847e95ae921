//! Content client abstraction.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vsanity_cache::FetchError;

/// Update pushed by a live query subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenEvent {
    /// Mutated document, when the subscription includes results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ListenEvent {
    /// Event carrying a result.
    pub fn with_result(result: Value) -> Self {
        Self {
            result: Some(result),
        }
    }
}

/// Options forwarded to [`ContentClient::listen`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenOptions {
    /// Client-specific listen parameters.
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

impl ListenOptions {
    /// Set a parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Client able to run content queries.
#[async_trait]
pub trait ContentClient: Send + Sync {
    /// Run a query and return the raw JSON result.
    async fn fetch(&self, query: &str) -> Result<Value, FetchError>;

    /// Check if the client can push live updates.
    fn supports_listen(&self) -> bool {
        false
    }

    /// Subscribe to updates for a query.
    ///
    /// Dropping the returned stream ends the subscription.
    fn listen(&self, _query: &str, _options: &ListenOptions) -> Option<BoxStream<'static, ListenEvent>> {
        None
    }
}

type QueryFn = Arc<dyn Fn(String) -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync>;

/// Client backed by a closure; never listens.
#[derive(Clone)]
pub struct FnClient {
    fetch: QueryFn,
}

impl FnClient {
    /// Create a client from an async closure.
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        Self {
            fetch: Arc::new(move |query: String| fetch(query).boxed()),
        }
    }
}

impl fmt::Debug for FnClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnClient").finish_non_exhaustive()
    }
}

#[async_trait]
impl ContentClient for FnClient {
    async fn fetch(&self, query: &str) -> Result<Value, FetchError> {
        (self.fetch)(query.to_owned()).await
    }
}

//! Clients and defaults provided to a scope.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::debug;
use vsanity_cache::{BindingError, FetchError, Scope};

use crate::client::ContentClient;
use crate::options::QueryOptions;

/// Client used for regular queries.
#[derive(Clone)]
pub struct ProvidedClient(pub Arc<dyn ContentClient>);

/// Client used for live preview subscriptions.
#[derive(Clone)]
pub struct PreviewClient(pub Arc<dyn ContentClient>);

/// Default options for every query binding in a scope.
#[derive(Debug, Clone, Default)]
pub struct QueryDefaults(pub QueryOptions);

/// Provide the client that query bindings in this scope use.
pub fn provide_client<C>(scope: &Scope, client: C) -> Arc<dyn ContentClient>
where
    C: ContentClient + 'static,
{
    let client: Arc<dyn ContentClient> = Arc::new(client);
    scope.provide(ProvidedClient(Arc::clone(&client)));
    debug!(listen = client.supports_listen(), "content client provided");
    client
}

/// Provide a separate client for live update subscriptions.
pub fn provide_preview_client<C>(scope: &Scope, client: C) -> Arc<dyn ContentClient>
where
    C: ContentClient + 'static,
{
    let client: Arc<dyn ContentClient> = Arc::new(client);
    scope.provide(PreviewClient(Arc::clone(&client)));
    client
}

/// Provide default query options.
pub fn provide_defaults(scope: &Scope, options: QueryOptions) {
    scope.provide(QueryDefaults(options));
}

/// The client provided to this scope or an ancestor.
pub fn use_client(scope: &Scope) -> Option<Arc<dyn ContentClient>> {
    scope.inject::<ProvidedClient>().map(|provided| Arc::clone(&provided.0))
}

/// The client live subscriptions go through: the preview client if one
/// was provided, otherwise the regular client.
pub fn use_listen_client(scope: &Scope) -> Option<Arc<dyn ContentClient>> {
    scope
        .inject::<PreviewClient>()
        .map(|preview| Arc::clone(&preview.0))
        .or_else(|| use_client(scope))
}

/// Default query options for this scope.
pub fn use_defaults(scope: &Scope) -> QueryOptions {
    scope
        .inject::<QueryDefaults>()
        .map(|defaults| defaults.0.clone())
        .unwrap_or_default()
}

/// Run a query on the provided client, bypassing the cache.
pub fn fetch_query(
    scope: &Scope,
    query: &str,
) -> Result<BoxFuture<'static, Result<Value, FetchError>>, BindingError> {
    scope.ensure_live()?;
    let client = use_client(scope).ok_or(BindingError::MissingClient)?;
    let query = query.to_owned();

    Ok(async move { client.fetch(&query).await }.boxed())
}

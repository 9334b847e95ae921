//! Live update overlay for query bindings.

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};
use vsanity_cache::{CacheBinding, CacheValue, EntryPatch, Scope};

use crate::client::{ContentClient, ListenEvent, ListenOptions};
use crate::fetcher::Mapper;

/// Stops the subscription task when dropped.
pub(crate) struct ListenGuard(AbortHandle);

impl Drop for ListenGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn next_event(events: &mut Option<BoxStream<'static, ListenEvent>>) -> Option<ListenEvent> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Splice live results for the binding's current query into the cache.
///
/// The subscription follows the binding's key: when the key changes the
/// old stream is dropped, which ends that subscription, and a new one is
/// opened. Returns `None` if the client cannot listen.
pub(crate) fn attach<T: CacheValue>(
    scope: &Scope,
    binding: &CacheBinding<T>,
    client: Arc<dyn ContentClient>,
    options: ListenOptions,
    mapper: Mapper<T>,
) -> Option<ListenGuard> {
    if !client.supports_listen() {
        debug!("client does not support live updates; listen ignored");
        return None;
    }

    let task = tokio::spawn(run(binding.clone(), client, options, mapper));
    scope.track_task(task.abort_handle());

    Some(ListenGuard(task.abort_handle()))
}

async fn run<T: CacheValue>(
    binding: CacheBinding<T>,
    client: Arc<dyn ContentClient>,
    options: ListenOptions,
    mapper: Mapper<T>,
) {
    let mut keys = binding.watch_key();

    loop {
        let key = keys.borrow_and_update().clone();
        let mut events = if key.is_empty() {
            None
        } else {
            client.listen(&key, &options)
        };
        debug!(key = %key, subscribed = events.is_some(), "listening for updates");

        loop {
            tokio::select! {
                changed = keys.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                event = next_event(&mut events) => match event {
                    Some(ListenEvent { result: Some(result) }) => match mapper(result) {
                        Ok(value) => {
                            trace!(key = %key, "live update applied");
                            binding.set_cache_for(&key, EntryPatch::value(value));
                        }
                        Err(error) => warn!(key = %key, %error, "live update could not be mapped"),
                    },
                    Some(_) => {}
                    None => {
                        debug!(key = %key, "update stream ended");
                        events = None;
                    }
                },
            }
        }

        drop(events);
        debug!(key = %key, "subscription dropped");
    }
}

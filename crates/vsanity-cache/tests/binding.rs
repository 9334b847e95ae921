use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vsanity_cache::{
    fetcher, use_cache, BindingError, BoundKey, CacheOptions, EntryPatch, FetchCache, FetchError,
    FetchStatus, Fetcher, KeyRef, Scope, Strategy,
};

fn counting(calls: &Arc<AtomicUsize>) -> Fetcher<Option<String>> {
    let calls = Arc::clone(calls);
    fetcher(move |key: String| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(format!("value-{key}")))
        }
    })
}

fn failing() -> Fetcher<Option<String>> {
    fetcher(|_key: String| async { Err(FetchError::rejected("content API unavailable")) })
}

// === Settlement Tests ===

#[tokio::test]
async fn test_static_key_settles_client_loaded() {
    let scope = Scope::client();
    let cache = FetchCache::new();

    let binding = use_cache(
        &scope,
        &cache,
        "k1",
        fetcher(|_key: String| async { Ok(Some("cherry".to_string())) }),
        CacheOptions::default(),
    )
    .unwrap();

    let entry = binding.settled().await;
    assert_eq!(entry.value.as_deref(), Some("cherry"));
    assert_eq!(entry.status, FetchStatus::ClientLoaded);
    assert_eq!(binding.data().as_deref(), Some("cherry"));
    assert!(binding.error().is_none());
}

#[tokio::test]
async fn test_initial_value_before_settlement() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let binding = use_cache(
        &scope,
        &cache,
        "fresh",
        counting(&calls),
        CacheOptions::new(Some("orange".to_string())),
    )
    .unwrap();

    assert_eq!(binding.data().as_deref(), Some("orange"));
    assert_eq!(binding.status(), FetchStatus::Loading);
    assert_eq!(binding.initial_value().as_deref(), Some("orange"));
}

#[tokio::test]
async fn test_rejected_fetch_sets_error() {
    let scope = Scope::client();
    let cache = FetchCache::new();

    let binding = use_cache(&scope, &cache, "k2", failing(), CacheOptions::default()).unwrap();
    let entry = binding.settled().await;

    assert_eq!(entry.status, FetchStatus::Error);
    assert_eq!(
        binding.error(),
        Some(FetchError::rejected("content API unavailable"))
    );
    assert!(binding.data().is_none());
}

#[tokio::test]
async fn test_failed_refetch_keeps_last_good_value() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let good = use_cache(&scope, &cache, "k", counting(&calls), CacheOptions::default()).unwrap();
    good.settled().await;

    let bad = use_cache(&scope, &cache, "k", failing(), CacheOptions::default()).unwrap();
    let result = bad.fetch(None, true).await;

    assert!(result.is_err());
    assert_eq!(bad.status(), FetchStatus::Error);
    assert_eq!(bad.data().as_deref(), Some("value-k"));
    assert_eq!(good.data().as_deref(), Some("value-k"));
}

#[tokio::test]
async fn test_fetch_other_query() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let binding = use_cache(&scope, &cache, "a", counting(&calls), CacheOptions::default()).unwrap();
    let value = binding.fetch(Some("b"), false).await.unwrap();

    assert_eq!(value.as_deref(), Some("value-b"));
    assert_eq!(cache.status("b"), Some(FetchStatus::ClientLoaded));
}

// === De-duplication Tests ===

#[tokio::test]
async fn test_concurrent_bindings_share_one_request() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = KeyRef::new("k3");

    let first = use_cache(
        &scope,
        &cache,
        &key,
        counting(&calls),
        CacheOptions::default().with_deduplicate(true),
    )
    .unwrap();
    let second = use_cache(
        &scope,
        &cache,
        &key,
        counting(&calls),
        CacheOptions::default().with_deduplicate(true),
    )
    .unwrap();

    first.settled().await;
    second.settled().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.data().as_deref(), Some("value-k3"));
}

#[tokio::test]
async fn test_without_deduplication_every_fetch_runs() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let binding = use_cache(&scope, &cache, "k", counting(&calls), CacheOptions::default()).unwrap();
    binding.settled().await;
    binding.fetch(None, false).await.unwrap();
    binding.fetch(None, false).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_windowed_deduplication() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let binding = use_cache(
        &scope,
        &cache,
        "w",
        counting(&calls),
        CacheOptions::default().with_deduplicate(Duration::from_millis(100)),
    )
    .unwrap();
    binding.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(50)).await;
    binding.fetch(None, false).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(100)).await;
    binding.fetch(None, false).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// === Reactivity Tests ===

#[tokio::test]
async fn test_key_change_retargets_and_fetches() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = KeyRef::new("a");

    let binding = use_cache(&scope, &cache, &key, counting(&calls), CacheOptions::default()).unwrap();
    let mut view = binding.subscribe();
    view.wait_for(|entry| entry.value.as_deref() == Some("value-a"))
        .await
        .unwrap();

    key.set("b");
    view.wait_for(|entry| entry.value.as_deref() == Some("value-b"))
        .await
        .unwrap();

    assert_eq!(binding.key(), "b");
    assert_eq!(*binding.watch_key().borrow(), "b");
    assert_eq!(binding.status(), FetchStatus::ClientLoaded);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_mapped_key_binding() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let slug = KeyRef::new("intro");

    let binding = use_cache(
        &scope,
        &cache,
        BoundKey::mapped(&slug, |s| format!("post:{s}")),
        counting(&calls),
        CacheOptions::default(),
    )
    .unwrap();

    assert_eq!(binding.key(), "post:intro");
    assert_eq!(binding.settled().await.value.as_deref(), Some("value-post:intro"));
}

#[tokio::test]
async fn test_server_strategy_skips_server_loaded_key() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = KeyRef::new("a");

    let binding = use_cache(
        &scope,
        &cache,
        &key,
        counting(&calls),
        CacheOptions::default().with_strategy(Strategy::Server),
    )
    .unwrap();
    binding.settled().await;
    binding.set_cache_for(
        "b",
        EntryPatch::value(Some("from server".to_string())).with_status(FetchStatus::ServerLoaded),
    );

    let mut watched = binding.watch_key();
    key.set("b");
    watched.wait_for(|k| *k == "b").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(binding.data().as_deref(), Some("from server"));
    assert_eq!(binding.status(), FetchStatus::ServerLoaded);
}

#[tokio::test]
async fn test_set_cache_reaches_subscribers() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let binding = use_cache(&scope, &cache, "k", counting(&calls), CacheOptions::default()).unwrap();
    binding.settled().await;
    let mut view = binding.subscribe();

    binding.set_cache(EntryPatch::value(Some("pushed".to_string())));

    view.wait_for(|entry| entry.value.as_deref() == Some("pushed"))
        .await
        .unwrap();
    assert_eq!(binding.status(), FetchStatus::ClientLoaded);
}

// === Lifecycle Tests ===

#[tokio::test]
async fn test_disposed_scope_rejects_binding() {
    let scope = Scope::client();
    let cache = FetchCache::<Option<String>>::new();
    scope.dispose();

    let result = use_cache(&scope, &cache, "k", failing(), CacheOptions::default());

    assert!(matches!(result, Err(BindingError::ScopeDisposed)));
}

#[tokio::test]
async fn test_dispose_stops_following_key() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = KeyRef::new("a");

    let binding = use_cache(&scope, &cache, &key, counting(&calls), CacheOptions::default()).unwrap();
    binding.settled().await;

    scope.dispose();
    key.set("b");
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(!cache.contains_key("b"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(binding.key(), "a");
    assert_eq!(*binding.watch_key().borrow(), "a");
}

#[tokio::test]
async fn test_key_accessor_agrees_with_watched_key() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = KeyRef::new("a");

    let binding = use_cache(&scope, &cache, &key, counting(&calls), CacheOptions::default()).unwrap();
    binding.settled().await;
    let mut watched = binding.watch_key();

    key.set("b");
    assert_eq!(binding.key(), *watched.borrow());

    watched.wait_for(|k| *k == "b").await.unwrap();
    assert_eq!(binding.key(), "b");
    assert!(cache.contains_key("b"));
}

#[tokio::test]
async fn test_dropped_bindings_release_scope_tasks() {
    let scope = Scope::client();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    for n in 0..20 {
        let binding = use_cache(
            &scope,
            &cache,
            format!("k{n}"),
            counting(&calls),
            CacheOptions::default(),
        )
        .unwrap();
        binding.settled().await;
    }
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert_eq!(scope.active_tasks(), 0);

    let _kept = use_cache(&scope, &cache, "kept", counting(&calls), CacheOptions::default()).unwrap();
    assert_eq!(scope.active_tasks(), 1);
}

#[tokio::test]
async fn test_server_binding_waits_for_prefetch() {
    let scope = Scope::server();
    let cache = FetchCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let binding = use_cache(&scope, &cache, "k", counting(&calls), CacheOptions::default()).unwrap();

    assert_eq!(binding.status(), FetchStatus::Initialised);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(scope.pending_prefetch(), 1);

    scope.run_server_prefetch().await;

    assert_eq!(binding.status(), FetchStatus::ServerLoaded);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

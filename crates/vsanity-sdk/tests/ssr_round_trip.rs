use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use vsanity_sdk::prelude::*;

fn counting_client(calls: &Arc<AtomicUsize>, origin: &'static str) -> FnClient {
    let calls = Arc::clone(calls);
    FnClient::new(move |query: String| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(json!({ "origin": origin, "query": query })) }
    })
}

#[tokio::test]
async fn test_server_render_then_client_hydrate() {
    let server_calls = Arc::new(AtomicUsize::new(0));
    let server = Scope::server();
    provide_client(&server, counting_client(&server_calls, "server"));
    let server_cache = FetchCache::<Value>::new();

    let rendered = use_fetcher(
        &server,
        &server_cache,
        "*[_type == 'post'][0]",
        Value::Null,
        decode,
        Some(QueryOptions::new().with_strategy(Strategy::Server)),
    )
    .unwrap();
    assert_eq!(rendered.status(), FetchStatus::Initialised);

    server.run_server_prefetch().await;
    assert_eq!(rendered.status(), FetchStatus::ServerLoaded);
    let script = server.transfer_state().to_script().unwrap();
    assert!(script.starts_with("<script>window.__VSANITY_STATE__="));
    let state_json = server.transfer_state().to_json().unwrap();

    let client_calls = Arc::new(AtomicUsize::new(0));
    let client = Scope::client_with_state(TransferState::from_json(&state_json).unwrap());
    provide_client(&client, counting_client(&client_calls, "client"));
    let client_cache = FetchCache::<Value>::new();

    let hydrated = use_fetcher(
        &client,
        &client_cache,
        "*[_type == 'post'][0]",
        Value::Null,
        decode,
        Some(QueryOptions::new().with_strategy(Strategy::Server)),
    )
    .unwrap();

    assert_eq!(hydrated.status(), FetchStatus::ServerLoaded);
    assert_eq!(hydrated.data()["origin"], json!("server"));
    assert_eq!(server_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client_calls.load(Ordering::SeqCst), 0);
}

//! # vsanity SDK
//!
//! Reactive content fetching backed by a keyed, de-duplicating cache with
//! server-side rendering hand-off and optional live updates.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vsanity_sdk::prelude::*;
//!
//! // Server: render, then embed the captured state in the page.
//! let scope = Scope::server();
//! provide_client(&scope, client.clone());
//! let posts = use_fetcher(&scope, &cache, "*[_type == 'post']", Vec::new(), decode, None)?;
//! scope.run_server_prefetch().await;
//! let script = scope.transfer_state().to_script()?;
//!
//! // Client: hydrate from that state instead of refetching.
//! let scope = Scope::client_with_state(TransferState::from_json(&state_json)?);
//! provide_client(&scope, client);
//! let posts = use_fetcher(
//!     &scope,
//!     &cache,
//!     "*[_type == 'post']",
//!     Vec::new(),
//!     decode,
//!     Some(QueryOptions::new().with_strategy(Strategy::Server)),
//! )?;
//! ```
//!
//! ## Features
//!
//! - **Keyed cache**: one entry per key, shared by every binding of that key
//! - **De-duplication**: join in-flight requests or suppress refetches in a window
//! - **SSR hand-off**: server-fetched entries restored on the client
//! - **Live updates**: subscription results spliced into the cache

pub mod prelude;

// Re-export member crates
pub use vsanity_cache;
pub use vsanity_query;

// Re-export essentials at the top level for convenience
pub use vsanity_cache::{
    fetcher, use_cache, BindingError, BoundKey, CacheBinding, CacheEntry, CacheOptions,
    Deduplicate, EntryPatch, ExecutionContext, FetchCache, FetchError, FetchStatus, KeyRef, Scope,
    Strategy, TransferState,
};
pub use vsanity_query::{
    decode, fetch_query, minify_query, provide_client, provide_defaults, provide_preview_client,
    use_fetcher, ContentClient, FnClient, QueryConfig, QueryOptions, QueryResult,
};

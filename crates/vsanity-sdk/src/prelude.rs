//! Prelude for convenient imports.
//!
//! ```rust,ignore
//! use vsanity_sdk::prelude::*;
//! ```
//!
//! This imports all commonly used items:
//! - Scopes and SSR: `Scope`, `TransferState`
//! - Cache: `FetchCache`, `use_cache`, `fetcher`, `CacheOptions`
//! - Queries: `use_fetcher`, `provide_client`, `QueryOptions`, `decode`

// Cache and bindings
pub use vsanity_cache::{
    fetcher, use_cache, BoundKey, CacheBinding, CacheOptions, Deduplicate, EntryPatch, FetchCache,
    FetchError, FetchStatus, KeyRef, Strategy,
};

// Scopes and server rendering
pub use vsanity_cache::{BindingError, ExecutionContext, Scope, TransferState};

// Queries
pub use vsanity_query::{
    decode, provide_client, provide_defaults, provide_preview_client, use_fetcher, ContentClient,
    FnClient, ListenOptions, QueryOptions, QueryResult,
};

//! Keyed fetch cache for content bindings.
//!
//! This crate provides:
//! - `FetchCache` - Key-addressed cache with in-flight request de-duplication
//! - `CacheBinding` / `use_cache` - Reactive view of one (possibly changing) key
//! - `Scope` - Binding lifecycle, provide/inject and server prefetch hooks
//! - `TransferState` - Server-to-client hand-off of fetched entries
//! - `CacheMetrics` - Counters for fetch activity
//!
//! # Example
//!
//! ```ignore
//! use vsanity_cache::{fetcher, use_cache, CacheOptions, FetchCache, Scope};
//!
//! let scope = Scope::client();
//! let cache = FetchCache::<Option<String>>::new();
//!
//! let binding = use_cache(
//!     &scope,
//!     &cache,
//!     "fruit",
//!     fetcher(|key| async move { Ok(Some(format!("fetched {key}"))) }),
//!     CacheOptions::default(),
//! )?;
//!
//! let entry = binding.settled().await;
//! assert!(entry.status.is_loaded());
//! ```

mod binding;
mod cache;
mod entry;
mod error;
mod metrics;
mod options;
mod scope;
mod status;
mod transfer;

pub use binding::*;
pub use cache::*;
pub use entry::*;
pub use error::*;
pub use metrics::*;
pub use options::*;
pub use scope::*;
pub use status::*;
pub use transfer::*;

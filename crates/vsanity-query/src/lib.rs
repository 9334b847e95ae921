//! Content query bindings.
//!
//! This crate provides:
//! - `ContentClient` - Client abstraction with optional live updates
//! - `use_fetcher` - Cached, minified, optionally live query bindings
//! - `provide_client` / `provide_defaults` - Scope-level client and options
//! - `QueryConfig` - Default query options from TOML or JSON files
//!
//! # Example
//!
//! ```ignore
//! use vsanity_cache::{FetchCache, Scope};
//! use vsanity_query::{decode, provide_client, use_fetcher, FnClient};
//!
//! let scope = Scope::client();
//! provide_client(&scope, FnClient::new(|query| async move { run(query).await }));
//!
//! let cache = FetchCache::<Vec<Post>>::new();
//! let posts = use_fetcher(&scope, &cache, "*[_type == 'post']", Vec::new(), decode, None)?;
//! ```

mod client;
mod config;
mod context;
mod fetcher;
mod listen;
mod minify;
mod options;

pub use client::*;
pub use config::*;
pub use context::*;
pub use fetcher::*;
pub use minify::*;
pub use options::*;

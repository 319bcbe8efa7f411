//! RunIT Content Blocking
//!
//! Host and path based ad blocking for the browser shell.
//!
//! Pipeline:
//! 1. Fetcher downloads each configured filter list
//! 2. Filter list parser keeps blocked domains and path fragments
//! 3. Builder merges every source into one set of each
//! 4. Cache persists the result as JSON and decides when it is stale
//! 5. Interceptor answers allow/block for every sub-resource request

mod adblocker;
mod builder;
pub mod cache;
mod client;
mod config;
mod fetcher;
pub mod filter_list;
mod interceptor;

pub use adblocker::{Adblocker, CacheStatus, UpdateOutcome};
pub use builder::{BlocklistBuilder, BuildOutput};
pub use cache::{BlockCache, CacheError};
pub use client::{FetchError, HttpClient, HttpClientConfig, Response};
pub use config::{AdblockConfig, ConfigError, FilterSource, data_dir, default_cache_path};
pub use fetcher::{HttpListFetcher, ListFetcher, swap_branch};
pub use interceptor::{
    BlockReason, Blocklist, InterceptError, InterceptResult, RequestInterceptor, ResourceType,
    SiteToggle, host_blocked, registrable_suffix,
};

//! Outbound request governor for the marketlens dashboard.
//!
//! This crate contains:
//! - A single-slot, priority-ordered rate limiter with completion-anchored spacing
//! - 429 backoff that shares the cooldown across every caller
//! - In-flight deduplication with a short-lived result cache
//! - The upstream client for `/orders` and `/activity`, and page normalization
//! - Configuration, structured errors and sequential multi-wallet aggregation

pub mod aggregate;
pub mod backoff;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod governor;
pub mod http_client;
pub mod limiter;
pub mod page;
pub mod query;
pub mod upstream;

pub use aggregate::{fetch_all_for_users, UserRecords};
pub use backoff::{Attempt, BackoffController};
pub use cache::{CacheMode, ResultCache};
pub use config::{AppConfig, GovernorConfig, UpstreamConfig, DEFAULT_BASE_URL};
pub use dedup::{DedupStats, Deduplicator};
pub use error::{GovernorError, GovernorResult};
pub use governor::{RequestGovernor, DEFAULT_PRIORITY};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use limiter::{LimiterStatus, RateLimiter};
pub use page::{Page, Pagination, Record};
pub use query::{Query, QueryFilters, ResourceKind, MAX_PAGE_LIMIT};
pub use upstream::{classify_response, UpstreamClient};

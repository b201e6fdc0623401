//! The request governor: single entry point for every upstream call.
//!
//! ```text
//! fetch(query)
//!   └─ Deduplicator   cache hit / join in-flight / start fetch
//!        └─ BackoffController   retry 429 with cooldown
//!             └─ RateLimiter   one at a time, spaced, priority ordered
//!                  └─ UpstreamClient   one HTTP attempt
//! ```

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backoff::BackoffController;
use crate::cache::CacheMode;
use crate::config::{AppConfig, GovernorConfig};
use crate::dedup::{DedupStats, Deduplicator};
use crate::error::GovernorResult;
use crate::http_client::HttpClient;
use crate::limiter::{LimiterStatus, RateLimiter};
use crate::page::{Page, Record};
use crate::query::{Query, ResourceKind};
use crate::upstream::UpstreamClient;

/// Priority used by the convenience fetchers.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Cheap to clone; clones share one queue, one cache and one upstream client.
#[derive(Clone)]
pub struct RequestGovernor {
    limiter: RateLimiter,
    backoff: BackoffController,
    dedup: Deduplicator<Page>,
    upstream: UpstreamClient,
}

impl RequestGovernor {
    /// Must be called inside a Tokio runtime; the limiter spawns its worker.
    pub fn new(config: &GovernorConfig, upstream: UpstreamClient) -> GovernorResult<Self> {
        config.validate()?;

        let limiter = RateLimiter::new(config.min_interval());
        let backoff = BackoffController::new(limiter.clone(), config);
        info!(
            min_interval_ms = config.min_interval_ms,
            max_retries = config.max_retries,
            cache_ttl_ms = config.cache_ttl_ms,
            base_url = upstream.base_url(),
            "request governor ready"
        );

        Ok(Self {
            limiter,
            backoff,
            dedup: Deduplicator::new(config.cache_ttl()),
            upstream,
        })
    }

    pub fn from_config(config: &AppConfig, http: Arc<dyn HttpClient>) -> GovernorResult<Self> {
        let upstream = UpstreamClient::new(
            http,
            &config.upstream,
            config.governor.request_timeout(),
        );
        Self::new(&config.governor, upstream)
    }

    /// Runs an arbitrary upstream call through the shared queue.
    pub async fn execute<T, F, Fut>(&self, priority: i32, query_fn: F) -> GovernorResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = GovernorResult<T>> + Send + 'static,
    {
        self.limiter.submit(priority, query_fn).await
    }

    pub fn status(&self) -> LimiterStatus {
        self.limiter.status()
    }

    /// Cancels every queued task; returns how many were cancelled.
    pub fn clear(&self) -> usize {
        self.limiter.clear()
    }

    pub async fn fetch(&self, query: &Query) -> GovernorResult<Page> {
        self.fetch_with(query, DEFAULT_PRIORITY, CacheMode::Use).await
    }

    /// Fetches one page. Invalid queries fail before touching the queue.
    pub async fn fetch_with(
        &self,
        query: &Query,
        priority: i32,
        mode: CacheMode,
    ) -> GovernorResult<Page> {
        query.validate()?;

        let backoff = self.backoff.clone();
        let upstream = self.upstream.clone();
        let query = query.clone();
        let key = query.cache_key();

        self.dedup
            .fetch(key, mode, move || async move {
                backoff
                    .call_with_backoff(priority, move || {
                        let upstream = upstream.clone();
                        let query = query.clone();
                        async move { upstream.call(&query).await }
                    })
                    .await
            })
            .await
    }

    pub async fn fetch_trade_history(&self, query: &Query) -> GovernorResult<Page> {
        self.fetch(&query.clone().with_kind(ResourceKind::Orders)).await
    }

    pub async fn fetch_activity(&self, query: &Query) -> GovernorResult<Page> {
        self.fetch(&query.clone().with_kind(ResourceKind::Activity)).await
    }

    pub async fn fetch_all(&self, query: &Query) -> GovernorResult<Vec<Record>> {
        self.fetch_all_with(query, DEFAULT_PRIORITY, CacheMode::Use)
            .await
    }

    /// Walks every page of `query` strictly one after another, starting at
    /// its offset. Stops on `has_more == false`, an empty page, or an offset
    /// that does not advance. Each page is fetched with `priority` and `mode`.
    pub async fn fetch_all_with(
        &self,
        query: &Query,
        priority: i32,
        mode: CacheMode,
    ) -> GovernorResult<Vec<Record>> {
        let mut records = Vec::new();
        let mut page_query = query.clone();
        let mut offset = query.filters().offset.unwrap_or(0);

        loop {
            let page = self.fetch_with(&page_query, priority, mode).await?;
            let returned = page.len();
            let next_offset = page.pagination.next_offset(returned);
            let has_more = page.pagination.has_more;
            records.extend(page.records);

            if !has_more || returned == 0 {
                break;
            }
            if next_offset <= offset {
                debug!(offset, next_offset, "pagination stopped advancing");
                break;
            }

            offset = next_offset;
            page_query = page_query.offset(offset);
        }

        debug!(kind = query.kind().as_str(), records = records.len(), "fetched all pages");
        Ok(records)
    }

    pub async fn fetch_all_trade_history(&self, query: &Query) -> GovernorResult<Vec<Record>> {
        self.fetch_all(&query.clone().with_kind(ResourceKind::Orders))
            .await
    }

    pub async fn fetch_all_activity(&self, query: &Query) -> GovernorResult<Vec<Record>> {
        self.fetch_all(&query.clone().with_kind(ResourceKind::Activity))
            .await
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.dedup.stats()
    }

    pub fn invalidate(&self, query: &Query) -> bool {
        self.dedup.invalidate(&query.cache_key())
    }

    pub fn clear_cache(&self) {
        self.dedup.clear_cache();
    }

    pub fn purge_expired(&self) -> usize {
        self.dedup.purge_expired()
    }

    pub fn cached_len(&self) -> usize {
        self.dedup.cached_len()
    }
}

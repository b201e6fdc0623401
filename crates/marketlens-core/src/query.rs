//! Logical upstream queries and their cache keys.
//!
//! A [`Query`] is an immutable description of one page request. The cache key
//! and the URL query string are rendered from the same ordered parameter list,
//! so two queries share a key exactly when they would hit the same URL.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{GovernorError, GovernorResult};

pub const MAX_PAGE_LIMIT: u32 = 1_000;

/// Upstream resource a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Trade history (`/orders`).
    Orders,
    Activity,
}

impl ResourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Activity => "activity",
        }
    }

    pub const fn path(self) -> &'static str {
        match self {
            Self::Orders => "/orders",
            Self::Activity => "/activity",
        }
    }

    /// Body field holding the record array.
    pub const fn records_field(self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Activity => "activities",
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter fields understood by the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFilters {
    pub user: Option<String>,
    pub market_slug: Option<String>,
    pub condition_id: Option<String>,
    pub token_id: Option<String>,
    /// Unix seconds.
    pub start_time: Option<i64>,
    /// Unix seconds.
    pub end_time: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    kind: ResourceKind,
    filters: QueryFilters,
}

impl Query {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            filters: QueryFilters::default(),
        }
    }

    pub fn orders() -> Self {
        Self::new(ResourceKind::Orders)
    }

    pub fn activity() -> Self {
        Self::new(ResourceKind::Activity)
    }

    pub fn with_filters(kind: ResourceKind, filters: QueryFilters) -> Self {
        Self { kind, filters }
    }

    /// Same filters against another resource.
    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.filters.user = Some(user.into());
        self
    }

    pub fn market_slug(mut self, slug: impl Into<String>) -> Self {
        self.filters.market_slug = Some(slug.into());
        self
    }

    pub fn condition_id(mut self, condition_id: impl Into<String>) -> Self {
        self.filters.condition_id = Some(condition_id.into());
        self
    }

    pub fn token_id(mut self, token_id: impl Into<String>) -> Self {
        self.filters.token_id = Some(token_id.into());
        self
    }

    pub fn time_range(mut self, start: OffsetDateTime, end: OffsetDateTime) -> Self {
        self.filters.start_time = Some(start.unix_timestamp());
        self.filters.end_time = Some(end.unix_timestamp());
        self
    }

    pub fn start_time(mut self, unix_seconds: i64) -> Self {
        self.filters.start_time = Some(unix_seconds);
        self
    }

    pub fn end_time(mut self, unix_seconds: i64) -> Self {
        self.filters.end_time = Some(unix_seconds);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.filters.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.filters.offset = Some(offset);
        self
    }

    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn filters(&self) -> &QueryFilters {
        &self.filters
    }

    pub fn validate(&self) -> GovernorResult<()> {
        let text_fields = [
            ("user", &self.filters.user),
            ("market_slug", &self.filters.market_slug),
            ("condition_id", &self.filters.condition_id),
            ("token_id", &self.filters.token_id),
        ];
        for (name, value) in text_fields {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(GovernorError::invalid_query(format!(
                    "{name} must not be empty when set"
                )));
            }
        }

        if let Some(limit) = self.filters.limit {
            if limit == 0 || limit > MAX_PAGE_LIMIT {
                return Err(GovernorError::invalid_query(format!(
                    "limit must be between 1 and {MAX_PAGE_LIMIT}, got {limit}"
                )));
            }
        }

        if let (Some(start), Some(end)) = (self.filters.start_time, self.filters.end_time) {
            if start > end {
                return Err(GovernorError::invalid_query(format!(
                    "start_time {start} is after end_time {end}"
                )));
            }
        }

        Ok(())
    }

    /// Parameters in a fixed order; absent filters are omitted.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let f = &self.filters;
        let mut params = Vec::with_capacity(8);
        let mut push = |name: &'static str, value: Option<String>| {
            if let Some(value) = value {
                params.push((name, value));
            }
        };

        push("user", f.user.clone());
        push("market_slug", f.market_slug.clone());
        push("condition_id", f.condition_id.clone());
        push("token_id", f.token_id.clone());
        push("start_time", f.start_time.map(|v| v.to_string()));
        push("end_time", f.end_time.map(|v| v.to_string()));
        push("limit", f.limit.map(|v| v.to_string()));
        push("offset", f.offset.map(|v| v.to_string()));
        params
    }

    pub fn query_string(&self) -> String {
        self.params()
            .iter()
            .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn cache_key(&self) -> String {
        format!("{}?{}", self.kind.as_str(), self.query_string())
    }
}

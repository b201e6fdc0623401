//! Normalized page shape shared by every upstream resource.
//!
//! Records are kept as opaque JSON; the governor only needs to know how many
//! came back and whether another page exists.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GovernorError, GovernorResult};
use crate::query::{Query, ResourceKind};

pub type Record = Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u64,
    pub total: Option<u64>,
    pub has_more: bool,
}

impl Pagination {
    /// Offset of the page following this one.
    pub fn next_offset(&self, returned: usize) -> u64 {
        self.offset.saturating_add(returned as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub kind: ResourceKind,
    pub records: Vec<Record>,
    pub pagination: Pagination,
}

impl Page {
    /// Parses a 2xx body for `query`. Missing pagination fields fall back to
    /// the query's own paging values.
    pub fn from_body(query: &Query, body: &str) -> GovernorResult<Self> {
        let raw: RawPage = serde_json::from_str(body)
            .map_err(|error| GovernorError::malformed(format!("invalid json body: {error}")))?;

        let kind = query.kind();
        let records = match kind {
            ResourceKind::Orders => raw.orders,
            ResourceKind::Activity => raw.activities,
        }
        .ok_or_else(|| {
            GovernorError::malformed(format!(
                "response is missing the '{}' array",
                kind.records_field()
            ))
        })?;

        let filters = query.filters();
        let raw_pagination = raw.pagination.unwrap_or_default();
        let limit = raw_pagination
            .limit
            .or(filters.limit)
            .unwrap_or(records.len() as u32);
        let offset = raw_pagination.offset.or(filters.offset).unwrap_or(0);
        let total = raw_pagination.total.or(raw_pagination.count);
        let has_more = raw_pagination.has_more.unwrap_or_else(|| {
            total.is_some_and(|total| offset.saturating_add(records.len() as u64) < total)
        });

        Ok(Self {
            kind,
            records,
            pagination: Pagination {
                limit,
                offset,
                total,
                has_more,
            },
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawPage {
    orders: Option<Vec<Value>>,
    activities: Option<Vec<Value>>,
    pagination: Option<RawPagination>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPagination {
    limit: Option<u32>,
    offset: Option<u64>,
    total: Option<u64>,
    count: Option<u64>,
    has_more: Option<bool>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn orders_page_normalizes_total_and_has_more() {
        let body = json!({
            "orders": [{"id": 1}, {"id": 2}],
            "pagination": {"limit": 2, "offset": 0, "total": 5, "has_more": true}
        })
        .to_string();

        let page = Page::from_body(&Query::orders(), &body).expect("valid page");

        assert_eq!(page.kind, ResourceKind::Orders);
        assert_eq!(page.len(), 2);
        assert_eq!(
            page.pagination,
            Pagination {
                limit: 2,
                offset: 0,
                total: Some(5),
                has_more: true
            }
        );
        assert_eq!(page.pagination.next_offset(page.len()), 2);
    }

    #[test]
    fn activity_page_accepts_count_and_derives_has_more() {
        let body = json!({
            "activities": [{"side": "BUY"}],
            "pagination": {"limit": 1, "offset": 2, "count": 3}
        })
        .to_string();

        let page = Page::from_body(&Query::activity(), &body).expect("valid page");

        assert_eq!(page.pagination.total, Some(3));
        assert!(!page.pagination.has_more, "offset 2 + 1 record reaches count 3");
    }

    #[test]
    fn missing_pagination_falls_back_to_query() {
        let body = json!({"orders": []}).to_string();
        let query = Query::orders().limit(50).offset(100);

        let page = Page::from_body(&query, &body).expect("valid page");

        assert_eq!(page.pagination.limit, 50);
        assert_eq!(page.pagination.offset, 100);
        assert!(!page.pagination.has_more);
        assert!(page.is_empty());
    }

    #[test]
    fn wrong_records_field_is_malformed() {
        let body = json!({"orders": []}).to_string();
        let error = Page::from_body(&Query::activity(), &body).expect_err("wrong field");

        assert_eq!(error.code(), "governor.malformed_response");
        assert!(error.to_string().contains("activities"));
    }

    #[test]
    fn non_json_body_is_malformed() {
        let error = Page::from_body(&Query::orders(), "<html>").expect_err("not json");
        assert!(matches!(error, GovernorError::MalformedResponse { .. }));
    }
}

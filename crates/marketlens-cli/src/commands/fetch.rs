use std::time::Instant;

use marketlens_core::{
    CacheMode, DedupStats, Pagination, Query, Record, RequestGovernor, ResourceKind,
};
use serde::Serialize;
use tracing::info;

use super::{apply_filters, Report};
use crate::cli::FetchArgs;
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchOutput {
    kind: ResourceKind,
    count: usize,
    records: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<Pagination>,
    meta: FetchMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchMeta {
    elapsed_ms: u64,
    cache: DedupStats,
}

pub async fn run(
    governor: &RequestGovernor,
    kind: ResourceKind,
    args: &FetchArgs,
) -> Result<Report, CliError> {
    let mut query = apply_filters(Query::new(kind), &args.filters)?;
    if let Some(user) = &args.user {
        query = query.user(user.clone());
    }
    if let Some(offset) = args.offset {
        query = query.offset(offset);
    }

    let mode = if args.refresh {
        CacheMode::Refresh
    } else {
        CacheMode::Use
    };

    let started = Instant::now();
    let (records, pagination) = if args.all {
        (governor.fetch_all_with(&query, args.priority, mode).await?, None)
    } else {
        let page = governor.fetch_with(&query, args.priority, mode).await?;
        (page.records, Some(page.pagination))
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;
    info!(kind = kind.as_str(), count = records.len(), elapsed_ms, "fetch complete");

    let output = FetchOutput {
        kind,
        count: records.len(),
        records,
        pagination,
        meta: FetchMeta {
            elapsed_ms,
            cache: governor.dedup_stats(),
        },
    };
    Ok(Report::ok(serde_json::to_value(output)?))
}

use marketlens_core::{fetch_all_for_users, Query, RequestGovernor, ResourceKind, UserRecords};
use serde::Serialize;

use super::{apply_filters, Report};
use crate::cli::WalletsArgs;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct WalletsOutput<'a> {
    kind: ResourceKind,
    wallets: &'a [UserRecords],
}

pub async fn run(governor: &RequestGovernor, args: &WalletsArgs) -> Result<Report, CliError> {
    let kind = ResourceKind::from(args.kind);
    let template = apply_filters(Query::new(kind), &args.filters)?;

    let outcomes = fetch_all_for_users(governor, &template, args.users.iter().cloned()).await;

    let failed = outcomes.iter().filter(|outcome| !outcome.is_ok()).count();
    let body = serde_json::to_value(WalletsOutput {
        kind,
        wallets: &outcomes,
    })?;

    Ok(Report {
        body,
        failure: (failed > 0).then_some(CliError::PartialFailure {
            failed,
            total: outcomes.len(),
        }),
    })
}

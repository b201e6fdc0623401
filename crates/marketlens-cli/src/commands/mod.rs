mod config;
mod fetch;
mod wallets;

use std::sync::Arc;

use marketlens_core::{
    AppConfig, HttpClient, HttpResponse, Query, ReqwestHttpClient, RequestGovernor, ResourceKind,
    ScriptedHttpClient,
};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::cli::{Cli, Command, FilterArgs};
use crate::error::CliError;

/// What a command prints, plus the error to exit with after printing, if any.
pub struct Report {
    pub body: Value,
    pub failure: Option<CliError>,
}

impl Report {
    pub fn ok(body: Value) -> Self {
        Self {
            body,
            failure: None,
        }
    }
}

pub async fn run(cli: &Cli) -> Result<Report, CliError> {
    let config = load_config(cli)?;

    match &cli.command {
        Command::Config => config::run(&config),
        Command::Orders(args) => {
            fetch::run(&build_governor(&config, cli.offline)?, ResourceKind::Orders, args).await
        }
        Command::Activity(args) => {
            fetch::run(&build_governor(&config, cli.offline)?, ResourceKind::Activity, args).await
        }
        Command::Wallets(args) => wallets::run(&build_governor(&config, cli.offline)?, args).await,
    }
}

/// File, then `MARKETLENS_*` variables, then flags.
fn load_config(cli: &Cli) -> Result<AppConfig, CliError> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    if let Some(base_url) = &cli.base_url {
        config.upstream.base_url = base_url.clone();
    }
    if let Some(min_interval_ms) = cli.min_interval_ms {
        config.governor.min_interval_ms = min_interval_ms;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.governor.request_timeout_ms = timeout_ms;
    }
    config.governor.validate()?;

    debug!(
        governor = ?config.governor,
        base_url = %config.upstream.base_url,
        "effective configuration"
    );
    Ok(config)
}

fn build_governor(config: &AppConfig, offline: bool) -> Result<RequestGovernor, CliError> {
    let http: Arc<dyn HttpClient> = if offline {
        Arc::new(ScriptedHttpClient::new().with_fallback(HttpResponse::ok_json(
            r#"{"orders":[],"activities":[],"pagination":{"total":0,"has_more":false}}"#,
        )))
    } else {
        Arc::new(ReqwestHttpClient::new())
    };
    Ok(RequestGovernor::from_config(config, http)?)
}

fn apply_filters(mut query: Query, filters: &FilterArgs) -> Result<Query, CliError> {
    if let Some(slug) = &filters.market_slug {
        query = query.market_slug(slug.clone());
    }
    if let Some(condition_id) = &filters.condition_id {
        query = query.condition_id(condition_id.clone());
    }
    if let Some(token_id) = &filters.token_id {
        query = query.token_id(token_id.clone());
    }
    if let Some(start) = &filters.start {
        query = query.start_time(parse_timestamp("--start", start)?);
    }
    if let Some(end) = &filters.end {
        query = query.end_time(parse_timestamp("--end", end)?);
    }
    if let Some(limit) = filters.limit {
        query = query.limit(limit);
    }
    Ok(query)
}

/// Accepts unix seconds or RFC 3339.
fn parse_timestamp(flag: &str, raw: &str) -> Result<i64, CliError> {
    if let Ok(seconds) = raw.trim().parse::<i64>() {
        return Ok(seconds);
    }
    OffsetDateTime::parse(raw.trim(), &Rfc3339)
        .map(OffsetDateTime::unix_timestamp)
        .map_err(|error| CliError::Argument(format!("{flag} '{raw}': {error}")))
}

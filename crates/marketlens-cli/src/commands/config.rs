use marketlens_core::AppConfig;
use serde_json::json;

use super::Report;
use crate::error::CliError;

/// The API key itself is never printed; only whether one is set.
pub fn run(config: &AppConfig) -> Result<Report, CliError> {
    let mut body = serde_json::to_value(config)?;
    body["upstream"]["apiKeySet"] = json!(config.upstream.api_key.is_some());
    Ok(Report::ok(body))
}

//! Governor and upstream configuration.
//!
//! Every option has an explicit default. Values can be overridden from the
//! environment (`MARKETLENS_*`) or loaded from a JSON file whose missing
//! fields fall back to the defaults:
//!
//! ```json
//! {
//!   "governor": { "minIntervalMs": 1100, "maxRetries": 3, "cacheTtlMs": 5000 },
//!   "upstream": { "baseUrl": "https://api.domeapi.io/v1/polymarket" }
//! }
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GovernorError, GovernorResult};
use crate::http_client::HttpAuth;

pub const DEFAULT_BASE_URL: &str = "https://api.domeapi.io/v1/polymarket";

/// Tunables for spacing, retries, caching and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GovernorConfig {
    /// Minimum gap between one call's completion and the next call's start.
    /// Deliberately above the upstream's 1 req/s quota.
    pub min_interval_ms: u64,
    /// Total attempts allowed for a logical call that keeps receiving 429.
    pub max_retries: u32,
    /// Cooldown used when a 429 carries no usable hint.
    pub default_retry_after_seconds: u64,
    /// Longest cooldown the governor will sit out. A 429 asking for more
    /// fails at once instead of stalling the queue.
    pub max_retry_after_seconds: u64,
    pub cache_ttl_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1_100,
            max_retries: 3,
            default_retry_after_seconds: 6,
            max_retry_after_seconds: 60,
            cache_ttl_ms: 5_000,
            request_timeout_ms: 60_000,
        }
    }
}

impl GovernorConfig {
    /// Defaults overridden by any `MARKETLENS_*` variables present.
    pub fn from_env() -> GovernorResult<Self> {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> GovernorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "MARKETLENS_MIN_INTERVAL_MS", &mut self.min_interval_ms)?;
        override_from(&lookup, "MARKETLENS_MAX_RETRIES", &mut self.max_retries)?;
        override_from(
            &lookup,
            "MARKETLENS_DEFAULT_RETRY_AFTER_SECONDS",
            &mut self.default_retry_after_seconds,
        )?;
        override_from(
            &lookup,
            "MARKETLENS_MAX_RETRY_AFTER_SECONDS",
            &mut self.max_retry_after_seconds,
        )?;
        override_from(&lookup, "MARKETLENS_CACHE_TTL_MS", &mut self.cache_ttl_ms)?;
        override_from(
            &lookup,
            "MARKETLENS_REQUEST_TIMEOUT_MS",
            &mut self.request_timeout_ms,
        )?;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> GovernorResult<()> {
        if self.max_retries == 0 {
            return Err(GovernorError::config(
                "maxRetries must allow at least one attempt",
            ));
        }
        if self.max_retry_after_seconds == 0 {
            return Err(GovernorError::config(
                "maxRetryAfterSeconds must be greater than zero",
            ));
        }
        if self.max_retry_after_seconds < self.default_retry_after_seconds {
            return Err(GovernorError::config(format!(
                "maxRetryAfterSeconds ({}) is below defaultRetryAfterSeconds ({})",
                self.max_retry_after_seconds, self.default_retry_after_seconds
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(GovernorError::config(
                "requestTimeoutMs must be greater than zero",
            ));
        }
        Ok(())
    }

    pub const fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub const fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_seconds)
    }

    pub const fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_seconds)
    }

    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Where the upstream lives and which credential, if any, to pass through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Sent as a bearer token; never serialized back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::from(DEFAULT_BASE_URL),
            api_key: None,
        }
    }
}

impl UpstreamConfig {
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup("MARKETLENS_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.base_url = base_url;
        }
        if let Some(api_key) = lookup("MARKETLENS_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.api_key = Some(api_key);
        }
        self
    }

    pub fn auth(&self) -> HttpAuth {
        match &self.api_key {
            Some(key) => HttpAuth::BearerToken(key.clone()),
            None => HttpAuth::None,
        }
    }
}

/// File-level configuration combining both sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub governor: GovernorConfig,
    pub upstream: UpstreamConfig,
}

impl AppConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> GovernorResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|error| {
            GovernorError::config(format!("failed to read {}: {error}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> GovernorResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|error| GovernorError::config(format!("invalid config json: {error}")))?;
        config.governor.validate()?;
        Ok(config)
    }

    /// File values (or defaults) with environment overrides applied on top.
    pub fn load(path: Option<&Path>) -> GovernorResult<Self> {
        let base = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        let lookup = |name: &str| std::env::var(name).ok();
        Ok(Self {
            governor: base.governor.with_env_overrides(lookup)?,
            upstream: base.upstream.with_env_overrides(lookup),
        })
    }
}

fn override_from<F, T>(lookup: &F, name: &str, slot: &mut T) -> GovernorResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(name) else {
        return Ok(());
    };
    *slot = raw
        .trim()
        .parse()
        .map_err(|_| GovernorError::config(format!("{name} has invalid value '{raw}'")))?;
    Ok(())
}

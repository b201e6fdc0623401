//! Translates queries into HTTP calls and classifies the responses.
//!
//! | Response | Outcome |
//! |----------|---------|
//! | 2xx with a parseable body | `Attempt::Done(Page)` |
//! | 2xx with a bad body | `MalformedResponse` |
//! | 429 | `Attempt::Throttled` with the server's cooldown hint |
//! | other status | `Upstream { status, message }` |
//! | no response | `Transport` or `Timeout` |

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::backoff::Attempt;
use crate::config::UpstreamConfig;
use crate::error::{GovernorError, GovernorResult};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, HttpResponse};
use crate::page::Page;
use crate::query::Query;

const STATUS_TOO_MANY_REQUESTS: u16 = 429;
const MAX_ERROR_MESSAGE_LEN: usize = 200;

#[derive(Clone)]
pub struct UpstreamClient {
    http: Arc<dyn HttpClient>,
    base_url: String,
    auth: HttpAuth,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(http: Arc<dyn HttpClient>, config: &UpstreamConfig, timeout: Duration) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            auth: config.auth(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request_for(&self, query: &Query) -> HttpRequest {
        let params = query.query_string();
        let mut url = format!("{}{}", self.base_url, query.kind().path());
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params);
        }

        HttpRequest::get(url)
            .with_header("accept", "application/json")
            .with_auth(&self.auth)
            .with_timeout_ms(self.timeout.as_millis() as u64)
    }

    /// Performs exactly one HTTP call for `query`.
    pub async fn call(&self, query: &Query) -> GovernorResult<Attempt<Page>> {
        let request = self.request_for(query);
        debug!(url = %request.url, "calling upstream");

        let response = match tokio::time::timeout(self.timeout, self.http.execute(request)).await {
            Err(_) => return Err(GovernorError::Timeout { after: self.timeout }),
            Ok(Err(error)) if error.timed_out() => {
                return Err(GovernorError::Timeout { after: self.timeout })
            }
            Ok(Err(error)) => return Err(GovernorError::transport(error.message())),
            Ok(Ok(response)) => response,
        };

        classify_response(query, &response, OffsetDateTime::now_utc())
    }
}

/// Maps a response to an attempt outcome. `now` anchors `reset_time` hints.
pub fn classify_response(
    query: &Query,
    response: &HttpResponse,
    now: OffsetDateTime,
) -> GovernorResult<Attempt<Page>> {
    if response.is_success() {
        return Page::from_body(query, &response.body).map(Attempt::Done);
    }

    if response.status == STATUS_TOO_MANY_REQUESTS {
        let retry_after = throttle_hint(response, now);
        debug!(?retry_after, "upstream throttled the request");
        return Ok(Attempt::Throttled { retry_after });
    }

    Err(GovernorError::upstream(
        response.status,
        error_message(&response.body),
    ))
}

#[derive(Debug, Default, Deserialize)]
struct ThrottleBody {
    retry_after: Option<Value>,
    rate_limit: Option<RateLimitInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitInfo {
    reset_time: Option<Value>,
}

/// Cooldown from `retry_after`, then `rate_limit.reset_time - now`, then the
/// `Retry-After` header. Unparseable or negative hints are ignored.
fn throttle_hint(response: &HttpResponse, now: OffsetDateTime) -> Option<Duration> {
    let body: ThrottleBody = serde_json::from_str(&response.body).unwrap_or_default();

    // A hint too large for `Duration` is as unusable as a malformed one.
    if let Some(cooldown) = body.retry_after.as_ref().and_then(as_seconds).and_then(to_duration) {
        return Some(cooldown);
    }

    let reset_time = body
        .rate_limit
        .and_then(|info| info.reset_time)
        .as_ref()
        .and_then(as_seconds);
    if let Some(reset_time) = reset_time {
        let now_seconds = now.unix_timestamp_nanos() as f64 / 1e9;
        if let Some(cooldown) = to_duration((reset_time - now_seconds).max(0.0)) {
            return Some(cooldown);
        }
    }

    response
        .header("retry-after")
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .and_then(to_duration)
}

fn as_seconds(value: &Value) -> Option<f64> {
    let seconds = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    (seconds.is_finite() && seconds >= 0.0).then_some(seconds)
}

/// `None` for negative, non-finite or out-of-range values.
fn to_duration(seconds: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(seconds).ok()
}

fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        error: Option<String>,
    }

    let parsed = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|body| body.message.or(body.error));
    let message = parsed.unwrap_or_else(|| body.trim().to_owned());
    if message.is_empty() {
        return String::from("no error message");
    }
    message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http_client::{HttpError, ScriptedHttpClient};

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid")
    }

    fn throttled(body: Value) -> HttpResponse {
        HttpResponse::new(429, body.to_string())
    }

    #[test]
    fn request_url_joins_base_path_and_params() {
        let config = UpstreamConfig {
            base_url: String::from("https://api.example.test/v1/polymarket/"),
            api_key: Some(String::from("k")),
        };
        let client = UpstreamClient::new(
            Arc::new(ScriptedHttpClient::new()),
            &config,
            Duration::from_secs(60),
        );

        let request = client.request_for(&Query::orders().user("0xabc").limit(100));

        assert_eq!(
            request.url,
            "https://api.example.test/v1/polymarket/orders?user=0xabc&limit=100"
        );
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer k")
        );
        assert_eq!(request.timeout_ms, 60_000);
    }

    #[test]
    fn retry_after_field_wins() {
        let response = throttled(json!({
            "message": "slow down",
            "retry_after": 5,
            "rate_limit": {"reset_time": 1_700_000_030}
        }));

        let outcome = classify_response(&Query::orders(), &response, now()).expect("throttled");
        assert_eq!(
            outcome,
            Attempt::Throttled {
                retry_after: Some(Duration::from_secs(5))
            }
        );
    }

    #[test]
    fn reset_time_is_relative_to_now() {
        let response = throttled(json!({"rate_limit": {"reset_time": 1_700_000_004}}));

        let outcome = classify_response(&Query::orders(), &response, now()).expect("throttled");
        assert_eq!(
            outcome,
            Attempt::Throttled {
                retry_after: Some(Duration::from_secs(4))
            }
        );
    }

    #[test]
    fn past_reset_time_clamps_to_zero() {
        let response = throttled(json!({"rate_limit": {"reset_time": 1_699_999_990}}));

        let outcome = classify_response(&Query::orders(), &response, now()).expect("throttled");
        assert_eq!(
            outcome,
            Attempt::Throttled {
                retry_after: Some(Duration::ZERO)
            }
        );
    }

    #[test]
    fn string_hint_and_header_fallback_are_understood() {
        let from_string = throttled(json!({"retry_after": "2.5"}));
        let from_header = HttpResponse::new(429, "rate limited").with_header("Retry-After", "3");

        assert_eq!(
            classify_response(&Query::orders(), &from_string, now()),
            Ok(Attempt::Throttled {
                retry_after: Some(Duration::from_millis(2_500))
            })
        );
        assert_eq!(
            classify_response(&Query::orders(), &from_header, now()),
            Ok(Attempt::Throttled {
                retry_after: Some(Duration::from_secs(3))
            })
        );
    }

    #[test]
    fn unusable_hint_leaves_cooldown_to_the_caller() {
        let response = throttled(json!({"retry_after": "later", "message": "slow down"}));

        assert_eq!(
            classify_response(&Query::orders(), &response, now()),
            Ok(Attempt::Throttled { retry_after: None })
        );
    }

    #[test]
    fn oversized_hint_falls_through_to_the_next_source() {
        let only_oversized = throttled(json!({"retry_after": 1e300}));
        let with_reset = throttled(json!({
            "retry_after": 1e300,
            "rate_limit": {"reset_time": 1_700_000_004}
        }));

        assert_eq!(
            classify_response(&Query::orders(), &only_oversized, now()),
            Ok(Attempt::Throttled { retry_after: None })
        );
        assert_eq!(
            classify_response(&Query::orders(), &with_reset, now()),
            Ok(Attempt::Throttled {
                retry_after: Some(Duration::from_secs(4))
            })
        );
    }

    #[test]
    fn other_statuses_are_terminal_upstream_errors() {
        let response = HttpResponse::new(503, json!({"message": "maintenance"}).to_string());

        assert_eq!(
            classify_response(&Query::orders(), &response, now()),
            Err(GovernorError::upstream(503, "maintenance"))
        );
    }

    #[test]
    fn plain_text_error_body_is_truncated() {
        let response = HttpResponse::new(500, "x".repeat(1_000));

        match classify_response(&Query::orders(), &response, now()) {
            Err(GovernorError::Upstream { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message.len(), MAX_ERROR_MESSAGE_LEN);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_transport_times_out() {
        let http = Arc::new(
            ScriptedHttpClient::new()
                .with_latency(Duration::from_secs(120))
                .with_fallback(HttpResponse::ok_json(json!({"orders": []}).to_string())),
        );
        let client = UpstreamClient::new(http, &UpstreamConfig::default(), Duration::from_secs(60));

        let error = client.call(&Query::orders()).await.expect_err("times out");
        assert_eq!(
            error,
            GovernorError::Timeout {
                after: Duration::from_secs(60)
            }
        );
    }

    #[tokio::test]
    async fn transport_failure_is_not_a_timeout() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_error(HttpError::new("connection refused"));
        let client = UpstreamClient::new(http, &UpstreamConfig::default(), Duration::from_secs(60));

        let error = client.call(&Query::orders()).await.expect_err("unreachable");
        assert_eq!(error, GovernorError::transport("connection refused"));
    }
}

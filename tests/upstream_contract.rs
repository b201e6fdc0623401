use std::sync::Arc;
use std::time::Duration;

use marketlens_core::{
    classify_response, Attempt, GovernorConfig, HttpResponse, Query, QueryFilters,
    RequestGovernor, ResourceKind, ScriptedHttpClient, UpstreamClient, UpstreamConfig,
};
use serde_json::json;
use time::macros::datetime;

fn client(base_url: &str, api_key: Option<&str>) -> UpstreamClient {
    UpstreamClient::new(
        Arc::new(ScriptedHttpClient::new()),
        &UpstreamConfig {
            base_url: base_url.to_owned(),
            api_key: api_key.map(str::to_owned),
        },
        Duration::from_secs(60),
    )
}

#[test]
fn test_orders_request_carries_every_filter_in_order() {
    let query = Query::orders()
        .user("0xabc")
        .market_slug("will-btc-close-above-100k")
        .condition_id("0xcond")
        .token_id("123")
        .time_range(
            datetime!(2024-01-01 00:00 UTC),
            datetime!(2024-01-02 00:00 UTC),
        )
        .limit(100)
        .offset(200);

    let request = client("https://api.example.test/v1/polymarket", None).request_for(&query);

    assert_eq!(
        request.url,
        "https://api.example.test/v1/polymarket/orders?user=0xabc\
         &market_slug=will-btc-close-above-100k&condition_id=0xcond&token_id=123\
         &start_time=1704067200&end_time=1704153600&limit=100&offset=200"
    );
    assert!(!request.headers.contains_key("authorization"));
}

#[test]
fn test_activity_request_uses_activity_path_and_bearer_auth() {
    let request = client("https://api.example.test/", Some("secret"))
        .request_for(&Query::activity().user("0xabc"));

    assert_eq!(request.url, "https://api.example.test/activity?user=0xabc");
    assert_eq!(
        request.headers.get("authorization").map(String::as_str),
        Some("Bearer secret")
    );
}

#[test]
fn test_filter_values_are_url_encoded() {
    let request = client("https://api.example.test", None)
        .request_for(&Query::orders().market_slug("a b&c"));

    assert_eq!(request.url, "https://api.example.test/orders?market_slug=a%20b%26c");
}

#[test]
fn test_query_without_filters_has_no_query_string() {
    let request = client("https://api.example.test", None).request_for(&Query::orders());
    assert_eq!(request.url, "https://api.example.test/orders");
}

#[test]
fn test_query_from_filters_struct_matches_builder() {
    let filters = QueryFilters {
        user: Some(String::from("0xabc")),
        limit: Some(10),
        ..QueryFilters::default()
    };
    let from_struct = Query::with_filters(ResourceKind::Orders, filters);
    let from_builder = Query::orders().limit(10).user("0xabc");

    assert_eq!(from_struct.cache_key(), from_builder.cache_key());
}

#[test]
fn test_success_body_normalizes_to_page() {
    let body = json!({
        "orders": [
            {"token_id": "1", "side": "BUY", "price": 0.42, "shares_normalized": 10.0},
            {"token_id": "1", "side": "SELL", "price": 0.45, "shares_normalized": 5.0}
        ],
        "pagination": {"limit": 2, "offset": 0, "total": 10, "has_more": true}
    });
    let response = HttpResponse::ok_json(body.to_string());

    let outcome = classify_response(
        &Query::orders().limit(2),
        &response,
        datetime!(2024-01-01 00:00 UTC),
    )
    .expect("parsed");

    let Attempt::Done(page) = outcome else {
        panic!("expected a page, got {outcome:?}");
    };
    assert_eq!(page.kind, ResourceKind::Orders);
    assert_eq!(page.len(), 2);
    assert_eq!(page.pagination.total, Some(10));
    assert!(page.pagination.has_more);
    assert_eq!(page.records[1]["side"], "SELL");
}

#[test]
fn test_throttle_body_with_reset_time_yields_relative_cooldown() {
    let now = datetime!(2024-01-01 00:00 UTC);
    let body = json!({
        "message": "Rate limit exceeded",
        "rate_limit": {"reset_time": now.unix_timestamp() + 7}
    });

    let outcome = classify_response(
        &Query::orders(),
        &HttpResponse::new(429, body.to_string()),
        now,
    );

    assert_eq!(
        outcome,
        Ok(Attempt::Throttled {
            retry_after: Some(Duration::from_secs(7))
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_governor_paginates_with_server_offsets() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_response(HttpResponse::ok_json(
        json!({
            "activities": [{"id": 1}, {"id": 2}],
            "pagination": {"limit": 2, "offset": 0, "count": 3}
        })
        .to_string(),
    ));
    http.push_response(HttpResponse::ok_json(
        json!({
            "activities": [{"id": 3}],
            "pagination": {"limit": 2, "offset": 2, "count": 3}
        })
        .to_string(),
    ));
    let upstream = UpstreamClient::new(
        http.clone(),
        &UpstreamConfig::default(),
        Duration::from_secs(60),
    );
    let governor =
        RequestGovernor::new(&GovernorConfig::default(), upstream).expect("valid config");

    let records = governor
        .fetch_all_activity(&Query::activity().user("0xabc").limit(2))
        .await
        .expect("all pages");

    assert_eq!(records.len(), 3);
    let urls: Vec<_> = http.requests().into_iter().map(|request| request.url).collect();
    assert_eq!(
        urls,
        vec![
            "https://api.domeapi.io/v1/polymarket/activity?user=0xabc&limit=2",
            "https://api.domeapi.io/v1/polymarket/activity?user=0xabc&limit=2&offset=2",
        ]
    );
}

//! C9: request governor, exercised through the full HTTP stack rather than `Governor` directly
//! (the module's own unit tests already cover the bucket/whitelist logic in isolation).

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::Request;
use http_body_util::BodyExt;
use tower::ServiceExt;

use livesim::governor::Governor;
use livesim::http::{build_router, AppState};
use livesim::ingest::IngestManager;

fn test_state(max_requests: u64) -> Arc<AppState> {
    let (_tmp, catalog) = common::build_catalog();
    let catalog = Arc::new(catalog);
    let governor = Arc::new(Governor::new(max_requests, Duration::from_secs(100), vec![], None));
    let ingest = Arc::new(IngestManager::new(Arc::clone(&catalog)));
    Arc::new(AppState {
        catalog,
        governor,
        ingest,
        base_url: "https://example.test".to_string(),
        ast_ms: 1_713_000_000_000,
        governor_header_name: "X-RateLimit".to_string(),
    })
}

fn request_from(addr: &str) -> Request<Body> {
    let mut req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    req.extensions_mut().insert(ConnectInfo(addr.parse::<SocketAddr>().unwrap()));
    req
}

#[tokio::test]
async fn requests_within_quota_are_admitted_with_a_rate_limit_header() {
    let state = test_state(5);
    let app = build_router(state);
    let resp = app.oneshot(request_from("127.0.0.1:9000")).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);
    assert!(resp.headers().contains_key("X-RateLimit"));
}

#[tokio::test]
async fn requests_past_quota_are_rejected_with_429() {
    let state = test_state(2);
    let app = build_router(state);
    for _ in 0..2 {
        let resp = app.clone().oneshot(request_from("127.0.0.1:9001")).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }
    let resp = app.clone().oneshot(request_from("127.0.0.1:9001")).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&body).contains("rate limited"));
}

#[tokio::test]
async fn every_response_carries_the_standard_headers() {
    let state = test_state(100);
    let app = build_router(state);
    let resp = app.oneshot(request_from("127.0.0.1:9002")).await.unwrap();
    assert_eq!(resp.headers().get("Access-Control-Allow-Origin").unwrap(), "*");
    assert!(resp.headers().contains_key("DASH-IF-livesim2"));
}

mod common;

use common::test_helpers::{FlakyStore, PanickingStore};
use http::header::{HeaderName, CONTENT_TYPE, RETRY_AFTER};
use http::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tollgate::rate_limit::middleware::X_RATELIMIT_REMAINING;
use tollgate::{
    BucketStore, FailurePolicy, HeaderKey, InMemoryBucketStore, LimiterConfig, ManualClock,
    RateLimitLayer, TokenBucketLimiter,
};
use tower::util::BoxCloneService;
use tower::{service_fn, Layer, Service, ServiceExt};

fn limiter<S: BucketStore + 'static>(
    store: S,
    config: LimiterConfig,
) -> Arc<TokenBucketLimiter<S, ManualClock>> {
    Arc::new(TokenBucketLimiter::new(Arc::new(store), config).with_clock(ManualClock::new(0)))
}

fn small_config() -> LimiterConfig {
    LimiterConfig::new(2, Duration::from_secs(60)).expect("valid config")
}

fn from_peer(ip: &str) -> Request<String> {
    let mut req = Request::new(String::new());
    req.extensions_mut().insert(format!("{}:40000", ip).parse::<SocketAddr>().unwrap());
    req
}

fn counting_service(
    hits: Arc<AtomicUsize>,
) -> BoxCloneService<Request<String>, Response<String>, Infallible> {
    BoxCloneService::new(service_fn(move |_req: Request<String>| {
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(Response::new(String::from("spells")))
        }
    }))
}

#[tokio::test]
async fn admitted_requests_reach_inner_service() {
    let hits = Arc::new(AtomicUsize::new(0));
    let svc = RateLimitLayer::new(limiter(InMemoryBucketStore::new(), small_config()))
        .layer(counting_service(hits.clone()));

    let response = svc.oneshot(from_peer("192.0.2.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "spells");
    assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "1");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_bucket_short_circuits_with_429() {
    let hits = Arc::new(AtomicUsize::new(0));
    let mut svc = RateLimitLayer::new(limiter(InMemoryBucketStore::new(), small_config()))
        .layer(counting_service(hits.clone()));

    for _ in 0..2 {
        let ok = svc.ready().await.unwrap().call(from_peer("192.0.2.1")).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
    }
    let rejected = svc.ready().await.unwrap().call(from_peer("192.0.2.1")).await.unwrap();

    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejected.headers()[CONTENT_TYPE], "application/json");
    // One token per 30s with capacity 2 over 60s.
    assert_eq!(rejected.headers()[RETRY_AFTER], "30");
    let body: serde_json::Value = serde_json::from_str(rejected.body()).unwrap();
    assert_eq!(body, serde_json::json!({ "error": "Too many requests per minute" }));
    assert_eq!(hits.load(Ordering::SeqCst), 2, "rejected request must not reach the handler");

    // A different client is unaffected.
    let other = svc.ready().await.unwrap().call(from_peer("192.0.2.2")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn custom_message_and_header_key() {
    let hits = Arc::new(AtomicUsize::new(0));
    let mut svc = RateLimitLayer::new(limiter(InMemoryBucketStore::new(), small_config()))
        .with_key(HeaderKey::new(HeaderName::from_static("x-api-client")))
        .with_message("quota exhausted")
        .layer(counting_service(hits.clone()));

    let request = || {
        Request::builder().header("x-api-client", "reporting-job").body(String::new()).unwrap()
    };
    for _ in 0..2 {
        svc.ready().await.unwrap().call(request()).await.unwrap();
    }
    let rejected = svc.ready().await.unwrap().call(request()).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(rejected.body().contains("quota exhausted"));
}

#[tokio::test]
async fn missing_key_is_admitted_unchecked() {
    let hits = Arc::new(AtomicUsize::new(0));
    let store = InMemoryBucketStore::new();
    let mut svc = RateLimitLayer::new(limiter(store.clone(), small_config()))
        .layer(counting_service(hits.clone()));

    for _ in 0..5 {
        let response = svc.ready().await.unwrap().call(Request::new(String::new())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(X_RATELIMIT_REMAINING).is_none());
    }
    assert!(store.is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn store_outage_never_surfaces_as_server_error() {
    let hits = Arc::new(AtomicUsize::new(0));
    let store = FlakyStore::new();
    store.fail_fetch(true);
    let svc = RateLimitLayer::new(limiter(store.clone(), small_config()))
        .layer(counting_service(hits.clone()));

    let response = svc.oneshot(from_peer("192.0.2.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.stores(), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn store_outage_fail_closed_answers_429() {
    let hits = Arc::new(AtomicUsize::new(0));
    let store = FlakyStore::new();
    store.fail_fetch(true);
    let config = LimiterConfig::builder()
        .failure_policy(FailurePolicy::FailClosed)
        .build()
        .expect("valid config");
    let svc = RateLimitLayer::new(limiter(store, config)).layer(counting_service(hits.clone()));

    let response = svc.oneshot(from_peer("192.0.2.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[RETRY_AFTER], "1");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn panicking_limiter_degrades_to_policy() {
    let hits = Arc::new(AtomicUsize::new(0));
    let svc = RateLimitLayer::new(limiter(PanickingStore, small_config()))
        .layer(counting_service(hits.clone()));

    let response = svc.oneshot(from_peer("192.0.2.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

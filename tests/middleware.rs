use floodguard::{
    GuardConfig, GuardLayer, GuardServiceError, MemoryRecordStore, Method, RateGuard,
    RequestIdentity,
};
use std::convert::Infallible;
use std::time::Duration;
use tower::{service_fn, Layer, ServiceExt};

#[derive(Debug, Clone)]
struct FakeRequest {
    session: Option<String>,
    path: String,
    now: u64,
}

fn extract(req: &FakeRequest) -> Option<RequestIdentity> {
    let session = req.session.as_deref()?;
    Some(RequestIdentity::new(session, "203.0.113.7", &req.path, Method::Get, req.now))
}

fn layer() -> GuardLayer<MemoryRecordStore, fn(&FakeRequest) -> Option<RequestIdentity>> {
    let config = GuardConfig::builder()
        .page_count(2)
        .page_interval(Duration::from_secs(10))
        .build()
        .expect("valid config");
    GuardLayer::new(RateGuard::new(MemoryRecordStore::new(), config), extract)
}

fn request(now: u64) -> FakeRequest {
    FakeRequest { session: Some("session-1".into()), path: "/status".into(), now }
}

#[tokio::test]
async fn allowed_requests_reach_the_inner_service() {
    let service = layer().layer(service_fn(|req: FakeRequest| async move {
        Ok::<_, Infallible>(format!("hit {}", req.path))
    }));

    let response = service.clone().oneshot(request(1_000)).await.expect("allowed");
    assert_eq!(response, "hit /status");
}

#[tokio::test]
async fn blocked_requests_become_a_typed_error() {
    let service = layer()
        .layer(service_fn(|_req: FakeRequest| async move { Ok::<_, Infallible>("hit") }));

    for t in [1_000, 1_001] {
        service.clone().oneshot(request(t)).await.expect("inside the threshold");
    }
    let err = service.clone().oneshot(request(1_002)).await.expect_err("over the threshold");
    match err {
        GuardServiceError::Blocked { retry_after } => {
            assert_eq!(retry_after, Duration::from_secs(60));
        }
        other => panic!("expected Blocked, got {other:?}"),
    }
}

#[tokio::test]
async fn requests_without_an_identity_bypass_the_guard() {
    let service = layer()
        .layer(service_fn(|_req: FakeRequest| async move { Ok::<_, Infallible>("hit") }));

    // No session cookie yet: the extractor declines, nothing is ever counted.
    let anonymous = FakeRequest { session: None, path: "/status".into(), now: 1_000 };
    for _ in 0..10 {
        service.clone().oneshot(anonymous.clone()).await.expect("never blocked");
    }
}

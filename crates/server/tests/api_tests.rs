use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tower::ServiceExt;

use turnstile_core::{Operation, Platform, RefundOutcome, Subject, UsageCounter};
use turnstile_engine::{EngineBuilder, FailurePolicies, FailurePolicy, RetryPolicy};
use turnstile_server::api::{self, AppState};
use turnstile_store::{Admission, CounterKey, CounterStore, StoreError};
use turnstile_store_memory::MemoryCounterStore;

/// A store whose every call fails as if the database were down.
struct DownStore;

fn down() -> StoreError {
    StoreError::Connection("db-primary.internal:5432 connection refused".into())
}

#[async_trait]
impl CounterStore for DownStore {
    async fn check_and_increment(&self, _: &CounterKey, _: u64) -> Result<Admission, StoreError> {
        Err(down())
    }

    async fn decrement(&self, _: &CounterKey) -> Result<u64, StoreError> {
        Err(down())
    }

    async fn refund(&self, _: &CounterKey, _: &str) -> Result<RefundOutcome, StoreError> {
        Err(down())
    }

    async fn get(&self, _: &CounterKey) -> Result<Option<UsageCounter>, StoreError> {
        Err(down())
    }

    async fn counters_for(&self, _: &Subject) -> Result<Vec<UsageCounter>, StoreError> {
        Err(down())
    }

    async fn reset(
        &self,
        _: &Subject,
        _: Option<&Platform>,
        _: Option<&Operation>,
    ) -> Result<u64, StoreError> {
        Err(down())
    }

    async fn cleanup_expired(&self, _: DateTime<Utc>) -> Result<u64, StoreError> {
        Err(down())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(down())
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        call_timeout: Duration::from_secs(1),
    }
}

fn app_with(store: Arc<dyn CounterStore>, policies: FailurePolicies) -> axum::Router {
    let engine = EngineBuilder::new()
        .store(store)
        .retry_policy(fast_retry())
        .failure_policy(policies)
        .build()
        .unwrap();
    api::router(AppState {
        engine: Arc::new(engine),
        retention: Duration::from_secs(48 * 3_600),
    })
}

fn memory_app() -> (axum::Router, Arc<MemoryCounterStore>) {
    let store = Arc::new(MemoryCounterStore::new());
    let app = app_with(
        store.clone(),
        FailurePolicies::new(FailurePolicy::FailClosed),
    );
    (app, store)
}

fn anchor() -> String {
    (Utc::now() - chrono::Duration::days(3)).to_rfc3339()
}

fn admission(subject: &str, platform: &str, operation: &str) -> Value {
    json!({
        "subject": subject,
        "tier": "starter",
        "cycle_anchor": anchor(),
        "platform": platform,
        "operation": operation,
    })
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .map(|v| v.to_str().unwrap().to_owned());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body, retry_after)
}

fn status_uri(subject: &str) -> String {
    let anchor = anchor().replace('+', "%2B");
    format!("/v1/status/{subject}?tier=starter&cycle_anchor={anchor}")
}

#[tokio::test]
async fn health_reports_store_and_metrics() {
    let (app, _) = memory_app();
    let (status, body, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "ok");
    assert_eq!(body["metrics"]["decisions"], 0);
}

#[tokio::test]
async fn health_degrades_when_store_is_down() {
    let app = app_with(Arc::new(DownStore), FailurePolicies::new(FailurePolicy::FailClosed));
    let (status, body, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["store"], "unreachable");
}

#[tokio::test]
async fn admissions_until_short_window_denies() {
    let (app, _) = memory_app();
    let req = admission("api-user", "facebook", "post");

    for expected_remaining in (0..5).rev() {
        let (status, body, _) = send(&app, post_json("/v1/admissions", &req)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], true);
        assert_eq!(body["remaining"], expected_remaining);
        assert!(body["ticket"]["admission_id"].is_string());
    }

    let (status, body, retry_after) = send(&app, post_json("/v1/admissions", &req)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["reason"], "short-window exceeded");
    assert!(body.get("ticket").is_none());
    let secs: u64 = retry_after.unwrap().parse().unwrap();
    assert!((1..=3_600).contains(&secs));

    let (_, metrics, _) = send(&app, get("/metrics")).await;
    assert_eq!(metrics["decisions"], 6);
    assert_eq!(metrics["allowed"], 5);
    assert_eq!(metrics["denied_short_window"], 1);
}

#[tokio::test]
async fn invalid_requests_are_bad_requests() {
    let (app, store) = memory_app();

    let (status, body, _) = send(
        &app,
        post_json("/v1/admissions", &admission("u", "myspace", "post")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("myspace"));

    let (status, _, _) = send(
        &app,
        post_json("/v1/admissions", &admission("", "facebook", "post")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(store.is_empty());
}

#[tokio::test]
async fn store_outage_fails_closed_without_leaking_details() {
    let app = app_with(Arc::new(DownStore), FailurePolicies::new(FailurePolicy::FailClosed));
    let (status, body, retry_after) = send(
        &app,
        post_json("/v1/admissions", &admission("u", "facebook", "post")),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(retry_after.as_deref(), Some("1"));
    assert_eq!(body["retry_after"], 1);
    let text = body.to_string();
    assert!(!text.contains("db-primary"));
    assert!(!text.contains("5432"));
}

#[tokio::test]
async fn store_outage_fails_open_when_configured() {
    let policies = FailurePolicies::new(FailurePolicy::FailClosed)
        .with_override(Operation::API_CALL, FailurePolicy::FailOpen);
    let app = app_with(Arc::new(DownStore), policies);

    let (status, body, _) = send(
        &app,
        post_json("/v1/admissions", &admission("u", "facebook", "api_call")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);
    assert_eq!(body["fail_open"], true);

    let (status, _, _) = send(
        &app,
        post_json("/v1/admissions", &admission("u", "facebook", "post")),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn ticket_refund_is_idempotent() {
    let (app, store) = memory_app();
    let (_, admitted, _) = send(
        &app,
        post_json("/v1/admissions", &admission("refund-me", "facebook", "post")),
    )
    .await;
    let refund = json!({ "ticket": admitted["ticket"] });

    let (status, first, _) = send(&app, post_json("/v1/refunds", &refund)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["short"]["status"], "refunded");
    assert_eq!(first["cycle"]["status"], "refunded");

    let (status, again, _) = send(&app, post_json("/v1/refunds", &refund)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["short"]["status"], "already_refunded");
    assert_eq!(again["cycle"]["status"], "already_refunded");

    let counters = store
        .counters_for(&Subject::from("refund-me"))
        .await
        .unwrap();
    assert!(counters.iter().all(|c| c.count == 0));
}

#[tokio::test]
async fn single_window_refund() {
    let (app, _) = memory_app();
    let (_, admitted, _) = send(
        &app,
        post_json("/v1/admissions", &admission("one-window", "facebook", "post")),
    )
    .await;

    let refund = json!({
        "subject": "one-window",
        "platform": "facebook",
        "operation": "post",
        "window": "cycle",
        "window_start": admitted["ticket"]["cycle_window_start"],
        "idempotency_key": "job-42",
    });
    let (status, body, _) = send(&app, post_json("/v1/refunds", &refund)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "refunded");
    assert_eq!(body["count"], 0);

    let blank_key = json!({
        "subject": "one-window",
        "platform": "facebook",
        "operation": "post",
        "window": "cycle",
        "window_start": admitted["ticket"]["cycle_window_start"],
        "idempotency_key": "  ",
    });
    let (status, _, _) = send(&app, post_json("/v1/refunds", &blank_key)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let off_grid = json!({
        "subject": "one-window",
        "platform": "facebook",
        "operation": "post",
        "window": "short",
        "window_start": "2026-02-10T10:00:01Z",
        "idempotency_key": "job-43",
    });
    let (status, _, _) = send(&app, post_json("/v1/refunds", &off_grid)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uncharged = json!({
        "subject": "one-window",
        "platform": "facebook",
        "operation": "post",
        "window": "short",
        "window_start": "2026-02-10T10:00:00Z",
        "idempotency_key": "job-44",
    });
    let (status, body, _) = send(&app, post_json("/v1/refunds", &uncharged)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "nothing_to_refund");
}

#[tokio::test]
async fn status_is_read_only() {
    let (app, store) = memory_app();
    for _ in 0..3 {
        send(
            &app,
            post_json("/v1/admissions", &admission("watcher", "facebook", "post")),
        )
        .await;
    }

    for _ in 0..10 {
        let (status, body, _) = send(&app, get(&status_uri("watcher"))).await;
        assert_eq!(status, StatusCode::OK);
        let post = &body["platforms"]["facebook"]["post"];
        assert_eq!(post["short"]["used"], 3);
        assert_eq!(post["short"]["limit"], 5);
        assert_eq!(post["cycle"]["remaining"], 9);
    }

    let (status, body, _) = send(&app, get(&status_uri("nobody"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["platforms"]["facebook"]["post"]["short"]["used"], 0);
    assert_eq!(store.len(), 2, "only the admission created counters");
}

#[tokio::test]
async fn status_fails_closed_when_store_is_down() {
    let app = app_with(Arc::new(DownStore), FailurePolicies::new(FailurePolicy::FailOpen));
    let (status, _, retry_after) = send(&app, get(&status_uri("u"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(retry_after.is_some());
}

#[tokio::test]
async fn admin_reset_restores_admission() {
    let (app, _) = memory_app();
    let req = admission("reset-me", "facebook", "post");
    for _ in 0..5 {
        send(&app, post_json("/v1/admissions", &req)).await;
    }
    let (status, _, _) = send(&app, post_json("/v1/admissions", &req)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let reset = Request::builder()
        .method("DELETE")
        .uri("/v1/admin/counters/reset-me?platform=facebook&operation=post")
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&app, reset).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 2);

    let (status, _, _) = send(&app, post_json("/v1/admissions", &req)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_cleanup_uses_retention_by_default() {
    let (app, store) = memory_app();
    send(
        &app,
        post_json("/v1/admissions", &admission("sweep", "facebook", "post")),
    )
    .await;

    let (status, body, _) = send(&app, post_json("/v1/admin/cleanup", &Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 0);
    assert_eq!(store.len(), 2);

    let far_future = (Utc::now() + chrono::Duration::days(400))
        .to_rfc3339()
        .replace('+', "%2B");
    let req = Request::builder()
        .method("POST")
        .uri(format!("/v1/admin/cleanup?older_than={far_future}"))
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 0, "a future cutoff must not delete live windows");
    assert_eq!(store.len(), 2);
}

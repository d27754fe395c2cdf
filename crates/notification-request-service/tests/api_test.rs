//! HTTP 受理接口测试
//!
//! 通过 `tower::ServiceExt::oneshot` 直接驱动路由，无需监听端口。

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use notification_request::api::{AppState, IDEMPOTENCY_KEY_HEADER, ReadinessProbe, build_router};
use notification_request::test_utils::{
    FixtureTemplates, FixtureUsers, ScriptedPublisher, TestHarness, direct_command,
    test_idempotency_key, test_user,
};
use notification_request::NotificationType;
use serde_json::Value;
use tower::ServiceExt;

struct FixedReadiness(bool);

#[async_trait]
impl ReadinessProbe for FixedReadiness {
    async fn is_ready(&self) -> bool {
        self.0
    }
}

fn app(ready: bool) -> (TestHarness, Router) {
    let h = TestHarness::new(
        FixtureUsers::new().with_user(test_user("u1", "ko")),
        FixtureTemplates::new(),
        ScriptedPublisher::new(),
    );
    let router = build_router(AppState::new(
        h.intake.clone(),
        Arc::new(FixedReadiness(ready)),
    ));
    (h, router)
}

fn post(key: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/notifications")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
    }
    builder.body(Body::from(body)).unwrap()
}

fn command_json() -> String {
    serde_json::to_string(&direct_command(&["u1"], NotificationType::Email)).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_create_notification_returns_created() {
    let (h, router) = app(true);
    let key = test_idempotency_key();

    let response = router
        .oneshot(post(Some(&key), command_json()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    assert_eq!(body["status"], "SUCCESS");
    assert!(body["notificationId"].is_string());
    assert_eq!(h.store.requests().len(), 1);
}

#[tokio::test]
async fn test_same_key_replays_first_response() {
    let (h, router) = app(true);
    let key = test_idempotency_key();

    let first = json_body(
        router
            .clone()
            .oneshot(post(Some(&key), command_json()))
            .await
            .unwrap(),
    )
    .await;
    let second = router
        .oneshot(post(Some(&key), command_json()))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(json_body(second).await, first);
    assert_eq!(h.store.requests().len(), 1);
}

#[tokio::test]
async fn test_missing_idempotency_key_is_rejected() {
    let (h, router) = app(true);

    let response = router.oneshot(post(None, command_json())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(h.store.requests().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let (_h, router) = app(true);

    let response = router
        .oneshot(post(Some("k-1"), "{\"requester\":".to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_invalid_command_is_bad_request() {
    let (_h, router) = app(true);
    let mut command = direct_command(&["u1"], NotificationType::Email);
    command.content = None;

    let response = router
        .oneshot(post(
            Some(&test_idempotency_key()),
            serde_json::to_string(&command).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_and_readiness() {
    let (_h, router) = app(true);
    let health = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let ready = router
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::OK);

    let (_h, degraded) = app(false);
    let response = degraded
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

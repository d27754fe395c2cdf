//! 受理接口处理器

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
};
use serde_json::{Value, json};
use tracing::info;

use super::state::AppState;
use crate::dto::{NotificationRequestCommand, NotificationRequestResult};
use crate::error::NotificationError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// 受理通知请求
///
/// POST /api/v1/notifications
pub async fn create_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NotificationRequestCommand>, JsonRejection>,
) -> Result<(StatusCode, Json<NotificationRequestResult>), NotificationError> {
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            NotificationError::Validation("Idempotency-Key header is required".to_string())
        })?
        .to_string();

    let Json(command) =
        payload.map_err(|rejection| NotificationError::Validation(rejection.body_text()))?;

    let result = state.intake.submit(&key, command).await?;
    info!(idempotency_key = %key, notification_id = ?result.notification_id, "受理请求完成");

    Ok((StatusCode::CREATED, Json(result)))
}

/// 存活探针
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "notification-request-service"
    }))
}

/// 就绪探针
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_ok = state.readiness.is_ready().await;
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "service": "notification-request-service",
            "checks": {
                "database": if db_ok { "ok" } else { "fail" }
            }
        })),
    )
}

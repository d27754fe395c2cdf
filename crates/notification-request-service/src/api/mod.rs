//! HTTP 受理接口
//!
//! - `POST /api/v1/notifications`：需要 `Idempotency-Key` 请求头
//! - `GET /health`：存活探针
//! - `GET /ready`：就绪探针，检查数据库连接

mod error;
mod handlers;
mod state;

pub use handlers::IDEMPOTENCY_KEY_HEADER;
pub use state::{AppState, ReadinessProbe};

use axum::{
    Router, middleware,
    routing::{get, post},
};
use notification_shared::observability::middleware as obs_middleware;

/// 受理相关的业务路由
pub fn api_routes() -> Router<AppState> {
    Router::new().route("/notifications", post(handlers::create_notification))
}

/// 完整应用路由，含探针与可观测性中间件
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}

//! HTTP 路由
//!
//! - `GET /users/ids`：全部用户 ID
//! - `GET /users/{id}`：用户联系方式，不存在返回 404
//! - `GET /segments/{name}/users`：分群成员，不存在返回 404
//! - `GET /templates/{id}?channel=EMAIL&language=ko`：模板定义

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::models::{Channel, UserIdsResponse};
use crate::store::ProviderStore;

pub type SharedStore = Arc<ProviderStore>;

#[derive(Debug, Deserialize)]
pub struct TemplateQuery {
    pub channel: String,
    pub language: String,
}

pub fn provider_routes() -> Router<SharedStore> {
    Router::new()
        .route("/users/ids", get(list_user_ids))
        .route("/users/{id}", get(get_user))
        .route("/segments/{name}/users", get(get_segment_users))
        .route("/templates/{id}", get(get_template))
}

/// 完整应用，含健康检查
pub fn build_app(store: SharedStore) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(provider_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn list_user_ids(State(store): State<SharedStore>) -> Json<UserIdsResponse> {
    Json(UserIdsResponse {
        user_ids: store.user_ids(),
    })
}

async fn get_user(State(store): State<SharedStore>, Path(id): Path<String>) -> Response {
    match store.users.get(&id) {
        Some(user) => Json(user).into_response(),
        None => not_found("user", &id),
    }
}

async fn get_segment_users(
    State(store): State<SharedStore>,
    Path(name): Path<String>,
) -> Response {
    match store.segments.get(&name) {
        Some(user_ids) => Json(UserIdsResponse { user_ids }).into_response(),
        None => not_found("segment", &name),
    }
}

async fn get_template(
    State(store): State<SharedStore>,
    Path(id): Path<String>,
    Query(query): Query<TemplateQuery>,
) -> Response {
    let Some(channel) = Channel::parse(&query.channel) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("unknown channel: {}", query.channel) })),
        )
            .into_response();
    };

    debug!(template_id = %id, channel = channel.as_str(), language = %query.language, "查询模板");
    match store.find_template(&id, channel, &query.language) {
        Some(template) => Json(template).into_response(),
        None => not_found("template", &id),
    }
}

fn not_found(entity: &str, id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{entity} not found: {id}") })),
    )
        .into_response()
}

//! 错误到 HTTP 响应的映射
//!
//! 系统级错误只返回通用提示，详细信息仅记录日志。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::NotificationError;

const INTERNAL_MESSAGE: &str = "服务内部错误，请稍后重试";

impl NotificationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::PolicyViolation(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateRequest(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for NotificationError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "请求处理失败");
            INTERNAL_MESSAGE.to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            NotificationError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            NotificationError::PolicyViolation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            NotificationError::DuplicateRequest("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            NotificationError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_not_leaked() {
        let response = NotificationError::Internal("password=secret".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

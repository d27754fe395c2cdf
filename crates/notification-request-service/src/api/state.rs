//! 应用状态定义

use std::sync::Arc;

use async_trait::async_trait;
use notification_shared::database::Database;

use crate::service::NotificationIntakeService;

/// 就绪检查，Postgres 之外的实现用于测试
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_ready(&self) -> bool;
}

#[async_trait]
impl ReadinessProbe for Database {
    async fn is_ready(&self) -> bool {
        self.health_check().await.is_ok()
    }
}

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<NotificationIntakeService>,
    pub readiness: Arc<dyn ReadinessProbe>,
}

impl AppState {
    pub fn new(intake: Arc<NotificationIntakeService>, readiness: Arc<dyn ReadinessProbe>) -> Self {
        Self { intake, readiness }
    }
}

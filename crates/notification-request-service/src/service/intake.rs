//! 通知请求受理服务
//!
//! ## 受理流程
//!
//! 1. 命令校验（不消耗幂等键） -> 2. 幂等守卫 -> 3. 同一事务写入请求、请求 Outbox 与幂等结果
//!    -> 4. 提交后发送信号

use std::sync::Arc;

use chrono::{DateTime, Utc};
use notification_shared::observability::metrics;
use tracing::{error, info, instrument, warn};

use crate::dto::{NotificationRequestCommand, NotificationRequestResult};
use crate::error::Result;
use crate::idempotency::IdempotencyGuard;
use crate::models::OutboxRecord;
use crate::outbox::OutboxSignal;
use crate::repository::RequestRepositoryTrait;

/// 受理操作在幂等表中的操作类型
pub const OPERATION_TYPE: &str = "NOTIFICATION_REQUEST";

const INTERNAL_FAILURE_MESSAGE: &str = "notification request could not be registered";

pub struct NotificationIntakeService {
    requests: Arc<dyn RequestRepositoryTrait>,
    guard: Arc<IdempotencyGuard>,
    signal: OutboxSignal,
}

impl NotificationIntakeService {
    pub fn new(
        requests: Arc<dyn RequestRepositoryTrait>,
        guard: Arc<IdempotencyGuard>,
        signal: OutboxSignal,
    ) -> Self {
        Self {
            requests,
            guard,
            signal,
        }
    }

    /// 受理请求；同一幂等键重复提交时返回首次的结果
    pub async fn submit(
        &self,
        idempotency_key: &str,
        command: NotificationRequestCommand,
    ) -> Result<NotificationRequestResult> {
        self.submit_at(idempotency_key, command, Utc::now()).await
    }

    #[instrument(skip(self, command), fields(requester_id = %command.requester.id))]
    pub async fn submit_at(
        &self,
        idempotency_key: &str,
        command: NotificationRequestCommand,
        now: DateTime<Utc>,
    ) -> Result<NotificationRequestResult> {
        let outcome = self.register(idempotency_key, command, now).await;
        match &outcome {
            Ok(_) => metrics::record_intake("SUCCESS"),
            Err(e) => {
                metrics::record_intake("FAILURE");
                if e.is_business_error() {
                    warn!(idempotency_key, error = %e, "通知请求被拒绝");
                } else {
                    error!(idempotency_key, error = %e, "通知请求受理失败");
                }
            }
        }
        outcome
    }

    /// 只返回 SUCCESS/FAILURE 结果的受理入口，系统错误不暴露细节
    pub async fn try_submit(
        &self,
        idempotency_key: &str,
        command: NotificationRequestCommand,
    ) -> NotificationRequestResult {
        match self.submit(idempotency_key, command).await {
            Ok(result) => result,
            Err(e) if e.is_business_error() => NotificationRequestResult::failure(e.to_string()),
            Err(_) => NotificationRequestResult::failure(INTERNAL_FAILURE_MESSAGE),
        }
    }

    async fn register(
        &self,
        idempotency_key: &str,
        command: NotificationRequestCommand,
        now: DateTime<Utc>,
    ) -> Result<NotificationRequestResult> {
        let request = command.into_request(now)?;
        let outbox = OutboxRecord::for_request(&request, now)?;

        let (pending, pending_outbox) = (&request, &outbox);
        let result = self
            .guard
            .with_idempotency(idempotency_key, OPERATION_TYPE, |scope| async move {
                let result = NotificationRequestResult::success(pending.id);
                let completion = scope.completion(&result)?;
                self.requests
                    .register_request(pending, pending_outbox, &completion)
                    .await?;
                Ok(result)
            })
            .await?;

        // 重放的结果指向首次受理的请求，本次构造的请求未落库
        if result.notification_id == Some(request.id) {
            info!(
                request_id = %request.id,
                audience = request.audience.kind(),
                channels = request.channels.len(),
                scheduled_at = ?request.scheduled_at,
                "通知请求已受理"
            );
            self.signal.notify_at(outbox.id, outbox.next_retry_at, now);
        } else {
            info!(idempotency_key, notification_id = ?result.notification_id, "幂等重放");
        }

        Ok(result)
    }
}

//! 请求 Outbox 处理
//!
//! 一条请求记录的处理：加载请求 -> PENDING 转 PROCESSING -> 解析收件人并组装消息
//! -> 同一事务写入消息与消息 Outbox、完成请求、删除请求记录 -> 提交后发送消息信号。
//! 崩溃后重试不会重复生成消息，因为消息只在最后的事务中写入；
//! 该事务以认领为条件删除请求记录，认领被回收并转给其他实例后旧实例的提交整体回滚。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notification_shared::observability::metrics;
use tracing::{error, info, instrument, warn};

use super::{HandleOutcome, OutboxHandler, after_bookkeeping};
use crate::composer::MessageComposer;
use crate::error::{NotificationError, Result};
use crate::models::{OutboxClaim, OutboxKind, OutboxRecord, RequestStatus};
use crate::outbox::{FailureDecision, OutboxRetryPolicy, OutboxSignal, schedule_retry};
use crate::repository::{OutboxRepositoryTrait, RequestRepositoryTrait};

pub struct RequestOutboxHandler {
    requests: Arc<dyn RequestRepositoryTrait>,
    outbox: Arc<dyn OutboxRepositoryTrait>,
    composer: Arc<MessageComposer>,
    policy: OutboxRetryPolicy,
    message_signal: OutboxSignal,
}

impl RequestOutboxHandler {
    pub fn new(
        requests: Arc<dyn RequestRepositoryTrait>,
        outbox: Arc<dyn OutboxRepositoryTrait>,
        composer: Arc<MessageComposer>,
        policy: OutboxRetryPolicy,
        message_signal: OutboxSignal,
    ) -> Self {
        Self {
            requests,
            outbox,
            composer,
            policy,
            message_signal,
        }
    }

    async fn process(
        &self,
        record: &OutboxRecord,
        claim: &OutboxClaim,
        now: DateTime<Utc>,
    ) -> Result<HandleOutcome> {
        let Some(mut request) = self.requests.find_request(record.aggregate_id).await? else {
            warn!(outbox_id = %record.id, request_id = %record.aggregate_id, "请求不存在，清理 Outbox 记录");
            self.outbox.delete(claim).await?;
            return Ok(HandleOutcome::OrphanCleaned);
        };

        match request.status {
            RequestStatus::Canceled | RequestStatus::Completed | RequestStatus::Failed => {
                info!(request_id = %request.id, status = ?request.status, "请求已结束，清理 Outbox 记录");
                self.outbox.delete(claim).await?;
                return Ok(HandleOutcome::OrphanCleaned);
            }
            RequestStatus::Pending => {
                request.mark_as_processing(now)?;
                self.requests.save_request(&request).await?;
            }
            RequestStatus::Processing => {}
        }

        let messages = self.composer.compose_for(&request, now).await?;
        let pairs = messages
            .into_iter()
            .map(|message| {
                let outbox = OutboxRecord::for_message(&message, now)?;
                Ok((message, outbox))
            })
            .collect::<Result<Vec<_>>>()?;

        request.mark_as_completed(now)?;
        self.requests
            .complete_fan_out(&request, &pairs, claim)
            .await?;

        for (_, outbox) in &pairs {
            self.message_signal
                .notify_at(outbox.id, outbox.next_retry_at, now);
        }

        info!(request_id = %request.id, messages = pairs.len(), "请求 fan-out 完成");
        Ok(HandleOutcome::Sent)
    }

    async fn on_failure(
        &self,
        record: &mut OutboxRecord,
        claim: &OutboxClaim,
        err: NotificationError,
        now: DateTime<Utc>,
    ) -> HandleOutcome {
        if matches!(err, NotificationError::ClaimLost { .. }) {
            warn!(outbox_id = %record.id, request_id = %record.aggregate_id, owner = %claim.owner, "认领已失效，放弃本次 fan-out");
            return HandleOutcome::ClaimLost;
        }

        match self.policy.decide(record.attempts, &err, now) {
            FailureDecision::Retry { next_retry_at, .. } => {
                warn!(outbox_id = %record.id, request_id = %record.aggregate_id, error = %err, "请求处理失败，稍后重试");
                let written =
                    schedule_retry(self.outbox.as_ref(), record, claim, next_retry_at, now).await;
                after_bookkeeping(
                    OutboxKind::Request,
                    record.id,
                    written,
                    HandleOutcome::RetryScheduled,
                )
            }
            FailureDecision::Terminal { reason } => {
                error!(outbox_id = %record.id, request_id = %record.aggregate_id, reason, "请求处理终态失败");
                let written = self.fail_request(record, claim, &reason, now).await;
                after_bookkeeping(
                    OutboxKind::Request,
                    record.id,
                    written,
                    HandleOutcome::FailedTerminal,
                )
            }
        }
    }

    async fn fail_request(
        &self,
        record: &OutboxRecord,
        claim: &OutboxClaim,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self.requests.find_request(record.aggregate_id).await? {
            Some(mut request) if !request.status.is_terminal() => {
                request.fail(reason, now)?;
                self.requests.fail_request(&request, claim).await
            }
            _ => self.outbox.delete(claim).await,
        }
    }
}

#[async_trait]
impl OutboxHandler for RequestOutboxHandler {
    fn kind(&self) -> OutboxKind {
        OutboxKind::Request
    }

    #[instrument(skip_all, fields(outbox_id = %record.id, attempts = record.attempts))]
    async fn handle(&self, mut record: OutboxRecord, now: DateTime<Utc>) -> HandleOutcome {
        let outcome = match record.claim() {
            Ok(claim) => match self.process(&record, &claim, now).await {
                Ok(outcome) => outcome,
                Err(err) => self.on_failure(&mut record, &claim, err, now).await,
            },
            Err(e) => {
                warn!(error = %e, "记录未被认领，跳过");
                HandleOutcome::ClaimLost
            }
        };
        metrics::record_outbox_outcome(OutboxKind::Request.as_str(), outcome.as_label());
        outcome
    }
}

//! 消息 Outbox 处理
//!
//! 发布成功后同一事务保存 DISPATCHED 消息并删除记录。发布成功但提交失败时
//! 按重试策略退避后重新发布，下游按消息 ID 去重。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notification_shared::observability::metrics;
use tracing::{error, info, instrument, warn};

use super::{HandleOutcome, OutboxHandler, after_bookkeeping};
use crate::error::{NotificationError, Result};
use crate::models::{OutboxClaim, OutboxKind, OutboxRecord};
use crate::outbox::{FailureDecision, OutboxRetryPolicy, schedule_retry};
use crate::publisher::DispatchPublisher;
use crate::repository::{MessageRepositoryTrait, OutboxRepositoryTrait};

pub struct MessageOutboxHandler {
    messages: Arc<dyn MessageRepositoryTrait>,
    outbox: Arc<dyn OutboxRepositoryTrait>,
    publisher: Arc<dyn DispatchPublisher>,
    policy: OutboxRetryPolicy,
}

impl MessageOutboxHandler {
    pub fn new(
        messages: Arc<dyn MessageRepositoryTrait>,
        outbox: Arc<dyn OutboxRepositoryTrait>,
        publisher: Arc<dyn DispatchPublisher>,
        policy: OutboxRetryPolicy,
    ) -> Self {
        Self {
            messages,
            outbox,
            publisher,
            policy,
        }
    }

    async fn process(
        &self,
        record: &mut OutboxRecord,
        claim: &OutboxClaim,
        now: DateTime<Utc>,
    ) -> Result<HandleOutcome> {
        let Some(mut message) = self.messages.find_message(record.aggregate_id).await? else {
            warn!(outbox_id = %record.id, message_id = %record.aggregate_id, "消息不存在，清理 Outbox 记录");
            self.outbox.delete(claim).await?;
            return Ok(HandleOutcome::OrphanCleaned);
        };

        if message.is_settled() {
            info!(message_id = %message.id, status = ?message.status, "消息已结束，清理 Outbox 记录");
            self.outbox.delete(claim).await?;
            return Ok(HandleOutcome::OrphanCleaned);
        }

        self.publisher.publish(&message).await?;

        message.mark_as_dispatched(now)?;
        self.messages.settle_message(&message, claim).await?;
        // 提交成功之后才推进记录状态，提交失败时记录仍是 IN_PROGRESS，可以安排重试
        record.mark_sent()?;

        info!(message_id = %message.id, channel = %message.channel, "消息已发布");
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
            warn!(outbox_id = %record.id, message_id = %record.aggregate_id, owner = %claim.owner, "认领已失效，放弃本次结果");
            return HandleOutcome::ClaimLost;
        }

        match self.policy.decide(record.attempts, &err, now) {
            FailureDecision::Retry { next_retry_at, .. } => {
                warn!(outbox_id = %record.id, message_id = %record.aggregate_id, error = %err, "消息发布失败，稍后重试");
                let written =
                    schedule_retry(self.outbox.as_ref(), record, claim, next_retry_at, now).await;
                after_bookkeeping(
                    OutboxKind::Message,
                    record.id,
                    written,
                    HandleOutcome::RetryScheduled,
                )
            }
            FailureDecision::Terminal { reason } => {
                error!(outbox_id = %record.id, message_id = %record.aggregate_id, reason, "消息发布终态失败");
                let written = self.fail_message(record, claim, &reason, now).await;
                after_bookkeeping(
                    OutboxKind::Message,
                    record.id,
                    written,
                    HandleOutcome::FailedTerminal,
                )
            }
        }
    }

    async fn fail_message(
        &self,
        record: &OutboxRecord,
        claim: &OutboxClaim,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self.messages.find_message(record.aggregate_id).await? {
            Some(mut message) if !message.is_settled() => {
                message.mark_as_failed(reason, now)?;
                self.messages.settle_message(&message, claim).await
            }
            _ => self.outbox.delete(claim).await,
        }
    }
}

#[async_trait]
impl OutboxHandler for MessageOutboxHandler {
    fn kind(&self) -> OutboxKind {
        OutboxKind::Message
    }

    #[instrument(skip_all, fields(outbox_id = %record.id, attempts = record.attempts))]
    async fn handle(&self, mut record: OutboxRecord, now: DateTime<Utc>) -> HandleOutcome {
        let outcome = match record.claim() {
            Ok(claim) => match self.process(&mut record, &claim, now).await {
                Ok(outcome) => outcome,
                Err(err) => self.on_failure(&mut record, &claim, err, now).await,
            },
            Err(e) => {
                warn!(error = %e, "记录未被认领，跳过");
                HandleOutcome::ClaimLost
            }
        };
        metrics::record_outbox_outcome(OutboxKind::Message.as_str(), outcome.as_label());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        MessageStatus, NotificationContent, NotificationMessage, NotificationType, OutboxStatus,
        Recipient, SenderInfo,
    };
    use crate::publisher::MockDispatchPublisher;
    use crate::repository::{MockMessageRepositoryTrait, MockOutboxRepositoryTrait};
    use notification_shared::config::OutboxQueueConfig;
    use notification_shared::error::InfraError;
    use uuid::Uuid;

    fn message() -> NotificationMessage {
        NotificationMessage::new(
            Uuid::now_v7(),
            NotificationType::Email,
            Recipient {
                user_id: Some("user-001".into()),
                email: Some("alice@shop.io".into()),
                language: "ko".into(),
                ..Default::default()
            },
            NotificationContent {
                title: Some("t".into()),
                body: Some("b".into()),
                ..Default::default()
            },
            SenderInfo::email("noreply@shop.io", None).unwrap(),
            None,
            Utc::now(),
        )
        .unwrap()
    }

    fn claimed(message: &NotificationMessage, attempts: i32) -> OutboxRecord {
        let now = Utc::now();
        let mut record = OutboxRecord::for_message(message, now).unwrap();
        record.attempts = attempts;
        record.mark_in_progress("test:owner", now).unwrap();
        record
    }

    fn handler(
        messages: MockMessageRepositoryTrait,
        outbox: MockOutboxRepositoryTrait,
        publisher: MockDispatchPublisher,
    ) -> MessageOutboxHandler {
        MessageOutboxHandler::new(
            Arc::new(messages),
            Arc::new(outbox),
            Arc::new(publisher),
            OutboxRetryPolicy::new(OutboxKind::Message, &OutboxQueueConfig::message_defaults()),
        )
    }

    fn repo_returning(msg: NotificationMessage) -> MockMessageRepositoryTrait {
        let mut messages = MockMessageRepositoryTrait::new();
        messages
            .expect_find_message()
            .returning(move |_| Ok(Some(msg.clone())));
        messages
    }

    #[tokio::test]
    async fn test_publish_success_settles_message() {
        let msg = message();
        let record = claimed(&msg, 0);

        let mut messages = repo_returning(msg);
        messages
            .expect_settle_message()
            .withf(|m, claim| {
                m.status == MessageStatus::Dispatched
                    && m.dispatched_at.is_some()
                    && claim.owner == "test:owner"
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let mut publisher = MockDispatchPublisher::new();
        publisher.expect_publish().times(1).returning(|_| Ok(()));

        let outcome = handler(messages, MockOutboxRepositoryTrait::new(), publisher)
            .handle(record, Utc::now())
            .await;
        assert_eq!(outcome, HandleOutcome::Sent);
    }

    #[tokio::test]
    async fn test_already_dispatched_message_is_not_republished() {
        let mut msg = message();
        msg.mark_as_dispatched(Utc::now()).unwrap();
        let record = claimed(&msg, 0);

        let mut outbox = MockOutboxRepositoryTrait::new();
        outbox.expect_delete().times(1).returning(|_| Ok(()));
        let mut publisher = MockDispatchPublisher::new();
        publisher.expect_publish().never();

        let outcome = handler(repo_returning(msg), outbox, publisher)
            .handle(record, Utc::now())
            .await;
        assert_eq!(outcome, HandleOutcome::OrphanCleaned);
    }

    #[tokio::test]
    async fn test_rejected_publish_fails_message_immediately() {
        let msg = message();
        let record = claimed(&msg, 0);

        let mut messages = repo_returning(msg);
        messages
            .expect_settle_message()
            .withf(|m, _| m.status == MessageStatus::Failed && m.failure_reason.is_some())
            .times(1)
            .returning(|_, _| Ok(()));
        let mut publisher = MockDispatchPublisher::new();
        publisher
            .expect_publish()
            .returning(|_| Err(InfraError::kafka_rejected("message too large").into()));

        let outcome = handler(messages, MockOutboxRepositoryTrait::new(), publisher)
            .handle(record, Utc::now())
            .await;
        assert_eq!(outcome, HandleOutcome::FailedTerminal);
    }

    #[tokio::test]
    async fn test_transient_publish_failure_backs_off() {
        let msg = message();
        let record = claimed(&msg, 2);
        let now = Utc::now();

        let mut outbox = MockOutboxRepositoryTrait::new();
        outbox.expect_kind().return_const(OutboxKind::Message);
        outbox
            .expect_save()
            .withf(move |r, claim| {
                r.status == OutboxStatus::Failed
                    && r.attempts == 3
                    && r.next_retry_at == now + chrono::Duration::seconds(120)
                    && claim.owner == "test:owner"
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let mut publisher = MockDispatchPublisher::new();
        publisher
            .expect_publish()
            .returning(|_| Err(InfraError::kafka_transient("broker down").into()));

        let outcome = handler(repo_returning(msg), outbox, publisher)
            .handle(record, now)
            .await;
        assert_eq!(outcome, HandleOutcome::RetryScheduled);
    }

    #[tokio::test]
    async fn test_failed_settle_after_publish_schedules_retry() {
        let msg = message();
        let record = claimed(&msg, 0);
        let now = Utc::now();

        let mut messages = repo_returning(msg);
        messages
            .expect_settle_message()
            .times(1)
            .returning(|_, _| Err(NotificationError::Database(sqlx::Error::PoolTimedOut)));
        let mut publisher = MockDispatchPublisher::new();
        publisher.expect_publish().times(1).returning(|_| Ok(()));

        let mut outbox = MockOutboxRepositoryTrait::new();
        outbox.expect_kind().return_const(OutboxKind::Message);
        outbox
            .expect_save()
            .withf(move |r, _| {
                r.status == OutboxStatus::Failed
                    && r.attempts == 1
                    && r.claim_owner.is_none()
                    && r.next_retry_at == now + chrono::Duration::seconds(30)
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = handler(messages, outbox, publisher)
            .handle(record, now)
            .await;
        assert_eq!(outcome, HandleOutcome::RetryScheduled);
    }

    #[tokio::test]
    async fn test_unwritable_retry_is_reported_as_bookkeeping_failure() {
        let msg = message();
        let record = claimed(&msg, 0);

        let mut outbox = MockOutboxRepositoryTrait::new();
        outbox.expect_kind().return_const(OutboxKind::Message);
        outbox
            .expect_save()
            .times(1)
            .returning(|_, _| Err(NotificationError::Database(sqlx::Error::PoolTimedOut)));
        let mut publisher = MockDispatchPublisher::new();
        publisher
            .expect_publish()
            .returning(|_| Err(InfraError::kafka_transient("broker down").into()));

        let outcome = handler(repo_returning(msg), outbox, publisher)
            .handle(record, Utc::now())
            .await;
        assert_eq!(outcome, HandleOutcome::BookkeepingFailed);
        assert_eq!(outcome.as_label(), crate::outbox::outcome::BOOKKEEPING_FAILED);
    }
}

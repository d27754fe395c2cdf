//! Outbox 失败处理策略
//!
//! - 不可重试错误：立即终态失败，删除 Outbox 记录
//! - 可重试错误且已达上限：终态失败，删除 Outbox 记录
//! - 其余：`attempts + 1`，`next_retry_at = now + min(2^attempts * base, cap)`，状态 FAILED 等待重新认领

use std::time::Duration;

use chrono::{DateTime, Utc};
use notification_shared::config::OutboxQueueConfig;
use notification_shared::retry::RetryPolicy;
use tracing::warn;

use crate::error::{NotificationError, Result};
use crate::models::{OutboxClaim, OutboxKind, OutboxRecord};
use crate::repository::OutboxRepositoryTrait;

/// 处理结果标签，对应 `outbox_outcomes_total{outcome}`
pub mod outcome {
    pub const SENT: &str = "sent";
    pub const RETRY_SCHEDULED: &str = "retry_scheduled";
    pub const FAILED_TERMINAL: &str = "failed_terminal";
    pub const ORPHAN_CLEANED: &str = "orphan_cleaned";
    /// 失败处置写入出错，记录等待过期回收
    pub const BOOKKEEPING_FAILED: &str = "bookkeeping_failed";
    /// 认领失效，本次处理结果被放弃
    pub const CLAIM_LOST: &str = "claim_lost";
}

/// 一次失败之后的处置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDecision {
    /// 标记聚合失败并删除 Outbox 记录
    Terminal { reason: String },
    /// 保留记录，到期后重新认领
    Retry {
        next_retry_at: DateTime<Utc>,
        delay: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct OutboxRetryPolicy {
    kind: OutboxKind,
    max_attempts: i32,
    backoff: RetryPolicy,
}

impl OutboxRetryPolicy {
    pub fn new(kind: OutboxKind, config: &OutboxQueueConfig) -> Self {
        Self {
            kind,
            max_attempts: config.max_attempts,
            backoff: RetryPolicy::exponential(
                config.max_attempts.max(0) as u32,
                Duration::from_secs(config.backoff_base_secs),
                Duration::from_secs(config.backoff_cap_secs),
            ),
        }
    }

    /// attempts 为本次失败之前已记录的重试次数
    pub fn delay_for(&self, attempts: i32) -> Duration {
        self.backoff.delay_for_attempt(attempts.max(0) as u32)
    }

    pub fn decide(
        &self,
        attempts: i32,
        error: &NotificationError,
        now: DateTime<Utc>,
    ) -> FailureDecision {
        if !error.is_retryable() {
            return FailureDecision::Terminal {
                reason: error.to_string(),
            };
        }
        if attempts >= self.max_attempts {
            warn!(kind = %self.kind, attempts, max_attempts = self.max_attempts, "重试次数用尽");
            return FailureDecision::Terminal {
                reason: format!("max retry attempts reached: {}", self.max_attempts),
            };
        }

        let delay = self.delay_for(attempts);
        let step = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        FailureDecision::Retry {
            next_retry_at: now.checked_add_signed(step).unwrap_or(DateTime::<Utc>::MAX_UTC),
            delay,
        }
    }
}

/// 记录一次可重试失败并释放认领
///
/// 写入以本次认领为条件；返回错误时记录保持 IN_PROGRESS，由过期认领清理放回队列。
pub async fn schedule_retry(
    repo: &dyn OutboxRepositoryTrait,
    record: &mut OutboxRecord,
    claim: &OutboxClaim,
    next_retry_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    let kind = repo.kind();
    record.mark_failed(next_retry_at, now)?;
    repo.save(record, claim).await?;

    warn!(
        kind = %kind,
        outbox_id = %record.id,
        aggregate_id = %record.aggregate_id,
        attempts = record.attempts,
        next_retry_at = %record.next_retry_at,
        "已安排重试"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockOutboxRepositoryTrait;

    fn transient() -> NotificationError {
        NotificationError::Transient {
            service: "kafka",
            message: "broker down".into(),
        }
    }

    fn message_policy() -> OutboxRetryPolicy {
        OutboxRetryPolicy::new(OutboxKind::Message, &OutboxQueueConfig::message_defaults())
    }

    fn request_policy() -> OutboxRetryPolicy {
        OutboxRetryPolicy::new(OutboxKind::Request, &OutboxQueueConfig::request_defaults())
    }

    #[test]
    fn test_non_retryable_is_terminal_with_error_message() {
        let now = Utc::now();
        let err = NotificationError::ClientRejected {
            service: "user-config",
            status: 400,
            message: "bad id".into(),
        };
        match message_policy().decide(0, &err, now) {
            FailureDecision::Terminal { reason } => assert_eq!(reason, err.to_string()),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_retry_delay_doubles_from_base() {
        let now = Utc::now();
        let policy = message_policy();
        match policy.decide(0, &transient(), now) {
            FailureDecision::Retry { next_retry_at, delay } => {
                assert_eq!(delay, Duration::from_secs(30));
                assert_eq!(next_retry_at, now + chrono::Duration::seconds(30));
            }
            other => panic!("unexpected decision: {other:?}"),
        }
        assert_eq!(policy.delay_for(3), Duration::from_secs(240));
    }

    #[test]
    fn test_ceiling_differs_per_kind() {
        let now = Utc::now();
        assert!(matches!(
            request_policy().decide(4, &transient(), now),
            FailureDecision::Retry { .. }
        ));
        assert_eq!(
            request_policy().decide(5, &transient(), now),
            FailureDecision::Terminal {
                reason: "max retry attempts reached: 5".into()
            }
        );
        assert!(matches!(
            message_policy().decide(9, &transient(), now),
            FailureDecision::Retry { .. }
        ));
        assert!(matches!(
            message_policy().decide(10, &transient(), now),
            FailureDecision::Terminal { .. }
        ));
    }

    #[test]
    fn test_delay_monotonic_and_capped() {
        for (policy, cap) in [
            (request_policy(), Duration::from_secs(1800)),
            (message_policy(), Duration::from_secs(5 * 3600)),
        ] {
            let mut previous = Duration::ZERO;
            for attempts in 0..64 {
                let delay = policy.delay_for(attempts);
                assert!(delay >= previous, "attempt {attempts}");
                assert!(delay <= cap, "attempt {attempts}");
                previous = delay;
            }
            assert_eq!(previous, cap);
        }
    }

    fn claimed_record(now: DateTime<Utc>) -> (OutboxRecord, OutboxClaim) {
        let mut record =
            OutboxRecord::new(uuid::Uuid::now_v7(), serde_json::Value::Null, now, now).unwrap();
        record.mark_in_progress("node-a:1", now).unwrap();
        let claim = record.claim().unwrap();
        (record, claim)
    }

    #[tokio::test]
    async fn test_schedule_retry_is_fenced_by_claim_owner() {
        let now = Utc::now();
        let (mut record, claim) = claimed_record(now);

        let mut repo = MockOutboxRepositoryTrait::new();
        repo.expect_kind().return_const(OutboxKind::Message);
        repo.expect_save()
            .withf(|r, claim| r.claim_owner.is_none() && claim.owner == "node-a:1")
            .times(1)
            .returning(|_, _| Ok(()));

        schedule_retry(&repo, &mut record, &claim, now + chrono::Duration::seconds(30), now)
            .await
            .unwrap();
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn test_schedule_retry_surfaces_lost_claim() {
        let now = Utc::now();
        let (mut record, claim) = claimed_record(now);
        let outbox_id = record.id;

        let mut repo = MockOutboxRepositoryTrait::new();
        repo.expect_kind().return_const(OutboxKind::Request);
        repo.expect_save()
            .returning(move |_, _| Err(NotificationError::ClaimLost { outbox_id }));

        let err = schedule_retry(&repo, &mut record, &claim, now, now)
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::ClaimLost { .. }));
    }

    #[tokio::test]
    async fn test_schedule_retry_rejects_sent_record() {
        let now = Utc::now();
        let (mut record, claim) = claimed_record(now);
        record.mark_sent().unwrap();

        let mut repo = MockOutboxRepositoryTrait::new();
        repo.expect_kind().return_const(OutboxKind::Message);
        repo.expect_save().never();

        assert!(schedule_retry(&repo, &mut record, &claim, now, now).await.is_err());
        assert_eq!(record.attempts, 0);
    }
}

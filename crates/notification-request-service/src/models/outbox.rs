//! Outbox 记录
//!
//! 请求 Outbox 与消息 Outbox 共用同一结构，由 [`OutboxKind`] 区分表。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::enums::OutboxStatus;
use super::message::NotificationMessage;
use super::request::NotificationRequest;
use crate::error::{NotificationError, Result};

/// next_retry_at 允许早于 created_at 的时钟偏差
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboxKind {
    Request,
    Message,
}

impl OutboxKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Request => "request_outbox",
            Self::Message => "message_outbox",
        }
    }

    /// 指标与日志中使用的标签
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Message => "message",
        }
    }
}

impl std::fmt::Display for OutboxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次认领的凭证：记录 ID 与认领者
///
/// 认领之后的所有写入都以它为条件，认领被回收或转给其他实例后写入不生效。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxClaim {
    pub outbox_id: Uuid,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxRecord {
    pub id: Uuid,
    /// 对应的请求或消息 ID
    pub aggregate_id: Uuid,
    /// 入队时的聚合快照
    pub payload: Value,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub next_retry_at: DateTime<Utc>,
    pub claim_owner: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    pub fn new(
        aggregate_id: Uuid,
        payload: Value,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if next_retry_at < now - Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS) {
            return Err(NotificationError::PolicyViolation(format!(
                "next_retry_at {next_retry_at} precedes created_at {now} beyond tolerance"
            )));
        }
        Ok(Self {
            id: Uuid::now_v7(),
            aggregate_id,
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_retry_at,
            claim_owner: None,
            processed_at: None,
            created_at: now,
        })
    }

    /// 预约请求在预约时间之前不会被认领
    pub fn for_request(request: &NotificationRequest, now: DateTime<Utc>) -> Result<Self> {
        let next_retry_at = request.scheduled_at.map_or(now, |at| at.max(now));
        Self::new(request.id, serde_json::to_value(request)?, next_retry_at, now)
    }

    pub fn for_message(message: &NotificationMessage, now: DateTime<Utc>) -> Result<Self> {
        let next_retry_at = message.scheduled_at.map_or(now, |at| at.max(now));
        Self::new(message.id, serde_json::to_value(message)?, next_retry_at, now)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, OutboxStatus::Pending | OutboxStatus::Failed)
            && self.claim_owner.is_none()
            && self.next_retry_at <= now
    }

    /// 当前认领的凭证，未被认领时返回 `ClaimLost`
    pub fn claim(&self) -> Result<OutboxClaim> {
        match (&self.status, &self.claim_owner) {
            (OutboxStatus::InProgress | OutboxStatus::Sent, Some(owner)) => Ok(OutboxClaim {
                outbox_id: self.id,
                owner: owner.clone(),
            }),
            _ => Err(NotificationError::ClaimLost { outbox_id: self.id }),
        }
    }

    /// PENDING/FAILED → IN_PROGRESS
    pub fn mark_in_progress(&mut self, owner: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if !matches!(self.status, OutboxStatus::Pending | OutboxStatus::Failed) {
            return Err(self.violation(OutboxStatus::InProgress));
        }
        self.status = OutboxStatus::InProgress;
        self.claim_owner = Some(owner.into());
        self.processed_at = Some(now);
        Ok(())
    }

    /// IN_PROGRESS → SENT，随后记录会被删除
    pub fn mark_sent(&mut self) -> Result<()> {
        if self.status != OutboxStatus::InProgress {
            return Err(self.violation(OutboxStatus::Sent));
        }
        self.status = OutboxStatus::Sent;
        Ok(())
    }

    /// 记录一次可重试失败并释放认领
    pub fn mark_failed(&mut self, next_retry_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        if !matches!(self.status, OutboxStatus::Pending | OutboxStatus::InProgress) {
            return Err(self.violation(OutboxStatus::Failed));
        }
        if next_retry_at < now {
            return Err(NotificationError::PolicyViolation(format!(
                "next_retry_at {next_retry_at} must not precede now {now}"
            )));
        }
        self.status = OutboxStatus::Failed;
        self.attempts += 1;
        self.next_retry_at = next_retry_at;
        self.claim_owner = None;
        Ok(())
    }

    fn violation(&self, to: OutboxStatus) -> NotificationError {
        NotificationError::PolicyViolation(format!(
            "outbox record {} cannot transition from {} to {}",
            self.id,
            self.status.as_str(),
            to.as_str()
        ))
    }
}

//! 渠道消息聚合

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::NotificationContent;
use super::enums::{MessageStatus, NotificationType};
use super::sender::SenderInfo;
use crate::error::{NotificationError, Result};

/// 解析后的收件人联系方式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    /// 直接收件人没有用户 ID
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub device_token: Option<String>,
    pub language: String,
}

impl Recipient {
    /// 渠道对应的非空联系方式
    pub fn contact_for(&self, channel: NotificationType) -> Option<&str> {
        let value = match channel {
            NotificationType::Email => self.email.as_deref(),
            NotificationType::Sms => self.phone_number.as_deref(),
            NotificationType::Push => self.device_token.as_deref(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    pub fn supports(&self, channel: NotificationType) -> bool {
        self.contact_for(channel).is_some()
    }

    fn has_any_contact(&self) -> bool {
        NotificationType::ALL.iter().any(|c| self.supports(*c))
            || self.user_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }
}

/// 单个 (收件人, 渠道) 消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub id: Uuid,
    pub request_id: Uuid,
    pub channel: NotificationType,
    pub recipient: Recipient,
    pub content: NotificationContent,
    pub sender: SenderInfo,
    pub status: MessageStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn new(
        request_id: Uuid,
        channel: NotificationType,
        recipient: Recipient,
        content: NotificationContent,
        sender: SenderInfo,
        scheduled_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if !recipient.has_any_contact() {
            return Err(NotificationError::PolicyViolation(
                "message recipient must carry at least one contact".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::now_v7(),
            request_id,
            channel,
            recipient,
            content,
            sender,
            status: MessageStatus::Pending,
            scheduled_at,
            dispatched_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn mark_as_dispatched(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != MessageStatus::Pending {
            return Err(self.violation(MessageStatus::Dispatched));
        }
        self.status = MessageStatus::Dispatched;
        self.dispatched_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_as_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if self.status == MessageStatus::Failed {
            return Err(self.violation(MessageStatus::Failed));
        }
        self.status = MessageStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = now;
        Ok(())
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.status, MessageStatus::Dispatched | MessageStatus::Failed)
    }

    fn violation(&self, to: MessageStatus) -> NotificationError {
        NotificationError::PolicyViolation(format!(
            "notification message {} cannot transition from {:?} to {:?}",
            self.id, self.status, to
        ))
    }
}

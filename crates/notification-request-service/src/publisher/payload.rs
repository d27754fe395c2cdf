//! 渠道载荷
//!
//! 字段名使用 camelCase，与下游发送器的消费协议一致。

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{NotificationError, Result};
use crate::models::{NotificationMessage, NotificationType, SenderInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPayload {
    pub message_id: Uuid,
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub sender_name: Option<String>,
    pub sender_email: String,
    pub recipient_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsPayload {
    pub message_id: Uuid,
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub sender_phone: String,
    pub recipient_phone: String,
    pub message_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub message_id: Uuid,
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub device_token: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub image_url: Option<String>,
    pub redirect_url: Option<String>,
    pub sender_name: String,
}

/// 按渠道区分的发布载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DispatchPayload {
    Email(EmailPayload),
    Sms(SmsPayload),
    Push(PushPayload),
}

impl DispatchPayload {
    /// 从消息构建载荷；联系方式缺失或发送方类型不符时返回不可重试的校验错误
    pub fn build(message: &NotificationMessage) -> Result<Self> {
        let recipient_contact = || {
            message
                .recipient
                .contact_for(message.channel)
                .map(str::to_string)
                .ok_or_else(|| {
                    NotificationError::Validation(format!(
                        "message {} has no {} contact",
                        message.id, message.channel
                    ))
                })
        };

        let content = &message.content;
        match (message.channel, &message.sender) {
            (NotificationType::Email, SenderInfo::Email { address, name }) => {
                Ok(Self::Email(EmailPayload {
                    message_id: message.id,
                    request_id: message.request_id,
                    created_at: message.created_at,
                    subject: content.title.clone(),
                    body: content.body.clone(),
                    sender_name: name.clone(),
                    sender_email: address.clone(),
                    recipient_email: recipient_contact()?,
                }))
            }
            (NotificationType::Sms, SenderInfo::Sms { phone_number, .. }) => {
                Ok(Self::Sms(SmsPayload {
                    message_id: message.id,
                    request_id: message.request_id,
                    created_at: message.created_at,
                    sender_phone: phone_number.clone(),
                    recipient_phone: recipient_contact()?,
                    message_text: content.body.clone(),
                }))
            }
            (NotificationType::Push, SenderInfo::Push { name }) => Ok(Self::Push(PushPayload {
                message_id: message.id,
                request_id: message.request_id,
                created_at: message.created_at,
                device_token: recipient_contact()?,
                title: content.title.clone(),
                body: content.body.clone(),
                image_url: content.image_url.clone(),
                redirect_url: content.redirect_url.clone(),
                sender_name: name.clone(),
            })),
            (channel, sender) => Err(NotificationError::Validation(format!(
                "message {} has a {} sender on the {channel} channel",
                message.id,
                sender.channel()
            ))),
        }
    }

    pub fn channel(&self) -> NotificationType {
        match self {
            Self::Email(_) => NotificationType::Email,
            Self::Sms(_) => NotificationType::Sms,
            Self::Push(_) => NotificationType::Push,
        }
    }
}

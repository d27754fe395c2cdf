//! 受理接口的命令与结果
//!
//! 命令是调用方提交的原始结构，`into_request` 完成形状校验并映射为领域请求。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{NotificationError, Result};
use crate::models::{
    DirectRecipient, NewNotificationRequest, NotificationContent, NotificationRequest,
    NotificationType, RequestContent, Requester, RequesterType, SenderInfo, TargetAudience,
    TemplateInfo,
};

pub const REGISTERED_MESSAGE: &str = "Notification request registered successfully.";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RequesterDto {
    #[serde(rename = "type")]
    pub requester_type: RequesterType,
    #[validate(length(min = 1, max = 100, message = "请求方 ID 长度必须在1-100个字符之间"))]
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectRecipientDto {
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub device_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientsDto {
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub direct_recipients: Vec<DirectRecipientDto>,
    pub segment: Option<String>,
    #[serde(default)]
    pub all_users: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfoDto {
    pub sender_phone_number: Option<String>,
    pub sender_email_address: Option<String>,
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDto {
    pub title: Option<String>,
    pub body: Option<String>,
    pub redirect_url: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDto {
    #[validate(length(min = 1, max = 100, message = "模板 ID 长度必须在1-100个字符之间"))]
    pub template_id: String,
    #[serde(default)]
    pub template_parameters: BTreeMap<String, String>,
}

/// 通知请求命令
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequestCommand {
    #[validate(nested)]
    pub requester: RequesterDto,
    #[serde(default)]
    pub recipients: RecipientsDto,
    #[validate(length(min = 1, message = "至少需要一种通知类型"))]
    pub notification_types: Vec<NotificationType>,
    #[serde(default)]
    pub sender_infos: BTreeMap<NotificationType, SenderInfoDto>,
    pub content: Option<ContentDto>,
    #[validate(nested)]
    pub template: Option<TemplateDto>,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[validate(length(max = 500, message = "备注不能超过500字符"))]
    pub memo: Option<String>,
}

impl NotificationRequestCommand {
    /// 校验命令并构造 PENDING 请求
    pub fn into_request(self, now: DateTime<Utc>) -> Result<NotificationRequest> {
        self.validate()
            .map_err(|e| NotificationError::Validation(e.to_string()))?;

        let audience = self.recipients.into_audience()?;

        let mut senders = BTreeMap::new();
        for channel in &self.notification_types {
            let dto = self.sender_infos.get(channel).cloned().unwrap_or_default();
            senders.insert(*channel, dto.into_sender(*channel)?);
        }

        let content = RequestContent::from_parts(
            self.content.map(|c| NotificationContent {
                title: c.title,
                body: c.body,
                redirect_url: c.redirect_url,
                image_url: c.image_url,
            }),
            self.template
                .map(|t| TemplateInfo::new(t.template_id, t.template_parameters))
                .transpose()?,
        )?;

        NotificationRequest::new(
            NewNotificationRequest {
                requester: Requester {
                    requester_type: self.requester.requester_type,
                    id: self.requester.id,
                },
                audience,
                channels: self.notification_types,
                senders,
                content,
                memo: self.memo,
                scheduled_at: self.scheduled_at,
            },
            now,
        )
    }
}

impl RecipientsDto {
    /// allUsers 优先，其次 segment，最后按 userIds / directRecipients 组合
    pub fn into_audience(self) -> Result<TargetAudience> {
        if self.all_users {
            return Ok(TargetAudience::all_users());
        }
        if let Some(segment) = self.segment.filter(|s| !s.trim().is_empty()) {
            return TargetAudience::segment(segment);
        }

        let recipients = self
            .direct_recipients
            .into_iter()
            .map(|r| DirectRecipient::new(r.phone_number, r.email, r.device_token))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| NotificationError::Validation(e.to_string()))?;

        let audience = match (self.user_ids.len(), recipients.is_empty()) {
            (0, true) => {
                return Err(NotificationError::Validation(
                    "recipients must contain userIds, directRecipients, segment or allUsers"
                        .to_string(),
                ));
            }
            (0, false) => TargetAudience::direct_recipients(recipients),
            (1, true) => TargetAudience::single_user(self.user_ids[0].clone()),
            (_, true) => TargetAudience::multiple_users(self.user_ids),
            (_, false) => TargetAudience::mixed(self.user_ids, recipients),
        };
        audience.map_err(|e| NotificationError::Validation(e.to_string()))
    }
}

impl SenderInfoDto {
    fn into_sender(self, channel: NotificationType) -> Result<SenderInfo> {
        match channel {
            NotificationType::Sms => {
                SenderInfo::sms(self.sender_phone_number.unwrap_or_default(), self.sender_name)
            }
            NotificationType::Email => SenderInfo::email(
                self.sender_email_address.unwrap_or_default(),
                self.sender_name,
            ),
            NotificationType::Push => SenderInfo::push(self.sender_name.unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Failure,
}

/// 受理结果，同时也是幂等表中存储的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequestResult {
    pub status: ResultStatus,
    pub notification_id: Option<Uuid>,
    pub message: String,
}

impl NotificationRequestResult {
    pub fn success(notification_id: Uuid) -> Self {
        Self {
            status: ResultStatus::Success,
            notification_id: Some(notification_id),
            message: REGISTERED_MESSAGE.to_string(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Failure,
            notification_id: None,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

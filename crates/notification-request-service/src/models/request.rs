//! 通知请求聚合及其状态机

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audience::TargetAudience;
use super::content::RequestContent;
use super::enums::{NotificationType, RequestStatus, RequesterType};
use super::sender::SenderInfo;
use crate::error::{NotificationError, Result};

/// 请求方
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requester {
    pub requester_type: RequesterType,
    pub id: String,
}

/// 创建请求所需的已解析参数
#[derive(Debug, Clone)]
pub struct NewNotificationRequest {
    pub requester: Requester,
    pub audience: TargetAudience,
    pub channels: Vec<NotificationType>,
    pub senders: BTreeMap<NotificationType, SenderInfo>,
    pub content: RequestContent,
    pub memo: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// 通知请求
///
/// 状态只能通过 `mark_as_*` 方法推进；非法迁移返回 `PolicyViolation` 且不修改状态。
/// 终态请求保留用于审计，不会被删除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub id: Uuid,
    pub requester: Requester,
    pub audience: TargetAudience,
    /// 去重后的渠道列表，保持首次出现顺序
    pub channels: Vec<NotificationType>,
    pub senders: BTreeMap<NotificationType, SenderInfo>,
    pub content: RequestContent,
    pub memo: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: RequestStatus,
    pub failure_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRequest {
    /// 校验并创建 PENDING 状态的请求
    pub fn new(params: NewNotificationRequest, now: DateTime<Utc>) -> Result<Self> {
        if params.requester.id.trim().is_empty() {
            return Err(NotificationError::Validation(
                "requester id must not be blank".to_string(),
            ));
        }

        params.audience.validate()?;

        let mut channels = Vec::with_capacity(params.channels.len());
        for channel in params.channels {
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }
        if channels.is_empty() {
            return Err(NotificationError::Validation(
                "at least one notification type is required".to_string(),
            ));
        }

        for channel in &channels {
            match params.senders.get(channel) {
                Some(sender) if sender.channel() == *channel => {}
                Some(_) => {
                    return Err(NotificationError::Validation(format!(
                        "sender info for {channel} has a mismatched type"
                    )));
                }
                None => {
                    return Err(NotificationError::Validation(format!(
                        "sender info is required for {channel}"
                    )));
                }
            }
        }

        if let Some(scheduled_at) = params.scheduled_at {
            if scheduled_at < now {
                return Err(NotificationError::Validation(
                    "scheduledAt must not be in the past".to_string(),
                ));
            }
        }

        // 只保留实际请求的渠道对应的发送方
        let senders = params
            .senders
            .into_iter()
            .filter(|(channel, _)| channels.contains(channel))
            .collect();

        Ok(Self {
            id: Uuid::now_v7(),
            requester: params.requester,
            audience: params.audience,
            channels,
            senders,
            content: params.content,
            memo: params.memo,
            scheduled_at: params.scheduled_at,
            status: RequestStatus::Pending,
            failure_reason: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn sender_for(&self, channel: NotificationType) -> Option<&SenderInfo> {
        self.senders.get(&channel)
    }

    pub fn mark_as_processing(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(RequestStatus::Processing, &[RequestStatus::Pending], now)
    }

    pub fn mark_as_completed(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(RequestStatus::Completed, &[RequestStatus::Processing], now)?;
        self.processed_at = Some(now);
        Ok(())
    }

    pub fn mark_as_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(RequestStatus::Failed, &[RequestStatus::Processing], now)?;
        self.failure_reason = Some(reason.into());
        self.processed_at = Some(now);
        Ok(())
    }

    pub fn mark_as_canceled(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(
            RequestStatus::Canceled,
            &[RequestStatus::Pending, RequestStatus::Processing],
            now,
        )
    }

    /// 终态失败；PENDING 请求先经过 PROCESSING，保证观察到的状态序列合法
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if self.status == RequestStatus::Pending {
            self.mark_as_processing(now)?;
        }
        self.mark_as_failed(reason, now)
    }

    fn transition(
        &mut self,
        to: RequestStatus,
        allowed_from: &[RequestStatus],
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !allowed_from.contains(&self.status) {
            return Err(NotificationError::PolicyViolation(format!(
                "notification request {} cannot transition from {:?} to {:?}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::NotificationContent;
    use chrono::Duration;

    fn params() -> NewNotificationRequest {
        NewNotificationRequest {
            requester: Requester {
                requester_type: RequesterType::System,
                id: "order-service".into(),
            },
            audience: TargetAudience::single_user("u1").unwrap(),
            channels: vec![NotificationType::Push, NotificationType::Push],
            senders: BTreeMap::from([(
                NotificationType::Push,
                SenderInfo::push("Shop").unwrap(),
            )]),
            content: RequestContent::Direct(
                NotificationContent::new(Some("Hi".into()), None, None, None).unwrap(),
            ),
            memo: None,
            scheduled_at: None,
        }
    }

    #[test]
    fn test_new_request_is_pending_with_deduplicated_channels() {
        let request = NotificationRequest::new(params(), Utc::now()).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.channels, vec![NotificationType::Push]);
    }

    #[test]
    fn test_missing_or_mismatched_sender_rejected() {
        let mut p = params();
        p.channels = vec![NotificationType::Email];
        assert!(matches!(
            NotificationRequest::new(p, Utc::now()),
            Err(NotificationError::Validation(_))
        ));

        let mut p = params();
        p.senders = BTreeMap::from([(
            NotificationType::Push,
            SenderInfo::sms("1588", None).unwrap(),
        )]);
        assert!(NotificationRequest::new(p, Utc::now()).is_err());
    }

    #[test]
    fn test_schedule_in_past_rejected() {
        let now = Utc::now();
        let mut p = params();
        p.scheduled_at = Some(now - Duration::seconds(1));
        assert!(NotificationRequest::new(p, now).is_err());

        let mut p = params();
        p.scheduled_at = Some(now + Duration::hours(1));
        assert!(NotificationRequest::new(p, now).is_ok());
    }

    #[test]
    fn test_happy_path_transitions() {
        let now = Utc::now();
        let mut request = NotificationRequest::new(params(), now).unwrap();
        request.mark_as_processing(now).unwrap();
        request.mark_as_completed(now).unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert_eq!(request.processed_at, Some(now));
    }

    #[test]
    fn test_illegal_transitions_leave_state_unchanged() {
        let now = Utc::now();
        let mut request = NotificationRequest::new(params(), now).unwrap();

        // PENDING 不能直接完成或失败
        assert!(request.mark_as_completed(now).is_err());
        assert!(request.mark_as_failed("x", now).is_err());
        assert_eq!(request.status, RequestStatus::Pending);

        request.mark_as_canceled(now).unwrap();
        for result in [
            request.mark_as_processing(now),
            request.mark_as_completed(now),
            request.mark_as_failed("x", now),
            request.mark_as_canceled(now),
        ] {
            assert!(matches!(result, Err(NotificationError::PolicyViolation(_))));
        }
        assert_eq!(request.status, RequestStatus::Canceled);
        assert!(request.failure_reason.is_none());
    }

    #[test]
    fn test_fail_from_pending_passes_through_processing() {
        let now = Utc::now();
        let mut request = NotificationRequest::new(params(), now).unwrap();
        request.fail("boom", now).unwrap();
        assert_eq!(request.status, RequestStatus::Failed);
        assert_eq!(request.failure_reason.as_deref(), Some("boom"));

        assert!(request.fail("again", now).is_err());
        assert_eq!(request.failure_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn test_serde_roundtrip_keeps_map_keys() {
        let request = NotificationRequest::new(params(), Utc::now()).unwrap();
        let json = serde_json::to_value(&request).unwrap();
        assert!(json["senders"]["PUSH"].is_object());
        let back: NotificationRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }
}

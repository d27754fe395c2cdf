//! 受众模型
//!
//! `TargetAudience` 是封闭的标签联合，解析器、持久化和消息组装处都做穷尽匹配，
//! 新增受众类型时编译器会指出所有需要处理的位置。

use serde::{Deserialize, Serialize};

use crate::error::{NotificationError, Result};

/// 非会员直接收件人
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectRecipient {
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub device_token: Option<String>,
}

impl DirectRecipient {
    /// 空白联系方式视为未提供，至少需要一种联系方式
    pub fn new(
        phone_number: Option<String>,
        email: Option<String>,
        device_token: Option<String>,
    ) -> Result<Self> {
        let recipient = Self {
            phone_number: non_blank(phone_number),
            email: non_blank(email),
            device_token: non_blank(device_token),
        };
        recipient.validate()?;
        Ok(recipient)
    }

    pub fn validate(&self) -> Result<()> {
        if self.phone_number.is_none() && self.email.is_none() && self.device_token.is_none() {
            return Err(NotificationError::PolicyViolation(
                "direct recipient must have at least one contact (phone, email or device token)"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// 目标受众
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetAudience {
    SingleUser {
        user_id: String,
    },
    MultipleUsers {
        user_ids: Vec<String>,
    },
    AllUsers,
    Segment {
        name: String,
    },
    DirectRecipients {
        recipients: Vec<DirectRecipient>,
    },
    Mixed {
        user_ids: Vec<String>,
        recipients: Vec<DirectRecipient>,
    },
}

impl TargetAudience {
    pub fn single_user(user_id: impl Into<String>) -> Result<Self> {
        let audience = Self::SingleUser {
            user_id: user_id.into().trim().to_string(),
        };
        audience.validate()?;
        Ok(audience)
    }

    /// 用户 ID 去重并保留首次出现的顺序
    pub fn multiple_users(user_ids: Vec<String>) -> Result<Self> {
        let audience = Self::MultipleUsers {
            user_ids: dedup_ids(user_ids),
        };
        audience.validate()?;
        Ok(audience)
    }

    pub fn all_users() -> Self {
        Self::AllUsers
    }

    pub fn segment(name: impl Into<String>) -> Result<Self> {
        let audience = Self::Segment {
            name: name.into().trim().to_string(),
        };
        audience.validate()?;
        Ok(audience)
    }

    pub fn direct_recipients(recipients: Vec<DirectRecipient>) -> Result<Self> {
        let audience = Self::DirectRecipients { recipients };
        audience.validate()?;
        Ok(audience)
    }

    pub fn mixed(user_ids: Vec<String>, recipients: Vec<DirectRecipient>) -> Result<Self> {
        let audience = Self::Mixed {
            user_ids: dedup_ids(user_ids),
            recipients,
        };
        audience.validate()?;
        Ok(audience)
    }

    /// 校验各变体的不变量，非法组合直接拒绝而不是静默修正
    pub fn validate(&self) -> Result<()> {
        let violation = |msg: &str| Err(NotificationError::PolicyViolation(msg.to_string()));

        match self {
            Self::SingleUser { user_id } => {
                if user_id.trim().is_empty() {
                    return violation("SINGLE_USER audience requires a non-blank user id");
                }
            }
            Self::MultipleUsers { user_ids } => {
                if user_ids.is_empty() {
                    return violation("MULTIPLE_USERS audience requires at least one user id");
                }
                if user_ids.iter().any(|id| id.trim().is_empty()) {
                    return violation("user ids must not be blank");
                }
            }
            Self::AllUsers => {}
            Self::Segment { name } => {
                if name.trim().is_empty() {
                    return violation("SEGMENT audience requires a non-blank segment name");
                }
            }
            Self::DirectRecipients { recipients } => {
                if recipients.is_empty() {
                    return violation("DIRECT_RECIPIENTS audience requires at least one recipient");
                }
                for recipient in recipients {
                    recipient.validate()?;
                }
            }
            Self::Mixed {
                user_ids,
                recipients,
            } => {
                if user_ids.is_empty() && recipients.is_empty() {
                    return violation("MIXED audience requires user ids or direct recipients");
                }
                if user_ids.iter().any(|id| id.trim().is_empty()) {
                    return violation("user ids must not be blank");
                }
                for recipient in recipients {
                    recipient.validate()?;
                }
            }
        }
        Ok(())
    }

    /// 需要通过用户配置服务解析的显式用户 ID
    pub fn user_ids(&self) -> &[String] {
        match self {
            Self::SingleUser { user_id } => std::slice::from_ref(user_id),
            Self::MultipleUsers { user_ids } | Self::Mixed { user_ids, .. } => user_ids,
            Self::AllUsers | Self::Segment { .. } | Self::DirectRecipients { .. } => &[],
        }
    }

    /// 无需查询即可直接使用的联系方式
    pub fn direct_recipients_list(&self) -> &[DirectRecipient] {
        match self {
            Self::DirectRecipients { recipients } | Self::Mixed { recipients, .. } => recipients,
            Self::SingleUser { .. }
            | Self::MultipleUsers { .. }
            | Self::AllUsers
            | Self::Segment { .. } => &[],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SingleUser { .. } => "SINGLE_USER",
            Self::MultipleUsers { .. } => "MULTIPLE_USERS",
            Self::AllUsers => "ALL_USERS",
            Self::Segment { .. } => "SEGMENT",
            Self::DirectRecipients { .. } => "DIRECT_RECIPIENTS",
            Self::Mixed { .. } => "MIXED",
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn dedup_ids(user_ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    user_ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_only(email: &str) -> DirectRecipient {
        DirectRecipient::new(None, Some(email.to_string()), None).unwrap()
    }

    #[test]
    fn test_direct_recipient_requires_contact() {
        let err = DirectRecipient::new(Some("  ".into()), None, Some(String::new())).unwrap_err();
        assert!(matches!(err, NotificationError::PolicyViolation(_)));

        let recipient = DirectRecipient::new(Some(" 010-1234 ".into()), None, None).unwrap();
        assert_eq!(recipient.phone_number.as_deref(), Some("010-1234"));
    }

    #[test]
    fn test_invalid_audiences_are_rejected() {
        assert!(TargetAudience::single_user("  ").is_err());
        assert!(TargetAudience::multiple_users(vec![]).is_err());
        assert!(TargetAudience::segment("").is_err());
        assert!(TargetAudience::direct_recipients(vec![]).is_err());
        assert!(TargetAudience::mixed(vec![], vec![]).is_err());
    }

    #[test]
    fn test_multiple_users_deduplicates_in_order() {
        let audience = TargetAudience::multiple_users(vec![
            "u2".into(),
            "u1".into(),
            "u2".into(),
        ])
        .unwrap();
        assert_eq!(audience.user_ids(), &["u2".to_string(), "u1".to_string()]);
    }

    #[test]
    fn test_accessors_by_variant() {
        let single = TargetAudience::single_user("u1").unwrap();
        assert_eq!(single.user_ids(), &["u1".to_string()]);
        assert!(single.direct_recipients_list().is_empty());

        let mixed = TargetAudience::mixed(vec!["u1".into()], vec![email_only("a@x.io")]).unwrap();
        assert_eq!(mixed.user_ids().len(), 1);
        assert_eq!(mixed.direct_recipients_list().len(), 1);

        assert!(TargetAudience::all_users().user_ids().is_empty());
    }

    #[test]
    fn test_serde_is_tagged() {
        let audience = TargetAudience::segment("VIP").unwrap();
        let json = serde_json::to_value(&audience).unwrap();
        assert_eq!(json["type"], "SEGMENT");
        let back: TargetAudience = serde_json::from_value(json).unwrap();
        assert_eq!(back, audience);
    }
}

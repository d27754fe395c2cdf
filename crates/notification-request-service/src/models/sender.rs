//! 发送方身份

use serde::{Deserialize, Serialize};

use super::enums::NotificationType;
use crate::error::{NotificationError, Result};

/// 各渠道的发送方信息，变体必须与所服务的渠道一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderInfo {
    Sms {
        phone_number: String,
        name: Option<String>,
    },
    Email {
        address: String,
        name: Option<String>,
    },
    Push {
        name: String,
    },
}

impl SenderInfo {
    pub fn sms(phone_number: impl Into<String>, name: Option<String>) -> Result<Self> {
        let phone_number = phone_number.into().trim().to_string();
        if phone_number.is_empty() {
            return Err(NotificationError::Validation(
                "SMS sender requires a phone number".to_string(),
            ));
        }
        Ok(Self::Sms { phone_number, name })
    }

    pub fn email(address: impl Into<String>, name: Option<String>) -> Result<Self> {
        let address = address.into().trim().to_string();
        if address.is_empty() {
            return Err(NotificationError::Validation(
                "EMAIL sender requires an address".to_string(),
            ));
        }
        Ok(Self::Email { address, name })
    }

    pub fn push(name: impl Into<String>) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(NotificationError::Validation(
                "PUSH sender requires a name".to_string(),
            ));
        }
        Ok(Self::Push { name })
    }

    pub fn channel(&self) -> NotificationType {
        match self {
            Self::Sms { .. } => NotificationType::Sms,
            Self::Email { .. } => NotificationType::Email,
            Self::Push { .. } => NotificationType::Push,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::Sms { name, .. } | Self::Email { name, .. } => name.as_deref(),
            Self::Push { name } => Some(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_channel_matches_variant() {
        assert_eq!(
            SenderInfo::sms("1588-0000", None).unwrap().channel(),
            NotificationType::Sms
        );
        assert_eq!(
            SenderInfo::email("noreply@shop.io", Some("Shop".into()))
                .unwrap()
                .channel(),
            NotificationType::Email
        );
        assert_eq!(
            SenderInfo::push("Shop").unwrap().channel(),
            NotificationType::Push
        );
    }

    #[test]
    fn test_blank_sender_rejected() {
        assert!(SenderInfo::sms(" ", None).is_err());
        assert!(SenderInfo::email("", None).is_err());
        assert!(SenderInfo::push("").is_err());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(SenderInfo::push("Shop").unwrap().display_name(), Some("Shop"));
        assert_eq!(SenderInfo::sms("1588", None).unwrap().display_name(), None);
    }
}

//! 模拟数据模型
//!
//! JSON 形状与通知请求服务读取的用户配置、模板定义保持一致（camelCase）。

use serde::{Deserialize, Serialize};

/// 通知渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Sms,
    Email,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Self::Sms, Self::Email, Self::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "SMS",
            Self::Email => "EMAIL",
            Self::Push => "PUSH",
        }
    }

    /// 大小写不敏感解析查询参数
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

/// 用户联系方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockUser {
    pub user_id: String,
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub push_token: Option<String>,
    pub language: Option<String>,
}

impl MockUser {
    pub fn new(user_id: &str, user_name: &str, language: &str) -> Self {
        let suffix = user_id.trim_start_matches("user-");
        Self {
            user_id: user_id.to_string(),
            user_name: Some(user_name.to_string()),
            email: Some(format!("{user_id}@example.com")),
            phone_number: Some(format!("010-1234-{suffix:0>4}")),
            push_token: Some(format!("push-token-{suffix}")),
            language: Some(language.to_string()),
        }
    }
}

/// 模板定义，`${{name}}` 占位符保持原样
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockTemplate {
    pub template_id: String,
    pub channel: Channel,
    pub language: String,
    pub title_template: Option<String>,
    pub body_template: String,
}

impl MockTemplate {
    /// 存储键：`{templateId}:{channel}:{language}`
    pub fn key(template_id: &str, channel: Channel, language: &str) -> String {
        format!("{}:{}:{}", template_id, channel.as_str(), language)
    }

    pub fn store_key(&self) -> String {
        Self::key(&self.template_id, self.channel, &self.language)
    }
}

/// 用户 ID 列表响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdsResponse {
    pub user_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parse_is_case_insensitive() {
        assert_eq!(Channel::parse("email"), Some(Channel::Email));
        assert_eq!(Channel::parse(" PUSH "), Some(Channel::Push));
        assert_eq!(Channel::parse("fax"), None);
    }

    #[test]
    fn test_user_serializes_camel_case() {
        let json = serde_json::to_value(MockUser::new("user-001", "Alice Kim", "ko")).unwrap();
        assert_eq!(json["userId"], "user-001");
        assert_eq!(json["pushToken"], "push-token-001");
        assert_eq!(json["phoneNumber"], "010-1234-0001");
    }
}

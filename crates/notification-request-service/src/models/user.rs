//! 外部服务返回的用户配置与模板定义

use serde::{Deserialize, Serialize};

use super::enums::NotificationType;

/// 用户配置服务返回的联系方式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// 模板定义，标题与正文均为未替换参数的原文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDefinition {
    pub template_id: String,
    pub channel: NotificationType,
    pub language: String,
    #[serde(default)]
    pub title_template: Option<String>,
    pub body_template: String,
}

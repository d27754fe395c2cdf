//! 通知内容：直接文本或模板引用，二者互斥

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{NotificationError, Result};

/// 渲染后的（或直接给出的）通知内容
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContent {
    pub title: Option<String>,
    pub body: Option<String>,
    pub redirect_url: Option<String>,
    pub image_url: Option<String>,
}

impl NotificationContent {
    /// 标题和正文至少一项非空
    pub fn new(
        title: Option<String>,
        body: Option<String>,
        redirect_url: Option<String>,
        image_url: Option<String>,
    ) -> Result<Self> {
        let content = Self {
            title,
            body,
            redirect_url,
            image_url,
        };
        if !content.has_text() {
            return Err(NotificationError::Validation(
                "content requires a non-blank title or body".to_string(),
            ));
        }
        Ok(content)
    }

    pub fn has_text(&self) -> bool {
        let non_blank = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        non_blank(&self.title) || non_blank(&self.body)
    }
}

/// 模板引用与请求级参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInfo {
    pub template_id: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl TemplateInfo {
    pub fn new(template_id: impl Into<String>, parameters: BTreeMap<String, String>) -> Result<Self> {
        let template_id = template_id.into().trim().to_string();
        if template_id.is_empty() {
            return Err(NotificationError::Validation(
                "template id must not be blank".to_string(),
            ));
        }
        Ok(Self {
            template_id,
            parameters,
        })
    }
}

/// 请求内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestContent {
    Direct(NotificationContent),
    Template(TemplateInfo),
}

impl RequestContent {
    /// 命令中内容与模板二选一
    pub fn from_parts(
        content: Option<NotificationContent>,
        template: Option<TemplateInfo>,
    ) -> Result<Self> {
        match (content, template) {
            (Some(content), None) => {
                if !content.has_text() {
                    return Err(NotificationError::Validation(
                        "content requires a non-blank title or body".to_string(),
                    ));
                }
                Ok(Self::Direct(content))
            }
            (None, Some(template)) => Ok(Self::Template(template)),
            (Some(_), Some(_)) => Err(NotificationError::Validation(
                "content and template are mutually exclusive".to_string(),
            )),
            (None, None) => Err(NotificationError::Validation(
                "either content or template is required".to_string(),
            )),
        }
    }

    pub fn template(&self) -> Option<&TemplateInfo> {
        match self {
            Self::Template(template) => Some(template),
            Self::Direct(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct() -> NotificationContent {
        NotificationContent::new(Some("Hi".into()), None, None, None).unwrap()
    }

    #[test]
    fn test_content_requires_text() {
        assert!(NotificationContent::new(Some(" ".into()), None, None, None).is_err());
        assert!(NotificationContent::new(None, Some("body".into()), None, None).is_ok());
    }

    #[test]
    fn test_content_and_template_are_exclusive() {
        let template = TemplateInfo::new("WELCOME", BTreeMap::new()).unwrap();

        assert!(RequestContent::from_parts(Some(direct()), Some(template.clone())).is_err());
        assert!(RequestContent::from_parts(None, None).is_err());
        assert!(matches!(
            RequestContent::from_parts(Some(direct()), None).unwrap(),
            RequestContent::Direct(_)
        ));
        assert_eq!(
            RequestContent::from_parts(None, Some(template))
                .unwrap()
                .template()
                .map(|t| t.template_id.as_str()),
            Some("WELCOME")
        );
    }

    #[test]
    fn test_blank_template_id_rejected() {
        assert!(TemplateInfo::new("  ", BTreeMap::new()).is_err());
    }
}

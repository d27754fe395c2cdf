//! 消息组装
//!
//! 收件人 × 渠道展开为 [`NotificationMessage`]。收件人缺少该渠道联系方式时跳过该组合；
//! 模板请求按 (模板, 渠道, 收件人语言) 取模板原文，再叠加请求参数与收件人参数。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use notification_shared::observability::metrics;
use tracing::{debug, instrument, warn};

use crate::error::{NotificationError, Result};
use crate::models::{
    NotificationContent, NotificationMessage, NotificationRequest, NotificationType, Recipient,
    RequestContent, TemplateDefinition, TemplateInfo,
};
use crate::resolver::RecipientResolver;
use crate::template::{TemplateKey, TemplateRenderer, fill};

pub struct MessageComposer {
    resolver: Arc<RecipientResolver>,
    renderer: Arc<TemplateRenderer>,
}

impl MessageComposer {
    pub fn new(resolver: Arc<RecipientResolver>, renderer: Arc<TemplateRenderer>) -> Self {
        Self { resolver, renderer }
    }

    /// 解析受众并组装全部消息
    pub async fn compose_for(
        &self,
        request: &NotificationRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationMessage>> {
        let recipients = self.resolver.resolve(&request.audience).await?;
        self.compose(request, &recipients, now).await
    }

    #[instrument(skip_all, fields(request_id = %request.id, recipients = recipients.len()))]
    pub async fn compose(
        &self,
        request: &NotificationRequest,
        recipients: &[Recipient],
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationMessage>> {
        // 本轮内每个模板键最多取一次，未找到的结果也记下
        let mut memo: HashMap<TemplateKey, Option<Arc<TemplateDefinition>>> = HashMap::new();
        let mut messages = Vec::new();

        for recipient in recipients {
            for &channel in &request.channels {
                if !recipient.supports(channel) {
                    continue;
                }
                let Some(sender) = request.sender_for(channel) else {
                    return Err(NotificationError::PolicyViolation(format!(
                        "no sender configured for channel {channel}"
                    )));
                };

                let content = match &request.content {
                    RequestContent::Direct(content) => content.clone(),
                    RequestContent::Template(template) => {
                        match self
                            .template_content(&mut memo, template, channel, recipient)
                            .await?
                        {
                            Some(content) => content,
                            None => {
                                warn!(
                                    template_id = %template.template_id,
                                    %channel,
                                    language = %recipient.language,
                                    "模板定义缺失，跳过该消息"
                                );
                                continue;
                            }
                        }
                    }
                };

                messages.push(NotificationMessage::new(
                    request.id,
                    channel,
                    recipient.clone(),
                    content,
                    sender.clone(),
                    request.scheduled_at,
                    now,
                )?);
            }
        }

        for channel in NotificationType::ALL {
            let count = messages.iter().filter(|m| m.channel == channel).count();
            if count > 0 {
                metrics::record_messages_composed(channel.as_str(), count as u64);
            }
        }
        debug!(messages = messages.len(), "消息组装完成");
        Ok(messages)
    }

    async fn template_content(
        &self,
        memo: &mut HashMap<TemplateKey, Option<Arc<TemplateDefinition>>>,
        template: &TemplateInfo,
        channel: NotificationType,
        recipient: &Recipient,
    ) -> Result<Option<NotificationContent>> {
        let language = if recipient.language.trim().is_empty() {
            self.resolver.default_language()
        } else {
            recipient.language.as_str()
        };
        let key = TemplateKey::new(&template.template_id, channel, language);

        let definition = match memo.get(&key) {
            Some(cached) => cached.clone(),
            None => {
                let fetched = self
                    .renderer
                    .render(&template.template_id, channel, language)
                    .await?;
                memo.insert(key, fetched.clone());
                fetched
            }
        };

        Ok(definition.map(|d| fill(&d, &recipient_params(&template.parameters, recipient))))
    }
}

/// 请求参数叠加收件人参数，同名时收件人参数优先
pub fn recipient_params(
    request_params: &BTreeMap<String, String>,
    recipient: &Recipient,
) -> BTreeMap<String, String> {
    let mut params = request_params.clone();
    let scoped = [
        ("userId", recipient.user_id.as_ref()),
        ("userName", recipient.user_name.as_ref()),
        ("email", recipient.email.as_ref()),
        ("phoneNumber", recipient.phone_number.as_ref()),
        ("language", Some(&recipient.language)),
    ];
    for (name, value) in scoped {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            params.insert(name.to_string(), value.clone());
        }
    }
    params
}

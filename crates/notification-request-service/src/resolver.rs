//! 收件人解析
//!
//! 将受众展开为具体联系方式。同一请求内每个不同的用户 ID 只查询一次，
//! 查询并发度受 `lookup_concurrency` 限制。

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, instrument, warn};

use crate::error::{NotificationError, Result};
use crate::models::{DirectRecipient, Recipient, TargetAudience, UserConfig};
use crate::providers::{AudienceProvider, UserConfigProvider};

pub struct RecipientResolver {
    users: Arc<dyn UserConfigProvider>,
    audience: Arc<dyn AudienceProvider>,
    default_language: String,
    lookup_concurrency: usize,
}

impl RecipientResolver {
    pub fn new(
        users: Arc<dyn UserConfigProvider>,
        audience: Arc<dyn AudienceProvider>,
        default_language: impl Into<String>,
        lookup_concurrency: usize,
    ) -> Self {
        Self {
            users,
            audience,
            default_language: default_language.into(),
            lookup_concurrency: lookup_concurrency.max(1),
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// 解析受众；瞬时查询失败整体返回错误，由请求 Outbox 重试
    #[instrument(skip(self, audience), fields(audience = audience.kind()))]
    pub async fn resolve(&self, audience: &TargetAudience) -> Result<Vec<Recipient>> {
        let user_ids = match audience {
            TargetAudience::SingleUser { .. }
            | TargetAudience::MultipleUsers { .. }
            | TargetAudience::Mixed { .. } => audience.user_ids().to_vec(),
            TargetAudience::AllUsers => self.audience.all_user_ids().await?,
            TargetAudience::Segment { name } => self.audience.segment_user_ids(name).await?,
            TargetAudience::DirectRecipients { .. } => Vec::new(),
        };

        let mut recipients = self.lookup_users(dedup(user_ids)).await?;
        recipients.extend(
            audience
                .direct_recipients_list()
                .iter()
                .map(|direct| self.direct_recipient(direct)),
        );

        debug!(recipients = recipients.len(), "收件人解析完成");
        Ok(recipients)
    }

    async fn lookup_users(&self, user_ids: Vec<String>) -> Result<Vec<Recipient>> {
        let mut results: Vec<(usize, String, Result<Option<UserConfig>>)> =
            stream::iter(user_ids.into_iter().enumerate())
                .map(|(index, user_id)| async move {
                    let result = self.users.get_config(&user_id).await;
                    (index, user_id, result)
                })
                .buffer_unordered(self.lookup_concurrency)
                .collect()
                .await;

        // 恢复受众中的原始顺序
        results.sort_by_key(|(index, _, _)| *index);

        let mut recipients = Vec::with_capacity(results.len());
        for (_, user_id, result) in results {
            match result {
                Ok(Some(config)) => recipients.push(self.user_recipient(user_id, config)),
                Ok(None) => {
                    warn!(user_id, "用户配置不存在，跳过该收件人");
                }
                Err(NotificationError::ClientRejected { status, message, .. }) => {
                    warn!(user_id, status, message, "用户配置查询被拒绝，跳过该收件人");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(recipients)
    }

    fn user_recipient(&self, user_id: String, config: UserConfig) -> Recipient {
        let language = config
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| self.default_language.clone());
        Recipient {
            user_id: Some(user_id),
            user_name: config.user_name,
            email: config.email,
            phone_number: config.phone_number,
            device_token: config.push_token,
            language,
        }
    }

    fn direct_recipient(&self, direct: &DirectRecipient) -> Recipient {
        Recipient {
            user_id: None,
            user_name: None,
            email: direct.email.clone(),
            phone_number: direct.phone_number.clone(),
            device_token: direct.device_token.clone(),
            language: self.default_language.clone(),
        }
    }
}

fn dedup(user_ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    user_ids
        .into_iter()
        .filter(|id| !id.trim().is_empty() && seen.insert(id.clone()))
        .collect()
}

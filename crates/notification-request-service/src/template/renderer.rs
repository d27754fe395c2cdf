//! 模板渲染
//!
//! 渲染分两步：`render` 取回并缓存参数无关的模板原文，
//! `fill` 针对每个收件人替换参数。缓存的原文因此可以跨收件人复用。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use notification_shared::config::TemplateConfig;
use tracing::{debug, warn};

use super::cache::{TemplateCache, TemplateKey};
use super::substitution::substitute;
use crate::error::Result;
use crate::models::{NotificationContent, NotificationType, TemplateDefinition};
use crate::providers::TemplateDefinitionProvider;

pub struct TemplateRenderer {
    provider: Arc<dyn TemplateDefinitionProvider>,
    cache: TemplateCache,
}

impl TemplateRenderer {
    pub fn new(provider: Arc<dyn TemplateDefinitionProvider>, config: &TemplateConfig) -> Self {
        Self {
            provider,
            cache: TemplateCache::new(
                Duration::from_secs(config.cache_ttl_secs),
                config.cache_max_entries,
            ),
        }
    }

    /// 获取模板原文；定义不存在时返回 `Ok(None)` 且不缓存
    pub async fn render(
        &self,
        template_id: &str,
        channel: NotificationType,
        language: &str,
    ) -> Result<Option<Arc<TemplateDefinition>>> {
        let key = TemplateKey::new(template_id, channel, language);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Some(hit));
        }

        match self
            .provider
            .get_definition(template_id, channel, language)
            .await?
        {
            Some(definition) => {
                debug!(template_id, %channel, language, "模板定义已加载");
                let definition = Arc::new(definition);
                self.cache.insert(key, definition.clone());
                Ok(Some(definition))
            }
            None => {
                warn!(template_id, %channel, language, "模板定义不存在");
                Ok(None)
            }
        }
    }

    pub fn invalidate(&self, template_id: &str) {
        self.cache.invalidate(template_id);
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }
}

/// 用参数填充模板原文
pub fn fill(definition: &TemplateDefinition, params: &BTreeMap<String, String>) -> NotificationContent {
    NotificationContent {
        title: definition
            .title_template
            .as_deref()
            .map(|title| substitute(title, params)),
        body: Some(substitute(&definition.body_template, params)),
        redirect_url: None,
        image_url: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockTemplateDefinitionProvider;

    fn definition() -> TemplateDefinition {
        TemplateDefinition {
            template_id: "ORDER_SHIPPED".into(),
            channel: NotificationType::Email,
            language: "ko".into(),
            title_template: Some("${{userName}}님 배송 시작".into()),
            body_template: "주문 ${{orderId}} 이(가) 출발했습니다".into(),
        }
    }

    fn renderer(mock: MockTemplateDefinitionProvider) -> TemplateRenderer {
        TemplateRenderer::new(Arc::new(mock), &TemplateConfig::default())
    }

    #[tokio::test]
    async fn test_render_is_cached_per_key() {
        let mut mock = MockTemplateDefinitionProvider::new();
        mock.expect_get_definition()
            .times(1)
            .returning(|_, _, _| Ok(Some(definition())));

        let renderer = renderer(mock);
        for _ in 0..3 {
            let def = renderer
                .render("ORDER_SHIPPED", NotificationType::Email, "ko")
                .await
                .unwrap();
            assert!(def.is_some());
        }
        assert_eq!(renderer.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_definition_not_cached() {
        let mut mock = MockTemplateDefinitionProvider::new();
        mock.expect_get_definition()
            .times(2)
            .returning(|_, _, _| Ok(None));

        let renderer = renderer(mock);
        for _ in 0..2 {
            assert!(
                renderer
                    .render("NOPE", NotificationType::Sms, "ko")
                    .await
                    .unwrap()
                    .is_none()
            );
        }
        assert!(renderer.cache().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let mut mock = MockTemplateDefinitionProvider::new();
        mock.expect_get_definition()
            .times(2)
            .returning(|_, _, _| Ok(Some(definition())));

        let renderer = renderer(mock);
        renderer
            .render("ORDER_SHIPPED", NotificationType::Email, "ko")
            .await
            .unwrap();
        renderer.invalidate("ORDER_SHIPPED");
        renderer
            .render("ORDER_SHIPPED", NotificationType::Email, "ko")
            .await
            .unwrap();
    }

    #[test]
    fn test_fill_substitutes_title_and_body() {
        let params = BTreeMap::from([
            ("userName".to_string(), "Alice".to_string()),
            ("orderId".to_string(), "A-1".to_string()),
        ]);
        let content = fill(&definition(), &params);
        assert_eq!(content.title.as_deref(), Some("Alice님 배송 시작"));
        assert_eq!(content.body.as_deref(), Some("주문 A-1 이(가) 출발했습니다"));
    }
}

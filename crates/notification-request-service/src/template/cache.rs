//! 模板定义缓存
//!
//! 按 (templateId, channel, language) 缓存未替换参数的模板原文。
//! 条目超过 TTL 失效；容量满时先淘汰过期条目，再淘汰最早写入的条目。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{NotificationType, TemplateDefinition};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub template_id: String,
    pub channel: NotificationType,
    pub language: String,
}

impl TemplateKey {
    pub fn new(template_id: &str, channel: NotificationType, language: &str) -> Self {
        Self {
            template_id: template_id.to_string(),
            channel,
            language: language.to_string(),
        }
    }
}

struct CacheEntry {
    definition: Arc<TemplateDefinition>,
    inserted_at: Instant,
}

pub struct TemplateCache {
    entries: DashMap<TemplateKey, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl TemplateCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &TemplateKey) -> Option<Arc<TemplateDefinition>> {
        let (definition, inserted_at) = {
            let entry = self.entries.get(key)?;
            (entry.definition.clone(), entry.inserted_at)
        };

        if inserted_at.elapsed() >= self.ttl {
            self.entries.remove(key);
            return None;
        }
        Some(definition)
    }

    pub fn insert(&self, key: TemplateKey, definition: Arc<TemplateDefinition>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict();
        }
        self.entries.insert(
            key,
            CacheEntry {
                definition,
                inserted_at: Instant::now(),
            },
        );
    }

    /// 模板定义变更时按模板 ID 失效所有渠道与语言
    pub fn invalidate(&self, template_id: &str) {
        self.entries.retain(|key, _| key.template_id != template_id);
        debug!(template_id, "模板缓存已失效");
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);

        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.inserted_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &str) -> Arc<TemplateDefinition> {
        Arc::new(TemplateDefinition {
            template_id: id.to_string(),
            channel: NotificationType::Email,
            language: "ko".into(),
            title_template: Some("title".into()),
            body_template: "body".into(),
        })
    }

    fn key(id: &str, language: &str) -> TemplateKey {
        TemplateKey::new(id, NotificationType::Email, language)
    }

    #[tokio::test]
    async fn test_hit_and_key_components() {
        let cache = TemplateCache::new(Duration::from_secs(60), 10);
        cache.insert(key("T1", "ko"), definition("T1"));

        assert!(cache.get(&key("T1", "ko")).is_some());
        assert!(cache.get(&key("T1", "en")).is_none());
        assert!(
            cache
                .get(&TemplateKey::new("T1", NotificationType::Sms, "ko"))
                .is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = TemplateCache::new(Duration::from_secs(60), 10);
        cache.insert(key("T1", "ko"), definition("T1"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(&key("T1", "ko")).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let cache = TemplateCache::new(Duration::from_secs(600), 2);
        cache.insert(key("T1", "ko"), definition("T1"));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(key("T2", "ko"), definition("T2"));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(key("T3", "ko"), definition("T3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("T1", "ko")).is_none());
        assert!(cache.get(&key("T3", "ko")).is_some());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = TemplateCache::new(Duration::from_secs(60), 10);
        cache.insert(key("T1", "ko"), definition("T1"));
        cache.insert(key("T1", "en"), definition("T1"));
        cache.insert(key("T2", "ko"), definition("T2"));

        cache.invalidate("T1");
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}

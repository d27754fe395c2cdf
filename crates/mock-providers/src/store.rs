//! 内存存储
//!
//! 使用 DashMap 实现的并发内存存储，服务启动时由 fixtures 填充。

use dashmap::DashMap;
use std::sync::Arc;

use crate::models::{Channel, MockTemplate, MockUser};

/// 通用内存存储
#[derive(Debug)]
pub struct MemoryStore<T> {
    data: Arc<DashMap<String, T>>,
}

impl<T: Clone> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    /// 插入或覆盖
    pub fn insert(&self, id: &str, value: T) {
        self.data.insert(id.to_string(), value);
    }

    /// 返回克隆，不持有锁
    pub fn get(&self, id: &str) -> Option<T> {
        self.data.get(id).map(|v| v.clone())
    }

    pub fn list(&self) -> Vec<T> {
        self.data
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.data.contains_key(id)
    }
}

impl<T: Clone> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

/// 三类模拟数据的集合
#[derive(Debug, Clone, Default)]
pub struct ProviderStore {
    pub users: MemoryStore<MockUser>,
    pub segments: MemoryStore<Vec<String>>,
    pub templates: MemoryStore<MockTemplate>,
}

impl ProviderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部用户 ID，按字典序
    pub fn user_ids(&self) -> Vec<String> {
        let mut ids = self.users.keys();
        ids.sort();
        ids
    }

    pub fn add_template(&self, template: MockTemplate) {
        self.templates.insert(&template.store_key(), template);
    }

    pub fn find_template(
        &self,
        template_id: &str,
        channel: Channel,
        language: &str,
    ) -> Option<MockTemplate> {
        self.templates
            .get(&MockTemplate::key(template_id, channel, language))
    }
}

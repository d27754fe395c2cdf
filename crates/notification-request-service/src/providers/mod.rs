//! 外部协作方接口
//!
//! 用户配置、受众（全体用户、分群）与模板定义均由外部服务提供。
//! "未找到"以 `Ok(None)` 表示，由调用方决定是否跳过；
//! 4xx 映射为 `ClientRejected`，5xx 与网络错误映射为 `Transient`。

mod http;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NotificationType, TemplateDefinition, UserConfig};

pub use http::{HttpAudienceProvider, HttpTemplateProvider, HttpUserConfigProvider, ProviderClient};

/// 用户配置服务
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserConfigProvider: Send + Sync {
    async fn get_config(&self, user_id: &str) -> Result<Option<UserConfig>>;
}

/// 受众服务：全体用户与分群成员
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudienceProvider: Send + Sync {
    async fn all_user_ids(&self) -> Result<Vec<String>>;

    /// 分群不存在时返回空列表
    async fn segment_user_ids(&self, segment: &str) -> Result<Vec<String>>;
}

/// 模板定义服务
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateDefinitionProvider: Send + Sync {
    async fn get_definition(
        &self,
        template_id: &str,
        channel: NotificationType,
        language: &str,
    ) -> Result<Option<TemplateDefinition>>;
}

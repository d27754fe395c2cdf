//! 基于 reqwest 的外部服务适配器

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::{AudienceProvider, TemplateDefinitionProvider, UserConfigProvider};
use crate::error::{NotificationError, Result};
use crate::models::{NotificationType, TemplateDefinition, UserConfig};

/// 单个外部服务的 HTTP 客户端
#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
    base_url: Url,
    service: &'static str,
}

impl ProviderClient {
    pub fn new(service: &'static str, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;
        let base_url = Url::parse(base_url).map_err(|e| {
            NotificationError::Validation(format!("{service} 地址无效 {base_url}: {e}"))
        })?;

        info!(service, base_url = %base_url, "外部服务客户端已初始化");
        Ok(Self {
            client,
            base_url,
            service,
        })
    }

    /// 拼接路径段，段内特殊字符会被转义
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                NotificationError::Validation(format!("{} 地址不能作为基础路径", self.service))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET 并解码 JSON；404 返回 `Ok(None)`
    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let url = self.endpoint(segments)?;
        debug!(service = self.service, url = %url, "调用外部服务");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transient(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(NotificationError::ClientRejected {
                service: self.service,
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            return Err(NotificationError::Transient {
                service: self.service,
                message: format!("unexpected status {status}"),
            });
        }

        let body = response.json::<T>().await.map_err(|e| self.transient(e))?;
        Ok(Some(body))
    }

    fn transient(&self, err: reqwest::Error) -> NotificationError {
        NotificationError::Transient {
            service: self.service,
            message: err.to_string(),
        }
    }
}

/// `GET {base}/users/{id}`
pub struct HttpUserConfigProvider {
    client: ProviderClient,
}

impl HttpUserConfigProvider {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UserConfigProvider for HttpUserConfigProvider {
    async fn get_config(&self, user_id: &str) -> Result<Option<UserConfig>> {
        self.client.get_json(&["users", user_id], &[]).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserIdsResponse {
    user_ids: Vec<String>,
}

/// `GET {base}/users/ids` 与 `GET {base}/segments/{name}/users`
pub struct HttpAudienceProvider {
    client: ProviderClient,
}

impl HttpAudienceProvider {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AudienceProvider for HttpAudienceProvider {
    async fn all_user_ids(&self) -> Result<Vec<String>> {
        let response: Option<UserIdsResponse> =
            self.client.get_json(&["users", "ids"], &[]).await?;
        Ok(response.map(|r| r.user_ids).unwrap_or_default())
    }

    async fn segment_user_ids(&self, segment: &str) -> Result<Vec<String>> {
        let response: Option<UserIdsResponse> = self
            .client
            .get_json(&["segments", segment, "users"], &[])
            .await?;
        Ok(response.map(|r| r.user_ids).unwrap_or_default())
    }
}

/// `GET {base}/templates/{id}?channel=EMAIL&language=ko`
pub struct HttpTemplateProvider {
    client: ProviderClient,
}

impl HttpTemplateProvider {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TemplateDefinitionProvider for HttpTemplateProvider {
    async fn get_definition(
        &self,
        template_id: &str,
        channel: NotificationType,
        language: &str,
    ) -> Result<Option<TemplateDefinition>> {
        self.client
            .get_json(
                &["templates", template_id],
                &[("channel", channel.as_str()), ("language", language)],
            )
            .await
    }
}

//! 渠道消息发布
//!
//! 每条消息按渠道序列化为下游发送器约定的 JSON 载荷，发布到 `{prefix}.{channel}` topic。

mod kafka;
mod payload;

pub use kafka::KafkaDispatchPublisher;
pub use payload::{DispatchPayload, EmailPayload, PushPayload, SmsPayload};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::NotificationMessage;

/// 消息发布器
///
/// 返回的错误通过 `is_retryable()` 区分瞬时故障与永久拒绝，由消息 Outbox 决定是否重试。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DispatchPublisher: Send + Sync {
    async fn publish(&self, message: &NotificationMessage) -> Result<()>;
}

//! 通知请求服务
//!
//! 负责通知请求的受理与投递可靠性：
//!
//! - **受理**：幂等键去重，请求与请求 Outbox 在同一事务中落库
//! - **fan-out**：解析受众、按收件人语言渲染模板，展开为逐条消息
//! - **投递**：消息 Outbox 认领后发布到按渠道划分的 Kafka topic
//! - **可靠性**：两阶段认领、指数退避重试、过期认领回收、提交后即时信号
//!
//! 实际的短信、邮件、推送发送由下游消费者完成，不在本服务范围内。

pub mod api;
pub mod composer;
pub mod dto;
pub mod error;
pub mod idempotency;
pub mod models;
pub mod outbox;
pub mod providers;
pub mod publisher;
pub mod repository;
pub mod resolver;
pub mod service;
pub mod template;
pub mod test_utils;
pub mod worker;

pub use error::{NotificationError, Result};
pub use models::*;

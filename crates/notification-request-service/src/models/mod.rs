//! 通知服务领域模型
//!
//! 请求、消息、Outbox 记录的状态机，以及受众、发送方、内容等值对象

pub mod audience;
pub mod content;
pub mod enums;
pub mod idempotency;
pub mod message;
pub mod outbox;
pub mod request;
pub mod sender;
pub mod user;

// 重新导出常用类型
pub use audience::{DirectRecipient, TargetAudience};
pub use content::{NotificationContent, RequestContent, TemplateInfo};
pub use enums::{MessageStatus, NotificationType, OutboxStatus, RequestStatus, RequesterType};
pub use idempotency::{IdempotencyCompletion, IdempotencyRecord};
pub use message::{NotificationMessage, Recipient};
pub use outbox::{CLOCK_SKEW_TOLERANCE_SECS, OutboxClaim, OutboxKind, OutboxRecord};
pub use request::{NewNotificationRequest, NotificationRequest, Requester};
pub use sender::SenderInfo;
pub use user::{TemplateDefinition, UserConfig};

//! 业务服务层
//!
//! - `intake`: 幂等受理，持久化请求与请求 Outbox
//! - `request_processor`: 请求 Outbox 处理，解析受众并 fan-out 为渠道消息
//! - `message_dispatcher`: 消息 Outbox 处理，发布渠道消息

pub mod intake;
pub mod message_dispatcher;
pub mod request_processor;

pub use intake::{NotificationIntakeService, OPERATION_TYPE};
pub use message_dispatcher::MessageOutboxHandler;
pub use request_processor::RequestOutboxHandler;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{NotificationError, Result};
use crate::models::{OutboxKind, OutboxRecord};
use crate::outbox::outcome;

/// 单条 Outbox 记录的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Sent,
    RetryScheduled,
    FailedTerminal,
    /// 聚合不存在或已结束，记录被直接删除
    OrphanCleaned,
    /// 失败处理本身出错，记录保持 IN_PROGRESS 等待过期回收
    BookkeepingFailed,
    /// 认领已被回收或转给其他实例，本次处理的写入全部放弃
    ClaimLost,
}

impl HandleOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Sent => outcome::SENT,
            Self::RetryScheduled => outcome::RETRY_SCHEDULED,
            Self::FailedTerminal => outcome::FAILED_TERMINAL,
            Self::OrphanCleaned => outcome::ORPHAN_CLEANED,
            Self::BookkeepingFailed => outcome::BOOKKEEPING_FAILED,
            Self::ClaimLost => outcome::CLAIM_LOST,
        }
    }
}

/// 失败处置（安排重试或终态失败）写入之后的结果
fn after_bookkeeping(
    kind: OutboxKind,
    outbox_id: Uuid,
    written: Result<()>,
    success: HandleOutcome,
) -> HandleOutcome {
    match written {
        Ok(()) => success,
        Err(NotificationError::ClaimLost { .. }) => {
            warn!(kind = %kind, outbox_id = %outbox_id, "认领已失效，放弃失败处置");
            HandleOutcome::ClaimLost
        }
        Err(e) => {
            error!(kind = %kind, outbox_id = %outbox_id, error = %e, "失败处置写入失败");
            HandleOutcome::BookkeepingFailed
        }
    }
}

/// 已认领 Outbox 记录的处理器，轮询器与信号监听共用
///
/// 处理器自行吸收错误：业务失败按重试策略处置，簿记失败只记录日志。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxHandler: Send + Sync {
    fn kind(&self) -> OutboxKind;

    async fn handle(&self, record: OutboxRecord, now: DateTime<Utc>) -> HandleOutcome;
}

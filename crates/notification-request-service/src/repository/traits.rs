//! 仓储 Trait 定义
//!
//! 服务层依赖这些抽象；多行写入的组合操作在 trait 层面就是原子的，
//! Postgres 实现用单个事务完成，内存实现用一把锁完成。
//!
//! 认领之后的写入都带 [`OutboxClaim`]：认领已被回收时返回 `ClaimLost`，整个写入不生效。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    IdempotencyCompletion, IdempotencyRecord, NotificationMessage, NotificationRequest,
    OutboxClaim, OutboxKind, OutboxRecord,
};

/// 通知请求仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestRepositoryTrait: Send + Sync {
    async fn find_request(&self, id: Uuid) -> Result<Option<NotificationRequest>>;

    /// 保存状态字段（status、failure_reason、processed_at）
    async fn save_request(&self, request: &NotificationRequest) -> Result<()>;

    /// 同一事务写入请求、请求 Outbox 记录与幂等结果
    async fn register_request(
        &self,
        request: &NotificationRequest,
        outbox: &OutboxRecord,
        completion: &IdempotencyCompletion,
    ) -> Result<()>;

    /// 同一事务：删除已认领的请求 Outbox 记录、写入消息与消息 Outbox、保存已完成的请求
    async fn complete_fan_out(
        &self,
        request: &NotificationRequest,
        messages: &[(NotificationMessage, OutboxRecord)],
        claim: &OutboxClaim,
    ) -> Result<()>;

    /// 同一事务：删除已认领的 Outbox 记录并保存失败的请求
    async fn fail_request(
        &self,
        request: &NotificationRequest,
        claim: &OutboxClaim,
    ) -> Result<()>;
}

/// 渠道消息仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepositoryTrait: Send + Sync {
    async fn find_message(&self, id: Uuid) -> Result<Option<NotificationMessage>>;

    async fn list_by_request(&self, request_id: Uuid) -> Result<Vec<NotificationMessage>>;

    /// 同一事务：删除已认领的 Outbox 记录并保存已结束（DISPATCHED/FAILED）的消息
    async fn settle_message(
        &self,
        message: &NotificationMessage,
        claim: &OutboxClaim,
    ) -> Result<()>;
}

/// Outbox 仓储接口，每个实例只对应一张表
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxRepositoryTrait: Send + Sync {
    fn kind(&self) -> OutboxKind;

    /// 两阶段认领：条件更新写入 owner，再按 owner 读回
    async fn claim_batch(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxRecord>>;

    /// 与 `claim_batch` 相同的条件，仅限单条记录
    async fn claim_by_id(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxRecord>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxRecord>>;

    /// 保存重试元数据（status、attempts、next_retry_at、claim_owner），仅当认领仍属于 `claim.owner`
    async fn save(&self, record: &OutboxRecord, claim: &OutboxClaim) -> Result<()>;

    /// 删除仍属于 `claim.owner` 的记录
    async fn delete(&self, claim: &OutboxClaim) -> Result<()>;

    /// 将 `processed_at < before` 的 IN_PROGRESS 记录重置为 PENDING，返回重置条数
    async fn reclaim_stale(&self, before: DateTime<Utc>) -> Result<u64>;
}

/// 幂等记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyRepositoryTrait: Send + Sync {
    async fn find(&self, key: &str, operation_type: &str) -> Result<Option<IdempotencyRecord>>;

    /// 插入占位记录，唯一约束冲突时返回 false
    async fn try_insert_placeholder(
        &self,
        key: &str,
        operation_type: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// 只删除尚无结果、且仍是 `claimed_at` 时写入的占位记录
    async fn remove_placeholder(
        &self,
        key: &str,
        operation_type: &str,
        claimed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// 接管 `created_at < stale_before` 的占位记录，成功时刷新 created_at
    async fn take_over_stale(
        &self,
        key: &str,
        operation_type: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

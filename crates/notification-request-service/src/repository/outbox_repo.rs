//! Outbox 仓储
//!
//! 请求 Outbox 与消息 Outbox 表结构相同，同一实现按 [`OutboxKind`] 选择表名。
//! 认领互斥完全依赖条件 UPDATE 的原子性，`FOR UPDATE SKIP LOCKED` 只用于减少实例间的锁等待。
//! 认领之后的保存与删除都以 `claim_owner` 为条件，过期回收后旧认领者的写入影响 0 行。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::traits::OutboxRepositoryTrait;
use crate::error::{NotificationError, Result};
use crate::models::{OutboxClaim, OutboxKind, OutboxRecord};

const OUTBOX_COLUMNS: &str = "id, aggregate_id, payload, status, attempts, next_retry_at, \
                              claim_owner, processed_at, created_at";

/// Outbox 仓储
pub struct OutboxRepository {
    pool: PgPool,
    kind: OutboxKind,
}

impl OutboxRepository {
    pub fn new(pool: PgPool, kind: OutboxKind) -> Self {
        Self { pool, kind }
    }

    pub fn requests(pool: PgPool) -> Self {
        Self::new(pool, OutboxKind::Request)
    }

    pub fn messages(pool: PgPool) -> Self {
        Self::new(pool, OutboxKind::Message)
    }

    /// 按 owner 读回本次认领的记录
    async fn read_back(&self, owner: &str) -> Result<Vec<OutboxRecord>> {
        let sql = format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM {table}
            WHERE claim_owner = $1
            ORDER BY created_at ASC
            "#,
            table = self.kind.table_name()
        );

        let records = sqlx::query_as::<_, OutboxRecord>(&sql)
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }
}

/// 在事务中插入 Outbox 记录
pub async fn insert_outbox_in_tx(
    tx: &mut PgConnection,
    kind: OutboxKind,
    record: &OutboxRecord,
) -> Result<()> {
    let sql = format!(
        r#"
        INSERT INTO {table} ({OUTBOX_COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
        table = kind.table_name()
    );

    sqlx::query(&sql)
        .bind(record.id)
        .bind(record.aggregate_id)
        .bind(&record.payload)
        .bind(record.status)
        .bind(record.attempts)
        .bind(record.next_retry_at)
        .bind(&record.claim_owner)
        .bind(record.processed_at)
        .bind(record.created_at)
        .execute(tx)
        .await?;

    Ok(())
}

/// 在事务中删除仍属于本次认领的 Outbox 记录
///
/// 影响 0 行说明认领已被回收，返回 `ClaimLost` 让调用方回滚整个事务。
/// 删除同时锁住该行，并发的过期回收会等到事务结束后才看到结果。
pub async fn delete_outbox_in_tx(
    tx: &mut PgConnection,
    kind: OutboxKind,
    claim: &OutboxClaim,
) -> Result<()> {
    let sql = format!(
        "DELETE FROM {} WHERE id = $1 AND claim_owner = $2",
        kind.table_name()
    );
    let deleted = sqlx::query(&sql)
        .bind(claim.outbox_id)
        .bind(&claim.owner)
        .execute(tx)
        .await?
        .rows_affected();

    if deleted == 0 {
        debug!(kind = %kind, outbox_id = %claim.outbox_id, owner = %claim.owner, "认领已失效，删除未生效");
        return Err(NotificationError::ClaimLost {
            outbox_id: claim.outbox_id,
        });
    }
    Ok(())
}

#[async_trait]
impl OutboxRepositoryTrait for OutboxRepository {
    fn kind(&self) -> OutboxKind {
        self.kind
    }

    async fn claim_batch(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxRecord>> {
        // 外层再次检查 claim_owner IS NULL，子查询与更新之间被其他实例抢先时不会覆盖
        let sql = format!(
            r#"
            UPDATE {table}
            SET claim_owner = $1, status = 'IN_PROGRESS', processed_at = $2
            WHERE id IN (
                SELECT id FROM {table}
                WHERE status IN ('PENDING', 'FAILED')
                  AND claim_owner IS NULL
                  AND next_retry_at <= $2
                ORDER BY created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            AND claim_owner IS NULL
            "#,
            table = self.kind.table_name()
        );

        let claimed = sqlx::query(&sql)
            .bind(owner)
            .bind(now)
            .bind(limit)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if claimed == 0 {
            return Ok(Vec::new());
        }

        debug!(kind = %self.kind, owner, claimed, "Outbox 记录已认领");
        self.read_back(owner).await
    }

    async fn claim_by_id(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxRecord>> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET claim_owner = $2, status = 'IN_PROGRESS', processed_at = $3
            WHERE id = $1
              AND status IN ('PENDING', 'FAILED')
              AND claim_owner IS NULL
              AND next_retry_at <= $3
            "#,
            table = self.kind.table_name()
        );

        let claimed = sqlx::query(&sql)
            .bind(id)
            .bind(owner)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if claimed == 0 {
            return Ok(None);
        }
        Ok(self.read_back(owner).await?.into_iter().next())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxRecord>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM {} WHERE id = $1",
            self.kind.table_name()
        );
        let record = sqlx::query_as::<_, OutboxRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn save(&self, record: &OutboxRecord, claim: &OutboxClaim) -> Result<()> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET status = $2, attempts = $3, next_retry_at = $4,
                claim_owner = $5, processed_at = $6
            WHERE id = $1 AND claim_owner = $7
            "#,
            table = self.kind.table_name()
        );

        let updated = sqlx::query(&sql)
            .bind(claim.outbox_id)
            .bind(record.status)
            .bind(record.attempts)
            .bind(record.next_retry_at)
            .bind(&record.claim_owner)
            .bind(record.processed_at)
            .bind(&claim.owner)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(NotificationError::ClaimLost {
                outbox_id: claim.outbox_id,
            });
        }
        Ok(())
    }

    async fn delete(&self, claim: &OutboxClaim) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        delete_outbox_in_tx(&mut *conn, self.kind, claim).await
    }

    async fn reclaim_stale(&self, before: DateTime<Utc>) -> Result<u64> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET status = 'PENDING', claim_owner = NULL
            WHERE status = 'IN_PROGRESS'
              AND claim_owner IS NOT NULL
              AND processed_at < $1
            "#,
            table = self.kind.table_name()
        );

        let reclaimed = sqlx::query(&sql)
            .bind(before)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(reclaimed)
    }
}

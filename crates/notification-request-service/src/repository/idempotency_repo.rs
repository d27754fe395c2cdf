//! 幂等记录仓储
//!
//! (idempotency_key, operation_type) 为主键，占位记录的 result 为 NULL。
//! 结果只通过 [`complete_idempotency_in_tx`] 写入，与业务数据同一事务提交。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};

use super::traits::IdempotencyRepositoryTrait;
use crate::error::{NotificationError, Result};
use crate::idempotency::IN_FLIGHT_MESSAGE;
use crate::models::{IdempotencyCompletion, IdempotencyRecord};

#[derive(Debug, sqlx::FromRow)]
struct IdempotencyRow {
    idempotency_key: String,
    operation_type: String,
    result: Option<Value>,
    created_at: DateTime<Utc>,
}

impl From<IdempotencyRow> for IdempotencyRecord {
    fn from(row: IdempotencyRow) -> Self {
        Self {
            key: row.idempotency_key,
            operation_type: row.operation_type,
            result: row.result,
            created_at: row.created_at,
        }
    }
}

/// 在事务中写入幂等结果
///
/// 条件包含占位记录的 created_at：占位记录已被其他调用方接管时影响 0 行，
/// 返回重复请求错误让业务事务回滚。
pub async fn complete_idempotency_in_tx(
    tx: &mut PgConnection,
    completion: &IdempotencyCompletion,
) -> Result<()> {
    let updated = sqlx::query(
        r#"
        UPDATE idempotent_operations
        SET result = $3
        WHERE idempotency_key = $1
          AND operation_type = $2
          AND result IS NULL
          AND created_at = $4
        "#,
    )
    .bind(&completion.key)
    .bind(&completion.operation_type)
    .bind(&completion.result)
    .bind(completion.claimed_at)
    .execute(tx)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(NotificationError::DuplicateRequest(
            IN_FLIGHT_MESSAGE.to_string(),
        ));
    }
    Ok(())
}

/// 幂等记录仓储
pub struct IdempotencyRepository {
    pool: PgPool,
}

impl IdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyRepositoryTrait for IdempotencyRepository {
    async fn find(&self, key: &str, operation_type: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query_as::<_, IdempotencyRow>(
            r#"
            SELECT idempotency_key, operation_type, result, created_at
            FROM idempotent_operations
            WHERE idempotency_key = $1 AND operation_type = $2
            "#,
        )
        .bind(key)
        .bind(operation_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn try_insert_placeholder(
        &self,
        key: &str,
        operation_type: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotent_operations (idempotency_key, operation_type, result, created_at)
            VALUES ($1, $2, NULL, $3)
            ON CONFLICT (idempotency_key, operation_type) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(operation_type)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn remove_placeholder(
        &self,
        key: &str,
        operation_type: &str,
        claimed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM idempotent_operations
            WHERE idempotency_key = $1
              AND operation_type = $2
              AND result IS NULL
              AND created_at = $3
            "#,
        )
        .bind(key)
        .bind(operation_type)
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn take_over_stale(
        &self,
        key: &str,
        operation_type: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // 条件更新保证只有一个调用方接管
        let updated = sqlx::query(
            r#"
            UPDATE idempotent_operations
            SET created_at = $4
            WHERE idempotency_key = $1
              AND operation_type = $2
              AND result IS NULL
              AND created_at < $3
            "#,
        )
        .bind(key)
        .bind(operation_type)
        .bind(stale_before)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }
}

//! 通知请求仓储
//!
//! 受众、渠道、发送方、内容以 JSONB 存储；状态机字段是普通列，便于按状态查询。

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notification_shared::database::with_transaction;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::message_repo::insert_message_in_tx;
use super::outbox_repo::{delete_outbox_in_tx, insert_outbox_in_tx};
use super::traits::RequestRepositoryTrait;
use crate::error::{NotificationError, Result};
use super::idempotency_repo::complete_idempotency_in_tx;
use crate::models::{
    IdempotencyCompletion, NotificationMessage, NotificationRequest, NotificationType,
    OutboxClaim, OutboxKind, OutboxRecord, RequestContent, RequestStatus, Requester, RequesterType, SenderInfo, TargetAudience,
};

const REQUEST_COLUMNS: &str = "id, requester_type, requester_id, audience, channels, senders, \
                               content, memo, scheduled_at, status, failure_reason, \
                               processed_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    requester_type: RequesterType,
    requester_id: String,
    audience: Json<TargetAudience>,
    channels: Json<Vec<NotificationType>>,
    senders: Json<BTreeMap<NotificationType, SenderInfo>>,
    content: Json<RequestContent>,
    memo: Option<String>,
    scheduled_at: Option<DateTime<Utc>>,
    status: RequestStatus,
    failure_reason: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RequestRow> for NotificationRequest {
    fn from(row: RequestRow) -> Self {
        Self {
            id: row.id,
            requester: Requester {
                requester_type: row.requester_type,
                id: row.requester_id,
            },
            audience: row.audience.0,
            channels: row.channels.0,
            senders: row.senders.0,
            content: row.content.0,
            memo: row.memo,
            scheduled_at: row.scheduled_at,
            status: row.status,
            failure_reason: row.failure_reason,
            processed_at: row.processed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 通知请求仓储
pub struct RequestRepository {
    pool: PgPool,
}

impl RequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// 在事务中插入请求
pub async fn insert_request_in_tx(
    tx: &mut PgConnection,
    request: &NotificationRequest,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO notification_requests ({REQUEST_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
    );

    sqlx::query(&sql)
        .bind(request.id)
        .bind(request.requester.requester_type)
        .bind(&request.requester.id)
        .bind(Json(&request.audience))
        .bind(Json(&request.channels))
        .bind(Json(&request.senders))
        .bind(Json(&request.content))
        .bind(&request.memo)
        .bind(request.scheduled_at)
        .bind(request.status)
        .bind(&request.failure_reason)
        .bind(request.processed_at)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(tx)
        .await?;

    Ok(())
}

/// 在事务中更新请求状态字段
///
/// 已结束（COMPLETED/FAILED/CANCELED）的请求不再被改写。
pub async fn update_request_status_in_tx(
    tx: &mut PgConnection,
    request: &NotificationRequest,
) -> Result<()> {
    let updated = sqlx::query(
        r#"
        UPDATE notification_requests
        SET status = $2, failure_reason = $3, processed_at = $4, updated_at = $5
        WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')
        "#,
    )
    .bind(request.id)
    .bind(request.status)
    .bind(&request.failure_reason)
    .bind(request.processed_at)
    .bind(request.updated_at)
    .execute(tx)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(NotificationError::PolicyViolation(format!(
            "notification request {} is missing or already terminal",
            request.id
        )));
    }
    Ok(())
}

#[async_trait]
impl RequestRepositoryTrait for RequestRepository {
    async fn find_request(&self, id: Uuid) -> Result<Option<NotificationRequest>> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM notification_requests WHERE id = $1");
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn save_request(&self, request: &NotificationRequest) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        update_request_status_in_tx(&mut *conn, request).await
    }

    async fn register_request(
        &self,
        request: &NotificationRequest,
        outbox: &OutboxRecord,
        completion: &IdempotencyCompletion,
    ) -> Result<()> {
        let request = request.clone();
        let outbox = outbox.clone();
        let completion = completion.clone();
        with_transaction(&self.pool, |conn| {
            Box::pin(async move {
                insert_request_in_tx(conn, &request).await?;
                insert_outbox_in_tx(conn, OutboxKind::Request, &outbox).await?;
                complete_idempotency_in_tx(conn, &completion).await?;
                Ok(())
            })
        })
        .await
    }

    async fn complete_fan_out(
        &self,
        request: &NotificationRequest,
        messages: &[(NotificationMessage, OutboxRecord)],
        claim: &OutboxClaim,
    ) -> Result<()> {
        let request = request.clone();
        let messages = messages.to_vec();
        let claim = claim.clone();
        let count = messages.len();

        // 先删除认领行：认领失效时在写入任何消息之前回滚
        with_transaction(&self.pool, |conn| {
            Box::pin(async move {
                delete_outbox_in_tx(conn, OutboxKind::Request, &claim).await?;
                for (message, outbox) in &messages {
                    insert_message_in_tx(conn, message).await?;
                    insert_outbox_in_tx(conn, OutboxKind::Message, outbox).await?;
                }
                update_request_status_in_tx(conn, &request).await?;
                Ok::<_, NotificationError>(())
            })
        })
        .await?;

        debug!(messages = count, "fan-out 结果已提交");
        Ok(())
    }

    async fn fail_request(
        &self,
        request: &NotificationRequest,
        claim: &OutboxClaim,
    ) -> Result<()> {
        let request = request.clone();
        let claim = claim.clone();
        with_transaction(&self.pool, |conn| {
            Box::pin(async move {
                delete_outbox_in_tx(conn, OutboxKind::Request, &claim).await?;
                update_request_status_in_tx(conn, &request).await?;
                Ok(())
            })
        })
        .await
    }
}

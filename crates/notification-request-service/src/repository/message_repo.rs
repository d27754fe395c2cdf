//! 渠道消息仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notification_shared::database::with_transaction;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::outbox_repo::delete_outbox_in_tx;
use super::traits::MessageRepositoryTrait;
use crate::error::{NotificationError, Result};
use crate::models::{
    MessageStatus, NotificationContent, NotificationMessage, NotificationType, OutboxClaim,
    OutboxKind, Recipient, SenderInfo,
};

const MESSAGE_COLUMNS: &str = "id, request_id, channel, recipient, content, sender, status, \
                               scheduled_at, dispatched_at, failure_reason, created_at, updated_at";

/// 数据库行结构，JSONB 列通过 `Json<T>` 直接解码为值对象
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    request_id: Uuid,
    channel: NotificationType,
    recipient: Json<Recipient>,
    content: Json<NotificationContent>,
    sender: Json<SenderInfo>,
    status: MessageStatus,
    scheduled_at: Option<DateTime<Utc>>,
    dispatched_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MessageRow> for NotificationMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            request_id: row.request_id,
            channel: row.channel,
            recipient: row.recipient.0,
            content: row.content.0,
            sender: row.sender.0,
            status: row.status,
            scheduled_at: row.scheduled_at,
            dispatched_at: row.dispatched_at,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 渠道消息仓储
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// 在事务中插入消息
pub async fn insert_message_in_tx(
    tx: &mut PgConnection,
    message: &NotificationMessage,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO notification_messages ({MESSAGE_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
    );

    sqlx::query(&sql)
        .bind(message.id)
        .bind(message.request_id)
        .bind(message.channel)
        .bind(Json(&message.recipient))
        .bind(Json(&message.content))
        .bind(Json(&message.sender))
        .bind(message.status)
        .bind(message.scheduled_at)
        .bind(message.dispatched_at)
        .bind(&message.failure_reason)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(tx)
        .await?;

    Ok(())
}

/// 在事务中更新消息状态字段，只推进仍为 PENDING 的消息
pub async fn update_message_status_in_tx(
    tx: &mut PgConnection,
    message: &NotificationMessage,
) -> Result<()> {
    let updated = sqlx::query(
        r#"
        UPDATE notification_messages
        SET status = $2, dispatched_at = $3, failure_reason = $4, updated_at = $5
        WHERE id = $1 AND status = 'PENDING'
        "#,
    )
    .bind(message.id)
    .bind(message.status)
    .bind(message.dispatched_at)
    .bind(&message.failure_reason)
    .bind(message.updated_at)
    .execute(tx)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(NotificationError::PolicyViolation(format!(
            "notification message {} is missing or already settled",
            message.id
        )));
    }
    Ok(())
}

#[async_trait]
impl MessageRepositoryTrait for MessageRepository {
    async fn find_message(&self, id: Uuid) -> Result<Option<NotificationMessage>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM notification_messages WHERE id = $1");
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn list_by_request(&self, request_id: Uuid) -> Result<Vec<NotificationMessage>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM notification_messages \
             WHERE request_id = $1 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(request_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn settle_message(
        &self,
        message: &NotificationMessage,
        claim: &OutboxClaim,
    ) -> Result<()> {
        let message = message.clone();
        let claim = claim.clone();
        with_transaction(&self.pool, |conn| {
            Box::pin(async move {
                delete_outbox_in_tx(conn, OutboxKind::Message, &claim).await?;
                update_message_status_in_tx(conn, &message).await?;
                Ok(())
            })
        })
        .await
    }
}

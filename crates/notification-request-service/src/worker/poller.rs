//! Outbox 轮询器

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use notification_shared::config::OutboxQueueConfig;
use notification_shared::observability::metrics;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::{claim_token, is_shutdown};
use crate::error::Result;
use crate::repository::OutboxRepositoryTrait;
use crate::service::OutboxHandler;

pub struct OutboxPoller {
    repo: Arc<dyn OutboxRepositoryTrait>,
    handler: Arc<dyn OutboxHandler>,
    instance_id: String,
    config: OutboxQueueConfig,
}

impl OutboxPoller {
    pub fn new(
        repo: Arc<dyn OutboxRepositoryTrait>,
        handler: Arc<dyn OutboxHandler>,
        instance_id: impl Into<String>,
        config: OutboxQueueConfig,
    ) -> Self {
        Self {
            repo,
            handler,
            instance_id: instance_id.into(),
            config,
        }
    }

    pub fn worker_name(&self) -> String {
        format!("{}_outbox_poller", self.repo.kind())
    }

    /// 认领一批到期记录并并发处理，返回认领条数
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let kind = self.repo.kind();
        let owner = claim_token(&self.instance_id);
        let records = self
            .repo
            .claim_batch(&owner, now, self.config.batch_size)
            .await?;
        if records.is_empty() {
            return Ok(0);
        }

        let claimed = records.len();
        metrics::record_outbox_claimed(kind.as_str(), claimed as u64);
        debug!(%kind, owner, claimed, "开始处理认领的 Outbox 记录");

        let handler = &self.handler;
        stream::iter(records)
            .for_each_concurrent(self.config.concurrency.max(1), |record| async move {
                handler.handle(record, now).await;
            })
            .await;

        Ok(claimed)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.worker_name();
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(worker = %name, interval_ms = self.config.poll_interval_ms, "Outbox 轮询器已启动");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if is_shutdown(changed, &shutdown) {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(Utc::now()).await {
                        error!(worker = %name, error = %e, "Outbox 轮询失败");
                    }
                    metrics::set_worker_last_run(&name);
                }
            }
        }

        info!(worker = %name, "Outbox 轮询器已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutboxKind, OutboxRecord};
    use crate::repository::MockOutboxRepositoryTrait;
    use crate::service::{HandleOutcome, MockOutboxHandler};
    use std::time::Duration;
    use uuid::Uuid;

    fn record(now: DateTime<Utc>, owner: &str) -> OutboxRecord {
        let mut record = OutboxRecord::new(Uuid::now_v7(), serde_json::json!({}), now, now).unwrap();
        record.mark_in_progress(owner, now).unwrap();
        record
    }

    #[tokio::test]
    async fn test_poll_once_handles_every_claimed_record() {
        let now = Utc::now();
        let mut repo = MockOutboxRepositoryTrait::new();
        repo.expect_kind().return_const(OutboxKind::Message);
        repo.expect_claim_batch()
            .withf(|owner, _, limit| owner.starts_with("node-1:") && *limit == 100)
            .times(1)
            .returning(|owner, now, _| Ok(vec![record(now, owner), record(now, owner)]));

        let mut handler = MockOutboxHandler::new();
        handler
            .expect_handle()
            .times(2)
            .returning(|_, _| HandleOutcome::Sent);

        let poller = OutboxPoller::new(
            Arc::new(repo),
            Arc::new(handler),
            "node-1",
            OutboxQueueConfig::message_defaults(),
        );
        assert_eq!(poller.poll_once(now).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_claim_skips_handler() {
        let mut repo = MockOutboxRepositoryTrait::new();
        repo.expect_kind().return_const(OutboxKind::Request);
        repo.expect_claim_batch().returning(|_, _, _| Ok(Vec::new()));
        let mut handler = MockOutboxHandler::new();
        handler.expect_handle().never();

        let poller = OutboxPoller::new(
            Arc::new(repo),
            Arc::new(handler),
            "node-1",
            OutboxQueueConfig::request_defaults(),
        );
        assert_eq!(poller.poll_once(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut repo = MockOutboxRepositoryTrait::new();
        repo.expect_kind().return_const(OutboxKind::Request);
        repo.expect_claim_batch().returning(|_, _, _| Ok(Vec::new()));

        let poller = OutboxPoller::new(
            Arc::new(repo),
            Arc::new(MockOutboxHandler::new()),
            "node-1",
            OutboxQueueConfig::request_defaults(),
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(poller.run(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}

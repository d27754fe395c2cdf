//! 提交后信号监听
//!
//! 收到 Outbox ID 后按相同条件定向认领。记录已被认领或尚未到期时忽略信号，由轮询器兜底。
//! 信号按 `concurrency` 上限并发处理，慢的投递不会阻塞后续信号。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{claim_token, is_shutdown};
use crate::repository::OutboxRepositoryTrait;
use crate::service::{HandleOutcome, OutboxHandler};

pub struct SignalListener {
    repo: Arc<dyn OutboxRepositoryTrait>,
    handler: Arc<dyn OutboxHandler>,
    instance_id: String,
    concurrency: usize,
}

impl SignalListener {
    pub fn new(
        repo: Arc<dyn OutboxRepositoryTrait>,
        handler: Arc<dyn OutboxHandler>,
        instance_id: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            repo,
            handler,
            instance_id: instance_id.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// 处理单个信号；未认领到时返回 `None`
    pub async fn on_signal(&self, outbox_id: Uuid, now: DateTime<Utc>) -> Option<HandleOutcome> {
        let owner = claim_token(&self.instance_id);
        match self.repo.claim_by_id(outbox_id, &owner, now).await {
            Ok(Some(record)) => Some(self.handler.handle(record, now).await),
            Ok(None) => {
                debug!(kind = %self.repo.kind(), %outbox_id, "记录已被认领或未到期，忽略信号");
                None
            }
            Err(e) => {
                warn!(kind = %self.repo.kind(), %outbox_id, error = %e, "定向认领失败，等待轮询处理");
                None
            }
        }
    }

    /// 消费信号直到关闭或所有发送端释放；关闭后不再接收新信号，已开始的处理会完成
    pub async fn run(self, signals: mpsc::Receiver<Uuid>, mut shutdown: watch::Receiver<bool>) {
        let kind = self.repo.kind();
        info!(%kind, concurrency = self.concurrency, "信号监听已启动");

        let stopped = async move {
            loop {
                let changed = shutdown.changed().await;
                if is_shutdown(changed, &shutdown) {
                    break;
                }
            }
        };

        let listener = &self;
        stream::unfold(signals, |mut rx| async move {
            rx.recv().await.map(|outbox_id| (outbox_id, rx))
        })
        .take_until(stopped)
        .for_each_concurrent(self.concurrency, |outbox_id| async move {
            listener.on_signal(outbox_id, Utc::now()).await;
        })
        .await;

        info!(%kind, "信号监听已停止");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Barrier;

    use super::*;
    use crate::models::{OutboxKind, OutboxRecord};
    use crate::repository::MockOutboxRepositoryTrait;
    use crate::service::MockOutboxHandler;

    #[tokio::test]
    async fn test_claimed_signal_runs_handler() {
        let id = Uuid::now_v7();
        let mut repo = MockOutboxRepositoryTrait::new();
        repo.expect_kind().return_const(OutboxKind::Request);
        repo.expect_claim_by_id()
            .withf(move |claimed_id, _, _| *claimed_id == id)
            .returning(|_, owner, now| {
                let mut record =
                    OutboxRecord::new(Uuid::now_v7(), serde_json::json!({}), now, now).unwrap();
                record.mark_in_progress(owner, now).unwrap();
                Ok(Some(record))
            });
        let mut handler = MockOutboxHandler::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_, _| HandleOutcome::Sent);

        let listener = SignalListener::new(Arc::new(repo), Arc::new(handler), "node-1", 1);
        assert_eq!(listener.on_signal(id, Utc::now()).await, Some(HandleOutcome::Sent));
    }

    #[tokio::test]
    async fn test_unclaimable_signal_is_ignored() {
        let mut repo = MockOutboxRepositoryTrait::new();
        repo.expect_kind().return_const(OutboxKind::Message);
        repo.expect_claim_by_id().returning(|_, _, _| Ok(None));
        let mut handler = MockOutboxHandler::new();
        handler.expect_handle().never();

        let listener = SignalListener::new(Arc::new(repo), Arc::new(handler), "node-1", 1);
        assert!(listener.on_signal(Uuid::now_v7(), Utc::now()).await.is_none());
    }

    #[tokio::test]
    async fn test_run_exits_when_senders_dropped() {
        let mut repo = MockOutboxRepositoryTrait::new();
        repo.expect_kind().return_const(OutboxKind::Message);
        let listener = SignalListener::new(
            Arc::new(repo),
            Arc::new(MockOutboxHandler::new()),
            "node-1",
            4,
        );

        let (tx, rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(tx);
        listener.run(rx, shutdown_rx).await;
    }

    /// 每次处理都等待屏障，记录同时在处理的数量
    struct GatedHandler {
        barrier: Option<Barrier>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        handled: AtomicUsize,
    }

    impl GatedHandler {
        fn new(barrier: Option<Barrier>) -> Self {
            Self {
                barrier,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                handled: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OutboxHandler for GatedHandler {
        fn kind(&self) -> OutboxKind {
            OutboxKind::Message
        }

        async fn handle(&self, _record: OutboxRecord, _now: DateTime<Utc>) -> HandleOutcome {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            match &self.barrier {
                Some(barrier) => {
                    barrier.wait().await;
                }
                None => tokio::time::sleep(Duration::from_millis(20)).await,
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.handled.fetch_add(1, Ordering::SeqCst);
            HandleOutcome::Sent
        }
    }

    fn claiming_repo() -> MockOutboxRepositoryTrait {
        let mut repo = MockOutboxRepositoryTrait::new();
        repo.expect_kind().return_const(OutboxKind::Message);
        repo.expect_claim_by_id().returning(|_, owner, now| {
            let mut record =
                OutboxRecord::new(Uuid::now_v7(), serde_json::json!({}), now, now).unwrap();
            record.mark_in_progress(owner, now).unwrap();
            Ok(Some(record))
        });
        repo
    }

    async fn run_signals(listener: SignalListener, count: usize) {
        let (tx, rx) = mpsc::channel(count);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        for _ in 0..count {
            tx.send(Uuid::now_v7()).await.unwrap();
        }
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), listener.run(rx, shutdown_rx))
            .await
            .expect("信号处理被串行阻塞");
    }

    #[tokio::test]
    async fn test_slow_signals_are_handled_concurrently() {
        // 三个处理互相等待：串行处理会一直卡在第一个
        let handler = Arc::new(GatedHandler::new(Some(Barrier::new(3))));
        let listener =
            SignalListener::new(Arc::new(claiming_repo()), handler.clone(), "node-1", 3);

        run_signals(listener, 3).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 3);
        assert_eq!(handler.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_in_flight_signals_are_bounded() {
        let handler = Arc::new(GatedHandler::new(None));
        let listener =
            SignalListener::new(Arc::new(claiming_repo()), handler.clone(), "node-1", 2);

        run_signals(listener, 6).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 6);
        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_run_stops_taking_signals_after_shutdown() {
        let mut repo = MockOutboxRepositoryTrait::new();
        repo.expect_kind().return_const(OutboxKind::Message);
        repo.expect_claim_by_id().never();
        let listener = SignalListener::new(
            Arc::new(repo),
            Arc::new(MockOutboxHandler::new()),
            "node-1",
            4,
        );

        let (_tx, rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(listener.run(rx, shutdown_rx));
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("关闭后监听未退出")
            .unwrap();
    }
}

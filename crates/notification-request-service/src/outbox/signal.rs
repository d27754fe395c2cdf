//! 提交后信号
//!
//! 事务提交后把 Outbox ID 推入进程内有界通道，监听方立即按 ID 认领，
//! 省去一个轮询间隔的延迟。信号丢失不影响正确性，轮询器始终兜底。

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;

use crate::models::OutboxKind;

#[derive(Debug, Clone)]
pub struct OutboxSignal {
    kind: OutboxKind,
    tx: mpsc::Sender<Uuid>,
    deferred_threshold: Duration,
}

impl OutboxSignal {
    pub fn channel(
        kind: OutboxKind,
        buffer: usize,
        deferred_threshold_secs: i64,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                kind,
                tx,
                deferred_threshold: Duration::seconds(deferred_threshold_secs),
            },
            rx,
        )
    }

    /// 没有监听方的信号，只依赖轮询
    pub fn disconnected(kind: OutboxKind) -> Self {
        let (signal, _rx) = Self::channel(kind, 1, 0);
        signal
    }

    /// 到期时间晚于 `now + 阈值` 的记录不发信号，交给轮询器
    pub fn notify_at(&self, outbox_id: Uuid, due_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if due_at > now + self.deferred_threshold {
            debug!(kind = %self.kind, %outbox_id, %due_at, "预约记录，跳过即时信号");
            return false;
        }
        self.notify(outbox_id)
    }

    /// 非阻塞发送；通道满或已关闭时丢弃
    pub fn notify(&self, outbox_id: Uuid) -> bool {
        match self.tx.try_send(outbox_id) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(kind = %self.kind, %outbox_id, "信号通道已满，等待轮询处理");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(kind = %self.kind, %outbox_id, "信号监听已停止");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_delivered() {
        let (signal, mut rx) = OutboxSignal::channel(OutboxKind::Request, 4, 5);
        let id = Uuid::now_v7();
        let now = Utc::now();
        assert!(signal.notify_at(id, now, now));
        assert_eq!(rx.recv().await, Some(id));
    }

    #[tokio::test]
    async fn test_deferred_record_skipped() {
        let (signal, mut rx) = OutboxSignal::channel(OutboxKind::Request, 4, 5);
        let now = Utc::now();
        assert!(!signal.notify_at(Uuid::now_v7(), now + Duration::seconds(6), now));
        assert!(signal.notify_at(Uuid::now_v7(), now + Duration::seconds(5), now));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_or_closed_channel_drops() {
        let (signal, _rx) = OutboxSignal::channel(OutboxKind::Message, 1, 0);
        assert!(signal.notify(Uuid::now_v7()));
        assert!(!signal.notify(Uuid::now_v7()));

        let disconnected = OutboxSignal::disconnected(OutboxKind::Message);
        assert!(!disconnected.notify(Uuid::now_v7()));
    }
}

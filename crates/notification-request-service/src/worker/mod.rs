//! 后台 Worker
//!
//! - `poller`: 按间隔批量认领到期的 Outbox 记录
//! - `listener`: 消费提交后信号，按 ID 定向认领
//! - `sweeper`: 回收崩溃实例遗留的过期认领
//!
//! 所有 Worker 通过 `watch` 通道接收关闭信号。

mod listener;
mod poller;
mod sweeper;

pub use listener::SignalListener;
pub use poller::OutboxPoller;
pub use sweeper::StaleClaimSweeper;

use tokio::sync::watch;
use uuid::Uuid;

/// 生成本次认领的 owner 标识
///
/// 每次认领都使用新标识，读回阶段只会拿到本次认领的记录。
pub fn claim_token(instance_id: &str) -> String {
    format!("{instance_id}:{}", Uuid::new_v4())
}

/// 关闭信号已发出或发送端已关闭
pub(crate) fn is_shutdown(
    changed: Result<(), watch::error::RecvError>,
    shutdown: &watch::Receiver<bool>,
) -> bool {
    changed.is_err() || *shutdown.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_token_is_fresh_per_claim() {
        let a = claim_token("node-1");
        let b = claim_token("node-1");
        assert!(a.starts_with("node-1:"));
        assert_ne!(a, b);
    }
}

//! 过期认领回收
//!
//! 认领者崩溃后记录停留在 IN_PROGRESS 且带 owner，超过阈值后重置为 PENDING。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notification_shared::observability::metrics;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::is_shutdown;
use crate::repository::OutboxRepositoryTrait;

const WORKER_NAME: &str = "stale_claim_sweeper";

pub struct StaleClaimSweeper {
    repos: Vec<Arc<dyn OutboxRepositoryTrait>>,
    stale_after: chrono::Duration,
    interval: Duration,
}

impl StaleClaimSweeper {
    pub fn new(
        repos: Vec<Arc<dyn OutboxRepositoryTrait>>,
        stale_after_secs: u64,
        interval_secs: u64,
    ) -> Self {
        Self {
            repos,
            stale_after: chrono::Duration::seconds(stale_after_secs as i64),
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// 回收所有表中的过期认领，单表失败不影响其他表
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> u64 {
        let before = now - self.stale_after;
        let mut total = 0;

        for repo in &self.repos {
            let kind = repo.kind();
            match repo.reclaim_stale(before).await {
                Ok(0) => {}
                Ok(reclaimed) => {
                    warn!(%kind, reclaimed, %before, "已回收过期认领");
                    metrics::record_outbox_reclaimed(kind.as_str(), reclaimed);
                    total += reclaimed;
                }
                Err(e) => {
                    error!(%kind, error = %e, "回收过期认领失败");
                }
            }
        }
        total
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = self.interval.as_secs(), "过期认领回收已启动");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if is_shutdown(changed, &shutdown) {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    self.sweep_once(Utc::now()).await;
                    metrics::set_worker_last_run(WORKER_NAME);
                }
            }
        }

        info!("过期认领回收已停止");
    }
}

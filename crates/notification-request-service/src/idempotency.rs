//! 幂等守卫
//!
//! 调用方显式用 `with_idempotency(key, operation, op)` 包裹一次业务操作：
//!
//! 1. 已有结果：解码后直接返回，业务逻辑不执行
//! 2. 无记录：插入占位记录，插入成功者执行业务逻辑；失败删除占位
//! 3. 占位记录存在：视为执行中，在等待时限内轮询结果；占位消失时重新争抢插入
//! 4. 占位记录超过 TTL：视为持有者已崩溃，由一个调用方原子接管
//!
//! 结果不由守卫写入。业务逻辑拿到 [`IdempotencyScope`]，用它生成
//! [`IdempotencyCompletion`] 并在自己的事务中与业务数据一起提交，
//! 因此"业务已提交但结果缺失"的状态不存在，接管也不会重复执行已提交的操作。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use notification_shared::config::IdempotencyConfig;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::error::{NotificationError, Result};
use crate::models::IdempotencyCompletion;
use crate::repository::IdempotencyRepositoryTrait;

pub const IN_FLIGHT_MESSAGE: &str = "idempotent operation is still in flight";

/// 本次执行持有的占位记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyScope {
    key: String,
    operation_type: String,
    claimed_at: DateTime<Utc>,
}

impl IdempotencyScope {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 业务事务中随业务数据一起写入的结果
    pub fn completion<T: Serialize>(&self, result: &T) -> Result<IdempotencyCompletion> {
        Ok(IdempotencyCompletion {
            key: self.key.clone(),
            operation_type: self.operation_type.clone(),
            claimed_at: self.claimed_at,
            result: serde_json::to_value(result)?,
        })
    }
}

pub struct IdempotencyGuard {
    repo: Arc<dyn IdempotencyRepositoryTrait>,
    config: IdempotencyConfig,
}

impl IdempotencyGuard {
    pub fn new(repo: Arc<dyn IdempotencyRepositoryTrait>, config: IdempotencyConfig) -> Self {
        Self { repo, config }
    }

    /// `op` 必须在其提交的事务中写入 `scope.completion(..)`，否则重复提交会一直视为执行中
    pub async fn with_idempotency<T, F, Fut>(
        &self,
        key: &str,
        operation_type: &str,
        op: F,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnOnce(IdempotencyScope) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if key.trim().is_empty() {
            return Err(NotificationError::Validation(
                "idempotency key must not be blank".to_string(),
            ));
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.in_flight_wait_ms);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let ttl = chrono::Duration::seconds(self.config.placeholder_ttl_secs);

        loop {
            match self.repo.find(key, operation_type).await? {
                Some(record) => {
                    if let Some(stored) = record.result {
                        debug!(key, operation_type, "幂等结果重放");
                        return decode(key, operation_type, stored);
                    }

                    let now = placeholder_now();
                    if record.created_at < now - ttl {
                        if self
                            .repo
                            .take_over_stale(key, operation_type, now - ttl, now)
                            .await?
                        {
                            warn!(
                                key,
                                operation_type,
                                placeholder_created_at = %record.created_at,
                                "接管过期的幂等占位记录"
                            );
                            return self.run_owned(scope(key, operation_type, now), op).await;
                        }
                        // 已被其他调用方接管，按执行中处理
                        continue;
                    }

                    if Instant::now() >= deadline {
                        return Err(NotificationError::DuplicateRequest(
                            IN_FLIGHT_MESSAGE.to_string(),
                        ));
                    }
                    sleep(poll_interval).await;
                }
                None => {
                    let now = placeholder_now();
                    if self
                        .repo
                        .try_insert_placeholder(key, operation_type, now)
                        .await?
                    {
                        return self.run_owned(scope(key, operation_type, now), op).await;
                    }
                    if Instant::now() >= deadline {
                        return Err(NotificationError::DuplicateRequest(
                            IN_FLIGHT_MESSAGE.to_string(),
                        ));
                    }
                    // 插入冲突，下一轮读取胜出方的记录
                }
            }
        }
    }

    async fn run_owned<T, F, Fut>(&self, scope: IdempotencyScope, op: F) -> Result<T>
    where
        F: FnOnce(IdempotencyScope) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let IdempotencyScope {
            key,
            operation_type,
            claimed_at,
        } = scope.clone();

        match op(scope).await {
            Ok(value) => Ok(value),
            Err(err) => {
                // 占位记录已被接管时条件删除不生效，不会误删接管方的占位
                if let Err(e) = self
                    .repo
                    .remove_placeholder(&key, &operation_type, claimed_at)
                    .await
                {
                    warn!(key, operation_type, error = %e, "幂等占位记录删除失败");
                }
                Err(err)
            }
        }
    }
}

fn scope(key: &str, operation_type: &str, claimed_at: DateTime<Utc>) -> IdempotencyScope {
    IdempotencyScope {
        key: key.to_string(),
        operation_type: operation_type.to_string(),
        claimed_at,
    }
}

/// 占位时间截断到微秒，与 TIMESTAMPTZ 精度一致，作为结果写入与占位删除的条件
fn placeholder_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn decode<T: DeserializeOwned>(key: &str, operation_type: &str, stored: Value) -> Result<T> {
    serde_json::from_value(stored).map_err(|e| NotificationError::ResultDecode {
        key: key.to_string(),
        operation: operation_type.to_string(),
        reason: e.to_string(),
    })
}

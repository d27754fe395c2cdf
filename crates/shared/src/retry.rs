//! 重试策略与执行器
//!
//! 同一套指数退避公式有两个用途：Outbox 记录落库的 `next_retry_at`，
//! 以及启动时连接数据库这类进程内的阻塞重试。

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::InfraError;

/// 指数退避参数
///
/// 第 N 次重试（N 从 0 开始）等待 `initial_delay * multiplier^N`，封顶于 `max_delay`。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次执行之外允许的重试次数
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 启动阶段连接依赖用：3 次重试，1s 起步，30s 封顶
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    /// 倍数固定为 2：`min(2^attempt * base, cap)`
    pub fn exponential(max_retries: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: base,
            max_delay: cap,
            multiplier: 2.0,
        }
    }

    /// 已失败 `attempt` 次后下一次的等待时间
    ///
    /// 指数很大时浮点结果为 inf，取 `min` 后仍落在上限。
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let cap_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(raw_ms.min(cap_ms) as u64)
    }

    /// 已失败 `attempt` 次时是否还有重试额度
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// 按策略反复执行异步操作
///
/// 只有 `is_retryable` 判定为瞬时故障的错误才会退避重试，其余错误原样返回。
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&InfraError) -> bool,
    mut operation: F,
) -> Result<T, InfraError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InfraError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt, "重试后执行成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            warn!(operation = operation_name, error = %err, "错误不可重试");
            return Err(err);
        }
        if !policy.should_retry(attempt) {
            warn!(
                operation = operation_name,
                attempt,
                max_retries = policy.max_retries,
                error = %err,
                "重试次数用尽"
            );
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "执行失败，退避后重试"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

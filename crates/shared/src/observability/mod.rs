//! 可观测性入口
//!
//! 服务启动时调用一次 [`init`]：先装日志订阅器，再按配置启动指标端口。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

use crate::config::ObservabilityConfig;

/// 持有指标导出任务，main 返回前不要丢弃
pub struct ObservabilityGuard {
    metrics: Option<metrics::MetricsHandle>,
}

impl ObservabilityGuard {
    /// 不带指标端口的守卫
    pub fn empty() -> Self {
        Self { metrics: None }
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!(metrics_enabled = self.metrics_enabled(), "可观测性组件关闭");
    }
}

pub async fn init(service_name: &str, config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    let metrics = match config.metrics_enabled {
        true => Some(metrics::init(service_name, config.metrics_port).await?),
        false => None,
    };

    info!(
        service = %service_name,
        log_format = %config.log_format,
        metrics_port = config.metrics_enabled.then_some(config.metrics_port),
        "可观测性初始化完成"
    );
    Ok(ObservabilityGuard { metrics })
}

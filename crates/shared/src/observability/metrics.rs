//! Prometheus 指标
//!
//! 记录函数直接调用 `metrics` 宏，未安装 recorder 时为空操作；
//! `init` 安装 Prometheus recorder 并在独立端口上暴露 `/metrics`。

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{error, info};

/// 指标导出服务的后台任务
pub struct MetricsHandle {
    _server: JoinHandle<()>,
}

/// 安装 recorder 并启动指标端口
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let recorder = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);

    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    info!(port, "指标端口已启动");

    Ok(MetricsHandle {
        _server: tokio::spawn(serve_metrics(listener, recorder)),
    })
}

async fn serve_metrics(listener: TcpListener, recorder: PrometheusHandle) {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(recorder.render())))
        .route("/health", get(|| async { "OK" }));
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "指标端口异常退出");
    }
}

fn describe_metrics() {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    metrics::describe_counter!(
        "notification_intake_total",
        "Notification requests received, by result status"
    );
    metrics::describe_counter!(
        "notification_messages_composed_total",
        "Channel messages produced by fan-out"
    );
    metrics::describe_counter!("outbox_claimed_total", "Outbox rows claimed by this instance");
    metrics::describe_counter!(
        "outbox_outcomes_total",
        "Outbox row processing outcomes (sent, retry_scheduled, failed_terminal, orphan_cleaned, bookkeeping_failed, claim_lost)"
    );
    metrics::describe_counter!(
        "outbox_reclaimed_total",
        "Stale IN_PROGRESS claims returned to the pool"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last completed worker tick"
    );
}

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let (method, path, status) = (method.to_string(), path.to_string(), status.to_string());
    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.clone(), "path" => path.clone(), "status" => status.clone()
    )
    .record(duration_secs);
    metrics::counter!("http_requests_total", "method" => method, "path" => path, "status" => status)
        .increment(1);
}

/// 记录请求受理结果
#[inline]
pub fn record_intake(status: &str) {
    metrics::counter!("notification_intake_total", "status" => status.to_string()).increment(1);
}

/// 记录 fan-out 产生的渠道消息数
#[inline]
pub fn record_messages_composed(channel: &str, count: u64) {
    metrics::counter!(
        "notification_messages_composed_total",
        "channel" => channel.to_string()
    )
    .increment(count);
}

/// 记录认领到的 Outbox 行数
#[inline]
pub fn record_outbox_claimed(kind: &str, count: u64) {
    metrics::counter!("outbox_claimed_total", "kind" => kind.to_string()).increment(count);
}

/// 记录 Outbox 行的处理结果
#[inline]
pub fn record_outbox_outcome(kind: &str, outcome: &str) {
    metrics::counter!(
        "outbox_outcomes_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录被回收的过期认领数
#[inline]
pub fn record_outbox_reclaimed(kind: &str, count: u64) {
    metrics::counter!("outbox_reclaimed_total", "kind" => kind.to_string()).increment(count);
}

/// 记录 Worker 最近一次完成轮询的时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_http_request("POST", "/api/v1/notifications", 201, 0.1);
        record_intake("SUCCESS");
        record_messages_composed("EMAIL", 3);
        record_outbox_claimed("request", 10);
        record_outbox_outcome("message", "sent");
        record_outbox_reclaimed("message", 2);
        set_worker_last_run("message_outbox_poller");
    }
}

//! 通知请求服务入口
//!
//! 同一进程内运行 HTTP 受理接口、两张 Outbox 表的轮询器与信号监听器，
//! 以及过期认领回收任务。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use notification_shared::{
    config::AppConfig,
    database::Database,
    kafka::KafkaProducer,
    observability,
    retry::{RetryPolicy, retry_with_policy},
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use notification_request::{
    OutboxKind,
    api::{AppState, build_router},
    composer::MessageComposer,
    idempotency::IdempotencyGuard,
    outbox::{OutboxRetryPolicy, OutboxSignal},
    providers::{HttpAudienceProvider, HttpTemplateProvider, HttpUserConfigProvider, ProviderClient},
    publisher::KafkaDispatchPublisher,
    repository::{
        IdempotencyRepository, MessageRepository, OutboxRepository, OutboxRepositoryTrait,
        RequestRepository,
    },
    resolver::RecipientResolver,
    service::{MessageOutboxHandler, NotificationIntakeService, OutboxHandler, RequestOutboxHandler},
    template::TemplateRenderer,
    worker::{OutboxPoller, SignalListener, StaleClaimSweeper},
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置，缺失时使用默认值
    let config = AppConfig::load("notification-request-service").unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 可观测性
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!("Starting notification-request-service...");
    info!(environment = %config.environment, "Configuration loaded");

    // 3. 数据库，启动阶段连接失败按退避重试
    let connect_policy = RetryPolicy::default();
    let db = retry_with_policy(
        &connect_policy,
        "database_connect",
        |e| e.is_retryable(),
        || Database::connect(&config.database),
    )
    .await?;
    db.run_migrations().await?;
    let pool = db.pool().clone();
    info!("Database connection established");

    // 4. Kafka 发布
    let producer = KafkaProducer::new(&config.kafka)?;
    let publisher = Arc::new(KafkaDispatchPublisher::new(
        producer,
        config.kafka.topic_prefix.clone(),
    ));
    info!(brokers = %config.kafka.brokers, "Kafka producer initialized");

    // 5. 外部协作方
    let timeout = Duration::from_millis(config.providers.timeout_ms);
    let user_client = ProviderClient::new("user-config", &config.providers.user_config_url, timeout)?;
    let template_client =
        ProviderClient::new("template", &config.providers.template_url, timeout)?;
    let users = Arc::new(HttpUserConfigProvider::new(user_client.clone()));
    let audience = Arc::new(HttpAudienceProvider::new(user_client));
    let templates = Arc::new(HttpTemplateProvider::new(template_client));

    // 6. 仓储与领域服务
    let request_repo = Arc::new(RequestRepository::new(pool.clone()));
    let message_repo = Arc::new(MessageRepository::new(pool.clone()));
    let request_outbox: Arc<dyn OutboxRepositoryTrait> =
        Arc::new(OutboxRepository::new(pool.clone(), OutboxKind::Request));
    let message_outbox: Arc<dyn OutboxRepositoryTrait> =
        Arc::new(OutboxRepository::new(pool.clone(), OutboxKind::Message));
    let guard = Arc::new(IdempotencyGuard::new(
        Arc::new(IdempotencyRepository::new(pool.clone())),
        config.idempotency.clone(),
    ));

    let renderer = Arc::new(TemplateRenderer::new(templates, &config.template));
    let resolver = Arc::new(RecipientResolver::new(
        users,
        audience,
        config.template.default_language.clone(),
        config.providers.lookup_concurrency,
    ));
    let composer = Arc::new(MessageComposer::new(resolver, renderer));

    // 7. 提交后信号
    let outbox_config = &config.outbox;
    let (request_signal, request_signals) = OutboxSignal::channel(
        OutboxKind::Request,
        outbox_config.signal_buffer,
        outbox_config.deferred_signal_threshold_secs,
    );
    let (message_signal, message_signals) = OutboxSignal::channel(
        OutboxKind::Message,
        outbox_config.signal_buffer,
        outbox_config.deferred_signal_threshold_secs,
    );

    let request_handler: Arc<dyn OutboxHandler> = Arc::new(RequestOutboxHandler::new(
        request_repo.clone(),
        request_outbox.clone(),
        composer,
        OutboxRetryPolicy::new(OutboxKind::Request, &outbox_config.request),
        message_signal,
    ));
    let message_handler: Arc<dyn OutboxHandler> = Arc::new(MessageOutboxHandler::new(
        message_repo,
        message_outbox.clone(),
        publisher,
        OutboxRetryPolicy::new(OutboxKind::Message, &outbox_config.message),
    ));
    let intake = Arc::new(NotificationIntakeService::new(
        request_repo,
        guard,
        request_signal,
    ));

    // 8. 后台任务
    let instance_id = outbox_config
        .instance_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(default_instance_id);
    info!(instance_id, "Outbox workers starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    tasks.push(tokio::spawn(
        OutboxPoller::new(
            request_outbox.clone(),
            request_handler.clone(),
            instance_id.clone(),
            outbox_config.request.clone(),
        )
        .run(shutdown_rx.clone()),
    ));
    tasks.push(tokio::spawn(
        OutboxPoller::new(
            message_outbox.clone(),
            message_handler.clone(),
            instance_id.clone(),
            outbox_config.message.clone(),
        )
        .run(shutdown_rx.clone()),
    ));
    tasks.push(tokio::spawn(
        SignalListener::new(
            request_outbox.clone(),
            request_handler,
            instance_id.clone(),
            outbox_config.request.concurrency,
        )
        .run(request_signals, shutdown_rx.clone()),
    ));
    tasks.push(tokio::spawn(
        SignalListener::new(
            message_outbox.clone(),
            message_handler,
            instance_id,
            outbox_config.message.concurrency,
        )
        .run(message_signals, shutdown_rx.clone()),
    ));
    tasks.push(tokio::spawn(
        StaleClaimSweeper::new(
            vec![request_outbox, message_outbox],
            outbox_config.stale_after_secs,
            outbox_config.sweep_interval_secs,
        )
        .run(shutdown_rx),
    ));

    // 9. HTTP 服务
    let state = AppState::new(intake, Arc::new(db.clone()));
    let app = build_router(state);

    let addr = config.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        error!(error = %e, "HTTP server terminated with error");
    }

    // 10. 停止后台任务，进行中的记录处理完毕后退出
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    db.close().await;

    info!("notification-request-service stopped");
    served.map_err(Into::into)
}

/// 未配置实例 ID 时使用主机名加随机后缀
fn default_instance_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "notification".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

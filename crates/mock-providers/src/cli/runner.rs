//! 命令执行器

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::fixtures;
use crate::routes::build_app;
use crate::store::ProviderStore;

pub struct CommandRunner {
    store: Arc<ProviderStore>,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner {
    /// 创建并填充预置数据
    pub fn new() -> Self {
        let store = ProviderStore::new();
        fixtures::seed(&store);
        Self {
            store: Arc::new(store),
        }
    }

    pub async fn run_serve(&self, port: u16) -> Result<()> {
        let app = build_app(self.store.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.context("绑定端口失败")?;

        info!(
            users = self.store.users.count(),
            segments = self.store.segments.count(),
            templates = self.store.templates.count(),
            "Mock providers 已启动: http://{}",
            addr
        );
        info!("可用端点:");
        info!("  GET /users/ids");
        info!("  GET /users/{{id}}");
        info!("  GET /segments/{{name}}/users");
        info!("  GET /templates/{{id}}?channel=EMAIL&language=ko");
        info!("按 Ctrl+C 停止服务");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("服务器运行失败")?;

        info!("Mock providers 已停止");
        Ok(())
    }

    pub fn run_list_users(&self) -> Result<()> {
        let mut users = self.store.users.list();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        println!("{}", serde_json::to_string_pretty(&users)?);

        let mut segments: Vec<_> = self
            .store
            .segments
            .keys()
            .into_iter()
            .filter_map(|name| self.store.segments.get(&name).map(|m| (name, m)))
            .collect();
        segments.sort();
        for (name, members) in segments {
            println!("{name}: {}", members.join(", "));
        }
        Ok(())
    }

    pub fn run_list_templates(&self, template_id: Option<&str>) -> Result<()> {
        let mut templates: Vec<_> = self
            .store
            .templates
            .list()
            .into_iter()
            .filter(|t| template_id.is_none_or(|id| t.template_id == id))
            .collect();
        templates.sort_by_key(|t| t.store_key());
        println!("{}", serde_json::to_string_pretty(&templates)?);
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "注册 Ctrl+C 处理器失败");
        std::future::pending::<()>().await;
    }
    info!("收到关闭信号");
}

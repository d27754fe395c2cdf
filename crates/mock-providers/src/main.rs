//! Mock Providers CLI

use clap::Parser;
use mock_providers::cli::{Cli, CommandRunner, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 优先使用环境变量 RUST_LOG，否则使用命令行参数指定的级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .init();

    let runner = CommandRunner::new();

    match cli.command {
        Commands::Serve { port } => runner.run_serve(port).await?,
        Commands::ListUsers => runner.run_list_users()?,
        Commands::ListTemplates { template_id } => {
            runner.run_list_templates(template_id.as_deref())?
        }
    }

    Ok(())
}

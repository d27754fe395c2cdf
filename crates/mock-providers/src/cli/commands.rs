//! CLI 命令定义

use clap::{Parser, Subcommand};

/// 外部协作方模拟工具
#[derive(Parser, Debug)]
#[command(name = "mock-providers")]
#[command(version, about = "通知服务外部协作方模拟工具")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 启动 HTTP 服务（用户配置、分群、模板定义）
    Serve {
        /// 服务端口
        #[arg(short, long, default_value = "8091")]
        port: u16,
    },

    /// 打印预置用户与分群
    ListUsers,

    /// 打印预置模板
    ListTemplates {
        /// 只显示指定模板
        #[arg(short, long)]
        template_id: Option<String>,
    },
}

//! CLI 模块
//!
//! - `serve` - 启动模拟的外部协作方 HTTP 服务
//! - `list-users` - 打印预置用户与分群
//! - `list-templates` - 打印预置模板
//!
//! ```bash
//! mock-providers serve --port 8091
//! mock-providers list-templates --template-id ORDER_SHIPPED
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::CommandRunner;

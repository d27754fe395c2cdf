//! Mock Providers
//!
//! 本地开发用的外部协作方模拟：用户配置、受众分群与模板定义。
//! 接口形状与通知请求服务的 HTTP 适配器一致，数据保存在内存中。
//!
//! # 主要模块
//!
//! - `models`: 用户、模板等模拟数据模型
//! - `store`: 基于 DashMap 的内存存储
//! - `fixtures`: 预置的用户、分群与模板
//! - `routes`: Axum 路由
//! - `cli`: 命令行入口
//!
//! # 使用示例
//!
//! ```rust
//! use mock_providers::fixtures;
//! use mock_providers::store::ProviderStore;
//!
//! let store = ProviderStore::new();
//! fixtures::seed(&store);
//! assert!(store.users.contains("user-001"));
//! ```

pub mod cli;
pub mod fixtures;
pub mod models;
pub mod routes;
pub mod store;

//! 基础设施错误
//!
//! 只覆盖数据库、Kafka 与配置；业务错误由服务自行定义并通过 `#[from]` 包装。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// `retryable` 由 broker 返回的错误码决定，消息过大等错误重发无意义
    #[error("Kafka 错误: {message}")]
    Kafka { message: String, retryable: bool },

    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    #[error("参数验证失败: {0}")]
    Validation(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, InfraError>;

impl InfraError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::Kafka { .. } => "KAFKA_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 连接池耗尽、网络抖动等瞬时故障可重试；违反约束的数据库错误不可重试。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => is_transient_db_error(e),
            Self::Kafka { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// 构造不可重试的 Kafka 错误
    pub fn kafka_rejected(message: impl Into<String>) -> Self {
        Self::Kafka {
            message: message.into(),
            retryable: false,
        }
    }

    /// 构造可重试的 Kafka 错误
    pub fn kafka_transient(message: impl Into<String>) -> Self {
        Self::Kafka {
            message: message.into(),
            retryable: true,
        }
    }
}

/// 判断数据库错误是否为瞬时故障
///
/// 唯一约束、外键等数据库层面的拒绝属于确定性失败，重试结果不会改变。
pub fn is_transient_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => !(db.is_unique_violation()
            || db.is_foreign_key_violation()
            || db.is_check_violation()),
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => false,
        _ => true,
    }
}

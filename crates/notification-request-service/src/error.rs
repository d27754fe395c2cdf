//! 通知请求服务错误定义
//!
//! 错误按处理方式分类：校验/策略错误不重试，瞬时错误按 Outbox 策略退避重试，
//! 重复请求错误单独暴露，便于调用方当作"已受理"处理。

use notification_shared::error::{InfraError, is_transient_db_error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    // ==================== 校验与策略 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    /// 非法状态迁移或受众不变量被破坏
    #[error("违反业务策略: {0}")]
    PolicyViolation(String),

    #[error("重复请求: {0}")]
    DuplicateRequest(String),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: &'static str, id: String },

    /// Outbox 认领已被回收或转给其他实例，本次处理的写入全部放弃
    #[error("Outbox 认领已失效: id={outbox_id}")]
    ClaimLost { outbox_id: uuid::Uuid },

    // ==================== 外部协作方 ====================
    /// 4xx 类错误，重试不会改变结果
    #[error("{service} 拒绝请求 (status={status}): {message}")]
    ClientRejected {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// 5xx、超时、连接失败
    #[error("{service} 暂时不可用: {message}")]
    Transient {
        service: &'static str,
        message: String,
    },

    // ==================== 数据与基础设施 ====================
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 已存储的幂等结果无法解码为调用方期望的类型，属于程序或模式缺陷
    #[error("幂等结果解码失败: key={key} operation={operation}: {reason}")]
    ResultDecode {
        key: String,
        operation: String,
        reason: String,
    },

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Shared(#[from] InfraError),

    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NotificationError>;

impl NotificationError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// 是否值得退避后重试
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient { .. } => true,
            Self::Database(e) => is_transient_db_error(e),
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::PolicyViolation(_)
                | Self::DuplicateRequest(_)
                | Self::NotFound { .. }
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::PolicyViolation(_) => "POLICY_VIOLATION",
            Self::DuplicateRequest(_) => "DUPLICATE_REQUEST",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ClaimLost { .. } => "CLAIM_LOST",
            Self::ClientRejected { .. } => "CLIENT_REJECTED",
            Self::Transient { .. } => "TRANSIENT_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::ResultDecode { .. } => "RESULT_DECODE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Shared(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

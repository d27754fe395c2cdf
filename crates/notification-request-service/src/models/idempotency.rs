//! 幂等记录

use chrono::{DateTime, Utc};
use serde_json::Value;

/// 幂等记录，(key, operation_type) 唯一
///
/// `result` 为空表示占位记录：持有者仍在执行，或已崩溃等待接管。
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub operation_type: String,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_placeholder(&self) -> bool {
        self.result.is_none()
    }
}

/// 与业务写入同一事务落库的幂等结果
///
/// `claimed_at` 是本次执行写入占位记录时的 created_at；占位记录被接管后
/// created_at 改变，结果写入失败，整个业务事务随之回滚。
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyCompletion {
    pub key: String,
    pub operation_type: String,
    pub claimed_at: DateTime<Utc>,
    pub result: Value,
}

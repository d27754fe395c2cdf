//! Outbox 处理：失败策略与提交后信号

pub mod policy;
pub mod signal;

pub use policy::{FailureDecision, OutboxRetryPolicy, outcome, schedule_retry};
pub use signal::OutboxSignal;

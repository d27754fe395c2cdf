//! 数据库仓储层
//!
//! - 仓储只负责持久化，不包含业务逻辑
//! - 需要原子性的组合写入通过 `with_transaction` 与 `*_in_tx` 函数完成
//! - 定义 trait 接口以支持 mock 与内存实现

mod idempotency_repo;
mod message_repo;
mod outbox_repo;
mod request_repo;
mod traits;

pub use idempotency_repo::{IdempotencyRepository, complete_idempotency_in_tx};
pub use message_repo::{MessageRepository, insert_message_in_tx, update_message_status_in_tx};
pub use outbox_repo::{OutboxRepository, delete_outbox_in_tx, insert_outbox_in_tx};
pub use request_repo::{RequestRepository, insert_request_in_tx, update_request_status_in_tx};
pub use traits::*;

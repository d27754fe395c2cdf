//! Kafka 生产者
//!
//! 投递失败按 broker 错误码分为可重试与不可重试两类，供 Outbox 决定退避还是终止。

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::error::InfraError;

pub mod topics {
    /// `{prefix}.{channel 小写}`，例如 `notification.email`
    pub fn channel_topic(prefix: &str, channel: &str) -> String {
        format!("{}.{}", prefix, channel.to_lowercase())
    }
}

/// `FutureProducer` 的 JSON 发送封装，克隆开销很小
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `message.timeout.ms` 限定单条消息的投递等待时间，超时后交由 Outbox 的退避重试处理。
    pub fn new(config: &KafkaConfig) -> Result<Self, InfraError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| InfraError::kafka_transient(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            send_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }

    /// 发送原始字节消息
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), InfraError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let delivery = self
            .producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(e, _)| classify_send_error(&e))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    ///
    /// 序列化失败属于数据缺陷，重试无意义，因此映射为不可重试错误。
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), InfraError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| InfraError::kafka_rejected(format!("序列化失败: {e}")))?;

        self.send(topic, key, &payload).await
    }
}

/// 将投递错误映射为 InfraError，并按 broker 错误码区分是否可重试
pub fn classify_send_error(err: &KafkaError) -> InfraError {
    let message = format!("发送消息失败: {err}");
    if is_permanent_error_code(err.rdkafka_error_code()) {
        InfraError::kafka_rejected(message)
    } else {
        InfraError::kafka_transient(message)
    }
}

/// 消息本身或权限有问题时重发不会成功
fn is_permanent_error_code(code: Option<RDKafkaErrorCode>) -> bool {
    matches!(
        code,
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
                | RDKafkaErrorCode::InvalidMessage
                | RDKafkaErrorCode::InvalidMessageSize
                | RDKafkaErrorCode::MessageBatchTooLarge
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::InvalidTopic
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_topic() {
        assert_eq!(topics::channel_topic("notification", "EMAIL"), "notification.email");
        assert_eq!(topics::channel_topic("notification", "push"), "notification.push");
    }

    #[test]
    fn test_producer_creation_does_not_require_broker() {
        // librdkafka 延迟建立连接
        let producer = tokio_test::assert_ok!(KafkaProducer::new(
            &crate::test_utils::test_kafka_config()
        ));
        assert_eq!(producer.send_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_permanent_error_codes() {
        assert!(is_permanent_error_code(Some(
            RDKafkaErrorCode::MessageSizeTooLarge
        )));
        assert!(is_permanent_error_code(Some(
            RDKafkaErrorCode::TopicAuthorizationFailed
        )));
        assert!(!is_permanent_error_code(Some(RDKafkaErrorCode::RequestTimedOut)));
        assert!(!is_permanent_error_code(None));
    }

    #[test]
    fn test_classify_send_error() {
        let timeout = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        assert!(classify_send_error(&timeout).is_retryable());

        let too_large = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        assert!(!classify_send_error(&too_large).is_retryable());
    }
}

//! Kafka 发布器

use async_trait::async_trait;
use notification_shared::kafka::{KafkaProducer, topics};
use tracing::{debug, instrument};

use super::DispatchPublisher;
use super::payload::DispatchPayload;
use crate::error::Result;
use crate::models::NotificationMessage;

pub struct KafkaDispatchPublisher {
    producer: KafkaProducer,
    topic_prefix: String,
}

impl KafkaDispatchPublisher {
    pub fn new(producer: KafkaProducer, topic_prefix: impl Into<String>) -> Self {
        Self {
            producer,
            topic_prefix: topic_prefix.into(),
        }
    }

    pub fn topic_for(&self, message: &NotificationMessage) -> String {
        topics::channel_topic(&self.topic_prefix, message.channel.as_str())
    }
}

#[async_trait]
impl DispatchPublisher for KafkaDispatchPublisher {
    #[instrument(skip_all, fields(message_id = %message.id, channel = %message.channel))]
    async fn publish(&self, message: &NotificationMessage) -> Result<()> {
        let payload = DispatchPayload::build(message)?;
        let topic = self.topic_for(message);
        let key = message.id.to_string();

        let (partition, offset) = self.producer.send_json(&topic, &key, &payload).await?;
        debug!(topic, partition, offset, "渠道消息已发布");
        Ok(())
    }
}

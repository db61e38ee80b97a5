//! Kafka 客户端
//!
//! 生产者在创建时即初始化；消费者按消费组按需创建。

use std::fmt;
use std::time::Duration;

use campus_errors::{AppError, AppResult};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::KafkaClientConfig;

/// Kafka 客户端
#[derive(Clone)]
pub struct KafkaClient {
    config: KafkaClientConfig,
    producer: FutureProducer,
}

impl fmt::Debug for KafkaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KafkaClient {
    pub fn new(config: KafkaClientConfig) -> AppResult<Self> {
        let producer: FutureProducer = config
            .client_config()
            .create()
            .map_err(|e| AppError::connect("kafka", format!("producer: {}", e)))?;

        info!(brokers = %config.brokers, "Kafka producer created");
        Ok(Self { config, producer })
    }

    pub fn config(&self) -> &KafkaClientConfig {
        &self.config
    }

    /// 发布带 key 的 JSON 消息，topic 自动加环境前缀
    pub async fn publish<E: Serialize + Send + Sync>(
        &self,
        topic: &str,
        key: &str,
        event: &E,
    ) -> AppResult<(i32, i64)> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::internal(format!("Failed to serialize event: {}", e)))?;
        let topic = self.config.prefixed(topic);

        let record = FutureRecord::to(&topic).payload(&payload).key(key);
        let result = self
            .producer
            .send(record, Timeout::After(self.config.request_timeout))
            .await
            .map_err(|(e, _)| AppError::internal(format!("Failed to publish event: {}", e)))?;

        debug!(
            topic = %topic,
            key = key,
            partition = result.0,
            offset = result.1,
            "Message published"
        );
        Ok(result)
    }

    /// 创建订阅了给定 topic 的消费者
    pub fn subscribe(&self, group_id: &str, topics: &[&str]) -> AppResult<StreamConsumer> {
        let consumer: StreamConsumer = self
            .config
            .client_config()
            .set("group.id", self.config.prefixed(group_id))
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| AppError::connect("kafka", format!("consumer {}: {}", group_id, e)))?;

        let topics: Vec<String> = topics.iter().map(|t| self.config.prefixed(t)).collect();
        let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&refs)
            .map_err(|e| AppError::connect("kafka", format!("subscribe {:?}: {}", topics, e)))?;

        info!(group_id, topics = ?topics, "Kafka consumer subscribed");
        Ok(consumer)
    }

    /// 刷出未发送的消息
    pub fn flush(&self, timeout: Duration) -> AppResult<()> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| AppError::internal(format!("Failed to flush Kafka producer: {}", e)))
    }
}

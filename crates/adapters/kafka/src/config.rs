//! Kafka 配置模块

use std::time::Duration;

use rdkafka::config::ClientConfig;

/// Kafka 客户端配置
#[derive(Debug, Clone)]
pub struct KafkaClientConfig {
    /// 逗号分隔的 broker 列表
    pub brokers: String,
    pub client_id: Option<String>,
    /// topic 与消费组名前缀，按环境隔离（如 `stag.manabie.`）
    pub object_name_prefix: String,
    pub request_timeout: Duration,
}

impl KafkaClientConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            client_id: None,
            object_name_prefix: String::new(),
            request_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_object_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.object_name_prefix = prefix.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// 加上环境前缀后的对象名
    pub fn prefixed(&self, name: &str) -> String {
        format!("{}{}", self.object_name_prefix, name)
    }

    pub(crate) fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        config.set(
            "message.timeout.ms",
            self.request_timeout.as_millis().to_string(),
        );
        if let Some(client_id) = &self.client_id {
            config.set("client.id", client_id);
        }
        config
    }
}

//! 外部资源连接器
//!
//! `Resources` 在首次访问时通过这些 trait 建立连接，测试中可替换为 mock。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use campus_adapter_elastic::{ElasticClient, ElasticConfig};
use campus_adapter_kafka::{KafkaClient, KafkaClientConfig};
use campus_adapter_nats::{JetStreamClient, NatsConfig};
use campus_adapter_postgres::{PostgresConfig, create_pool};
use campus_adapter_unleash::{UnleashClient, UnleashConfig};
use campus_config::{
    DatabaseConfig, ElasticSearchConfig, KafkaClusterConfig, NatsJetStreamConfig,
    UnleashClientConfig,
};
use campus_errors::AppResult;
use secrecy::ExposeSecret;
use sqlx::PgPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(&self, name: &str, config: &DatabaseConfig) -> AppResult<PgPool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NatsConnector: Send + Sync {
    async fn connect(&self, client_name: &str, config: &NatsJetStreamConfig) -> AppResult<JetStreamClient>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KafkaConnector: Send + Sync {
    async fn connect(&self, client_name: &str, config: &KafkaClusterConfig) -> AppResult<KafkaClient>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ElasticConnector: Send + Sync {
    async fn connect(&self, config: &ElasticSearchConfig) -> AppResult<ElasticClient>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UnleashConnector: Send + Sync {
    async fn connect(&self, config: &UnleashClientConfig) -> AppResult<UnleashClient>;
}

/// PostgreSQL 连接器
pub struct PostgresConnector;

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    async fn connect(&self, name: &str, config: &DatabaseConfig) -> AppResult<PgPool> {
        let pg = PostgresConfig::new(name, config.connection.expose_secret().as_str())
            .with_max_connections(config.max_conns)
            .with_min_connections(config.min_conns)
            .with_connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .with_idle_timeout(Duration::from_secs(config.idle_timeout_secs));
        create_pool(&pg).await
    }
}

/// NATS JetStream 连接器
pub struct JetStreamConnector;

#[async_trait]
impl NatsConnector for JetStreamConnector {
    async fn connect(&self, client_name: &str, config: &NatsJetStreamConfig) -> AppResult<JetStreamClient> {
        let mut nats = NatsConfig::new(config.address.as_str(), client_name)
            .with_max_reconnects(config.max_reconnects);
        if !config.user.is_empty() {
            nats = nats.with_credentials(config.user.as_str(), config.password.expose_secret().as_str());
        }
        JetStreamClient::connect(&nats).await
    }
}

/// rdkafka 连接器
pub struct RdKafkaConnector;

#[async_trait]
impl KafkaConnector for RdKafkaConnector {
    async fn connect(&self, client_name: &str, config: &KafkaClusterConfig) -> AppResult<KafkaClient> {
        let client_id = config.client_id.as_deref().unwrap_or(client_name);
        let kafka = KafkaClientConfig::new(config.address.as_str())
            .with_client_id(client_id)
            .with_object_name_prefix(config.object_name_prefix.as_str());
        KafkaClient::new(kafka)
    }
}

/// Elasticsearch 连接器
pub struct HttpElasticConnector;

#[async_trait]
impl ElasticConnector for HttpElasticConnector {
    async fn connect(&self, config: &ElasticSearchConfig) -> AppResult<ElasticClient> {
        let mut elastic = ElasticConfig::new(config.addresses.clone());
        if !config.username.is_empty() {
            elastic = elastic.with_basic_auth(config.username.as_str(), config.password.expose_secret().as_str());
        }
        ElasticClient::connect(elastic).await
    }
}

/// Unleash 连接器
pub struct HttpUnleashConnector;

#[async_trait]
impl UnleashConnector for HttpUnleashConnector {
    async fn connect(&self, config: &UnleashClientConfig) -> AppResult<UnleashClient> {
        UnleashClient::connect(UnleashConfig {
            url: config.url.clone(),
            app_name: config.app_name.clone(),
            api_token: config.api_token.expose_secret().clone(),
            refresh_interval: Duration::from_secs(config.refresh_interval_secs),
        })
        .await
    }
}

/// 全部连接器
#[derive(Clone)]
pub struct Connectors {
    pub database: Arc<dyn DatabaseConnector>,
    pub nats: Arc<dyn NatsConnector>,
    pub kafka: Arc<dyn KafkaConnector>,
    pub elastic: Arc<dyn ElasticConnector>,
    pub unleash: Arc<dyn UnleashConnector>,
}

impl Default for Connectors {
    fn default() -> Self {
        Self {
            database: Arc::new(PostgresConnector),
            nats: Arc::new(JetStreamConnector),
            kafka: Arc::new(RdKafkaConnector),
            elastic: Arc::new(HttpElasticConnector),
            unleash: Arc::new(HttpUnleashConnector),
        }
    }
}

impl Connectors {
    pub fn with_database(mut self, connector: Arc<dyn DatabaseConnector>) -> Self {
        self.database = connector;
        self
    }

    pub fn with_nats(mut self, connector: Arc<dyn NatsConnector>) -> Self {
        self.nats = connector;
        self
    }

    pub fn with_kafka(mut self, connector: Arc<dyn KafkaConnector>) -> Self {
        self.kafka = connector;
        self
    }

    pub fn with_elastic(mut self, connector: Arc<dyn ElasticConnector>) -> Self {
        self.elastic = connector;
        self
    }

    pub fn with_unleash(mut self, connector: Arc<dyn UnleashConnector>) -> Self {
        self.unleash = connector;
        self
    }
}

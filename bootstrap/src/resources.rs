//! 共享资源容器
//!
//! 启动阶段只记录各资源的配置，连接在首次访问时建立并缓存，
//! 之后所有调用方拿到同一个句柄。关闭时按固定顺序逐项清理。

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use campus_adapter_elastic::ElasticClient;
use campus_adapter_kafka::KafkaClient;
use campus_adapter_nats::JetStreamClient;
use campus_adapter_unleash::UnleashClient;
use campus_config::{
    COMMON_SECTION, CommonConfig, DatabaseConfig, ELASTIC_SECTION, ElasticSearchConfig,
    KAFKA_SECTION, KafkaClusterConfig, LogConfig, NATS_SECTION, NatsJetStreamConfig,
    PostgresV2Config, STORAGE_SECTION, StorageConfig, UNLEASH_SECTION, UnleashClientConfig,
};
use campus_errors::{AppError, AppResult, MultiError};
use futures::future::BoxFuture;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::connector::Connectors;
use crate::registry::{Protocol, ServiceRegistry, resolve_address};

/// Kafka 关闭时等待缓冲消息发送的时长
const KAFKA_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, AppResult<()>> + Send>;

/// 延迟建立的资源：要么只有配置，要么已经有句柄
struct LazyResource<T, C> {
    config: Option<C>,
    handle: OnceCell<Arc<T>>,
}

impl<T, C> Default for LazyResource<T, C> {
    fn default() -> Self {
        Self {
            config: None,
            handle: OnceCell::new(),
        }
    }
}

impl<T, C> LazyResource<T, C> {
    fn configured(config: C) -> Self {
        Self {
            config: Some(config),
            handle: OnceCell::new(),
        }
    }

    fn materialized(handle: Arc<T>) -> Self {
        Self {
            config: None,
            handle: OnceCell::new_with(Some(handle)),
        }
    }

    async fn get_or_connect<'a, F, Fut>(
        &'a self,
        resource: &'static str,
        name: &str,
        connect: F,
    ) -> AppResult<Arc<T>>
    where
        F: FnOnce(&'a C) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        if let Some(handle) = self.handle.get() {
            return Ok(handle.clone());
        }
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| AppError::not_configured(resource, name))?;

        self.handle
            .get_or_try_init(|| async move { connect(config).await.map(Arc::new) })
            .await
            .cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cleanup_fn<F, Fut>(cleanup: F) -> CleanupFn
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    Box::new(move || Box::pin(cleanup()))
}

fn close_pool(pool: PgPool) -> CleanupFn {
    cleanup_fn(move || async move {
        pool.close().await;
        Ok(())
    })
}

/// 服务共享资源
pub struct Resources {
    service_name: String,
    common: Option<CommonConfig>,
    log: Option<LogConfig>,
    storage: Option<StorageConfig>,
    registry: ServiceRegistry,
    connectors: Connectors,

    databases: BTreeMap<String, LazyResource<PgPool, DatabaseConfig>>,
    nats: LazyResource<JetStreamClient, NatsJetStreamConfig>,
    kafka: LazyResource<KafkaClient, KafkaClusterConfig>,
    elastic: LazyResource<ElasticClient, ElasticSearchConfig>,
    unleash: LazyResource<UnleashClient, UnleashClientConfig>,

    channels: Arc<Mutex<HashMap<String, Channel>>>,
    // 消息总线的关闭回调随句柄一起出现，清理时取出，只执行一次
    nats_cleanup: Mutex<Option<CleanupFn>>,
    kafka_cleanup: Mutex<Option<CleanupFn>>,
    db_cleanups: Mutex<Vec<(String, CleanupFn)>>,
    conn_cleanups: Mutex<Vec<(String, CleanupFn)>>,
}

impl Resources {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            common: None,
            log: None,
            storage: None,
            registry: ServiceRegistry::builtin(),
            connectors: Connectors::default(),
            databases: BTreeMap::new(),
            nats: LazyResource::default(),
            kafka: LazyResource::default(),
            elastic: LazyResource::default(),
            unleash: LazyResource::default(),
            channels: Arc::new(Mutex::new(HashMap::new())),
            nats_cleanup: Mutex::new(None),
            kafka_cleanup: Mutex::new(None),
            db_cleanups: Mutex::new(Vec::new()),
            conn_cleanups: Mutex::new(Vec::new()),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn with_registry(&mut self, registry: ServiceRegistry) -> &mut Self {
        self.registry = registry;
        self
    }

    pub fn with_connectors(&mut self, connectors: Connectors) -> &mut Self {
        self.connectors = connectors;
        self
    }

    pub fn with_common(&mut self, common: CommonConfig) -> &mut Self {
        self.common = Some(common);
        self
    }

    pub fn with_log_config(&mut self, log: LogConfig) -> &mut Self {
        self.log = Some(log);
        self
    }

    pub fn with_storage_config(&mut self, storage: StorageConfig) -> &mut Self {
        self.storage = Some(storage);
        self
    }

    /// 按名称登记数据库配置，已存在的同名句柄被替换
    pub fn with_database_configs(&mut self, config: PostgresV2Config) -> &mut Self {
        for (name, db) in config.databases {
            self.with_database_config(name, db);
        }
        self
    }

    pub fn with_database_config(&mut self, name: impl Into<String>, config: DatabaseConfig) -> &mut Self {
        let name = name.into();
        self.forget_db_cleanup(&name);
        self.databases.insert(name, LazyResource::configured(config));
        self
    }

    /// 直接注入已建立的连接池，同名配置被丢弃，清理时关闭该连接池
    pub fn with_database(&mut self, name: impl Into<String>, pool: Arc<PgPool>) -> &mut Self {
        let name = name.into();
        self.forget_db_cleanup(&name);
        lock(&self.db_cleanups).push((name.clone(), close_pool(pool.as_ref().clone())));
        self.databases.insert(name, LazyResource::materialized(pool));
        self
    }

    fn forget_db_cleanup(&self, name: &str) {
        lock(&self.db_cleanups).retain(|(registered, _)| registered != name);
    }

    pub fn with_nats_config(&mut self, config: NatsJetStreamConfig) -> &mut Self {
        *lock(&self.nats_cleanup) = None;
        self.nats = LazyResource::configured(config);
        self
    }

    pub fn with_nats(&mut self, client: Arc<JetStreamClient>) -> &mut Self {
        let closing = client.clone();
        *lock(&self.nats_cleanup) = Some(cleanup_fn(move || async move { closing.close().await }));
        self.nats = LazyResource::materialized(client);
        self
    }

    pub fn with_kafka_config(&mut self, config: KafkaClusterConfig) -> &mut Self {
        *lock(&self.kafka_cleanup) = None;
        self.kafka = LazyResource::configured(config);
        self
    }

    pub fn with_kafka(&mut self, client: Arc<KafkaClient>) -> &mut Self {
        let flushing = client.clone();
        *lock(&self.kafka_cleanup) =
            Some(cleanup_fn(move || async move { flushing.flush(KAFKA_FLUSH_TIMEOUT) }));
        self.kafka = LazyResource::materialized(client);
        self
    }

    pub fn with_elastic_config(&mut self, config: ElasticSearchConfig) -> &mut Self {
        self.elastic = LazyResource::configured(config);
        self
    }

    pub fn with_elastic(&mut self, client: Arc<ElasticClient>) -> &mut Self {
        self.elastic = LazyResource::materialized(client);
        self
    }

    pub fn with_unleash_config(&mut self, config: UnleashClientConfig) -> &mut Self {
        self.unleash = LazyResource::configured(config);
        self
    }

    pub fn with_unleash(&mut self, client: Arc<UnleashClient>) -> &mut Self {
        self.unleash = LazyResource::materialized(client);
        self
    }

    pub fn common(&self) -> AppResult<&CommonConfig> {
        self.common
            .as_ref()
            .ok_or_else(|| AppError::not_configured("common config", COMMON_SECTION))
    }

    pub fn log_config(&self) -> Option<&LogConfig> {
        self.log.as_ref()
    }

    pub fn storage(&self) -> AppResult<&StorageConfig> {
        self.storage
            .as_ref()
            .ok_or_else(|| AppError::not_configured("storage", STORAGE_SECTION))
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// 以服务名命名的默认数据库
    pub async fn db(&self) -> AppResult<Arc<PgPool>> {
        self.db_with(&self.service_name).await
    }

    /// 按名称获取数据库连接池，首次访问时建立连接
    pub async fn db_with(&self, name: &str) -> AppResult<Arc<PgPool>> {
        let slot = self
            .databases
            .get(name)
            .ok_or_else(|| AppError::not_configured("database", name))?;

        let connector = self.connectors.database.clone();
        slot.get_or_connect("database", name, |config| async move {
            let pool = connector.connect(name, config).await?;
            info!(database = %name, "Database connected");

            lock(&self.db_cleanups).push((name.to_string(), close_pool(pool.clone())));
            Ok(pool)
        })
        .await
    }

    pub async fn nats(&self) -> AppResult<Arc<JetStreamClient>> {
        let connector = self.connectors.nats.clone();
        let client_name = self.service_name.as_str();
        self.nats
            .get_or_connect("nats", NATS_SECTION, |config| async move {
                let client = connector.connect(client_name, config).await?;
                let closing = client.clone();
                *lock(&self.nats_cleanup) =
                    Some(cleanup_fn(move || async move { closing.close().await }));
                Ok(client)
            })
            .await
    }

    pub async fn kafka(&self) -> AppResult<Arc<KafkaClient>> {
        let connector = self.connectors.kafka.clone();
        let client_name = self.service_name.as_str();
        self.kafka
            .get_or_connect("kafka", KAFKA_SECTION, |config| async move {
                let client = connector.connect(client_name, config).await?;
                let flushing = client.clone();
                *lock(&self.kafka_cleanup) =
                    Some(cleanup_fn(move || async move { flushing.flush(KAFKA_FLUSH_TIMEOUT) }));
                Ok(client)
            })
            .await
    }

    pub async fn elastic(&self) -> AppResult<Arc<ElasticClient>> {
        let connector = self.connectors.elastic.clone();
        self.elastic
            .get_or_connect("elasticsearch", ELASTIC_SECTION, |config| async move {
                connector.connect(config).await
            })
            .await
    }

    pub async fn unleash(&self) -> AppResult<Arc<UnleashClient>> {
        let connector = self.connectors.unleash.clone();
        self.unleash
            .get_or_connect("unleash", UNLEASH_SECTION, |config| async move {
                connector.connect(config).await
            })
            .await
    }

    /// 本服务访问 `name` 的 gRPC 地址
    pub fn get_address(&self, name: &str) -> AppResult<String> {
        self.get_address_with(name, Protocol::Grpc, false)
    }

    pub fn get_address_with(&self, name: &str, protocol: Protocol, force: bool) -> AppResult<String> {
        resolve_address(&self.registry, self.common()?, name, protocol, force)
    }

    /// 同 `get_address`，解析失败时 panic
    pub fn must_get_address(&self, name: &str, protocol: Protocol) -> String {
        match self.get_address_with(name, protocol, false) {
            Ok(address) => address,
            Err(e) => panic!("cannot resolve address of {}: {}", name, e),
        }
    }

    pub fn grpc_port(&self, name: &str) -> AppResult<&str> {
        self.registry.port(name, Protocol::Grpc)
    }

    pub fn http_port(&self, name: &str) -> AppResult<&str> {
        self.registry.port(name, Protocol::Http)
    }

    /// 到目标服务的 gRPC 通道，首次调用时创建，连接在首个请求时建立
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn grpc_dial(&self, name: &str) -> AppResult<Channel> {
        self.grpc_dial_with(name, false)
    }

    pub fn grpc_dial_with(&self, name: &str, force: bool) -> AppResult<Channel> {
        if let Some(channel) = lock(&self.channels).get(name) {
            return Ok(channel.clone());
        }

        let address = self.get_address_with(name, Protocol::Grpc, force)?;
        let channel = Endpoint::from_shared(format!("http://{}", address))
            .map_err(|e| AppError::connect("grpc", format!("{}: {}", address, e)))?
            .connect_lazy();

        {
            let mut channels = lock(&self.channels);
            if let Some(existing) = channels.get(name) {
                return Ok(existing.clone());
            }
            channels.insert(name.to_string(), channel.clone());
        }

        debug!(service = %name, %address, "gRPC channel created");
        let channels = self.channels.clone();
        let key = name.to_string();
        self.register_conn_cleanup(format!("grpc:{}", name), move || async move {
            lock(&channels).remove(&key);
            Ok(())
        });
        Ok(channel)
    }

    /// 登记数据库清理回调
    pub fn register_db_cleanup<F, Fut>(&self, name: impl Into<String>, cleanup: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        lock(&self.db_cleanups).push((name.into(), cleanup_fn(cleanup)));
    }

    /// 登记出站连接清理回调
    pub fn register_conn_cleanup<F, Fut>(&self, name: impl Into<String>, cleanup: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        lock(&self.conn_cleanups).push((name.into(), cleanup_fn(cleanup)));
    }

    /// 释放所有资源
    ///
    /// 顺序：NATS → Kafka → 数据库 → 出站连接。每一步都会执行，
    /// 失败项汇总在 `AppError::Cleanup` 中返回。
    pub async fn cleanup(&self) -> AppResult<()> {
        let mut errors = MultiError::new();

        let nats_cleanup = lock(&self.nats_cleanup).take();
        if let Some(close) = nats_cleanup {
            if let Err(e) = close().await {
                warn!(error = %e, "Failed to close NATS");
                errors.push("nats", e);
            }
        }

        let kafka_cleanup = lock(&self.kafka_cleanup).take();
        if let Some(flush) = kafka_cleanup {
            if let Err(e) = flush().await {
                warn!(error = %e, "Failed to flush Kafka producer");
                errors.push("kafka", e);
            }
        }

        let db_cleanups = std::mem::take(&mut *lock(&self.db_cleanups));
        for (name, cleanup) in db_cleanups {
            if let Err(e) = cleanup().await {
                warn!(database = %name, error = %e, "Failed to close database");
                errors.push(format!("database {}", name), e);
            }
        }

        let conn_cleanups = std::mem::take(&mut *lock(&self.conn_cleanups));
        for (name, cleanup) in conn_cleanups {
            if let Err(e) = cleanup().await {
                warn!(connection = %name, error = %e, "Failed to close connection");
                errors.push(format!("connection {}", name), e);
            }
        }

        if errors.is_empty() {
            info!(service = %self.service_name, "Resources released");
        }
        errors.into_result()
    }
}

//! 平台配置段
//!
//! 每个服务的配置结构体按需嵌入这些段，字段名即段名（见 `extract`）。

use std::collections::BTreeMap;

use secrecy::Secret;
use serde::{Deserialize, Serialize};

/// 本地开发环境名
pub const LOCAL_ENV: &str = "local";

/// 通用配置，所有服务必需
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonConfig {
    /// 服务名，同时是服务注册表中的键
    pub name: String,
    pub environment: String,
    /// 实际部署环境，预发布环境下与 `environment` 不同（如 dorp / prod）
    #[serde(default)]
    pub actual_environment: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub grpc: GrpcConfig,
    #[serde(default)]
    pub stats_enabled: bool,
    #[serde(default)]
    pub profiler: ProfilerConfig,
    #[serde(default)]
    pub image_tag: String,
}

impl CommonConfig {
    pub fn is_local(&self) -> bool {
        self.environment == LOCAL_ENV
    }

    /// 实际部署环境，未设置时回退为 `environment`
    pub fn actual_env(&self) -> &str {
        if self.actual_environment.is_empty() {
            &self.environment
        } else {
            &self.actual_environment
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub app_level: String,
    #[serde(default)]
    pub log_payload: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            app_level: default_log_level(),
            log_payload: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// gRPC 服务端配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrpcConfig {
    /// 单个请求的处理超时（秒），未设置则不限制
    #[serde(default)]
    pub handler_timeout_secs: Option<u64>,
}

/// 性能剖析配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub project_id: String,
}

/// 单个 PostgreSQL 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(serialize_with = "crate::serde_secret::expose")]
    pub connection: Secret<String>,
    #[serde(default = "default_max_conns")]
    pub max_conns: u32,
    #[serde(default = "default_min_conns")]
    pub min_conns: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: Secret::new(connection.into()),
            max_conns: default_max_conns(),
            min_conns: default_min_conns(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_max_conns() -> u32 {
    8
}

fn default_min_conns() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

/// 多数据库配置，键为逻辑数据库名（通常等于服务名）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostgresV2Config {
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseConfig>,
}

/// NATS JetStream 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsJetStreamConfig {
    pub address: String,
    #[serde(default)]
    pub user: String,
    #[serde(
        default = "crate::serde_secret::empty",
        serialize_with = "crate::serde_secret::expose"
    )]
    pub password: Secret<String>,
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: usize,
}

fn default_max_reconnects() -> usize {
    10
}

/// Kafka 集群配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaClusterConfig {
    /// 逗号分隔的 broker 列表
    pub address: String,
    #[serde(default)]
    pub object_name_prefix: String,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Unleash 特性开关客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnleashClientConfig {
    pub url: String,
    pub app_name: String,
    #[serde(
        default = "crate::serde_secret::empty",
        serialize_with = "crate::serde_secret::expose"
    )]
    pub api_token: Secret<String>,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

fn default_refresh_interval_secs() -> u64 {
    15
}

/// Elasticsearch 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticSearchConfig {
    pub addresses: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(
        default = "crate::serde_secret::empty",
        serialize_with = "crate::serde_secret::expose"
    )]
    pub password: Secret<String>,
}

/// 对象存储配置（仅配置，不在启动阶段建立连接）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    pub bucket: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub file_upload_folder_path: String,
    #[serde(default)]
    pub maximum_url_expiry_secs: u64,
    #[serde(default)]
    pub minimum_url_expiry_secs: u64,
}

//! 资源初始化器
//!
//! 按固定顺序从服务配置中提取各配置段写入 `Resources`。
//! 除 `common` 外，缺失的配置段被跳过，对应资源在访问时报告未配置。

use campus_config::{
    COMMON_SECTION, CommonConfig, ELASTIC_SECTION, ElasticSearchConfig, ExtractError,
    KAFKA_SECTION, KafkaClusterConfig, NATS_SECTION, NatsJetStreamConfig, POSTGRES_SECTION,
    PostgresV2Config, STORAGE_SECTION, StorageConfig, UNLEASH_SECTION, UnleashClientConfig,
    extract, ignore_field_not_found,
};
use campus_errors::{AppError, AppResult};
use campus_telemetry::{init_tracing, init_tracing_json};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::resources::Resources;

type Initializer<C> = fn(&C, &mut Resources) -> AppResult<()>;

/// 初始化顺序
pub fn initializers<C: Serialize>() -> Vec<(&'static str, Initializer<C>)> {
    vec![
        ("logger", init_logger::<C>),
        ("database", init_database::<C>),
        ("nats", init_nats::<C>),
        ("kafka", init_kafka::<C>),
        ("unleash", init_unleash::<C>),
        ("elastic", init_elastic::<C>),
        ("storage", init_storage::<C>),
    ]
}

/// 依次执行全部初始化器，任一失败即中止
pub fn init_resources<C: Serialize>(config: &C, rsc: &mut Resources) -> AppResult<()> {
    for (name, init) in initializers::<C>() {
        init(config, rsc).map_err(|e| AppError::config(format!("{} initializer: {}", name, e)))?;
        debug!(initializer = name, "Initializer done");
    }
    Ok(())
}

fn optional_section<T, C>(config: &C, field: &str) -> AppResult<Option<T>>
where
    T: DeserializeOwned,
    C: Serialize,
{
    ignore_field_not_found(extract(config, field)).map_err(extract_error)
}

fn extract_error(err: ExtractError) -> AppError {
    AppError::config(err.to_string())
}

/// 日志初始化，`common` 段缺失是致命错误
pub fn init_logger<C: Serialize>(config: &C, rsc: &mut Resources) -> AppResult<()> {
    let common: CommonConfig = extract(config, COMMON_SECTION).map_err(extract_error)?;

    let installed = if common.is_local() {
        init_tracing(&common.log.app_level)
    } else {
        init_tracing_json(&common.log.app_level)
    };
    if installed {
        info!(
            service = %common.name,
            environment = %common.environment,
            image_tag = %common.image_tag,
            "Logger initialized"
        );
    }

    rsc.with_log_config(common.log.clone()).with_common(common);
    Ok(())
}

pub fn init_database<C: Serialize>(config: &C, rsc: &mut Resources) -> AppResult<()> {
    if let Some(postgres) = optional_section::<PostgresV2Config, _>(config, POSTGRES_SECTION)? {
        rsc.with_database_configs(postgres);
    }
    Ok(())
}

pub fn init_nats<C: Serialize>(config: &C, rsc: &mut Resources) -> AppResult<()> {
    if let Some(nats) = optional_section::<NatsJetStreamConfig, _>(config, NATS_SECTION)? {
        rsc.with_nats_config(nats);
    }
    Ok(())
}

pub fn init_kafka<C: Serialize>(config: &C, rsc: &mut Resources) -> AppResult<()> {
    if let Some(kafka) = optional_section::<KafkaClusterConfig, _>(config, KAFKA_SECTION)? {
        rsc.with_kafka_config(kafka);
    }
    Ok(())
}

pub fn init_unleash<C: Serialize>(config: &C, rsc: &mut Resources) -> AppResult<()> {
    if let Some(unleash) = optional_section::<UnleashClientConfig, _>(config, UNLEASH_SECTION)? {
        rsc.with_unleash_config(unleash);
    }
    Ok(())
}

pub fn init_elastic<C: Serialize>(config: &C, rsc: &mut Resources) -> AppResult<()> {
    if let Some(elastic) = optional_section::<ElasticSearchConfig, _>(config, ELASTIC_SECTION)? {
        rsc.with_elastic_config(elastic);
    }
    Ok(())
}

pub fn init_storage<C: Serialize>(config: &C, rsc: &mut Resources) -> AppResult<()> {
    if let Some(storage) = optional_section::<StorageConfig, _>(config, STORAGE_SECTION)? {
        rsc.with_storage_config(storage);
    }
    Ok(())
}

//! 配置段提取
//!
//! 从任意服务配置结构体中按字段名取出一个段。服务配置先序列化为
//! `serde_json::Value`，再把对应键反序列化为目标类型。

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// 通用配置段名
pub const COMMON_SECTION: &str = "common";
/// 多数据库配置段名
pub const POSTGRES_SECTION: &str = "postgres_v2";
/// NATS JetStream 配置段名
pub const NATS_SECTION: &str = "nats_js";
/// Kafka 配置段名
pub const KAFKA_SECTION: &str = "kafka_cluster";
/// Unleash 配置段名
pub const UNLEASH_SECTION: &str = "unleash_client";
/// Elasticsearch 配置段名
pub const ELASTIC_SECTION: &str = "elastic_search";
/// 对象存储配置段名
pub const STORAGE_SECTION: &str = "storage";

#[derive(Debug, Error)]
pub enum ExtractError {
    /// 字段不存在，或为 `null`（未设置的可选段）
    #[error("field not found: {field}")]
    FieldNotFound { field: String },

    #[error("field {field} has type {found}, cannot be used as {expected}: {message}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
        message: String,
    },

    #[error("config cannot be inspected: {0}")]
    Unsupported(String),
}

impl ExtractError {
    pub fn is_field_not_found(&self) -> bool {
        matches!(self, Self::FieldNotFound { .. })
    }
}

/// 从配置中取出名为 `field` 的段
pub fn extract<T, C>(config: &C, field: &str) -> Result<T, ExtractError>
where
    T: DeserializeOwned,
    C: Serialize + ?Sized,
{
    let root = serde_json::to_value(config).map_err(|e| ExtractError::Unsupported(e.to_string()))?;

    let mut fields = match root {
        Value::Object(fields) => fields,
        other => {
            return Err(ExtractError::Unsupported(format!(
                "expected a struct, got {}",
                kind_of(&other)
            )));
        }
    };

    let value = match fields.remove(field) {
        None | Some(Value::Null) => {
            return Err(ExtractError::FieldNotFound {
                field: field.to_string(),
            });
        }
        Some(v) => v,
    };

    let found = kind_of(&value);
    serde_json::from_value(value).map_err(|e| ExtractError::TypeMismatch {
        field: field.to_string(),
        expected: std::any::type_name::<T>(),
        found,
        message: e.to_string(),
    })
}

/// 把"字段不存在"视为未使用该特性
pub fn ignore_field_not_found<T>(result: Result<T, ExtractError>) -> Result<Option<T>, ExtractError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_field_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! campus-errors - 统一错误处理
//!
//! 平台层错误分类：启动前致命错误、首次使用时才暴露的未配置错误、
//! 尽力而为的清理错误，以及监听器运行期错误。

use std::fmt;

use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("{resource} is not configured: {name}")]
    NotConfigured { resource: &'static str, name: String },

    #[error("Failed to connect {resource}: {message}")]
    Connect {
        resource: &'static str,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(MultiError),
}

impl AppError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_configured(resource: &'static str, name: impl Into<String>) -> Self {
        Self::NotConfigured {
            resource,
            name: name.into(),
        }
    }

    pub fn connect(resource: &'static str, msg: impl fmt::Display) -> Self {
        Self::Connect {
            resource,
            message: msg.to_string(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn listener(msg: impl Into<String>) -> Self {
        Self::Listener(msg.into())
    }

    /// 是否为"资源未配置"错误
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured { .. })
    }

    /// 转换为 gRPC 状态码
    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            Self::NotFound(_) => tonic::Code::NotFound,
            Self::Validation(_) => tonic::Code::InvalidArgument,
            Self::NotConfigured { .. } => tonic::Code::FailedPrecondition,
            Self::Connect { .. } => tonic::Code::Unavailable,
            Self::Config(_)
            | Self::Internal(_)
            | Self::Listener(_)
            | Self::Cleanup(_) => tonic::Code::Internal,
        }
    }
}

impl From<AppError> for tonic::Status {
    fn from(err: AppError) -> Self {
        tonic::Status::new(err.grpc_code(), err.to_string())
    }
}

/// 多个错误的聚合
///
/// 清理阶段每一步都会执行，失败项按名称收集在这里。
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<(String, AppError)>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, err: AppError) {
        self.errors.push((name.into(), err));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[(String, AppError)] {
        &self.errors
    }

    /// 无错误时返回 Ok，否则包装为 `AppError::Cleanup`
    pub fn into_result(self) -> AppResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Cleanup(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, err)) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", name, err)?;
        }
        Ok(())
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_error_lists_every_failure() {
        let mut errs = MultiError::new();
        errs.push("db:bob", AppError::internal("pool closed"));
        errs.push("conn:tom", AppError::internal("broken pipe"));

        let err = errs.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("db:bob: Internal error: pool closed"));
        assert!(msg.contains("conn:tom: Internal error: broken pipe"));
    }

    #[test]
    fn test_empty_multi_error_is_ok() {
        assert!(MultiError::new().into_result().is_ok());
    }

    #[test]
    fn test_not_configured_maps_to_failed_precondition() {
        let err = AppError::not_configured("kafka", "kafka_cluster");
        assert!(err.is_not_configured());
        assert_eq!(err.grpc_code(), tonic::Code::FailedPrecondition);
        assert_eq!(err.to_string(), "kafka is not configured: kafka_cluster");
    }
}

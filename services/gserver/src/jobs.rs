//! 批处理任务

use std::sync::Arc;

use campus_adapter_postgres::check_connection;
use campus_bootstrap::{JobArgs, Protocol, Resources};
use campus_errors::{AppError, AppResult};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::heartbeat::HeartbeatConfig;

/// 打印本服务访问目标服务时使用的地址
pub async fn resolve_address(
    _token: CancellationToken,
    _config: HeartbeatConfig,
    rsc: Arc<Resources>,
    args: JobArgs,
) -> AppResult<()> {
    let target = args.string("target").unwrap_or_default();
    if target.is_empty() {
        return Err(AppError::validation("--target is required"));
    }
    let protocol = match args.string("protocol").unwrap_or("grpc") {
        "grpc" => Protocol::Grpc,
        "http" => Protocol::Http,
        other => return Err(AppError::validation(format!("unknown protocol {}", other))),
    };

    let address = rsc.get_address_with(target, protocol, args.bool("force"))?;
    info!(service = %target, %protocol, %address, "Address resolved");
    println!("{}", address);
    Ok(())
}

/// 检查数据库连通性
pub async fn check_database(
    token: CancellationToken,
    _config: HeartbeatConfig,
    rsc: Arc<Resources>,
    args: JobArgs,
) -> AppResult<()> {
    let database = match args.string("database") {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => rsc.service_name().to_string(),
    };

    let pool = tokio::select! {
        pool = rsc.db_with(&database) => pool?,
        _ = token.cancelled() => return Err(AppError::internal("cancelled before connecting")),
    };
    check_connection(&pool).await?;
    info!(database = %database, "Database is reachable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_config::CommonConfig;
    use serde_json::json;

    fn setup() -> (HeartbeatConfig, Arc<Resources>) {
        let config: HeartbeatConfig = serde_json::from_value(json!({
            "common": { "name": "heartbeat", "environment": "stag", "organization": "manabie" },
        }))
        .unwrap();
        let common: CommonConfig = config.common.clone();
        let mut rsc = Resources::new("heartbeat");
        rsc.with_common(common);
        (config, Arc::new(rsc))
    }

    #[tokio::test]
    async fn test_resolve_address_requires_target() {
        let (config, rsc) = setup();
        let err = resolve_address(CancellationToken::new(), config, rsc, JobArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_resolve_address_rejects_unknown_protocol() {
        let (config, rsc) = setup();
        let args = JobArgs::default()
            .with_string("target", "bob")
            .with_string("protocol", "amqp");
        let err = resolve_address(CancellationToken::new(), config, rsc, args)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("amqp"));
    }

    #[tokio::test]
    async fn test_resolve_address_succeeds() {
        let (config, rsc) = setup();
        let args = JobArgs::default()
            .with_string("target", "bob")
            .with_string("protocol", "http");
        resolve_address(CancellationToken::new(), config, rsc, args)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_check_database_not_configured() {
        let (config, rsc) = setup();
        let err = check_database(CancellationToken::new(), config, rsc, JobArgs::default())
            .await
            .unwrap_err();
        assert!(err.is_not_configured());
    }
}

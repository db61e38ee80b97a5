//! PostgreSQL 连接管理

use std::time::Duration;

use campus_errors::{AppError, AppResult};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

/// PostgreSQL 连接池配置
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// 逻辑数据库名，用于日志
    pub name: String,
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl PostgresConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.connect_timeout)
            .idle_timeout(self.idle_timeout)
    }
}

/// 创建 PostgreSQL 连接池并建立首个连接
pub async fn create_pool(config: &PostgresConfig) -> AppResult<PgPool> {
    let pool = config
        .pool_options()
        .connect(&config.url)
        .await
        .map_err(|e| AppError::connect("postgres", format!("{}: {}", config.name, e)))?;

    info!(
        database = %config.name,
        max_connections = config.max_connections,
        "PostgreSQL connection pool created"
    );
    Ok(pool)
}

/// 创建不立即建立连接的连接池
pub fn create_lazy_pool(config: &PostgresConfig) -> AppResult<PgPool> {
    config
        .pool_options()
        .connect_lazy(&config.url)
        .map_err(|e| AppError::connect("postgres", format!("{}: {}", config.name, e)))
}

/// 检查数据库连接
pub async fn check_connection(pool: &PgPool) -> AppResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| AppError::connect("postgres", format!("health check failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_pool_does_not_connect() {
        let config = PostgresConfig::new("bob", "postgres://postgres@127.0.0.1:1/bob")
            .with_max_connections(4);
        let pool = create_lazy_pool(&config).unwrap();
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_invalid_url_is_connect_error() {
        let config = PostgresConfig::new("bob", "not a url");
        let err = create_lazy_pool(&config).unwrap_err();
        assert!(err.to_string().contains("bob"));
    }
}

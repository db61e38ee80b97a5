//! NATS JetStream 连接管理

use std::fmt;

use async_nats::jetstream;
use campus_errors::{AppError, AppResult};
use tracing::info;

/// NATS 连接配置
#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub address: String,
    /// 连接名，便于在服务端区分客户端
    pub client_name: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub max_reconnects: usize,
}

impl NatsConfig {
    pub fn new(address: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            client_name: client_name.into(),
            user: None,
            password: None,
            max_reconnects: 10,
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_max_reconnects(mut self, max: usize) -> Self {
        self.max_reconnects = max;
        self
    }
}

/// JetStream 客户端
#[derive(Clone)]
pub struct JetStreamClient {
    client: async_nats::Client,
    context: jetstream::Context,
}

impl fmt::Debug for JetStreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JetStreamClient")
            .field("state", &self.client.connection_state())
            .finish_non_exhaustive()
    }
}

impl JetStreamClient {
    pub async fn connect(config: &NatsConfig) -> AppResult<Self> {
        let mut options = async_nats::ConnectOptions::new()
            .name(&config.client_name)
            .max_reconnects(config.max_reconnects);
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            options = options.user_and_password(user.clone(), password.clone());
        }

        let client = options
            .connect(config.address.as_str())
            .await
            .map_err(|e| AppError::connect("nats", format!("{}: {}", config.address, e)))?;
        let context = jetstream::new(client.clone());

        info!(address = %config.address, "NATS JetStream connected");
        Ok(Self { client, context })
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.context
    }

    /// 刷出缓冲中的消息后排空连接：停止订阅、处理完已收到的消息再断开
    pub async fn close(&self) -> AppResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| AppError::internal(format!("Failed to flush NATS connection: {}", e)))?;
        self.client
            .drain()
            .await
            .map_err(|e| AppError::internal(format!("Failed to drain NATS connection: {}", e)))?;
        info!("NATS connection drained");
        Ok(())
    }
}

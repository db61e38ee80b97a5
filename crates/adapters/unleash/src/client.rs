//! Unleash 客户端
//!
//! 启动时拉取一次开关列表，之后由后台任务定期刷新。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use campus_errors::{AppError, AppResult};
use reqwest::Client;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 后台刷新的最短间隔
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Unleash 连接配置
#[derive(Debug, Clone)]
pub struct UnleashConfig {
    pub url: String,
    pub app_name: String,
    pub api_token: String,
    pub refresh_interval: Duration,
}

impl UnleashConfig {
    /// 实际使用的刷新间隔，不低于 `MIN_REFRESH_INTERVAL`
    pub fn poll_interval(&self) -> Duration {
        self.refresh_interval.max(MIN_REFRESH_INTERVAL)
    }
}

#[derive(Debug, Deserialize)]
struct FeaturesResponse {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    name: String,
    enabled: bool,
}

/// Unleash 客户端
#[derive(Debug)]
pub struct UnleashClient {
    http: Client,
    config: UnleashConfig,
    toggles: Arc<RwLock<HashMap<String, bool>>>,
    poller: Option<JoinHandle<()>>,
}

impl UnleashClient {
    /// 拉取开关并启动后台刷新
    pub async fn connect(config: UnleashConfig) -> AppResult<Self> {
        let http = Client::new();
        let toggles = fetch_features(&http, &config)
            .await
            .map_err(|e| AppError::connect("unleash", e))?;
        info!(url = %config.url, toggles = toggles.len(), "Unleash client connected");

        let toggles = Arc::new(RwLock::new(toggles));
        let poller = spawn_poller(http.clone(), config.clone(), toggles.clone());

        Ok(Self {
            http,
            config,
            toggles,
            poller: Some(poller),
        })
    }

    /// 由给定开关集合构造，不访问服务端
    pub fn from_toggles(config: UnleashConfig, toggles: HashMap<String, bool>) -> Self {
        Self {
            http: Client::new(),
            config,
            toggles: Arc::new(RwLock::new(toggles)),
            poller: None,
        }
    }

    /// 开关是否开启，未知开关视为关闭
    pub fn is_enabled(&self, name: &str) -> bool {
        self.toggles
            .read()
            .map(|t| t.get(name).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    /// 立即刷新一次
    pub async fn refresh(&self) -> AppResult<()> {
        let fresh = fetch_features(&self.http, &self.config)
            .await
            .map_err(|e| AppError::internal(format!("Failed to refresh Unleash toggles: {}", e)))?;
        if let Ok(mut toggles) = self.toggles.write() {
            *toggles = fresh;
        }
        Ok(())
    }
}

impl Drop for UnleashClient {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

fn spawn_poller(
    http: Client,
    config: UnleashConfig,
    toggles: Arc<RwLock<HashMap<String, bool>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.poll_interval());
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match fetch_features(&http, &config).await {
                Ok(fresh) => {
                    debug!(toggles = fresh.len(), "Unleash toggles refreshed");
                    if let Ok(mut guard) = toggles.write() {
                        *guard = fresh;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to refresh Unleash toggles"),
            }
        }
    })
}

async fn fetch_features(
    http: &Client,
    config: &UnleashConfig,
) -> Result<HashMap<String, bool>, reqwest::Error> {
    let response: FeaturesResponse = http
        .get(format!("{}/client/features", config.url.trim_end_matches('/')))
        .header("Authorization", &config.api_token)
        .header("UNLEASH-APPNAME", &config.app_name)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(response
        .features
        .into_iter()
        .map(|f| (f.name, f.enabled))
        .collect())
}

//! heartbeat 服务
//!
//! 暴露存活、就绪检查，以及到配置中对端服务的 HTTP 地址。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use campus_adapter_postgres::check_connection;
use campus_bootstrap::{BaseService, HttpService, Protocol, Resources};
use campus_config::{CommonConfig, NatsJetStreamConfig, PostgresV2Config, StorageConfig};
use campus_errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub common: CommonConfig,
    #[serde(default)]
    pub postgres_v2: Option<PostgresV2Config>,
    #[serde(default)]
    pub nats_js: Option<NatsJetStreamConfig>,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatSection {
    /// 需要暴露地址的对端服务
    #[serde(default)]
    pub peers: Vec<String>,
}

#[derive(Default)]
pub struct HeartbeatServer {
    peers: OnceLock<Vec<(String, String)>>,
}

struct HeartbeatState {
    rsc: Arc<Resources>,
    peers: Vec<(String, String)>,
}

#[async_trait]
impl BaseService<HeartbeatConfig> for HeartbeatServer {
    fn server_name(&self) -> &str {
        "heartbeat"
    }

    async fn init_dependencies(&self, config: &HeartbeatConfig, rsc: &Arc<Resources>) -> AppResult<()> {
        let mut peers = Vec::with_capacity(config.heartbeat.peers.len());
        for peer in &config.heartbeat.peers {
            let address = rsc.get_address_with(peer, Protocol::Http, false)?;
            peers.push((peer.clone(), address));
        }
        self.peers
            .set(peers)
            .map_err(|_| AppError::internal("heartbeat dependencies initialized twice"))
    }

    async fn graceful_shutdown(&self) {
        info!("Heartbeat server stopped");
    }
}

#[async_trait]
impl HttpService<HeartbeatConfig> for HeartbeatServer {
    async fn setup_http(
        &self,
        router: Router,
        _config: &HeartbeatConfig,
        rsc: &Arc<Resources>,
    ) -> AppResult<Router> {
        let state = Arc::new(HeartbeatState {
            rsc: rsc.clone(),
            peers: self.peers.get().cloned().unwrap_or_default(),
        });

        let routes = Router::new()
            .route("/healthz", get(|| async { "ok" }))
            .route("/readyz", get(readyz))
            .route("/peers", get(peers))
            .with_state(state);
        Ok(router.merge(routes))
    }
}

async fn readyz(State(state): State<Arc<HeartbeatState>>) -> (StatusCode, String) {
    match state.rsc.db().await {
        Ok(pool) => match check_connection(&pool).await {
            Ok(()) => (StatusCode::OK, "ready".to_string()),
            Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        },
        Err(e) if e.is_not_configured() => (StatusCode::OK, "ready".to_string()),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn peers(State(state): State<Arc<HeartbeatState>>) -> Json<Value> {
    let peers: serde_json::Map<String, Value> = state
        .peers
        .iter()
        .map(|(name, address)| (name.clone(), Value::String(address.clone())))
        .collect();
    Json(json!({ "service": state.rsc.service_name(), "peers": peers }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn config() -> HeartbeatConfig {
        serde_json::from_value(json!({
            "common": { "name": "heartbeat", "environment": "local" },
            "heartbeat": { "peers": ["bob", "lessonmgmt"] },
        }))
        .unwrap()
    }

    async fn router() -> Router {
        let config = config();
        let mut rsc = Resources::new("heartbeat");
        rsc.with_common(config.common.clone());
        let rsc = Arc::new(rsc);

        let server = HeartbeatServer::default();
        server.init_dependencies(&config, &rsc).await.unwrap();
        server.setup_http(Router::new(), &config, &rsc).await.unwrap()
    }

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_ready_without_database() {
        let (status, body) = get_body(router().await, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ready");
    }

    #[tokio::test]
    async fn test_peers_are_resolved_at_startup() {
        let (status, body) = get_body(router().await, "/peers").await;
        assert_eq!(status, StatusCode::OK);

        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["peers"]["bob"], "bob.backend.svc.cluster.local:5080");
        assert_eq!(body["peers"]["lessonmgmt"], "lessonmgmt:6580");
    }

    #[tokio::test]
    async fn test_unknown_peer_fails_startup() {
        let mut config = config();
        config.heartbeat.peers.push("nobody".to_string());
        let mut rsc = Resources::new("heartbeat");
        rsc.with_common(config.common.clone());

        let err = HeartbeatServer::default()
            .init_dependencies(&config, &Arc::new(rsc))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nobody"));
    }
}

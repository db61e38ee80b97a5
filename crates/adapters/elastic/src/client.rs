//! Elasticsearch 客户端

use campus_errors::{AppError, AppResult};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

/// Elasticsearch 连接配置
#[derive(Debug, Clone)]
pub struct ElasticConfig {
    pub addresses: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ElasticConfig {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses,
            username: None,
            password: None,
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct ClusterInfo {
    cluster_name: String,
}

/// Elasticsearch 客户端
#[derive(Debug, Clone)]
pub struct ElasticClient {
    http: Client,
    config: ElasticConfig,
    base_url: String,
}

impl ElasticClient {
    /// 创建客户端并探测集群
    pub async fn connect(config: ElasticConfig) -> AppResult<Self> {
        let base_url = config
            .addresses
            .first()
            .map(|a| a.trim_end_matches('/').to_string())
            .ok_or_else(|| AppError::config("elastic_search.addresses is empty"))?;

        let client = Self {
            http: Client::new(),
            config,
            base_url,
        };

        let info: ClusterInfo = client
            .request(Method::GET, "/")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::connect("elastic", e))?
            .json()
            .await
            .map_err(|e| AppError::connect("elastic", e))?;

        info!(cluster = %info.cluster_name, address = %client.base_url, "Elasticsearch connected");
        Ok(client)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match (&self.config.username, &self.config.password) {
            (Some(user), password) => builder.basic_auth(user, password.as_ref()),
            _ => builder,
        }
    }

    /// 在索引上执行查询，返回原始响应
    pub async fn search(&self, index: &str, query: &Value) -> AppResult<Value> {
        self.request(Method::POST, &format!("/{}/_search", index))
            .json(query)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::internal(format!("Elasticsearch search on {} failed: {}", index, e)))?
            .json()
            .await
            .map_err(|e| AppError::internal(format!("Invalid search response: {}", e)))
    }

    /// 写入或覆盖一个文档
    pub async fn index_document(&self, index: &str, id: &str, document: &Value) -> AppResult<()> {
        self.request(Method::PUT, &format!("/{}/_doc/{}", index, id))
            .json(document)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::internal(format!("Elasticsearch index on {} failed: {}", index, e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_without_addresses() {
        let err = ElasticClient::connect(ElasticConfig::new(vec![])).await.err().unwrap();
        assert!(matches!(err, AppError::Config(_)));
    }
}

//! 服务能力钩子
//!
//! 每个服务实现 `BaseService`，再按需实现 gRPC / HTTP / NATS / Kafka /
//! 监控钩子。启动器只调用服务声明过的钩子。

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use campus_errors::AppResult;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tonic::service::RoutesBuilder;

use crate::grpc::{GrpcInterceptor, GrpcServerOptions};
use crate::resources::Resources;

/// 服务配置类型需满足的约束
pub trait ServiceConfig: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> ServiceConfig for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// 所有服务必须实现的基础钩子
#[async_trait]
pub trait BaseService<C: ServiceConfig>: Send + Sync + 'static {
    /// 服务名，同时是服务注册表的键和默认数据库名
    fn server_name(&self) -> &str;

    /// 启动时调用一次，用于构建服务自身的依赖
    async fn init_dependencies(&self, config: &C, rsc: &Arc<Resources>) -> AppResult<()>;

    /// 收到关闭信号后、停止监听器之前调用一次，此时监听器仍在接收请求
    async fn graceful_shutdown(&self) {}
}

#[async_trait]
pub trait GrpcService<C: ServiceConfig>: Send + Sync + 'static {
    /// 服务自定义拦截器，按顺序在平台拦截器之后执行
    fn interceptors(&self, _config: &C, _rsc: &Resources) -> Vec<GrpcInterceptor> {
        Vec::new()
    }

    /// gRPC 服务端连接参数，如并发流上限与 HTTP/2 keepalive
    fn server_options(&self, _config: &C) -> GrpcServerOptions {
        GrpcServerOptions::default()
    }

    async fn setup_grpc(
        &self,
        routes: &mut RoutesBuilder,
        config: &C,
        rsc: &Arc<Resources>,
    ) -> AppResult<()>;
}

#[async_trait]
pub trait HttpService<C: ServiceConfig>: Send + Sync + 'static {
    async fn setup_http(&self, router: Router, config: &C, rsc: &Arc<Resources>) -> AppResult<Router>;
}

#[async_trait]
pub trait NatsService<C: ServiceConfig>: Send + Sync + 'static {
    async fn register_subscriptions(&self, config: &C, rsc: &Arc<Resources>) -> AppResult<()>;
}

#[async_trait]
pub trait KafkaService<C: ServiceConfig>: Send + Sync + 'static {
    async fn register_consumers(&self, config: &C, rsc: &Arc<Resources>) -> AppResult<()>;
}

pub trait MonitorService<C: ServiceConfig>: Send + Sync + 'static {
    fn init_metrics(&self, config: &C, rsc: &Resources) -> AppResult<()>;
}

/// 只注册平台请求指标
pub struct DefaultMonitor;

impl<C: ServiceConfig> MonitorService<C> for DefaultMonitor {
    fn init_metrics(&self, _config: &C, _rsc: &Resources) -> AppResult<()> {
        campus_telemetry::describe_request_metrics();
        Ok(())
    }
}

/// 服务及其声明的能力
///
/// ```ignore
/// let server = Arc::new(LessonServer::default());
/// let descriptor = ServiceDescriptor::new(server.clone())
///     .with_grpc(server.clone())
///     .with_http(server)
///     .with_monitor(Arc::new(DefaultMonitor));
/// ```
pub struct ServiceDescriptor<C: ServiceConfig> {
    pub(crate) base: Arc<dyn BaseService<C>>,
    pub(crate) grpc: Option<Arc<dyn GrpcService<C>>>,
    pub(crate) http: Option<Arc<dyn HttpService<C>>>,
    pub(crate) nats: Option<Arc<dyn NatsService<C>>>,
    pub(crate) kafka: Option<Arc<dyn KafkaService<C>>>,
    pub(crate) monitor: Option<Arc<dyn MonitorService<C>>>,
}

impl<C: ServiceConfig> Clone for ServiceDescriptor<C> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            grpc: self.grpc.clone(),
            http: self.http.clone(),
            nats: self.nats.clone(),
            kafka: self.kafka.clone(),
            monitor: self.monitor.clone(),
        }
    }
}

impl<C: ServiceConfig> ServiceDescriptor<C> {
    pub fn new(base: Arc<dyn BaseService<C>>) -> Self {
        Self {
            base,
            grpc: None,
            http: None,
            nats: None,
            kafka: None,
            monitor: None,
        }
    }

    pub fn with_grpc(mut self, grpc: Arc<dyn GrpcService<C>>) -> Self {
        self.grpc = Some(grpc);
        self
    }

    pub fn with_http(mut self, http: Arc<dyn HttpService<C>>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_nats(mut self, nats: Arc<dyn NatsService<C>>) -> Self {
        self.nats = Some(nats);
        self
    }

    pub fn with_kafka(mut self, kafka: Arc<dyn KafkaService<C>>) -> Self {
        self.kafka = Some(kafka);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn MonitorService<C>>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn name(&self) -> &str {
        self.base.server_name()
    }
}

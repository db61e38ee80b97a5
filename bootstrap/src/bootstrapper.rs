//! 启动器
//!
//! 服务：加载配置 → 初始化资源 → 组装服务端 → 监听 → 关闭。
//! 任务：加载配置 → 初始化资源 → 执行任务函数 → 清理。

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use campus_config::{
    COMMON_SECTION, CommonConfig, ConfigPaths, SecretsDecryptor, SopsCli, extract,
};
use campus_errors::{AppError, AppResult};
use campus_telemetry::{METRICS_PORT, install_prometheus, record_job_run, spawn_metrics_server};
use futures::future::BoxFuture;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tonic::service::RoutesBuilder;
use tracing::{error, info, warn};

use crate::command::JobArgs;
use crate::connector::Connectors;
use crate::grpc::{GrpcPlan, InterceptorChain, serve_grpc};
use crate::http::{HttpPlan, serve_http, with_platform_layers};
use crate::initializer::init_resources;
use crate::registry::{Protocol, ServiceRegistry};
use crate::resources::Resources;
use crate::runtime::cancel_on_signal;
use crate::servicer::{ServiceConfig, ServiceDescriptor};

/// 批处理任务函数
pub type JobFn<C> = Arc<
    dyn Fn(CancellationToken, C, Arc<Resources>, JobArgs) -> BoxFuture<'static, AppResult<()>>
        + Send
        + Sync,
>;

/// 把异步闭包包装为 `JobFn`
pub fn job_fn<C, F, Fut>(job: F) -> JobFn<C>
where
    F: Fn(CancellationToken, C, Arc<Resources>, JobArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    Arc::new(
        move |token: CancellationToken, config: C, rsc: Arc<Resources>, args: JobArgs| -> BoxFuture<'static, AppResult<()>> {
            Box::pin(job(token, config, rsc, args))
        },
    )
}

/// 启动阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Init,
    ConfigLoaded,
    ResourcesInitialized,
    ServerInitialized,
    Serving,
    JobExecuting,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapState::Init => "init",
            BootstrapState::ConfigLoaded => "config_loaded",
            BootstrapState::ResourcesInitialized => "resources_initialized",
            BootstrapState::ServerInitialized => "server_initialized",
            BootstrapState::Serving => "serving",
            BootstrapState::JobExecuting => "job_executing",
            BootstrapState::ShuttingDown => "shutting_down",
            BootstrapState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// 性能剖析器
///
/// 启动失败只记录日志，不影响服务启动。
pub trait Profiler: Send + Sync {
    fn start(&self, service: &str, common: &CommonConfig) -> AppResult<()>;
}

/// 不连接任何后端，仅记录剖析配置
pub struct LogProfiler;

impl Profiler for LogProfiler {
    fn start(&self, service: &str, common: &CommonConfig) -> AppResult<()> {
        if common.profiler.enabled {
            info!(
                service = %service,
                project_id = %common.profiler.project_id,
                version = %common.image_tag,
                "Profiler enabled without a backend"
            );
        }
        Ok(())
    }
}

/// 启动器的可替换部件
#[derive(Clone)]
pub struct BootstrapOptions {
    pub decryptor: Arc<dyn SecretsDecryptor>,
    pub profiler: Arc<dyn Profiler>,
    pub connectors: Connectors,
    pub registry: ServiceRegistry,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            decryptor: Arc::new(SopsCli::default()),
            profiler: Arc::new(LogProfiler),
            connectors: Connectors::default(),
            registry: ServiceRegistry::builtin(),
        }
    }
}

/// 组装完成、等待监听的服务端
pub struct ServerPlan {
    pub grpc: Option<GrpcPlan>,
    pub http: Option<HttpPlan>,
    pub(crate) metrics: Option<PrometheusHandle>,
}

fn listen_addr(registry: &ServiceRegistry, service: &str, protocol: Protocol) -> AppResult<SocketAddr> {
    let port = registry.port(service, protocol)?;
    format!("0.0.0.0{}", port)
        .parse()
        .map_err(|e| AppError::config(format!("invalid {} port {} of {}: {}", protocol, port, service, e)))
}

async fn bind(addr: SocketAddr) -> AppResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::listener(format!("bind {}: {}", addr, e)))
}

fn common_of<C: ServiceConfig>(config: &C) -> AppResult<CommonConfig> {
    extract(config, COMMON_SECTION).map_err(|e| AppError::config(e.to_string()))
}

/// 启动器
pub struct Bootstrapper<C> {
    options: BootstrapOptions,
    state: BootstrapState,
    _config: PhantomData<fn() -> C>,
}

impl<C: ServiceConfig> Bootstrapper<C> {
    pub fn new(options: BootstrapOptions) -> Self {
        Self {
            options,
            state: BootstrapState::Init,
            _config: PhantomData,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    fn transition(&mut self, next: BootstrapState) {
        info!(from = %self.state, to = %next, "Bootstrap state changed");
        self.state = next;
    }

    /// 运行长驻服务直到收到关闭信号或监听器出错
    pub async fn run(&mut self, service: &ServiceDescriptor<C>, paths: &ConfigPaths) -> AppResult<()> {
        let config = self.load_config(paths)?;
        let rsc = Arc::new(self.init_resources(service.name(), &config)?);

        let plan = match self.init_server(service, &config, &rsc).await {
            Ok(plan) => plan,
            Err(e) => {
                error!(service = %service.name(), error = %e, "Failed to initialize server");
                if let Err(cleanup) = rsc.cleanup().await {
                    error!(error = %cleanup, "Resource cleanup failed");
                }
                return Err(e);
            }
        };

        let token = CancellationToken::new();
        let signal = cancel_on_signal(token.clone());
        let result = self.serve(service, plan, rsc, token).await;
        signal.abort();
        result
    }

    /// 运行一次性任务
    pub async fn run_job(
        &mut self,
        name: &str,
        job: &JobFn<C>,
        paths: &ConfigPaths,
        args: JobArgs,
    ) -> AppResult<()> {
        let config = self.load_config(paths)?;
        let common = common_of(&config)?;
        let rsc = Arc::new(self.init_resources(&common.name, &config)?);

        self.transition(BootstrapState::JobExecuting);
        let token = CancellationToken::new();
        let signal = cancel_on_signal(token.clone());

        info!(job = %name, "Job started");
        let result = job(token, config, rsc.clone(), args).await;
        signal.abort();

        record_job_run(name, result.is_ok());
        match &result {
            Ok(()) => info!(job = %name, "Job finished"),
            Err(e) => error!(job = %name, error = %e, "Job failed"),
        }

        self.transition(BootstrapState::ShuttingDown);
        if let Err(e) = rsc.cleanup().await {
            error!(error = %e, "Resource cleanup failed");
        }
        self.transition(BootstrapState::Terminated);
        result
    }

    pub fn load_config(&mut self, paths: &ConfigPaths) -> AppResult<C> {
        let config = campus_config::load_config(paths, self.options.decryptor.as_ref())
            .map_err(|e| AppError::config(e.to_string()))?;
        self.transition(BootstrapState::ConfigLoaded);
        Ok(config)
    }

    /// 执行全部初始化器并启动剖析器
    pub fn init_resources(&mut self, service_name: &str, config: &C) -> AppResult<Resources> {
        let mut rsc = Resources::new(service_name);
        rsc.with_registry(self.options.registry.clone())
            .with_connectors(self.options.connectors.clone());
        init_resources(config, &mut rsc)?;

        let common = rsc.common()?;
        if common.name != service_name {
            warn!(
                service = %service_name,
                configured = %common.name,
                "Service name differs from common.name"
            );
        }
        if let Err(e) = self.options.profiler.start(service_name, common) {
            warn!(error = %e, "Failed to start profiler");
        }

        self.transition(BootstrapState::ResourcesInitialized);
        Ok(rsc)
    }

    /// 调用服务钩子组装 gRPC / HTTP 服务端，并注册消息订阅
    ///
    /// `init_dependencies` 在此处调用且只调用一次。
    pub async fn init_server(
        &mut self,
        service: &ServiceDescriptor<C>,
        config: &C,
        rsc: &Arc<Resources>,
    ) -> AppResult<ServerPlan> {
        service.base.init_dependencies(config, rsc).await?;
        let common = rsc.common()?;

        let mut metrics = None;
        if let Some(monitor) = &service.monitor {
            monitor.init_metrics(config, rsc)?;
            if common.stats_enabled {
                metrics = Some(install_prometheus()?);
            }
        }

        let grpc = match &service.grpc {
            Some(hooks) => {
                let addr = listen_addr(rsc.registry(), service.name(), Protocol::Grpc)?;
                let mut interceptors = InterceptorChain::platform();
                interceptors.extend(hooks.interceptors(config, rsc));

                let mut routes = RoutesBuilder::default();
                hooks.setup_grpc(&mut routes, config, rsc).await?;

                Some(GrpcPlan {
                    addr,
                    routes: routes.routes(),
                    interceptors,
                    recover_panics: !common.is_local(),
                    timeout: common.grpc.handler_timeout_secs.map(Duration::from_secs),
                    options: hooks.server_options(config),
                })
            }
            None => None,
        };

        let http = match &service.http {
            Some(hooks) => {
                let addr = listen_addr(rsc.registry(), service.name(), Protocol::Http)?;
                let router = hooks.setup_http(Router::new(), config, rsc).await?;
                Some(HttpPlan {
                    addr,
                    router: with_platform_layers(router, service.name()),
                })
            }
            None => None,
        };

        if let Some(hooks) = &service.nats {
            hooks.register_subscriptions(config, rsc).await?;
        }
        if let Some(hooks) = &service.kafka {
            hooks.register_consumers(config, rsc).await?;
        }

        self.transition(BootstrapState::ServerInitialized);
        Ok(ServerPlan { grpc, http, metrics })
    }

    /// 监听直到 `shutdown` 被取消或任一监听器退出，然后依次执行
    /// 服务关闭钩子、停止监听器、资源清理、停止 metrics 端点
    ///
    /// 服务关闭钩子执行时监听器仍在接收请求。返回第一个监听器错误，
    /// 关闭阶段的错误只记录日志。
    pub async fn serve(
        &mut self,
        service: &ServiceDescriptor<C>,
        plan: ServerPlan,
        rsc: Arc<Resources>,
        shutdown: CancellationToken,
    ) -> AppResult<()> {
        let ServerPlan { grpc, http, metrics } = plan;

        let metrics_shutdown = CancellationToken::new();
        let metrics_task = metrics.map(|handle| {
            let addr = SocketAddr::from(([0, 0, 0, 0], METRICS_PORT));
            spawn_metrics_server(handle, addr, metrics_shutdown.clone())
        });

        let stop = CancellationToken::new();
        let result = match start_listeners(grpc, http, &stop).await {
            Ok(listeners) => self.supervise(service, listeners, &shutdown, &stop).await,
            Err(e) => {
                error!(error = %e, "Failed to start listeners");
                self.transition(BootstrapState::ShuttingDown);
                service.base.graceful_shutdown().await;
                Err(e)
            }
        };

        if let Err(e) = rsc.cleanup().await {
            error!(error = %e, "Resource cleanup failed");
        }
        metrics_shutdown.cancel();
        if let Some(task) = metrics_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Metrics server task failed");
            }
        }
        self.transition(BootstrapState::Terminated);
        result
    }

    /// 等待关闭信号或第一个监听器退出，调用服务关闭钩子后再停止全部监听器
    ///
    /// 监听器提前退出时取消 `shutdown`，让信号监听等其他观察者一起退出。
    async fn supervise(
        &mut self,
        service: &ServiceDescriptor<C>,
        mut listeners: JoinSet<AppResult<()>>,
        shutdown: &CancellationToken,
        stop: &CancellationToken,
    ) -> AppResult<()> {
        self.transition(BootstrapState::Serving);

        let mut first_error = None;
        tokio::select! {
            _ = shutdown.cancelled() => {}
            Some(joined) = listeners.join_next() => {
                if let Err(e) = listener_result(joined) {
                    first_error = Some(e);
                } else {
                    warn!("Listener stopped unexpectedly");
                }
                shutdown.cancel();
            }
        }

        self.transition(BootstrapState::ShuttingDown);
        service.base.graceful_shutdown().await;
        stop.cancel();

        while let Some(joined) = listeners.join_next().await {
            if let Err(e) = listener_result(joined) {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// 先绑定全部端口，任何一个失败都不开始服务
async fn start_listeners(
    grpc: Option<GrpcPlan>,
    http: Option<HttpPlan>,
    stop: &CancellationToken,
) -> AppResult<JoinSet<AppResult<()>>> {
    let http = match http {
        Some(plan) => Some((bind(plan.addr).await?, plan)),
        None => None,
    };
    let grpc = match grpc {
        Some(plan) => Some((bind(plan.addr).await?, plan)),
        None => None,
    };

    let mut listeners = JoinSet::new();
    if let Some((listener, plan)) = http {
        listeners.spawn(serve_http(listener, plan, stop.clone()));
    }
    if let Some((listener, plan)) = grpc {
        listeners.spawn(serve_grpc(listener, plan, stop.clone()));
    }
    Ok(listeners)
}

fn listener_result(joined: Result<AppResult<()>, JoinError>) -> AppResult<()> {
    let result = joined.unwrap_or_else(|e| Err(AppError::listener(format!("listener task: {}", e))));
    if let Err(e) = &result {
        error!(error = %e, "Listener stopped with error");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::GrpcServerOptions;
    use crate::registry::ListenerConfig;
    use crate::servicer::{BaseService, GrpcService, HttpService, NatsService};
    use async_trait::async_trait;
    use axum::routing::get;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::NamedTempFile;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct EchoConfig {
        common: CommonConfig,
    }

    fn echo_config(environment: &str) -> EchoConfig {
        serde_json::from_value(json!({
            "common": { "name": "echo", "environment": environment },
        }))
        .unwrap()
    }

    #[derive(Default)]
    struct EchoServer {
        init_calls: AtomicUsize,
        shutdown_calls: AtomicUsize,
        grpc_calls: AtomicUsize,
        http_calls: AtomicUsize,
        nats_calls: AtomicUsize,
    }

    #[async_trait]
    impl BaseService<EchoConfig> for EchoServer {
        fn server_name(&self) -> &str {
            "echo"
        }

        async fn init_dependencies(&self, _config: &EchoConfig, _rsc: &Arc<Resources>) -> AppResult<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn graceful_shutdown(&self) {
            self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl GrpcService<EchoConfig> for EchoServer {
        fn server_options(&self, _config: &EchoConfig) -> GrpcServerOptions {
            GrpcServerOptions::default()
                .with_max_concurrent_streams(64)
                .with_keepalive(Duration::from_secs(30), Duration::from_secs(10))
        }

        async fn setup_grpc(
            &self,
            _routes: &mut RoutesBuilder,
            _config: &EchoConfig,
            _rsc: &Arc<Resources>,
        ) -> AppResult<()> {
            self.grpc_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl HttpService<EchoConfig> for EchoServer {
        async fn setup_http(
            &self,
            router: Router,
            _config: &EchoConfig,
            _rsc: &Arc<Resources>,
        ) -> AppResult<Router> {
            self.http_calls.fetch_add(1, Ordering::SeqCst);
            Ok(router.route("/healthz", get(|| async { "ok" })))
        }
    }

    #[async_trait]
    impl NatsService<EchoConfig> for EchoServer {
        async fn register_subscriptions(&self, _config: &EchoConfig, _rsc: &Arc<Resources>) -> AppResult<()> {
            self.nats_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn options(registry: ServiceRegistry) -> BootstrapOptions {
        BootstrapOptions {
            registry,
            ..Default::default()
        }
    }

    fn ephemeral_registry() -> ServiceRegistry {
        ServiceRegistry::new().with("echo", ListenerConfig::new().grpc(":0").http(":0"))
    }

    #[tokio::test]
    async fn test_base_only_service_has_no_listeners() {
        let server = Arc::new(EchoServer::default());
        let descriptor = ServiceDescriptor::new(server.clone());
        let config = echo_config("local");

        let mut bootstrapper = Bootstrapper::new(options(ephemeral_registry()));
        let rsc = Arc::new(bootstrapper.init_resources("echo", &config).unwrap());
        let plan = bootstrapper.init_server(&descriptor, &config, &rsc).await.unwrap();

        assert!(plan.grpc.is_none());
        assert!(plan.http.is_none());
        assert_eq!(server.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(server.grpc_calls.load(Ordering::SeqCst), 0);
        assert_eq!(server.http_calls.load(Ordering::SeqCst), 0);
        assert_eq!(server.nats_calls.load(Ordering::SeqCst), 0);
        assert_eq!(bootstrapper.state(), BootstrapState::ServerInitialized);
    }

    #[tokio::test]
    async fn test_declared_hooks_are_called_once() {
        let server = Arc::new(EchoServer::default());
        let descriptor = ServiceDescriptor::new(server.clone())
            .with_grpc(server.clone())
            .with_http(server.clone())
            .with_nats(server.clone());
        let config = echo_config("stag");

        let mut bootstrapper = Bootstrapper::new(options(ephemeral_registry()));
        let rsc = Arc::new(bootstrapper.init_resources("echo", &config).unwrap());
        let plan = bootstrapper.init_server(&descriptor, &config, &rsc).await.unwrap();

        let grpc = plan.grpc.as_ref().unwrap();
        assert!(grpc.recovers_panics());
        assert_eq!(grpc.interceptor_count(), 1);
        assert_eq!(grpc.server_options().max_concurrent_streams, Some(64));
        assert!(plan.http.is_some());
        assert_eq!(server.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(server.grpc_calls.load(Ordering::SeqCst), 1);
        assert_eq!(server.http_calls.load(Ordering::SeqCst), 1);
        assert_eq!(server.nats_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_grpc_does_not_recover_panics() {
        let server = Arc::new(EchoServer::default());
        let descriptor = ServiceDescriptor::new(server.clone()).with_grpc(server.clone());
        let config = echo_config("local");

        let mut bootstrapper = Bootstrapper::new(options(ephemeral_registry()));
        let rsc = Arc::new(bootstrapper.init_resources("echo", &config).unwrap());
        let plan = bootstrapper.init_server(&descriptor, &config, &rsc).await.unwrap();
        assert!(!plan.grpc.unwrap().recovers_panics());
    }

    #[tokio::test]
    async fn test_unregistered_service_cannot_listen() {
        let server = Arc::new(EchoServer::default());
        let descriptor = ServiceDescriptor::new(server.clone()).with_grpc(server.clone());
        let config = echo_config("local");

        let mut bootstrapper = Bootstrapper::new(options(ServiceRegistry::new()));
        let rsc = Arc::new(bootstrapper.init_resources("echo", &config).unwrap());
        let err = bootstrapper.init_server(&descriptor, &config, &rsc).await.err().unwrap();
        assert!(err.to_string().contains("echo is not registered"));
    }

    #[tokio::test]
    async fn test_cancel_stops_both_listeners() {
        let server = Arc::new(EchoServer::default());
        let descriptor = ServiceDescriptor::new(server.clone())
            .with_grpc(server.clone())
            .with_http(server.clone());
        let config = echo_config("stag");

        let mut bootstrapper = Bootstrapper::new(options(ephemeral_registry()));
        let rsc = Arc::new(bootstrapper.init_resources("echo", &config).unwrap());
        let plan = bootstrapper.init_server(&descriptor, &config, &rsc).await.unwrap();

        let token = CancellationToken::new();
        let serving = {
            let token = token.clone();
            tokio::spawn(async move {
                let result = bootstrapper.serve(&descriptor, plan, rsc, token).await;
                (bootstrapper, result)
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let (bootstrapper, result) = tokio::time::timeout(Duration::from_secs(10), serving)
            .await
            .expect("listeners did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(bootstrapper.state(), BootstrapState::Terminated);
        assert_eq!(server.shutdown_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bind_failure_aborts_serving() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let registry = ServiceRegistry::new().with(
            "echo",
            ListenerConfig::new().http(format!(":{}", port)),
        );

        let server = Arc::new(EchoServer::default());
        let descriptor = ServiceDescriptor::new(server.clone()).with_http(server.clone());
        let config = echo_config("local");

        let mut bootstrapper = Bootstrapper::new(options(registry));
        let rsc = Arc::new(bootstrapper.init_resources("echo", &config).unwrap());
        let mut plan = bootstrapper.init_server(&descriptor, &config, &rsc).await.unwrap();
        plan.http.as_mut().unwrap().addr = taken.local_addr().unwrap();

        let result = bootstrapper
            .serve(&descriptor, plan, rsc, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AppError::Listener(_))));
        assert_eq!(server.shutdown_calls.load(Ordering::SeqCst), 1);
    }

    /// 在关闭钩子里访问自己的 HTTP 端口，记录当时是否还能得到响应
    struct ShutdownWitness {
        port: u16,
        served_during_shutdown: AtomicBool,
    }

    #[async_trait]
    impl BaseService<EchoConfig> for ShutdownWitness {
        fn server_name(&self) -> &str {
            "echo"
        }

        async fn init_dependencies(&self, _config: &EchoConfig, _rsc: &Arc<Resources>) -> AppResult<()> {
            Ok(())
        }

        async fn graceful_shutdown(&self) {
            let served = healthz(self.port).await;
            self.served_during_shutdown.store(served, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HttpService<EchoConfig> for ShutdownWitness {
        async fn setup_http(
            &self,
            router: Router,
            _config: &EchoConfig,
            _rsc: &Arc<Resources>,
        ) -> AppResult<Router> {
            Ok(router.route("/healthz", get(|| async { "ok" })))
        }
    }

    async fn healthz(port: u16) -> bool {
        let Ok(mut stream) = tokio::net::TcpStream::connect(("127.0.0.1", port)).await else {
            return false;
        };
        let request = b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        if stream.write_all(request).await.is_err() {
            return false;
        }
        let mut response = String::new();
        stream.read_to_string(&mut response).await.is_ok() && response.starts_with("HTTP/1.1 200")
    }

    #[tokio::test]
    async fn test_graceful_shutdown_runs_before_listeners_stop() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let registry = ServiceRegistry::new().with("echo", ListenerConfig::new().http(format!(":{}", port)));

        let server = Arc::new(ShutdownWitness {
            port,
            served_during_shutdown: AtomicBool::new(false),
        });
        let descriptor = ServiceDescriptor::new(server.clone()).with_http(server.clone());
        let config = echo_config("stag");

        let mut bootstrapper = Bootstrapper::new(options(registry));
        let rsc = Arc::new(bootstrapper.init_resources("echo", &config).unwrap());
        let plan = bootstrapper.init_server(&descriptor, &config, &rsc).await.unwrap();

        let token = CancellationToken::new();
        let serving = {
            let token = token.clone();
            tokio::spawn(async move { bootstrapper.serve(&descriptor, plan, rsc, token).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(healthz(port).await);
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), serving)
            .await
            .expect("listeners did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert!(server.served_during_shutdown.load(Ordering::SeqCst));
        assert!(!healthz(port).await);
    }

    #[tokio::test]
    async fn test_listener_failure_stops_sibling_and_signal_watcher() {
        let server = Arc::new(EchoServer::default());
        let descriptor = ServiceDescriptor::new(server.clone()).with_grpc(server.clone());
        let config = echo_config("stag");

        let mut bootstrapper = Bootstrapper::new(options(ephemeral_registry()));
        let rsc = Arc::new(bootstrapper.init_resources("echo", &config).unwrap());
        let plan = bootstrapper.init_server(&descriptor, &config, &rsc).await.unwrap();

        let stop = CancellationToken::new();
        let mut listeners = start_listeners(plan.grpc, None, &stop).await.unwrap();
        listeners.spawn(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(AppError::listener("HTTP server: connection reset"))
        });

        let shutdown = CancellationToken::new();
        let watcher = cancel_on_signal(shutdown.clone());

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            bootstrapper.supervise(&descriptor, listeners, &shutdown, &stop),
        )
        .await
        .expect("gRPC listener did not stop");

        assert!(matches!(&result, Err(AppError::Listener(msg)) if msg.contains("connection reset")));
        assert!(shutdown.is_cancelled());
        assert!(stop.is_cancelled());
        assert_eq!(server.shutdown_calls.load(Ordering::SeqCst), 1);
        assert_eq!(bootstrapper.state(), BootstrapState::ShuttingDown);
        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("signal watcher still running")
            .unwrap();
    }

    fn yaml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_run_job_passes_config_and_args() {
        let common = yaml_file("common:\n  name: echo\n  environment: local\n");
        let service = yaml_file("storage:\n  endpoint: http://minio:9000\n  bucket: echo\n");
        let secrets = yaml_file("{}\n");
        let paths = ConfigPaths::new(common.path(), service.path(), secrets.path());

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let job = job_fn(move |_token, config: EchoConfig, rsc, args| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                assert_eq!(config.common.name, "echo");
                assert_eq!(rsc.storage()?.bucket, "echo");
                assert_eq!(args.string("school"), Some("manabie"));
                Ok(())
            }
        });

        let args = JobArgs::default().with_string("school", "manabie");
        let mut bootstrapper = Bootstrapper::<EchoConfig>::new(BootstrapOptions::default());
        bootstrapper.run_job("sync_school", &job, &paths, args).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bootstrapper.state(), BootstrapState::Terminated);
    }

    #[tokio::test]
    async fn test_run_job_returns_job_error() {
        let common = yaml_file("common:\n  name: echo\n  environment: local\n");
        let service = yaml_file("{}\n");
        let secrets = yaml_file("{}\n");
        let paths = ConfigPaths::new(common.path(), service.path(), secrets.path());

        let job = job_fn(|_token, _config: EchoConfig, rsc, _args| async move {
            rsc.db().await?;
            Ok(())
        });

        let mut bootstrapper = Bootstrapper::<EchoConfig>::new(BootstrapOptions::default());
        let err = bootstrapper
            .run_job("migrate", &job, &paths, JobArgs::default())
            .await
            .unwrap_err();
        assert!(err.is_not_configured());
        assert_eq!(bootstrapper.state(), BootstrapState::Terminated);
    }

    #[tokio::test]
    async fn test_missing_common_section_stops_before_serving() {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct NoCommon {
            #[serde(default)]
            name: String,
        }

        let mut bootstrapper = Bootstrapper::<NoCommon>::new(BootstrapOptions::default());
        let err = bootstrapper
            .init_resources("echo", &NoCommon { name: "echo".into() })
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Config(_)));
        assert_eq!(bootstrapper.state(), BootstrapState::Init);
    }
}

//! gRPC 服务端组装
//!
//! 中间件从外到内：panic 恢复（非本地环境）→ tracing → 拦截器链 → 路由。

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use campus_errors::{AppError, AppResult};
use http::HeaderValue;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::body::Body;
use tonic::metadata::MetadataValue;
use tonic::service::{Interceptor, InterceptorLayer, Routes};
use tonic::transport::Server;
use tonic::{Request, Status};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::map_response_body::MapResponseBodyLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::runtime::drain_deadline;

/// 请求 ID 元数据键
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// 同步拦截器
pub type GrpcInterceptor =
    Arc<dyn Fn(Request<()>) -> Result<Request<()>, Status> + Send + Sync + 'static>;

/// 按顺序执行的拦截器链，任一拦截器返回错误即终止请求
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<GrpcInterceptor>,
}

impl InterceptorChain {
    /// 以平台拦截器开头的链
    pub fn platform() -> Self {
        Self {
            interceptors: vec![Arc::new(request_id_interceptor)],
        }
    }

    pub fn push(&mut self, interceptor: GrpcInterceptor) {
        self.interceptors.push(interceptor);
    }

    pub fn extend(&mut self, interceptors: impl IntoIterator<Item = GrpcInterceptor>) {
        self.interceptors.extend(interceptors);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl Interceptor for InterceptorChain {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        for interceptor in &self.interceptors {
            request = interceptor(request)?;
        }
        Ok(request)
    }
}

/// 请求缺少 `x-request-id` 时生成一个
#[allow(clippy::result_large_err)]
pub fn request_id_interceptor(mut request: Request<()>) -> Result<Request<()>, Status> {
    if request.metadata().get(REQUEST_ID_KEY).is_none() {
        let id = uuid::Uuid::new_v4().to_string();
        let value = MetadataValue::try_from(id.as_str())
            .map_err(|_| Status::internal("Invalid request id"))?;
        request.metadata_mut().insert(REQUEST_ID_KEY, value);
    }
    Ok(request)
}

/// gRPC 服务端连接参数，未设置的项沿用 tonic 默认值
///
/// 消息大小上限属于具体服务，在 `setup_grpc` 中通过生成代码的
/// `max_decoding_message_size` / `max_encoding_message_size` 设置。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrpcServerOptions {
    pub concurrency_limit_per_connection: Option<usize>,
    pub max_concurrent_streams: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub initial_stream_window_size: Option<u32>,
    pub initial_connection_window_size: Option<u32>,
    pub http2_keepalive_interval: Option<Duration>,
    pub http2_keepalive_timeout: Option<Duration>,
}

impl GrpcServerOptions {
    pub fn with_max_concurrent_streams(mut self, max: u32) -> Self {
        self.max_concurrent_streams = Some(max);
        self
    }

    pub fn with_keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.http2_keepalive_interval = Some(interval);
        self.http2_keepalive_timeout = Some(timeout);
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit_per_connection = Some(limit);
        self
    }

    fn apply(&self, mut server: Server) -> Server {
        if let Some(limit) = self.concurrency_limit_per_connection {
            server = server.concurrency_limit_per_connection(limit);
        }
        server
            .max_concurrent_streams(self.max_concurrent_streams)
            .max_frame_size(self.max_frame_size)
            .initial_stream_window_size(self.initial_stream_window_size)
            .initial_connection_window_size(self.initial_connection_window_size)
            .http2_keepalive_interval(self.http2_keepalive_interval)
            .http2_keepalive_timeout(self.http2_keepalive_timeout)
    }
}

/// 已组装好、尚未监听的 gRPC 服务
pub struct GrpcPlan {
    pub addr: SocketAddr,
    pub(crate) routes: Routes,
    pub(crate) interceptors: InterceptorChain,
    pub(crate) recover_panics: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) options: GrpcServerOptions,
}

impl GrpcPlan {
    pub fn interceptor_count(&self) -> usize {
        self.interceptors.len()
    }

    pub fn recovers_panics(&self) -> bool {
        self.recover_panics
    }

    pub fn server_options(&self) -> &GrpcServerOptions {
        &self.options
    }
}

/// handler panic 时返回的 gRPC INTERNAL 响应
fn grpc_panic_response(err: Box<dyn Any + Send + 'static>) -> http::Response<String> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "gRPC handler panicked");

    let mut response = http::Response::new(String::new());
    let headers = response.headers_mut();
    headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    headers.insert("grpc-status", HeaderValue::from_static("13"));
    headers.insert("grpc-message", HeaderValue::from_static("internal%20error"));
    response
}

/// 在已绑定的监听器上运行 gRPC 服务，直到取消后排空或超过宽限期
pub(crate) async fn serve_grpc(
    listener: TcpListener,
    plan: GrpcPlan,
    shutdown: CancellationToken,
) -> AppResult<()> {
    let recovery = plan.recover_panics.then(|| {
        ServiceBuilder::new()
            .layer(MapResponseBodyLayer::new(Body::new))
            .layer(CatchPanicLayer::custom(grpc_panic_response))
    });
    let layer = ServiceBuilder::new()
        .option_layer(recovery)
        .layer(MapResponseBodyLayer::new(Body::new))
        .layer(TraceLayer::new_for_grpc())
        .layer(InterceptorLayer::new(plan.interceptors));

    let mut builder = plan.options.apply(Server::builder());
    if let Some(timeout) = plan.timeout {
        builder = builder.timeout(timeout);
    }
    let mut server = builder.layer(layer);
    let router = server.add_routes(plan.routes);

    info!(addr = %plan.addr, "gRPC server listening");
    let incoming = TcpListenerStream::new(listener);
    let serve = router.serve_with_incoming_shutdown(incoming, shutdown.clone().cancelled_owned());

    tokio::select! {
        result = serve => result.map_err(|e| AppError::listener(format!("gRPC server: {}", e))),
        _ = drain_deadline(&shutdown) => {
            warn!("gRPC server did not drain in time");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_is_generated() {
        let request = request_id_interceptor(Request::new(())).unwrap();
        let id = request.metadata().get(REQUEST_ID_KEY).unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn test_existing_request_id_is_kept() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(REQUEST_ID_KEY, MetadataValue::from_static("req-1"));

        let request = request_id_interceptor(request).unwrap();
        assert_eq!(request.metadata().get(REQUEST_ID_KEY).unwrap(), "req-1");
    }

    #[test]
    fn test_chain_stops_at_first_rejection() {
        let mut chain = InterceptorChain::platform();
        chain.push(Arc::new(|_: Request<()>| -> Result<Request<()>, Status> {
            Err(Status::unauthenticated("missing token"))
        }));
        chain.push(Arc::new(|_: Request<()>| -> Result<Request<()>, Status> {
            panic!("must not run")
        }));

        let status = chain.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn test_chain_runs_in_order() {
        let mut chain = InterceptorChain::default();
        chain.push(Arc::new(|mut req: Request<()>| -> Result<Request<()>, Status> {
            req.metadata_mut().insert("x-step", MetadataValue::from_static("first"));
            Ok(req)
        }));
        chain.push(Arc::new(|req: Request<()>| -> Result<Request<()>, Status> {
            assert_eq!(req.metadata().get("x-step").unwrap(), "first");
            Ok(req)
        }));

        assert!(chain.call(Request::new(())).is_ok());
    }

    #[test]
    fn test_server_options_builders() {
        let options = GrpcServerOptions::default()
            .with_max_concurrent_streams(128)
            .with_keepalive(Duration::from_secs(30), Duration::from_secs(10))
            .with_concurrency_limit(64);

        assert_eq!(options.max_concurrent_streams, Some(128));
        assert_eq!(options.http2_keepalive_interval, Some(Duration::from_secs(30)));
        assert_eq!(options.http2_keepalive_timeout, Some(Duration::from_secs(10)));
        assert_eq!(options.concurrency_limit_per_connection, Some(64));
        assert_eq!(options.max_frame_size, None);
    }

    #[test]
    fn test_panic_response_is_grpc_internal() {
        let response = grpc_panic_response(Box::new("boom"));
        assert_eq!(response.headers()["grpc-status"], "13");
        assert_eq!(response.headers()["content-type"], "application/grpc");
    }
}

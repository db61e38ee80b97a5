//! HTTP 服务端组装

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{MatchedPath, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use campus_errors::{AppError, AppResult};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::runtime::drain_deadline;

/// 已组装好、尚未监听的 HTTP 服务
pub struct HttpPlan {
    pub addr: SocketAddr,
    pub(crate) router: Router,
}

/// 给服务路由加上平台中间件
pub(crate) fn with_platform_layers(router: Router, service: &str) -> Router {
    let service: Arc<str> = Arc::from(service);
    router
        .layer(middleware::from_fn_with_state(service, record_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}

async fn record_metrics(State(service): State<Arc<str>>, request: Request, next: Next) -> Response {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    campus_telemetry::record_http_request(
        &service,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64() * 1000.0,
    );
    response
}

/// 在已绑定的监听器上运行 HTTP 服务，直到取消后排空或超过宽限期
pub(crate) async fn serve_http(
    listener: TcpListener,
    plan: HttpPlan,
    shutdown: CancellationToken,
) -> AppResult<()> {
    info!(addr = %plan.addr, "HTTP server listening");
    let serve = axum::serve(listener, plan.router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();

    tokio::select! {
        result = serve => result.map_err(|e| AppError::listener(format!("HTTP server: {}", e))),
        _ = drain_deadline(&shutdown) => {
            warn!("HTTP server did not drain in time");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_platform_router_serves_and_stops() {
        let router = with_platform_layers(Router::new().route("/healthz", get(|| async { "ok" })), "bob");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();

        let server = tokio::spawn(serve_http(listener, HttpPlan { addr, router }, token.clone()));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        assert!(body.starts_with("HTTP/1.1 200"));
        assert!(body.ends_with("ok"));

        token.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}

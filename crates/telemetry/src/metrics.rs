//! Metrics 模块
//!
//! 提供 Prometheus metrics 导出

use std::net::SocketAddr;

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use campus_errors::{AppError, AppResult};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// metrics 端点默认端口
pub const METRICS_PORT: u16 = 8888;

/// 安装全局 Prometheus 记录器
pub fn install_prometheus() -> AppResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::internal(format!("Failed to install Prometheus recorder: {}", e)))
}

/// 在后台任务中暴露 `/metrics`
///
/// 绑定失败只记录日志，不影响服务本身。
pub fn spawn_metrics_server(
    handle: PrometheusHandle,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(handle);

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, error = %e, "Failed to bind metrics server");
                return;
            }
        };

        info!(%addr, "Metrics server starting");
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            error!(error = %e, "Metrics server error");
        }
    })
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        handle.render(),
    )
}

/// 注册平台请求指标的描述
pub fn describe_request_metrics() {
    describe_counter!("http_requests_total", "Total HTTP requests handled");
    describe_histogram!("http_request_duration_ms", "HTTP request latency in milliseconds");
    describe_counter!("job_runs_total", "Total batch job executions");
}

/// 记录 HTTP 请求
pub fn record_http_request(service: &str, path: &str, status: u16, duration_ms: f64) {
    let labels = [
        ("service", service.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_ms", &labels).record(duration_ms);
}

/// 记录批处理任务结果
pub fn record_job_run(job: &str, success: bool) {
    let labels = [("job", job.to_string()), ("success", success.to_string())];
    counter!("job_runs_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_stops_on_cancel() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let token = CancellationToken::new();

        let task = spawn_metrics_server(handle, "127.0.0.1:0".parse().unwrap(), token.clone());
        token.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("metrics server did not stop")
            .unwrap();
    }
}

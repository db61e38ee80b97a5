//! 进程信号与关闭宽限期

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 取消后监听器排空在途请求的最长时间
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// 等待 SIGINT 或 SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

/// 收到信号后取消 token
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => token.cancel(),
            _ = token.cancelled() => {},
        }
    })
}

/// 取消后再等待一个宽限期
pub(crate) async fn drain_deadline(token: &CancellationToken) {
    token.cancelled().await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;
}

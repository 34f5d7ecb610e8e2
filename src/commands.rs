pub mod enqueue;
pub mod scheduler;
pub mod serve;
pub mod status;

use tokio::signal;
use tracing::info;

/// Resolves when SIGINT or SIGTERM arrives. Every long-running command
/// shares this so operators get a clean exit code 0 on both.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

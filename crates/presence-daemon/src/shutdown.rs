//! Termination signal handling.

use tracing::{error, info, warn};

/// Resolves once the process receives SIGINT or SIGTERM (Ctrl+C elsewhere).
///
/// If the Unix handlers cannot be installed this falls back to Ctrl+C. If
/// that fails too the future never resolves and the daemon runs until killed.
pub async fn signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {
                        info!("Received SIGINT, initiating shutdown...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating shutdown...");
                    }
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Cannot install Unix signal handlers; falling back to Ctrl+C");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, initiating shutdown...");
}

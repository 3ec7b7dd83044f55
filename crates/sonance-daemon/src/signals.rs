//! Signal handling for graceful shutdown.

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `shutdown` on the first SIGTERM or SIGINT.
///
/// # Errors
/// Returns an error if the SIGTERM handler cannot be installed.
pub fn setup_signal_handlers(shutdown: CancellationToken) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => info!("Received SIGTERM"),
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received SIGINT"),
                Err(e) => {
                    warn!(error = %e, "SIGINT handler failed, waiting for SIGTERM");
                    terminate.recv().await;
                    info!("Received SIGTERM");
                }
            },
        }
        shutdown.cancel();
    });

    Ok(())
}

use anyhow::{Context as _, Result};

#[tokio::main]
async fn main() -> Result<()> {
    common::logging::init();

    let config = commitments::config::load().context("failed to load config")?;
    let cycles = commitments::run(config, shutdown_signal()).await?;

    tracing::info!(cycles, "commitments poller stopped");
    Ok(())
}

/// Completes on SIGINT or SIGTERM. Never completes if the handlers cannot be installed.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(err), _) | (_, Err(err)) => {
                    tracing::error!(error = %err, "failed to install signal handlers");
                    return std::future::pending().await;
                }
            };
        tokio::select! {
            _ = sigint.recv() => tracing::info!(signal = "SIGINT", "shutdown signal"),
            _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "shutdown signal"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            return std::future::pending().await;
        }
        tracing::info!("shutdown signal");
    }
}

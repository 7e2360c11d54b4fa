use tokio::signal;
use tokio::sync::watch;

use arena_queue::config::{Config, QueueBackend};
use arena_queue::state::AppState;
use arena_queue::worker::Sweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arena_queue=info,arena_sweeper=info".into()),
        )
        .init();

    tracing::info!("Starting Arena queue sweeper...");

    // Load configuration
    let config = Config::from_env()?;
    if config.backend != QueueBackend::Redis {
        anyhow::bail!("arena-sweeper requires ARENA_QUEUE_BACKEND=redis");
    }
    let sweep_interval = config.sweep_interval;

    // Initialize application state
    tracing::info!("Connecting to Redis...");
    let state = AppState::new(config).await?;
    let queue = state
        .redis_queue
        .clone()
        .ok_or_else(|| anyhow::anyhow!("redis backend was not initialized"))?;
    tracing::info!(prefix = %queue.key_prefix(), "Redis connection established");

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, stopping sweeper...");
        let _ = shutdown_tx.send(true);
    });

    Sweeper::new(queue, sweep_interval).run(shutdown_rx).await;

    if let Some(registry) = &state.metrics_registry {
        tracing::debug!(metrics = %arena_queue::metrics::export_metrics(registry), "Final metrics");
    }

    tracing::info!("Sweeper shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
}

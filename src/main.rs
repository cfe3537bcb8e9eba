use std::sync::Arc;

use dotenvy::dotenv;
use photokeep::config::JobConfig;
use photokeep::infrastructure::{records, storage};
use photokeep::services::{CleanupCoordinator, PhotoLifecycleEngine};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "photokeep=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting photokeep cleanup worker...");

    let blobs = storage::setup_blob_store().await?;
    let records = records::setup_record_store()?;

    let job_config = JobConfig::from_env();
    info!(
        "🧹 Job Config: batch={}, soft-delete {:02}:00 UTC, purge {:02}:00 UTC",
        job_config.batch_size, job_config.soft_delete_hour_utc, job_config.purge_hour_utc
    );

    let engine = Arc::new(PhotoLifecycleEngine::new(
        records,
        blobs,
        job_config.batch_size,
    ));

    // Setup Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let coordinator = CleanupCoordinator::new(engine, job_config, shutdown_rx);
    let worker = tokio::spawn(async move {
        coordinator.run().await;
    });

    info!("✅ Cleanup worker ready");

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    worker.await?;

    info!("🛑 Worker shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}

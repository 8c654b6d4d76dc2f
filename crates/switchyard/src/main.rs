use clap::Parser;
use core::time::Duration;
use switchyard::config::{CliArgs, ServerConfig};
use switchyard::system::System;
use switchyard::telemetry::init_telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let shutdown = CancellationToken::new();
    let system = System::launch(&config, shutdown.clone()).await?;

    stop_signal(config.run_for).await;

    let report = system.shutdown(config.shutdown_timeout).await;
    tracing::info!(
        requests = report.requests_sent(),
        replies = report.replies_received(),
        broker = ?report.server.broker,
        "Service shut down"
    );
    if !report.is_clean() {
        tracing::warn!(
            failed = report.failed_clients.len(),
            timed_out = report.timed_out_clients.len() + report.server.workers.timed_out,
            "Some tasks did not stop cleanly"
        );
    }

    providers.shutdown();
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting broker on {} with full config: {:#?}",
            config.frontend_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting broker on {} with {} workers and {} clients",
            config.frontend_addr,
            config.num_workers,
            config.num_clients
        );
    }
}

/// Resolves on Ctrl+C, SIGTERM, or after `run_for` when set.
async fn stop_signal(run_for: Option<Duration>) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    let deadline = async {
        match run_for {
            Some(run_for) => tokio::time::sleep(run_for).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
        () = deadline => tracing::info!("Run time elapsed"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}

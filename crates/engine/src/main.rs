use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tubesync_engine::{ChangeEvent, EngineConfig, SyncEngine};

/// Headless watcher: submits every URL given on the command line, then logs
/// each change to the job collection until interrupted.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tubesync=debug,tubesync_engine=debug,tubesync_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = EngineConfig::from_env().context("Invalid tubesync configuration")?;
    tracing::info!(
        jobs = %config.endpoints.jobs(),
        transport = ?config.transport,
        poll_interval_ms = config.poller.interval.as_millis() as u64,
        "Loaded engine configuration",
    );

    // --- Engine ---
    let engine = SyncEngine::start(config);
    let mut changes = engine.subscribe();

    for raw in std::env::args().skip(1) {
        match engine.submit(raw.as_str()).await {
            Ok(job) => tracing::info!(job_id = %job.id, source_url = %job.source_url, "Submitted job"),
            Err(e) => tracing::warn!(input = %raw, error = %e, "Submission failed"),
        }
    }

    let watch_changes = async {
        loop {
            match changes.recv().await {
                Ok(event) => log_change(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    tokio::select! {
        () = shutdown_signal() => {}
        () = watch_changes => {}
    }

    // --- Shutdown ---
    engine.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn log_change(event: &ChangeEvent) {
    match event {
        ChangeEvent::Upserted(job) => {
            let progress = job.active_progress();
            tracing::info!(
                job_id = %job.id,
                status = %job.status,
                title = job.title.as_deref().unwrap_or(""),
                percent = progress.and_then(|p| p.percent),
                rate = progress.and_then(|p| p.transfer_rate.as_deref()),
                eta = progress.and_then(|p| p.eta.as_deref()),
                error = job.error_detail.as_deref(),
                "Job updated",
            );
        }
        ChangeEvent::Removed(id) => tracing::info!(job_id = %id, "Job removed"),
        ChangeEvent::PollDegraded { attempts, error } => {
            tracing::warn!(attempts, error = %error, "Polling degraded, will try again next cycle");
        }
    }
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

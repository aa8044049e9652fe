//! pulse-worker: processes ready intakes until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use pulse_core::{EnvSecretSource, PipelineConfig, RetryPolicy};
use pulse_db::{Database, FilesystemContentStore, PgIntakeRepository, PoolConfig};
use pulse_inference::OllamaBackend;
use pulse_jobs::{
    IntakeProcessor, IntakeWorker, TenantServiceProvider, WorkerConfig, WorkerEvent,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - env filter (default: "pulse_jobs=info,pulse_graph=info,pulse_db=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pulse_jobs=info,pulse_graph=info,pulse_db=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("pulse-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/pulse".to_string());
    let content_root = std::env::var("CONTENT_ROOT").unwrap_or_else(|_| "./data".to_string());

    let worker_config = WorkerConfig::from_env();
    let pipeline_config = PipelineConfig::from_env();
    let retry_policy = RetryPolicy::from_env();

    let db = Database::connect_with_config(
        &database_url,
        PoolConfig::for_worker(worker_config.max_concurrent_jobs),
    )
    .await?;
    db.migrate().await?;
    info!("Database migrations applied");

    let embedder = OllamaBackend::from_env();
    if !embedder.health_check().await {
        warn!(base_url = %embedder.base_url(), "Ollama is not reachable, intakes will retry");
    }

    let intakes = Arc::new(PgIntakeRepository::new(db.pool.clone()));
    let services = Arc::new(TenantServiceProvider::new(
        Arc::new(EnvSecretSource::new()),
        db.clone(),
        Arc::new(embedder),
    ));
    let content = Arc::new(FilesystemContentStore::new(&content_root));

    let processor = IntakeProcessor::new(intakes.clone(), content, services)
        .with_config(pipeline_config)
        .with_retry_policy(retry_policy);

    info!(
        content_root = %content_root,
        max_concurrent = worker_config.max_concurrent_jobs,
        max_attempts = retry_policy.max_attempts,
        "Starting intake worker"
    );
    let stop_wait = worker_config.shutdown_grace + Duration::from_secs(5);
    let handle = IntakeWorker::new(intakes, processor)
        .with_config(worker_config)
        .start();

    let mut events = handle.events();
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    handle.shutdown().await?;

    let stopped = tokio::time::timeout(stop_wait, async {
        while let Ok(event) = events.recv().await {
            if event == WorkerEvent::WorkerStopped {
                break;
            }
        }
    })
    .await;
    if stopped.is_err() {
        warn!("Worker did not report stop before exit");
    }
    info!("pulse-worker exited");
    Ok(())
}

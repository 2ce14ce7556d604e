use std::future::IntoFuture;
use std::process::ExitCode;
use std::sync::Arc;

use pushrelay_api::app::{self, AppServices};
use pushrelay_core::BackoffPolicy;
use pushrelay_infra::config::Config;
use pushrelay_infra::db;
use pushrelay_infra::provider::{FcmClient, PushProvider};
use pushrelay_infra::store::{PostgresTaskStore, TaskStore};
use pushrelay_infra::sweeper::{RetentionSweeper, SweeperConfig};
use pushrelay_infra::worker::{WorkerConfig, WorkerPool};
use pushrelay_infra::ShutdownSignal;

/// How long in-flight requests get to finish after a shutdown signal.
const SERVER_DRAIN_DEADLINE: std::time::Duration = std::time::Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    pushrelay_observability::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let pool = db::connect(&config.database).await?;
    db::migrate(&pool).await?;
    db::health_check(&pool).await?;

    let store: Arc<dyn TaskStore> = Arc::new(PostgresTaskStore::new(pool));
    let provider: Arc<dyn PushProvider> = Arc::new(FcmClient::new(
        &config.fcm.credentials_path,
        &config.fcm.project_id,
    )?);
    let backoff = BackoffPolicy::new(config.worker.retry_intervals.clone())?;

    let shutdown = ShutdownSignal::new();
    let _signal_task = shutdown.install_signal_handlers();

    let worker_pool = WorkerPool::new(
        store.clone(),
        provider,
        backoff,
        WorkerConfig::from(&config.worker),
        shutdown.clone(),
    );
    let worker_handle = worker_pool.start();

    let sweeper = RetentionSweeper::new(
        store.clone(),
        SweeperConfig {
            retention: config.worker.cleanup_after,
            ..Default::default()
        },
        shutdown.clone(),
    );
    let sweeper_handle = sweeper.start();

    let services = Arc::new(AppServices {
        store,
        default_max_attempts: config.worker.max_retry_attempts,
    });
    let request_timeout = config.server.read_timeout + config.server.write_timeout;
    let router = app::build_app(services, config.server.auth_token.clone(), request_timeout);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    // The server drains first (bounded), then workers and the sweeper.
    let server_shutdown = shutdown.clone();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .into_future();

    let drain_deadline = {
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
            tokio::time::sleep(SERVER_DRAIN_DEADLINE).await;
        }
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => {
            return Err("server forced to shut down: drain deadline exceeded".into());
        }
    }

    shutdown.trigger();
    worker_handle.join().await;
    let _ = sweeper_handle.await;

    tracing::info!("shutdown complete");
    Ok(())
}

//! MediaVault storage node server.
//!
//! Wires the Postgres and Redis backends (or their in-memory
//! stand-ins) into the core, starts the background manager, and
//! serves the replication and status API.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, put};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mediavault_core::jobs::processors::{ProcessorContext, Processors};
use mediavault_core::jobs::queue::{Enqueuer, JobQueue};
use mediavault_core::jobs::store::{JobStore, MemoryJobStore, RedisJobStore};
use mediavault_core::repo::{
    AssetRepository, BackupRepository, MemoryAssetRepository, MemoryBackupRepository,
    MemoryPoolRepository, PgAssetRepository, PgBackupRepository, PgPoolRepository,
    PoolRepository,
};
use mediavault_core::{
    BackupRetry, Manager, PoolRegistry, ReplicationTransport, StorageManager, TieringSweep,
    VaultConfig,
};

mod engine;
mod errors;
mod handlers;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mediavault_core=debug")),
        )
        .init();

    let config = VaultConfig::from_env();
    info!(node_id = %config.node_id, "starting mediavault node");

    // Persistence: Postgres when configured, in-memory otherwise.
    let (pool_repo, asset_repo, backup_repo): (
        Arc<dyn PoolRepository>,
        Arc<dyn AssetRepository>,
        Arc<dyn BackupRepository>,
    ) = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pg = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(5))
                .connect(&url)
                .await?;
            sqlx::migrate!("./migrations").run(&pg).await?;
            info!("connected to Postgres");
            (
                Arc::new(PgPoolRepository::new(pg.clone())),
                Arc::new(PgAssetRepository::new(pg.clone())),
                Arc::new(PgBackupRepository::new(pg)),
            )
        }
        Err(_) => {
            warn!("DATABASE_URL not set, using in-memory repositories");
            (
                Arc::new(MemoryPoolRepository::new()),
                Arc::new(MemoryAssetRepository::new()),
                Arc::new(MemoryBackupRepository::new()),
            )
        }
    };

    // Job store: Redis when configured, in-memory otherwise.
    let job_store: Arc<dyn JobStore> = match std::env::var("REDIS_URL") {
        Ok(url) => Arc::new(RedisJobStore::connect(&url).await?),
        Err(_) => {
            warn!("REDIS_URL not set, using in-memory job store");
            Arc::new(MemoryJobStore::new())
        }
    };

    let registry = PoolRegistry::new(pool_repo);
    let storage = StorageManager::new(registry.clone(), None);

    let replication = if config.replication_secret.is_empty() {
        warn!("REPLICATION_SECRET not set, cross-node replication disabled");
        None
    } else {
        Some(Arc::new(ReplicationTransport::new(
            config.replication_secret.clone(),
        )?))
    };

    let pixel_engine = Arc::new(engine::PixelEngine::from_env()?);
    let enqueuer = Enqueuer::new(job_store.clone());

    let ctx = Arc::new(ProcessorContext {
        node_id: config.node_id.clone(),
        storage: storage.clone(),
        assets: asset_repo.clone(),
        backups: backup_repo.clone(),
        enqueuer: enqueuer.clone(),
        asset_processor: pixel_engine.clone(),
        processing_status: pixel_engine.clone(),
        replication,
        object: None,
        backup_bucket: config.backup_bucket.clone(),
    });

    let queue = Arc::new(JobQueue::new(
        job_store,
        Arc::new(Processors::new(ctx)),
        config.queue.clone(),
    ));
    let tiering = Arc::new(TieringSweep::new(
        registry.clone(),
        asset_repo.clone(),
        pixel_engine,
        enqueuer.clone(),
        config.tiering.clone(),
    ));
    let backup_retry = Arc::new(BackupRetry::new(
        backup_repo,
        asset_repo,
        enqueuer,
        config.manager.backup_stuck_age,
        config.manager.backup_retry_batch,
    ));
    let manager = Arc::new(Manager::new(
        queue.clone(),
        tiering,
        backup_retry,
        config.manager.clone(),
    ));
    manager.start().await;

    let app_state = AppState {
        node_id: config.node_id.clone(),
        replication_secret: config.replication_secret.clone(),
        registry,
        storage,
        queue,
    };
    let app = router(app_state);

    let host = std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    info!(%host, port, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.stop().await;
    info!("shutdown complete");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/api/internal/replicate",
            put(handlers::replicate::replicate).route_layer(DefaultBodyLimit::disable()),
        )
        .route("/api/jobs/{id}", get(handlers::jobs::get_job))
        .route("/api/queue/stats", get(handlers::jobs::queue_stats))
        .route("/api/pools/health", get(handlers::jobs::pools_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

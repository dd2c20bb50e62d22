use anyhow::Result;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tierstore::config::AppConfig;
use tierstore::models::file::TierKind;
use tierstore::services::{
    file_service::FileService,
    metadata::{MetadataStore, run_migrations},
    session_store::{MemorySessionStore, RedisSessionStore, SessionStore},
    tiering::TieringPolicy,
    tiers::{FsTierClient, S3TierClient, TierClient, TierSet},
    transfer::{ChannelTransferQueue, RedisTransferQueue, TransferQueue, TransferWorker},
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting tierstore with config: {:?}", cfg);

    // --- Ensure working directories exist ---
    for dir in [&cfg.scratch_dir, &cfg.local_dir, &cfg.cold_dir, &cfg.bulk_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory at {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    // SQLx will not create the database file on its own.
    if let Err(err) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(db_path)
    {
        tracing::warn!("Failed to pre-create database file: {}", err);
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&cfg.database_url)
            .await?,
    );

    run_migrations(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Session store and transfer queue ---
    let session_ttl = Duration::from_secs(cfg.session_ttl_secs);
    // Transfer markers outlive any reasonable single copy but still expire
    // if a worker dies mid-transfer.
    let lock_ttl = Duration::from_secs(600);
    let sessions: Arc<dyn SessionStore> = match cfg.redis_url.as_deref() {
        Some(url) => Arc::new(RedisSessionStore::connect(url, session_ttl, lock_ttl).await?),
        None => {
            tracing::warn!("No Redis configured; upload sessions are process-local");
            Arc::new(MemorySessionStore::new(session_ttl, lock_ttl))
        }
    };
    let queue: Arc<dyn TransferQueue> = match cfg.redis_url.as_deref() {
        Some(url) => Arc::new(RedisTransferQueue::connect(url, cfg.transfer_queue_key.clone()).await?),
        None => Arc::new(ChannelTransferQueue::new()),
    };

    // --- Storage tiers ---
    let local: Arc<dyn TierClient> = Arc::new(FsTierClient::new(TierKind::Local, &cfg.local_dir));
    let cold: Arc<dyn TierClient> = match cfg.cold_s3_bucket.as_deref() {
        Some(bucket) => Arc::new(
            S3TierClient::connect(
                TierKind::Cold,
                bucket,
                &cfg.s3_region,
                cfg.s3_endpoint.as_deref(),
            )
            .await,
        ),
        None => Arc::new(FsTierClient::new(TierKind::Cold, &cfg.cold_dir)),
    };
    let bulk: Arc<dyn TierClient> = match cfg.bulk_s3_bucket.as_deref() {
        Some(bucket) => Arc::new(
            S3TierClient::connect(
                TierKind::Bulk,
                bucket,
                &cfg.s3_region,
                cfg.s3_endpoint.as_deref(),
            )
            .await,
        ),
        None => Arc::new(FsTierClient::new(TierKind::Bulk, &cfg.bulk_dir)),
    };
    let tiers = TierSet::new(local, cold, bulk);

    // --- Core service ---
    let metadata = MetadataStore::new(db.clone());
    let service = FileService::new(
        sessions.clone(),
        tiers.clone(),
        metadata.clone(),
        queue.clone(),
        TieringPolicy::new(cfg.important_suffix.clone()),
        cfg.chunk_size,
        cfg.scratch_dir.clone(),
        cfg.async_transfer,
    );

    // --- Transfer worker ---
    let worker = TransferWorker::new(
        queue,
        tiers,
        metadata,
        sessions,
        cfg.scratch_dir.clone(),
        cfg.transfer_max_attempts,
        Duration::from_secs(cfg.transfer_retry_delay_secs),
    );
    tokio::spawn(worker.run());

    // --- Build router ---
    let app: Router = tierstore::routes::routes::routes().with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

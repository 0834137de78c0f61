use anyhow::Result;
use axum::{Router, extract::DefaultBodyLimit};
use chrono::Utc;
use config::{AppConfig, RunMode};
use handlers::AppState;
use services::{
    bucket_lifecycle::BucketDeletePolicy,
    gateway::{GatewayOptions, ObjectStorageGateway},
    local_store::LocalBackend,
    multipart_orchestrator::PRESIGNED_URL_TTL,
    part_signer::PartSigner,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting game-store on {} (storage {}, database {}, namespace {})",
        cfg.addr(),
        cfg.storage_dir,
        cfg.database_url,
        cfg.bucket_namespace
    );

    // --- Ensure storage directories exist ---
    for dir in [&cfg.storage_dir, &cfg.download_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory at {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let connect_options = SqliteConnectOptions::from_str(&cfg.database_url)?.create_if_missing(true);
    if let Some(parent) = connect_options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?,
    );

    let store = Arc::new(LocalBackend::new(
        db,
        cfg.storage_dir.clone(),
        PartSigner::new(cfg.signing_secret.clone(), cfg.public_url.clone()),
    ));

    // --- Handle one-shot modes ---
    match mode {
        RunMode::Migrate => {
            let applied = store.migrate().await?;
            tracing::info!("Database migration complete ({} statements).", applied);
            return Ok(());
        }
        RunMode::Housekeeping | RunMode::Serve => {}
    }

    let gateway = ObjectStorageGateway::new(
        store.clone(),
        GatewayOptions {
            namespace: cfg.bucket_namespace.clone(),
            download_dir: cfg.download_dir.clone().into(),
            multipart_threshold: cfg.multipart_threshold,
            delete_policy: if cfg.purge_on_delete {
                BucketDeletePolicy::Purge
            } else {
                BucketDeletePolicy::RejectNonEmpty
            },
            presign_ttl: PRESIGNED_URL_TTL,
            stale_upload_after: chrono::Duration::hours(cfg.stale_upload_hours),
        },
    );

    if mode == RunMode::Housekeeping {
        let report = store.enforce_lifecycle(Utc::now()).await?;
        let aborted = gateway.sweep_stale_uploads().await?;
        tracing::info!(
            "Housekeeping done: {} transitioned, {} expired, {} stale uploads aborted",
            report.transitioned,
            report.expired,
            aborted
        );
        return Ok(());
    }

    // --- Build router ---
    let max_body = usize::try_from(cfg.max_upload_bytes).unwrap_or(usize::MAX);
    let app: Router = routes::routes::routes()
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(AppState { gateway, store });

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

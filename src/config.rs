use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};
use uuid::Uuid;

const MIB: u64 = 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub download_dir: String,
    pub bucket_namespace: String,
    /// Base of every signed part URL handed to clients.
    pub public_url: String,
    pub signing_secret: String,
    pub multipart_threshold: u64,
    pub max_upload_bytes: u64,
    pub purge_on_delete: bool,
    pub stale_upload_hours: i64,
}

/// One-shot modes that run instead of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Housekeeping,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Game distribution storage gateway")]
pub struct Args {
    /// Host to bind to (overrides GAME_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides GAME_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where game payloads are stored (overrides GAME_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides GAME_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory downloads are written to (overrides GAME_STORE_DOWNLOAD_DIR)
    #[arg(long)]
    pub download_dir: Option<String>,

    /// Prefix of managed bucket names (overrides GAME_STORE_BUCKET_NAMESPACE)
    #[arg(long)]
    pub bucket_namespace: Option<String>,

    /// Public base URL for signed part URLs (overrides GAME_STORE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Run migrations and exit
    #[arg(long, conflicts_with = "housekeeping")]
    pub migrate: bool,

    /// Enforce lifecycle rules, abort stale uploads and exit
    #[arg(long)]
    pub housekeeping: bool,
}

/// Read `name` and parse it, falling back to `default` when unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::from_args(Args::parse())
    }

    fn from_args(args: Args) -> Result<(Self, RunMode)> {
        // --- Environment fallback ---
        let env_host = env_or("GAME_STORE_HOST", "0.0.0.0");
        let env_port = env_parse("GAME_STORE_PORT", 3000u16)?;
        let env_storage = env_or("GAME_STORE_STORAGE_DIR", "./data/objects");
        let env_db = env_or(
            "GAME_STORE_DATABASE_URL",
            "sqlite://./data/meta/game_store.db",
        );
        let env_downloads = env_or("GAME_STORE_DOWNLOAD_DIR", "./downloads");
        let env_namespace = env_or("GAME_STORE_BUCKET_NAMESPACE", "dev");
        let env_public_url = env_or("GAME_STORE_PUBLIC_URL", "http://localhost:3000");

        let signing_secret = match env::var("GAME_STORE_SIGNING_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!(
                    "GAME_STORE_SIGNING_SECRET not set; signed part URLs will not survive a restart"
                );
                format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
            }
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            download_dir: args.download_dir.unwrap_or(env_downloads),
            bucket_namespace: args.bucket_namespace.unwrap_or(env_namespace),
            public_url: args.public_url.unwrap_or(env_public_url),
            signing_secret,
            multipart_threshold: env_parse("GAME_STORE_MULTIPART_THRESHOLD", 100 * MIB)?,
            max_upload_bytes: env_parse("GAME_STORE_MAX_UPLOAD_BYTES", 5 * 1024 * MIB)?,
            purge_on_delete: env_parse("GAME_STORE_PURGE_ON_DELETE", true)?,
            stale_upload_hours: env_parse("GAME_STORE_STALE_UPLOAD_HOURS", 24i64)?,
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.housekeeping {
            RunMode::Housekeeping
        } else {
            RunMode::Serve
        };
        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

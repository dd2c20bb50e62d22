use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Default chunk size handed to clients at session init (5 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default upload-session lifetime (12 hours).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 12 * 60 * 60;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,

    /// Spool area for in-flight chunks and assembly files.
    pub scratch_dir: String,
    /// Filesystem root of the local landing-zone tier.
    pub local_dir: String,
    /// Filesystem root of the cold tier when no S3 bucket is configured.
    pub cold_dir: String,
    /// Filesystem root of the bulk tier when no S3 bucket is configured.
    pub bulk_dir: String,

    /// Redis URL for the session store and transfer queue. When absent the
    /// service runs with in-process equivalents.
    pub redis_url: Option<String>,
    pub transfer_queue_key: String,

    pub chunk_size: u64,
    pub session_ttl_secs: u64,

    /// Ordinary files ride the transfer queue when true, otherwise they
    /// are copied to the bulk tier before the upload returns.
    pub async_transfer: bool,
    /// Filename suffix marking a file important (cold-tier bound).
    pub important_suffix: String,

    pub transfer_max_attempts: u32,
    pub transfer_retry_delay_secs: u64,

    /// S3 buckets backing the cold and bulk tiers. Unset buckets fall back
    /// to the filesystem directories above.
    pub cold_s3_bucket: Option<String>,
    pub bulk_s3_bucket: Option<String>,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Tiered file storage service")]
pub struct Args {
    /// Host to bind to (overrides TIERSTORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TIERSTORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides TIERSTORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Scratch directory for in-flight uploads (overrides TIERSTORE_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_host = env_or("TIERSTORE_HOST", "0.0.0.0");
        let env_port = env_parse::<u16>("TIERSTORE_PORT", 3000)?;
        let env_db = env_or("TIERSTORE_DATABASE_URL", "sqlite://./data/meta/tierstore.db");
        let env_scratch = env_or("TIERSTORE_SCRATCH_DIR", "./data/scratch");

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            scratch_dir: args.scratch_dir.unwrap_or(env_scratch),
            local_dir: env_or("TIERSTORE_LOCAL_DIR", "./data/tiers/local"),
            cold_dir: env_or("TIERSTORE_COLD_DIR", "./data/tiers/cold"),
            bulk_dir: env_or("TIERSTORE_BULK_DIR", "./data/tiers/bulk"),
            redis_url: env_opt("TIERSTORE_REDIS_URL"),
            transfer_queue_key: env_or("TIERSTORE_TRANSFER_QUEUE", "tierstore:transfers"),
            chunk_size: env_parse("TIERSTORE_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            session_ttl_secs: env_parse("TIERSTORE_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?,
            async_transfer: env_parse("TIERSTORE_ASYNC_TRANSFER", true)?,
            important_suffix: env_or("TIERSTORE_IMPORTANT_SUFFIX", "VI"),
            transfer_max_attempts: env_parse("TIERSTORE_TRANSFER_MAX_ATTEMPTS", 3)?,
            transfer_retry_delay_secs: env_parse("TIERSTORE_TRANSFER_RETRY_DELAY_SECS", 5)?,
            cold_s3_bucket: env_opt("TIERSTORE_COLD_S3_BUCKET"),
            bulk_s3_bucket: env_opt("TIERSTORE_BULK_S3_BUCKET"),
            s3_region: env_or("TIERSTORE_S3_REGION", "us-east-1"),
            s3_endpoint: env_opt("TIERSTORE_S3_ENDPOINT"),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

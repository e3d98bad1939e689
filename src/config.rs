use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root of the upload area; chunk blobs live in `chunks/`, merged files in `completed/`.
    pub storage_dir: PathBuf,
    pub database_url: String,
    /// Idle time after which an unfinished session is swept. Zero disables expiry.
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    pub max_chunk_bytes: usize,
    /// Largest `X-Total-Chunks` a client may declare.
    pub max_total_chunks: u32,
    pub merge_buffer_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable chunked file upload service")]
pub struct Args {
    /// Host to bind to (overrides CHUNKED_UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CHUNKED_UPLOAD_PORT / PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Root directory for chunk blobs and merged files (overrides CHUNKED_UPLOAD_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Chunk index database URL (overrides CHUNKED_UPLOAD_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Seconds an unfinished session may stay idle before it is swept, 0 keeps sessions forever
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,

    /// Seconds between sweeps of idle sessions
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Largest accepted request body for a chunk upload
    #[arg(long)]
    pub max_chunk_bytes: Option<usize>,

    /// Largest number of chunks one upload may declare
    #[arg(long)]
    pub max_total_chunks: Option<u32>,

    /// Read buffer used per chunk while merging
    #[arg(long)]
    pub merge_buffer_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

pub const DEFAULT_MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_MERGE_BUFFER_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_TOTAL_CHUNKS: u32 = 10_000;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("CHUNKED_UPLOAD_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("CHUNKED_UPLOAD_PORT") {
            Ok(value) => parse_value::<u16>("CHUNKED_UPLOAD_PORT", &value)?,
            Err(env::VarError::NotPresent) => env_or("PORT", 8080)?,
            Err(err) => return Err(err).context("reading CHUNKED_UPLOAD_PORT"),
        };
        let env_storage = env::var("CHUNKED_UPLOAD_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./uploads"));
        let env_db = env::var("CHUNKED_UPLOAD_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./uploads/index.db".into());
        let env_ttl = env_or("CHUNKED_UPLOAD_SESSION_TTL_SECS", 86_400u64)?;
        let env_sweep = env_or("CHUNKED_UPLOAD_SWEEP_INTERVAL_SECS", 300u64)?;
        let env_max_chunk = env_or("CHUNKED_UPLOAD_MAX_CHUNK_BYTES", DEFAULT_MAX_CHUNK_BYTES)?;
        let env_max_total =
            env_or("CHUNKED_UPLOAD_MAX_TOTAL_CHUNKS", DEFAULT_MAX_TOTAL_CHUNKS)?;
        let env_merge_buf =
            env_or("CHUNKED_UPLOAD_MERGE_BUFFER_BYTES", DEFAULT_MERGE_BUFFER_BYTES)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            session_ttl: Duration::from_secs(args.session_ttl_secs.unwrap_or(env_ttl)),
            sweep_interval: Duration::from_secs(
                args.sweep_interval_secs.unwrap_or(env_sweep).max(1),
            ),
            max_chunk_bytes: args.max_chunk_bytes.unwrap_or(env_max_chunk),
            max_total_chunks: args.max_total_chunks.unwrap_or(env_max_total).max(1),
            merge_buffer_bytes: args.merge_buffer_bytes.unwrap_or(env_merge_buf).max(1),
        };

        Ok((cfg, args.migrate))
    }

    /// Configuration rooted at `storage_dir` with every other setting at its default.
    pub fn with_storage(storage_dir: impl Into<PathBuf>, database_url: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            storage_dir: storage_dir.into(),
            database_url: database_url.into(),
            session_ttl: Duration::from_secs(86_400),
            sweep_interval: Duration::from_secs(300),
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            max_total_chunks: DEFAULT_MAX_TOTAL_CHUNKS,
            merge_buffer_bytes: DEFAULT_MERGE_BUFFER_BYTES,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn chunk_dir(&self) -> PathBuf {
        self.storage_dir.join("chunks")
    }

    pub fn completed_dir(&self) -> PathBuf {
        self.storage_dir.join("completed")
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => parse_value(name, &value),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn parse_value<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|err| anyhow::anyhow!("{}", err))
        .with_context(|| format!("parsing {} value `{}`", name, value))
}

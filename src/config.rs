use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; CLI wins.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Path uploads are created under, normalized to `/segment[/segment...]`.
    pub context_path: String,
    pub max_upload_size: Option<u64>,
    pub owner_key_header: Option<String>,
    pub enable_download: bool,
    pub disabled_extensions: Vec<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "tus resumable upload server")]
pub struct Args {
    /// Host to bind to (overrides TUS_SERVER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TUS_SERVER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where upload bytes are stored (overrides TUS_SERVER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides TUS_SERVER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Path uploads are created under (overrides TUS_SERVER_CONTEXT_PATH)
    #[arg(long)]
    pub context_path: Option<String>,

    /// Largest accepted Upload-Length in bytes (overrides TUS_SERVER_MAX_UPLOAD_SIZE)
    #[arg(long)]
    pub max_upload_size: Option<u64>,

    /// Request header carrying the owner key (overrides TUS_SERVER_OWNER_KEY_HEADER)
    #[arg(long)]
    pub owner_key_header: Option<String>,

    /// Serve completed uploads through GET
    #[arg(long)]
    pub enable_download: bool,

    /// Extension to leave out, e.g. `termination`; repeatable
    #[arg(long = "disable-extension", value_name = "NAME")]
    pub disable_extension: Vec<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env::var("TUS_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_value::<u16>("TUS_SERVER_PORT")?.unwrap_or(1080);
        let env_storage =
            env::var("TUS_SERVER_STORAGE_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_db = env::var("TUS_SERVER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/tus_server.db".into());
        let env_context = env::var("TUS_SERVER_CONTEXT_PATH").unwrap_or_else(|_| "/files".into());
        let env_max_size = env_value::<u64>("TUS_SERVER_MAX_UPLOAD_SIZE")?;
        let env_owner_header = env::var("TUS_SERVER_OWNER_KEY_HEADER").ok();

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            context_path: normalize_context_path(&args.context_path.unwrap_or(env_context))?,
            max_upload_size: args.max_upload_size.or(env_max_size),
            owner_key_header: args
                .owner_key_header
                .or(env_owner_header)
                .filter(|name| !name.trim().is_empty()),
            enable_download: args.enable_download,
            disabled_extensions: args.disable_extension,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an optional environment variable.
fn env_value<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn normalize_context_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        bail!("context path `{}` must name at least one path segment", raw);
    }
    Ok(format!("/{}", trimmed))
}

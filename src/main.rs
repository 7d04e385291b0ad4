use anyhow::{Context, Result};
use axum::{Router, http::HeaderName};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tus_server::{
    config::AppConfig,
    handlers::tus_handlers::AppState,
    routes::routes::routes,
    services::{dispatcher::TusDispatcher, storage_service::StorageService},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting tus-server with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Connecting to {} (path {})", db_url, db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url `{}`", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    let storage = StorageService::new(db, &cfg.storage_dir, &cfg.context_path)
        .with_max_upload_size(cfg.max_upload_size);

    // --- Schema (idempotent); exit afterwards in migration mode ---
    storage.migrate().await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Dispatcher ---
    let mut builder =
        TusDispatcher::builder(Arc::new(storage.clone())).with_download(cfg.enable_download);
    for name in &cfg.disabled_extensions {
        builder = builder.disable_extension(name.as_str());
    }
    let dispatcher = builder.build();
    tracing::info!("Enabled extensions: {}", dispatcher.extension_names().join(", "));

    let owner_key_header = cfg
        .owner_key_header
        .as_deref()
        .map(HeaderName::from_str)
        .transpose()
        .context("parsing owner key header name")?;

    // --- Build router ---
    let state = AppState {
        dispatcher,
        storage,
        owner_key_header,
    };
    let app: Router = routes(&cfg.context_path).with_state(state);

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

    tracing::info!(
        "Accepting uploads on http://{}{}",
        listener.local_addr()?,
        cfg.context_path
    );
    axum::serve(listener, app).await?;

    Ok(())
}

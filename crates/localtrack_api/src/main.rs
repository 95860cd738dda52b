//! localtrack control plane server.
//!
//! Usage:
//!     localtrack-api --config config.yml --bind 0.0.0.0:8000

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use localtrack_api::probe::HttpVideoProbe;
use localtrack_api::{router, AppState, S3ModelSource};
use localtrack_config::{Config, ObjectStoreEnv};
use localtrack_logging::{init_logging, LogConfig};
use localtrack_objectstore::ObjectStoreGateway;
use localtrack_store::JobStore;

#[derive(Parser, Debug)]
#[command(name = "localtrack-api", about = "HTTP control plane for localtrack jobs")]
struct Args {
    /// Path to config.yml
    #[arg(long, env = "YAML_PATH", default_value = "config.yml")]
    config: PathBuf,

    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    init_logging(LogConfig {
        app_name: "localtrack-api",
        level: &config.log.level,
        log_dir: config.temp_dir().join("logs"),
    })?;

    info!("Starting localtrack-api {}", env!("CARGO_PKG_VERSION"));
    info!("  Bind: {}", args.bind);
    info!("  Database dir: {}", config.database.path.display());

    let object_store_env =
        ObjectStoreEnv::from_env().context("Object store credentials are required")?;
    let gateway = ObjectStoreGateway::connect(&object_store_env).await;

    let store = JobStore::open(&config.database.path).await?;
    let state = Arc::new(AppState {
        store,
        models: Box::new(S3ModelSource::new(
            gateway,
            config.minio.root_bucket.clone(),
            config.minio.model_prefix.clone(),
        )),
        probe: Box::new(HttpVideoProbe::new(reqwest::Client::new())),
        engine: config.monitors.docker.engine().to_string(),
        defaults: config.defaults.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    info!("Listening on {}", args.bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Control plane stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("Received shutdown signal, stopping the control plane");
}

//! localtrack dispatcher daemon.
//!
//! Usage:
//!     localtrack-daemon --config config.yml
//!
//! Refuses to start when the object store cannot be written or the container
//! runtime does not answer; both are fatal misconfigurations.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};

use localtrack_config::{notify_url, num_gpus, Config, Mode, ObjectStoreEnv};
use localtrack_daemon::scheduler::SchedulerConfig;
use localtrack_daemon::{
    ContainerRuntime, Dispatcher, DockerMonitor, ModelSyncMonitor, Monitor, Notifier,
};
use localtrack_logging::{init_logging, LogConfig};
use localtrack_objectstore::ObjectStoreGateway;
use localtrack_store::JobStore;

#[derive(Parser, Debug)]
#[command(name = "localtrack-daemon", about = "Job dispatcher for localtrack")]
struct Args {
    /// Path to config.yml
    #[arg(long, env = "YAML_PATH", default_value = "config.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    init_logging(LogConfig {
        app_name: "localtrack-daemon",
        level: &config.log.level,
        log_dir: config.temp_dir().join("logs"),
    })?;

    info!("Starting localtrack-daemon {}", env!("CARGO_PKG_VERSION"));

    let object_store_env =
        ObjectStoreEnv::from_env().context("Object store credentials are required")?;
    let gateway = ObjectStoreGateway::connect(&object_store_env).await;

    // Fatal startup checks: prove we can write to the object store and talk
    // to the container runtime before accepting any work.
    gateway
        .verify_upload(&config.minio.root_bucket, &config.minio.track_prefix)
        .await
        .context("Object store upload probe failed")?;
    let runtime = ContainerRuntime::connect()?;
    runtime.ping().await?;

    let store = JobStore::open(&config.database.path).await?;
    let notifier = Notifier::new(notify_url());
    if !notifier.is_enabled() {
        info!("NOTIFY_URL not set, completion webhooks are disabled");
    }

    let docker_monitor = DockerMonitor::new(
        store,
        runtime,
        gateway.clone(),
        notifier,
        object_store_env,
        SchedulerConfig {
            check_every: config.monitors.docker.check_every,
            max_concurrent: config.monitors.docker.max_concurrent,
            root_bucket: config.minio.root_bucket.clone(),
            track_prefix: config.minio.track_prefix.clone(),
            track_config_uri: config.monitors.docker.strongsort_track_config.clone(),
            temp_dir: config.temp_dir(),
            mode: Mode::from_env(),
            gpu: num_gpus() > 0,
        },
    )
    .await
    .context("Failed to initialise the container scheduler")?;

    let model_sync = ModelSyncMonitor::new(
        gateway,
        config.minio.root_bucket.clone(),
        config.minio.model_prefix.clone(),
        config.monitors.models.path.clone(),
        config.monitors.models.check_every,
    );

    let monitors: Vec<Box<dyn Monitor>> = vec![Box::new(docker_monitor), Box::new(model_sync)];
    let dispatcher = Dispatcher::new(monitors);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("Failed to listen for the shutdown signal");
            return;
        }
        info!("Received shutdown signal, stopping after in-flight checks");
        let _ = stop_tx.send(true);
    });

    dispatcher.run(stop_rx).await;
    info!("Daemon stopped");
    Ok(())
}

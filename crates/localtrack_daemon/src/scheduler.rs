//! Container scheduler.
//!
//! Each poll runs two passes. The reconcile pass settles every tracked
//! runner whose container has exited: parse results, enrich metadata, write
//! the terminal status, upload artifacts and notify. The dispatch pass then
//! promotes the oldest queued media if the live-container count allows.
//!
//! The concurrency bound counts containers by name prefix rather than
//! runner-table entries, so it stays authoritative across daemon restarts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use localtrack_config::{Mode, ObjectStoreEnv};
use localtrack_objectstore::ObjectStoreGateway;
use localtrack_store::{decode_metadata, encode_metadata, JobStore, MediaStatus};

use crate::dispatcher::Monitor;
use crate::docker::{ContainerRuntime, CONTAINER_NAME_PREFIX};
use crate::notifier::Notifier;
use crate::runner::{LaunchConfig, Runner};
use crate::tracks;

/// A worker that runs longer than this is stopped and treated as failed.
const WAIT_TIMEOUT_SECS: f64 = 3600.0;

/// Artifact suffixes shipped to the object store after a successful run.
const ARTIFACT_SUFFIXES: &[&str] = &[".tar.gz", ".json", ".mp4"];

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub check_every: u64,
    pub max_concurrent: usize,
    pub root_bucket: String,
    pub track_prefix: String,
    pub track_config_uri: String,
    pub temp_dir: PathBuf,
    pub mode: Mode,
    pub gpu: bool,
}

pub struct DockerMonitor {
    store: JobStore,
    runtime: ContainerRuntime,
    gateway: ObjectStoreGateway,
    notifier: Notifier,
    object_store: ObjectStoreEnv,
    http: reqwest::Client,
    config: SchedulerConfig,
    /// In-flight runners keyed by job id.
    runners: HashMap<i64, Runner>,
}

impl DockerMonitor {
    /// Construct the scheduler and reconcile persistent state against the
    /// container runtime: a media row in RUNNING cannot have survived a
    /// restart, and any leftover prefixed container belongs to a dead
    /// process.
    pub async fn new(
        store: JobStore,
        runtime: ContainerRuntime,
        gateway: ObjectStoreGateway,
        notifier: Notifier,
        object_store: ObjectStoreEnv,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let monitor = Self {
            store,
            runtime,
            gateway,
            notifier,
            object_store,
            http: reqwest::Client::new(),
            config,
            runners: HashMap::new(),
        };
        monitor.reconcile_startup().await?;
        Ok(monitor)
    }

    async fn reconcile_startup(&self) -> Result<()> {
        let orphaned: Vec<_> = self
            .store
            .list_jobs()
            .await?
            .into_iter()
            .filter(|job| job.status() == MediaStatus::Running)
            .collect();
        if !orphaned.is_empty() {
            warn!(
                "{} job(s) were running when the daemon last stopped",
                orphaned.len()
            );
        }

        self.store.fail_running_media().await?;
        for job in &orphaned {
            if let Err(err) = self.notifier.notify(&job.job, None).await {
                error!("Failed to notify orphaned job {}: {err:#}", job.job.id);
            }
        }

        for container in self.runtime.list_prefixed(CONTAINER_NAME_PREFIX).await? {
            let Some(name) = container
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|name| name.trim_start_matches('/').to_string())
            else {
                continue;
            };
            warn!("Removing leftover container {name}");
            if let Err(err) = self.runtime.stop_and_remove(&name).await {
                error!("Failed to remove leftover container {name}: {err:#}");
            }
        }
        Ok(())
    }

    /// Reconcile pass: settle every runner whose container has exited.
    async fn reconcile(&mut self) {
        let mut finished = Vec::new();
        for (job_id, runner) in &self.runners {
            match self.runtime.is_running(runner.container_name()).await {
                Ok(true) => {
                    if runner.elapsed_secs() > WAIT_TIMEOUT_SECS {
                        warn!(
                            "Job {} exceeded the {WAIT_TIMEOUT_SECS}s limit, stopping {}",
                            job_id,
                            runner.container_name()
                        );
                        if let Err(err) =
                            self.runtime.stop_and_remove(runner.container_name()).await
                        {
                            error!("Failed to stop timed-out container: {err:#}");
                            continue;
                        }
                        finished.push(*job_id);
                    } else {
                        debug!(
                            "Job {} container {} is still running",
                            job_id,
                            runner.container_name()
                        );
                    }
                }
                Ok(false) => finished.push(*job_id),
                Err(err) => {
                    // Transient runtime error; the next poll sees the same
                    // runner again.
                    warn!("Failed to inspect container for job {job_id}: {err:#}");
                }
            }
        }

        for job_id in finished {
            let Some(runner) = self.runners.remove(&job_id) else {
                continue;
            };
            if let Err(err) = self.settle(&runner).await {
                error!("Failed to settle job {job_id}: {err:#}");
            }
            if let Err(err) = runner.cleanup(&self.runtime).await {
                warn!("Cleanup for job {job_id} failed: {err:#}");
            }
        }
    }

    async fn settle(&self, runner: &Runner) -> Result<()> {
        match self.runtime.logs(runner.container_name()).await {
            Ok(logs) if !logs.is_empty() => debug!("Container {}:\n{logs}", runner.container_name()),
            _ => {}
        }

        if runner.has_results() {
            self.settle_success(runner).await
        } else {
            self.settle_failure(runner).await
        }
    }

    async fn settle_success(&self, runner: &Runner) -> Result<()> {
        let archives = runner.result_archives();
        let Some(first_archive) = archives.first().cloned() else {
            return self.settle_failure(runner).await;
        };
        let counted = archives.clone();
        let num_tracks = tokio::task::spawn_blocking(move || tracks::count_unique_tracks(&counted))
            .await
            .context("Track counting task aborted")??;
        let processing_time_secs = runner.elapsed_secs();

        let archive_name = first_archive
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("results.tar.gz");
        let s3_path = format!("{}/output/{archive_name}", runner.output_s3());

        // Merge into the media's current blob, not the snapshot taken at
        // dispatch time.
        let current = self
            .store
            .job_by_id(runner.job.id)
            .await?
            .and_then(|job| {
                job.media
                    .into_iter()
                    .find(|media| media.id == runner.media_id)
            })
            .and_then(|media| media.metadata_b64);
        let metadata = merged_result_metadata(
            current.as_deref(),
            &s3_path,
            num_tracks,
            processing_time_secs,
        )?;
        self.store
            .update_media(runner.media_id, MediaStatus::Success, Some(&metadata))
            .await?;
        info!(
            "Job {} complete: {num_tracks} track(s) in {processing_time_secs:.1}s, results at {s3_path}",
            runner.job.id
        );

        let uploaded = self
            .gateway
            .upload_dir_by_suffix(
                runner.out_dir(),
                runner.output_bucket(),
                &runner.artifact_key_prefix(),
                ARTIFACT_SUFFIXES,
            )
            .await?;
        debug!("Uploaded {uploaded} artifact(s) for job {}", runner.job.id);

        if let Err(err) = self.notifier.notify(&runner.job, Some(&first_archive)).await {
            error!("Failed to notify job {}: {err:#}", runner.job.id);
        }
        Ok(())
    }

    async fn settle_failure(&self, runner: &Runner) -> Result<()> {
        warn!(
            "Job {} produced no result archive, marking failed",
            runner.job.id
        );
        self.store
            .update_media(runner.media_id, MediaStatus::Failed, None)
            .await?;
        if let Err(err) = self.notifier.notify(&runner.job, None).await {
            error!("Failed to notify job {}: {err:#}", runner.job.id);
        }
        Ok(())
    }

    /// Dispatch pass: promote the oldest queued media when capacity allows.
    async fn dispatch(&mut self) -> Result<()> {
        let Some(queued) = self.store.oldest_queued_media().await? else {
            debug!("No video queued to process");
            return Ok(());
        };

        let live = self
            .runtime
            .count_running_prefixed(CONTAINER_NAME_PREFIX)
            .await?;
        if live >= self.config.max_concurrent {
            info!(
                "Already running the maximum of {} job(s), waiting for one to finish",
                self.config.max_concurrent
            );
            return Ok(());
        }

        if !self.store.mark_media_running(queued.media.id).await? {
            // The row left QUEUED between the select and the update.
            return Ok(());
        }

        let runner = Runner::new(
            queued.job.clone(),
            queued.media.id,
            queued.media.name.clone(),
            &self.config.root_bucket,
            &self.config.track_prefix,
            &self.config.temp_dir,
        )?;
        info!(
            "Dispatching job {} '{}' with output {}",
            queued.job.id,
            queued.job.name,
            runner.output_s3()
        );

        let launch = runner
            .launch(LaunchConfig {
                runtime: &self.runtime,
                http: &self.http,
                object_store: &self.object_store,
                track_config_uri: &self.config.track_config_uri,
                mode: self.config.mode,
                gpu: self.config.gpu,
            })
            .await;

        match launch {
            Ok(()) => {
                self.runners.insert(queued.job.id, runner);
            }
            Err(err) => {
                error!("Failed to launch job {}: {err:#}", queued.job.id);
                self.store
                    .update_media(queued.media.id, MediaStatus::Failed, None)
                    .await?;
                if let Err(err) = self.notifier.notify(&queued.job, None).await {
                    error!("Failed to notify job {}: {err:#}", queued.job.id);
                }
                if let Err(err) = runner.cleanup(&self.runtime).await {
                    warn!("Cleanup after failed launch: {err:#}");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Monitor for DockerMonitor {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn check_every(&self) -> Duration {
        Duration::from_secs(self.config.check_every)
    }

    async fn check(&mut self) -> Result<()> {
        self.reconcile().await;
        self.dispatch().await
    }
}

/// Merge the result fields into the media's existing metadata blob. Written
/// in the same update as the SUCCESS transition, so a reader that sees
/// SUCCESS always sees the enrichment.
fn merged_result_metadata(
    existing_b64: Option<&str>,
    s3_path: &str,
    num_tracks: usize,
    processing_time_secs: f64,
) -> Result<String> {
    let mut metadata = decode_metadata(existing_b64).unwrap_or_else(|_| json!({}));
    if !metadata.is_object() {
        metadata = json!({});
    }
    metadata["s3_path"] = json!(s3_path);
    metadata["num_tracks"] = json!(num_tracks);
    metadata["processing_time_secs"] = json!(processing_time_secs);
    encode_metadata(&metadata)
}

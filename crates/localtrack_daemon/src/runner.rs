//! Per-job controller.
//!
//! One runner exists for each in-flight job. It owns the job's input and
//! output directories, downloads the source video, starts the worker
//! container, and knows how to find results and clean up afterwards.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use localtrack_config::{Mode, ObjectStoreEnv, DEFAULT_TRACK_ARGS};
use localtrack_store::JobRecord;

use crate::docker::{ContainerRuntime, ContainerSpec, CONTAINER_NAME_PREFIX};
use crate::tracks;
use crate::video::download_video;

/// Mount root the worker image expects.
const PROCESSING_ROOT: &str = "/opt/ml/processing";

/// Named volume that replaces host-path binds in prod. When the daemon
/// itself runs in a container, this volume must be mounted at its temp dir
/// so both sides see the same job directories.
pub const SCRATCH_VOLUME: &str = "localtrack-scratch";

pub struct Runner {
    pub job: JobRecord,
    pub media_id: i64,
    pub video_url: String,
    container_name: String,
    in_dir: PathBuf,
    out_dir: PathBuf,
    output_bucket: String,
    output_key_prefix: String,
    start_utc: DateTime<Utc>,
}

/// Everything launch needs beyond the job itself.
pub struct LaunchConfig<'a> {
    pub runtime: &'a ContainerRuntime,
    pub http: &'a reqwest::Client,
    pub object_store: &'a ObjectStoreEnv,
    pub track_config_uri: &'a str,
    pub mode: Mode,
    pub gpu: bool,
}

impl Runner {
    /// Create the runner and its (freshly wiped) job directories. The
    /// timestamp taken here names both the container and the output prefix.
    pub fn new(
        job: JobRecord,
        media_id: i64,
        video_url: String,
        root_bucket: &str,
        track_prefix: &str,
        temp_dir: &Path,
    ) -> Result<Self> {
        let start_utc = Utc::now();
        let stamp = start_utc.format("%Y%m%dT%H%M%SZ").to_string();

        let job_dir = temp_dir.join(job.id.to_string());
        let in_dir = job_dir.join("input");
        let out_dir = job_dir.join("output");
        for dir in [&in_dir, &out_dir] {
            if dir.exists() {
                std::fs::remove_dir_all(dir)
                    .with_context(|| format!("Failed to clear {}", dir.display()))?;
            }
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        Ok(Self {
            container_name: format!("{CONTAINER_NAME_PREFIX}-{stamp}"),
            output_bucket: root_bucket.to_string(),
            output_key_prefix: format!("{track_prefix}/{stamp}"),
            job,
            media_id,
            video_url,
            in_dir,
            out_dir,
            start_utc,
        })
    }

    /// Download the video and start the worker container detached.
    pub async fn launch(&self, config: LaunchConfig<'_>) -> Result<()> {
        info!(
            "Processing {} with {} to {}",
            self.video_url,
            self.job.model,
            self.output_s3()
        );

        download_video(config.http, &self.video_url, &self.in_dir)
            .await
            .with_context(|| format!("Failed to download {}", self.video_url))?;

        let scratch = config.mode == Mode::Prod
            && config.runtime.has_volume(SCRATCH_VOLUME).await?;
        let mounts = container_mounts(self.job.id, &self.in_dir, &self.out_dir, scratch);

        let args = self.job.args.as_deref().unwrap_or(DEFAULT_TRACK_ARGS);
        let command = build_command(
            &self.job.model,
            config.track_config_uri,
            &mounts.input,
            &mounts.output,
            args,
        );

        let spec = ContainerSpec {
            name: self.container_name.clone(),
            image: self.job.engine.clone(),
            command,
            env: container_env(config.object_store),
            binds: mounts.binds,
            gpu: config.gpu,
        };
        config.runtime.start_detached(spec).await?;
        Ok(())
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// `s3://bucket/{track_prefix}/{timestamp}`.
    pub fn output_s3(&self) -> String {
        format!("s3://{}/{}", self.output_bucket, self.output_key_prefix)
    }

    pub fn output_bucket(&self) -> &str {
        &self.output_bucket
    }

    /// Key prefix artifacts are uploaded under.
    pub fn artifact_key_prefix(&self) -> String {
        format!("{}/output", self.output_key_prefix)
    }

    pub fn result_archives(&self) -> Vec<PathBuf> {
        tracks::result_archives(&self.out_dir)
    }

    /// A job succeeded iff at least one result archive exists.
    pub fn has_results(&self) -> bool {
        !self.result_archives().is_empty()
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start_utc
    }

    pub fn elapsed_secs(&self) -> f64 {
        (Utc::now() - self.start_utc).num_milliseconds() as f64 / 1000.0
    }

    /// Stop and remove the container (if still present) and delete the job
    /// directories.
    pub async fn cleanup(&self, runtime: &ContainerRuntime) -> Result<()> {
        runtime.stop_and_remove(&self.container_name).await?;
        if let Some(job_dir) = self.in_dir.parent() {
            if job_dir.exists() {
                debug!("Removing {}", job_dir.display());
                std::fs::remove_dir_all(job_dir)
                    .with_context(|| format!("Failed to remove {}", job_dir.display()))?;
            }
        }
        Ok(())
    }
}

struct Mounts {
    binds: Vec<String>,
    input: String,
    output: String,
}

/// Host-path binds in dev; a single shared scratch volume in prod, where the
/// worker addresses job directories relative to the volume root.
fn container_mounts(job_id: i64, in_dir: &Path, out_dir: &Path, scratch: bool) -> Mounts {
    if scratch {
        Mounts {
            binds: vec![format!("{SCRATCH_VOLUME}:{PROCESSING_ROOT}")],
            input: format!("{PROCESSING_ROOT}/{job_id}/input"),
            output: format!("{PROCESSING_ROOT}/{job_id}/output"),
        }
    } else {
        Mounts {
            binds: vec![
                format!("{}:{PROCESSING_ROOT}/input:ro", in_dir.display()),
                format!("{}:{PROCESSING_ROOT}/output:rw", out_dir.display()),
            ],
            input: format!("{PROCESSING_ROOT}/input"),
            output: format!("{PROCESSING_ROOT}/output"),
        }
    }
}

fn build_command(
    model_uri: &str,
    track_config_uri: &str,
    input: &str,
    output: &str,
    args: &str,
) -> Vec<String> {
    vec![
        "dettrack".to_string(),
        "--model-s3".to_string(),
        model_uri.to_string(),
        "--config-s3".to_string(),
        track_config_uri.to_string(),
        "-i".to_string(),
        input.to_string(),
        "-o".to_string(),
        output.to_string(),
        "--args".to_string(),
        args.to_string(),
    ]
}

fn container_env(object_store: &ObjectStoreEnv) -> Vec<String> {
    let endpoint = object_store.container_endpoint();
    vec![
        format!("AWS_ACCESS_KEY_ID={}", object_store.access_key),
        format!("AWS_SECRET_ACCESS_KEY={}", object_store.secret_key),
        format!("AWS_DEFAULT_REGION={}", object_store.region),
        format!("AWS_ENDPOINT_URL={endpoint}"),
        format!("MINIO_ENDPOINT_URL={endpoint}"),
    ]
}

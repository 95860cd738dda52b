//! Configuration for the localtrack binaries.
//!
//! A single `config.yml` describes the object-store layout, request defaults,
//! monitor cadences and the database location. Deployment-varying values can
//! be overridden through environment variables so the same file works in
//! dev and prod.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

mod env_vars;

pub use env_vars::{Mode, ObjectStoreEnv};

/// Default CLI args handed to the tracking container when a request omits
/// them. The container ships its own defaults; these mirror them so the
/// command line is explicit in the logs.
pub const DEFAULT_TRACK_ARGS: &str =
    "--iou-thres 0.5 --conf-thres 0.01 --agnostic-nms --max-det 100";

/// Top-level configuration, deserialised from `config.yml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub minio: MinioConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    pub monitors: MonitorsConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub log: LogSettings,
}

/// Object-store bucket layout.
#[derive(Debug, Clone, Deserialize)]
pub struct MinioConfig {
    pub root_bucket: String,
    pub model_prefix: String,
    pub video_prefix: String,
    pub track_prefix: String,
}

/// Request defaults applied when `POST /predict` omits a field.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_args")]
    pub args: String,
    pub video_url: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            args: default_args(),
            video_url: None,
        }
    }
}

fn default_args() -> String {
    DEFAULT_TRACK_ARGS.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorsConfig {
    pub docker: DockerMonitorConfig,
    pub models: ModelSyncConfig,
}

/// Settings for the container scheduler monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct DockerMonitorConfig {
    /// Seconds between scheduler polls.
    pub check_every: u64,
    pub strongsort_container: String,
    pub strongsort_container_arm64: Option<String>,
    /// Object-store URI of the tracker configuration yaml.
    pub strongsort_track_config: String,
    /// Simultaneously running worker containers.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    1
}

impl DockerMonitorConfig {
    /// Container image for this host architecture.
    pub fn engine(&self) -> &str {
        if cfg!(target_arch = "aarch64") {
            self.strongsort_container_arm64
                .as_deref()
                .unwrap_or(&self.strongsort_container)
        } else {
            &self.strongsort_container
        }
    }
}

/// Settings for the local-model upload monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSyncConfig {
    /// Seconds between sync polls.
    pub check_every: u64,
    /// Local directory watched for model files.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the SQLite job store.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "plain".to_string()
}

impl Config {
    /// Load from a yaml file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables take precedence over the yaml file for the
    /// values that differ per deployment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bucket) = env::var("ROOT_BUCKET") {
            self.minio.root_bucket = bucket;
        }
        if let Ok(prefix) = env::var("TRACK_PREFIX") {
            self.minio.track_prefix = prefix;
        }
        if let Ok(prefix) = env::var("MODEL_PREFIX") {
            self.minio.model_prefix = prefix;
        }
        if let Ok(dir) = env::var("MODEL_DIR") {
            self.monitors.models.path = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("DATABASE_DIR") {
            self.database.path = PathBuf::from(dir);
        }
    }

    /// Scratch root for per-job input/output directories.
    pub fn temp_dir(&self) -> PathBuf {
        match env::var("TEMP_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => PathBuf::from("tmp"),
        }
    }
}

/// Webhook target, when notifications are enabled.
pub fn notify_url() -> Option<String> {
    env::var("NOTIFY_URL").ok().filter(|url| !url.is_empty())
}

/// GPUs available to worker containers.
pub fn num_gpus() -> u32 {
    env::var("NUM_GPUS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}

/// Default location of `config.yml`, next to the binary's working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("config.yml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
minio:
  root_bucket: m3-video-processing
  model_prefix: models
  video_prefix: videos
  track_prefix: tracks
defaults:
  args: "--conf-thres 0.2"
  video_url: http://localhost:8090/video/V4361.mp4
monitors:
  docker:
    check_every: 15
    strongsort_container: mbari/strongsort-yolov5:latest
    strongsort_container_arm64: mbari/strongsort-yolov5:latest-arm64
    strongsort_track_config: s3://m3-video-processing/models/track-config/strong_sort_benthic.yaml
  models:
    check_every: 30
    path: ./models
database:
  path: ./db
log:
  level: debug
  format: plain
"#;

    #[test]
    fn parses_full_config() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.minio.root_bucket, "m3-video-processing");
        assert_eq!(config.monitors.docker.check_every, 15);
        assert_eq!(config.monitors.docker.max_concurrent, 1);
        assert_eq!(config.monitors.models.path, PathBuf::from("./models"));
        assert_eq!(config.defaults.args, "--conf-thres 0.2");
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn defaults_section_is_optional() {
        let trimmed = SAMPLE.replace(
            "defaults:\n  args: \"--conf-thres 0.2\"\n  video_url: http://localhost:8090/video/V4361.mp4\n",
            "",
        );
        let config: Config = serde_yaml::from_str(&trimmed).unwrap();
        assert_eq!(config.defaults.args, DEFAULT_TRACK_ARGS);
        assert!(config.defaults.video_url.is_none());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.minio.track_prefix, "tracks");
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load(Path::new("/nonexistent/config.yml")).unwrap_err();
        assert!(err.to_string().contains("config.yml"));
    }
}

//! Local-model upload monitor.
//!
//! New model files dropped into the configured directory are pushed to the
//! models prefix so the control plane's catalog picks them up on its next
//! refresh. Existing keys are skipped via a HEAD check.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use localtrack_objectstore::{ObjectStoreGateway, MODEL_SUFFIXES};

use crate::dispatcher::Monitor;

pub struct ModelSyncMonitor {
    gateway: ObjectStoreGateway,
    root_bucket: String,
    model_prefix: String,
    model_dir: PathBuf,
    check_every: Duration,
}

impl ModelSyncMonitor {
    pub fn new(
        gateway: ObjectStoreGateway,
        root_bucket: String,
        model_prefix: String,
        model_dir: PathBuf,
        check_every: u64,
    ) -> Self {
        Self {
            gateway,
            root_bucket,
            model_prefix,
            model_dir,
            check_every: Duration::from_secs(check_every),
        }
    }
}

#[async_trait]
impl Monitor for ModelSyncMonitor {
    fn name(&self) -> &'static str {
        "model-sync"
    }

    fn check_every(&self) -> Duration {
        self.check_every
    }

    async fn check(&mut self) -> Result<()> {
        let uploaded = self
            .gateway
            .upload_dir_by_suffix(
                &self.model_dir,
                &self.root_bucket,
                &self.model_prefix,
                MODEL_SUFFIXES,
            )
            .await?;
        if uploaded > 0 {
            info!(
                "Synced {uploaded} model(s) from {} to s3://{}/{}",
                self.model_dir.display(),
                self.root_bucket,
                self.model_prefix
            );
        }
        Ok(())
    }
}

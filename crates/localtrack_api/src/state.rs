//! Shared handler state and the model-catalog source seam.

use anyhow::Result;
use async_trait::async_trait;

use localtrack_config::DefaultsConfig;
use localtrack_objectstore::{ModelCatalog, ObjectStoreGateway};
use localtrack_store::JobStore;

use crate::probe::VideoProbe;

/// Where the model catalog comes from. A seam so router tests can use a
/// fixed catalog without an object store.
#[async_trait]
pub trait ModelSource: Send + Sync {
    async fn fetch(&self) -> Result<ModelCatalog>;
}

/// Production source: list the models prefix on every refresh.
pub struct S3ModelSource {
    gateway: ObjectStoreGateway,
    bucket: String,
    model_prefix: String,
}

impl S3ModelSource {
    pub fn new(gateway: ObjectStoreGateway, bucket: String, model_prefix: String) -> Self {
        Self {
            gateway,
            bucket,
            model_prefix,
        }
    }
}

#[async_trait]
impl ModelSource for S3ModelSource {
    async fn fetch(&self) -> Result<ModelCatalog> {
        ModelCatalog::fetch(&self.gateway, &self.bucket, &self.model_prefix).await
    }
}

pub struct AppState {
    pub store: JobStore,
    pub models: Box<dyn ModelSource>,
    pub probe: Box<dyn VideoProbe>,
    /// Container image reference recorded on each admitted job.
    pub engine: String,
    pub defaults: DefaultsConfig,
}

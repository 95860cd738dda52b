//! Environment-sourced settings that never live in the yaml file.

use anyhow::{bail, Result};
use std::env;

/// Object-store connection settings. Credentials are environment-only so
/// they stay out of checked-in configuration.
#[derive(Debug, Clone)]
pub struct ObjectStoreEnv {
    pub endpoint_url: String,
    pub access_key: String,
    pub secret_key: String,
    /// Endpoint as seen from inside worker containers, when it differs from
    /// the host view (e.g. host `localhost:9000` vs a compose network alias).
    pub external_endpoint_url: Option<String>,
    pub region: String,
}

impl ObjectStoreEnv {
    pub fn from_env() -> Result<Self> {
        let endpoint_url = match env::var("MINIO_ENDPOINT_URL") {
            Ok(url) if !url.is_empty() => url,
            _ => bail!("MINIO_ENDPOINT_URL environment variable must be set"),
        };
        let access_key = match env::var("MINIO_ACCESS_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("MINIO_ACCESS_KEY environment variable must be set"),
        };
        let secret_key = match env::var("MINIO_SECRET_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("MINIO_SECRET_KEY environment variable must be set"),
        };

        Ok(Self {
            endpoint_url,
            access_key,
            secret_key,
            external_endpoint_url: env::var("MINIO_EXTERNAL_ENDPOINT_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            region: env::var("AWS_DEFAULT_REGION").unwrap_or_else(|_| "us-west-2".to_string()),
        })
    }

    /// Endpoint to hand to worker containers.
    pub fn container_endpoint(&self) -> &str {
        self.external_endpoint_url
            .as_deref()
            .unwrap_or(&self.endpoint_url)
    }
}

/// Deployment mode. Prod swaps host-path binds for a named scratch volume so
/// nested-container setups can share job directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dev,
    Prod,
}

impl Mode {
    pub fn from_env() -> Self {
        match env::var("MODE").as_deref() {
            Ok("prod") => Mode::Prod,
            _ => Mode::Dev,
        }
    }
}

//! Container runtime access.
//!
//! All workers are named `{prefix}-{timestamp}`, and the runtime's container
//! list filtered by that prefix is the authoritative concurrency counter:
//! it survives daemon restarts, unlike any in-memory table.

use anyhow::{Context, Result};
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerSummary, DeviceRequest, HostConfig};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Reserved name prefix for worker containers.
pub const CONTAINER_NAME_PREFIX: &str = "strongsort";

/// Launch parameters for one worker container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub gpu: bool,
}

#[derive(Clone)]
pub struct ContainerRuntime {
    docker: Docker,
}

impl ContainerRuntime {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to the container runtime")?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .context("Container runtime did not answer ping")?;
        Ok(())
    }

    /// Pull the image if it is not already present locally.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(err) => return Err(err).with_context(|| format!("Failed to inspect image {image}")),
        }

        info!("Pulling image {image}");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            progress.with_context(|| format!("Failed to pull image {image}"))?;
        }
        Ok(())
    }

    /// Create and start a detached worker container; host networking so the
    /// worker reaches a local object store endpoint.
    pub async fn start_detached(&self, spec: ContainerSpec) -> Result<String> {
        self.ensure_image(&spec.image).await?;

        let mut device_requests = None;
        if spec.gpu {
            device_requests = Some(vec![DeviceRequest {
                driver: Some("nvidia".to_string()),
                count: Some(-1),
                capabilities: Some(vec![vec!["gpu".to_string()]]),
                ..Default::default()
            }]);
        }

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(spec.env.clone()),
            host_config: Some(HostConfig {
                network_mode: Some("host".to_string()),
                binds: Some(spec.binds.clone()),
                device_requests,
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .with_context(|| format!("Failed to create container {}", spec.name))?;

        self.docker
            .start_container::<String>(&spec.name, None)
            .await
            .with_context(|| format!("Failed to start container {}", spec.name))?;

        info!(
            "Started container {} ({}) with command {:?}",
            spec.name, response.id, spec.command
        );
        Ok(response.id)
    }

    /// Whether the named container is currently running. A missing container
    /// counts as not running.
    pub async fn is_running(&self, name: &str) -> Result<bool> {
        match self.docker.inspect_container(name, None).await {
            Ok(details) => Ok(details
                .state
                .and_then(|state| state.running)
                .unwrap_or(false)),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to inspect container {name}"))
            }
        }
    }

    /// All containers (any state) whose name starts with the prefix.
    pub async fn list_prefixed(&self, prefix: &str) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        // Docker names carry a leading slash in list responses.
        filters.insert("name".to_string(), vec![format!("^/{prefix}")]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        self.docker
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")
    }

    /// Live workers counted against the concurrency bound.
    pub async fn count_running_prefixed(&self, prefix: &str) -> Result<usize> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![format!("^/{prefix}")]);
        filters.insert(
            "status".to_string(),
            vec!["created".to_string(), "restarting".to_string(), "running".to_string()],
        );
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .context("Failed to list running containers")?;
        Ok(containers.len())
    }

    /// Collected stdout+stderr, for post-exit debugging.
    pub async fn logs(&self, name: &str) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(name, Some(options));
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => collected.push_str(&output.to_string()),
                Err(err) => {
                    debug!("Log stream for {name} ended: {err}");
                    break;
                }
            }
        }
        Ok(collected)
    }

    /// Stop (if needed) and remove a container. Not-found is not an error:
    /// reconciliation calls this for containers that may already be gone.
    pub async fn stop_and_remove(&self, name: &str) -> Result<()> {
        match self.docker.stop_container(name, None).await {
            Ok(()) => info!("Stopped container {name}"),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => {} // already stopped
            Err(err) => warn!("Failed to stop container {name}: {err}"),
        }

        match self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {
                info!("Removed container {name}");
                Ok(())
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to remove container {name}")),
        }
    }

    /// Whether a named volume exists (used for the prod scratch volume).
    pub async fn has_volume(&self, name: &str) -> Result<bool> {
        let volumes = self
            .docker
            .list_volumes::<String>(None)
            .await
            .context("Failed to list volumes")?;
        Ok(volumes
            .volumes
            .unwrap_or_default()
            .iter()
            .any(|volume| volume.name == name))
    }
}

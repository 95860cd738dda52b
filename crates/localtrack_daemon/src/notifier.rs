//! Completion webhook.
//!
//! Subscribers get exactly one multipart POST per terminal transition:
//! `metadata` carries the caller's JSON, `file` carries the result archive
//! bytes, empty when the job failed. Delivery failures are logged and never
//! affect the stored job state.

use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use std::path::Path;
use tracing::{error, info, warn};

use localtrack_store::{decode_metadata, JobRecord};

pub struct Notifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl Notifier {
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// POST the terminal notification for a job. `archive` is the result
    /// archive on success, `None` on failure (an empty file part is sent so
    /// the body shape stays stable).
    pub async fn notify(&self, job: &JobRecord, archive: Option<&Path>) -> Result<()> {
        let Some(url) = &self.url else {
            warn!("NOTIFY_URL not set, skipping notification for job {}", job.id);
            return Ok(());
        };

        let metadata = decode_metadata(job.metadata_b64.as_deref()).unwrap_or_else(|err| {
            warn!("Job {} metadata is undecodable: {err:#}", job.id);
            serde_json::json!({})
        });

        let (bytes, file_name) = match archive {
            Some(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read archive {}", path.display()))?;
                let name = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or("results.tar.gz")
                    .to_string();
                (bytes, name)
            }
            None => (Vec::new(), "empty.tar.gz".to_string()),
        };

        let form = Form::new()
            .part(
                "metadata",
                Part::text(metadata.to_string())
                    .mime_str("application/json")
                    .context("Invalid metadata mime type")?,
            )
            .part(
                "file",
                Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("application/gzip")
                    .context("Invalid archive mime type")?,
            );

        info!("Sending notification for job {} to {url}", job.id);
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Failed to POST notification to {url}"))?;

        if response.status().is_success() {
            info!("Notification for job {} delivered", job.id);
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Notification for job {} rejected: {status} {body}", job.id);
        }
        Ok(())
    }
}

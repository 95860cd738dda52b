//! Thin wrapper over the S3 client for the handful of operations the
//! system needs: list, head, upload, and a write-probe used at startup.

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use localtrack_config::ObjectStoreEnv;

#[derive(Clone)]
pub struct ObjectStoreGateway {
    client: Client,
}

impl ObjectStoreGateway {
    /// Build a client against the configured endpoint.
    pub async fn connect(env: &ObjectStoreEnv) -> Self {
        let credentials = Credentials::new(
            env.access_key.clone(),
            env.secret_key.clone(),
            None,
            None,
            "localtrack",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(env.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(env.endpoint_url.clone())
            .load()
            .await;

        // Path-style addressing: MinIO does not serve virtual-host buckets.
        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(true)
                .build(),
        );
        Self { client }
    }

    /// List objects under a prefix whose key ends in one of the suffixes,
    /// returned as `s3://bucket/key` URIs in listing order.
    pub async fn list_by_suffix(
        &self,
        bucket: &str,
        prefix: &str,
        suffixes: &[&str],
    ) -> Result<Vec<String>> {
        debug!("Listing objects in s3://{bucket}/{prefix}");
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .send()
            .await
            .with_context(|| format!("Failed to list s3://{bucket}/{prefix}"))?;

        let mut uris = Vec::new();
        for object in response.contents() {
            let Some(key) = object.key() else { continue };
            if has_suffix(Path::new(key), suffixes) {
                uris.push(format!("s3://{bucket}/{key}"));
            }
        }
        debug!("Found {} matching objects in s3://{bucket}/{prefix}", uris.len());
        Ok(uris)
    }

    /// HEAD an object; Ok(false) when the key does not exist.
    pub async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(anyhow::Error::new(service_err))
                        .with_context(|| format!("Failed to head s3://{bucket}/{key}"))
                }
            }
        }
    }

    /// Upload one file, skipping the transfer when the key already exists.
    /// Returns true only when bytes were actually sent.
    pub async fn upload_file(&self, path: &Path, bucket: &str, key: &str) -> Result<bool> {
        if self.object_exists(bucket, key).await? {
            debug!("Object s3://{bucket}/{key} already exists, skipping upload");
            return Ok(false);
        }

        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to upload {} to s3://{bucket}/{key}", path.display()))?;
        info!("Uploaded {} to s3://{bucket}/{key}", path.display());
        Ok(true)
    }

    /// Upload every file under `dir` (recursively) whose name ends in one of
    /// the suffixes, to `{prefix}/{file name}`. Returns the number of files
    /// actually transferred.
    pub async fn upload_dir_by_suffix(
        &self,
        dir: &Path,
        bucket: &str,
        prefix: &str,
        suffixes: &[&str],
    ) -> Result<usize> {
        if !dir.exists() {
            debug!("Upload source {} does not exist", dir.display());
            return Ok(0);
        }
        let files = collect_files(dir, suffixes)
            .with_context(|| format!("Failed to walk {}", dir.display()))?;

        let mut uploaded = 0;
        for file in files {
            let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let key = format!("{prefix}/{name}");
            if self.upload_file(&file, bucket, &key).await? {
                uploaded += 1;
            }
        }
        Ok(uploaded)
    }

    /// Startup probe: write a small marker object so misconfigured
    /// credentials or endpoints fail fast instead of at first job.
    pub async fn verify_upload(&self, bucket: &str, prefix: &str) -> Result<()> {
        let key = format!("{prefix}/check.txt");
        self.client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .body(ByteStream::from_static(b"testing object store upload"))
            .send()
            .await
            .with_context(|| format!("Upload probe to s3://{bucket}/{key} failed"))?;
        info!("Upload probe to s3://{bucket}/{key} succeeded");
        Ok(())
    }
}

/// Suffix match on the file name, so `.gz` also matches `.tar.gz` members.
pub fn has_suffix(path: &Path, suffixes: &[&str]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    suffixes.iter().any(|suffix| name.ends_with(suffix))
}

fn collect_files(dir: &Path, suffixes: &[&str]) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if has_suffix(&path, suffixes) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

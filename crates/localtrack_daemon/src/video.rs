//! Video download into a runner's input directory.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Stream a video to `dest_dir`, named after the last URL path segment.
pub async fn download_video(
    client: &reqwest::Client,
    url: &str,
    dest_dir: &Path,
) -> Result<PathBuf> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to request {url}"))?;
    if !response.status().is_success() {
        bail!("Failed to download {url}: HTTP {}", response.status());
    }

    let file_name = file_name_for(url);
    let dest = dest_dir.join(&file_name);
    let mut file = tokio::fs::File::create(&dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut stream = response.bytes_stream();
    let mut bytes_written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("Failed while downloading {url}"))?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;

    info!("Downloaded {url} to {} ({bytes_written} bytes)", dest.display());
    Ok(dest)
}

fn file_name_for(url: &str) -> String {
    let tail = url
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("video.mp4");
    // Strip any query string left on the last segment.
    tail.split('?').next().unwrap_or(tail).to_string()
}

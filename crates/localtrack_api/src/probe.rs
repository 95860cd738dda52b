//! Video reachability probe.

use async_trait::async_trait;
use tracing::info;

/// HEAD-checks a video URL before a job is admitted.
#[async_trait]
pub trait VideoProbe: Send + Sync {
    async fn is_available(&self, url: &str) -> bool;
}

/// Probe backed by a real HTTP client. Any 2xx counts as reachable.
pub struct HttpVideoProbe {
    client: reqwest::Client,
}

impl HttpVideoProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VideoProbe for HttpVideoProbe {
    async fn is_available(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Video {url} is available");
                true
            }
            Ok(response) => {
                info!("Video {url} is not available: {}", response.status());
                false
            }
            Err(err) => {
                info!("Video {url} is not reachable: {err}");
                false
            }
        }
    }
}

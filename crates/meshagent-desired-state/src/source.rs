//! Manifest sources

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use meshagent_common::{Error, Result};

/// Upper bound on one manifest fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the desired-state manifest comes from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Fetch the current manifest text
    async fn fetch(&self) -> Result<String>;
}

/// Fetches `<base>/<agent>` over HTTP
pub struct HttpManifestSource {
    client: reqwest::Client,
    url: String,
}

impl HttpManifestSource {
    /// Source for the given backend and agent name
    pub fn new(base_url: &str, agent_name: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::transport(base_url, format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: manifest_url(base_url, agent_name),
        })
    }

    /// URL this source fetches
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// `<base>/<agent>`, tolerating a trailing slash on the base
pub fn manifest_url(base_url: &str, agent_name: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), agent_name)
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch(&self) -> Result<String> {
        debug!(url = %self.url, "fetching desired-state manifest");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::transport(&self.url, format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(
                &self.url,
                format!("unexpected status {}: {}", status, body),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| Error::transport(&self.url, format!("failed to read body: {}", e)))
    }
}

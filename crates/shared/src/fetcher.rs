use async_trait::async_trait;
use reqwest::Client;

use crate::error::PipelineError;

#[async_trait]
pub trait Fetch: Send + Sync {
    /// Body of `url`. Non-2xx responses and transport failures are
    /// `PipelineError::Network`.
    async fn fetch(&self, url: &str) -> Result<String, PipelineError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; BlogRelay/1.0)")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, PipelineError> {
        let network = |message: String| PipelineError::Network {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(network(format!("HTTP error: {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| network(format!("failed to read response body: {}", e)))
    }
}

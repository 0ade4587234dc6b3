use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::warn;

use super::{LoadError, ManifestLoader};

/// HTTP-based manifest loader with connection pooling. Redirects are
/// followed (reqwest default policy) and no auth headers are attached.
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: Client,
}

impl HttpLoader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Self::build_client(timeout),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &crate::config::MonitorConfig) -> Self {
        Self::new(config.request_timeout)
    }

    pub fn build_client(timeout: Duration) -> Client {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(20)
            .gzip(true)
            .build()
            .expect("Failed to build HTTP client")
    }
}

impl Default for HttpLoader {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ManifestLoader for HttpLoader {
    async fn load(&self, uri: &str) -> Result<String, LoadError> {
        match self.client.get(uri).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    response.text().await.map_err(|e| LoadError::Network {
                        url: uri.to_string(),
                        reason: e.to_string(),
                    })
                } else {
                    warn!(uri, status = status.as_u16(), "Manifest fetch returned error status");
                    Err(LoadError::Http {
                        url: uri.to_string(),
                        status: status.as_u16(),
                        message: status.canonical_reason().unwrap_or("Unknown").to_string(),
                    })
                }
            }
            Err(e) => {
                if e.is_timeout() {
                    warn!(uri, "Manifest fetch timed out");
                    Err(LoadError::Timeout {
                        url: uri.to_string(),
                    })
                } else {
                    warn!(uri, error = %e, "Manifest fetch network error");
                    Err(LoadError::Network {
                        url: uri.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}

mod http;

pub use http::HttpLoader;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("HTTP error {status} fetching {url}: {message}")]
    Http {
        url: String,
        status: u16,
        message: String,
    },
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("Parse error for {url}: {message}")]
    Parse { url: String, message: String },
    #[error("Timeout fetching {url}")]
    Timeout { url: String },
}

impl LoadError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Trait for loading HLS manifests from a URI.
///
/// Implementations handle the HTTP round trip and return raw manifest text.
/// Failures are not retried here; a stream that fails a fetch is picked up
/// again on the next sweep.
#[async_trait]
pub trait ManifestLoader: Send + Sync {
    async fn load(&self, uri: &str) -> Result<String, LoadError>;
}

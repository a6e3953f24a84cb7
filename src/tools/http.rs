//! Remote fetch over HTTP(S).

use super::{FetchedResource, Fetcher};
use crate::error::PrepError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// [`Fetcher`] backed by a shared `reqwest::Client`.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, PrepError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pdfprep/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PrepError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> PrepError {
        if e.is_timeout() {
            PrepError::FetchTimeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            }
        } else {
            PrepError::FetchFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, PrepError> {
        info!("Fetching document from: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(url, e))?;

        if !response.status().is_success() {
            return Err(PrepError::FetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(url, e))?;

        debug!("Fetched {} bytes ({:?})", bytes.len(), content_type);
        Ok(FetchedResource {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// `text/html; charset=utf-8` → `text/html`.
fn media_type(header: &str) -> String {
    header
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

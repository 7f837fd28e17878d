//! HTTP transport for the softener's `mux_http` endpoint
//!
//! The device is a single low-traffic embedded host, so connections are not
//! kept alive between fetches: each request opens its own connection and
//! releases it when the response (or error) is dropped.

use crate::client::{FetchRequest, SoftenerClient};
use crate::config::PollerConfig;
use crate::error::{GruenbeckError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// HTTP client for one softener
#[derive(Debug, Clone)]
pub struct SoftenerHttpClient {
    /// HTTP client instance
    client: Client,

    /// Full endpoint URL
    endpoint: Url,
}

impl SoftenerHttpClient {
    /// Create a client from poller configuration
    pub fn new(config: &PollerConfig) -> Result<Self> {
        Self::with_endpoint(config.endpoint()?, config.timeout)
    }

    /// Create a client for an explicit endpoint URL
    pub fn with_endpoint(endpoint: Url, timeout: Duration) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));

        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(0)
            .user_agent(format!("gruenbeck-telemetry/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(default_headers)
            .build()
            .map_err(|e| GruenbeckError::connection(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    fn map_send_error(&self, e: reqwest::Error) -> GruenbeckError {
        let error_msg = format!("POST {} failed: {e}", self.endpoint);
        if e.is_timeout() {
            GruenbeckError::timeout(error_msg)
        } else if e.is_connect() {
            GruenbeckError::connection(error_msg)
        } else {
            GruenbeckError::Http(e)
        }
    }
}

#[async_trait]
impl SoftenerClient for SoftenerHttpClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<String> {
        let body = request.query();
        debug!("POST {} {}", self.endpoint, body);

        let response = self
            .client
            .post(self.endpoint.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GruenbeckError::connection(format!(
                "Device answered with HTTP {status}"
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if text.is_empty() {
            return Err(GruenbeckError::EmptyResponse);
        }

        debug!("Received {} bytes from {}", text.len(), self.endpoint);
        Ok(text)
    }

    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }
}

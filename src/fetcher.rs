//! One-shot status call against the control plane

use crate::config::MaintenanceConfig;
use crate::error::{ConfigError, FetchError};
use crate::identity::{user_agent, UpdatePackage};
use crate::status::RawStatus;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::future::Future;
use tracing::debug;

/// Something that can answer "what is the current switch status"
pub trait StatusSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<RawStatus, FetchError>> + Send;
}

/// Fetches the status over HTTP with reqwest
pub struct StatusFetcher {
    client: reqwest::Client,
    url: String,
    jwt: String,
    logging: bool,
}

impl StatusFetcher {
    /// Build a fetcher for the configured status URL.
    ///
    /// Fails with `MissingCredential` when no token is configured.
    pub fn new(config: &MaintenanceConfig) -> Result<Self, ConfigError> {
        let jwt = config.credential()?.to_string();

        // reqwest 0.11 has no separate read timeout; the total timeout bounds the read.
        let client = reqwest::Client::builder()
            .connect_timeout(config.read_timeout())
            .timeout(config.read_timeout())
            .user_agent(user_agent())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.status_url(),
            jwt,
            logging: config.logging,
        })
    }

    async fn fetch_status(&self) -> Result<RawStatus, FetchError> {
        let payload = serde_json::to_vec(&UpdatePackage::collect(self.logging))?;

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, &self.jwt)
            .body(payload)
            .send()
            .await?
            .error_for_status()?;

        let body = response.bytes().await?;
        if self.logging {
            debug!(url = %self.url, bytes = body.len(), "Received status response");
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

impl StatusSource for StatusFetcher {
    fn fetch(&self) -> impl Future<Output = Result<RawStatus, FetchError>> + Send {
        self.fetch_status()
    }
}

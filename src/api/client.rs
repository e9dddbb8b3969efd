//! HTTP client for the detection API alert endpoint. Issues one paginated
//! request per call and classifies the response for the harvest loop.

use crate::api::auth::build_auth_headers;
use crate::api::options::{ClientOptions, FOLLOW_PARAM};
use crate::api::payload::decode_batch;
use crate::model::{AlertBatch, Cursor};
use crate::runtime::config::HarvesterConfig;
use anyhow::{anyhow, Result};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Non-fatal result of one fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    Batch(AlertBatch),
    /// The API asked us to slow down; retry the same cursor later.
    RateLimited,
}

/// Fetch failures. Every variant aborts the harvest loop.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("alert API responded with unexpected status {status}")]
    Status { status: StatusCode },

    #[error("alert API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode alert API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("alert API response exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },
}

#[derive(Debug, Clone)]
pub struct AlertClient {
    endpoint: Arc<String>,
    client: Client,
    options: ClientOptions,
}

impl AlertClient {
    pub fn new(endpoint: impl Into<String>, api_key: &str) -> Result<Self> {
        Self::with_options(endpoint, api_key, ClientOptions::default())
    }

    pub fn with_options(
        endpoint: impl Into<String>,
        api_key: &str,
        options: ClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let headers = build_auth_headers(api_key)?;
        let client = Client::builder()
            .default_headers(headers)
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| anyhow!("failed to build alert API client: {err}"))?;

        Ok(Self {
            endpoint: Arc::new(endpoint.into()),
            client,
            options,
        })
    }

    pub fn from_config(config: &HarvesterConfig) -> Result<Self> {
        config.validate()?;
        let options = ClientOptions {
            request_timeout: config.request_timeout(),
            max_response_bytes: config.max_response_bytes(),
        };
        Self::with_options(config.api_url().to_owned(), config.api_key(), options)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetches the page that follows `cursor`. An empty cursor requests the
    /// start of retained history and sends no `follow` parameter.
    pub async fn fetch(&self, cursor: &Cursor) -> Result<FetchOutcome, FetchError> {
        let mut request = self.client.get(self.endpoint.as_str());
        if !cursor.is_start() {
            request = request.query(&[(FOLLOW_PARAM, cursor.as_str())]);
        }

        let start = Instant::now();
        let mut response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::info!(
                follow = %cursor,
                elapsed_ms = elapsed_millis(start),
                "alert API rate limited; retrying cursor after backoff"
            );
            return Ok(FetchOutcome::RateLimited);
        }

        if status != StatusCode::OK {
            return Err(FetchError::Status { status });
        }

        let limit = self.options.max_response_bytes;
        let declared = response.content_length();
        if declared.is_some_and(|length| length > limit as u64) {
            return Err(FetchError::ResponseTooLarge { limit });
        }

        let mut body = Vec::with_capacity(declared.map_or(0, |length| length as usize));
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::ResponseTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        let batch = decode_batch(&body)?;
        tracing::debug!(
            follow = %cursor,
            next = %batch.cursor,
            more = batch.has_more,
            alerts = batch.alerts.len(),
            bytes = body.len(),
            elapsed_ms = elapsed_millis(start),
            "fetched alert batch"
        );
        Ok(FetchOutcome::Batch(batch))
    }
}

fn elapsed_millis(start: Instant) -> u64 {
    start.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

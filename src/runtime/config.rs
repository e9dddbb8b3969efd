use crate::api::options::{DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::runtime::checkpoint::DEFAULT_STREAM_ID;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MIN_BACKOFF_SECS: u64 = 1;
const DEFAULT_MAX_BACKOFF_SECS: u64 = 60;
const DEFAULT_CHECKPOINT_FLUSH_INTERVAL_SECS: u64 = 60;
const DEFAULT_CHECKPOINT_MAX_PENDING: usize = 1;

/// Runtime configuration for the alert harvester.
///
/// All instances must be constructed via [`HarvesterConfig::builder`] or [`HarvesterConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvesterConfig {
    api_url: String,
    api_key: String,
    checkpoint_path: PathBuf,
    stream_id: String,
    min_backoff: Duration,
    max_backoff: Duration,
    request_timeout: Duration,
    max_response_bytes: usize,
    checkpoint_flush_interval: Duration,
    checkpoint_max_pending: usize,
    metrics_interval: Duration,
}

pub struct HarvesterConfigParams {
    pub api_url: String,
    pub api_key: String,
    pub checkpoint_path: PathBuf,
    pub stream_id: String,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub request_timeout: Duration,
    pub max_response_bytes: usize,
    pub checkpoint_flush_interval: Duration,
    pub checkpoint_max_pending: usize,
    pub metrics_interval: Duration,
}

impl HarvesterConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> HarvesterConfigBuilder {
        HarvesterConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`HarvesterConfig::builder`] when most values use defaults.
    pub fn new(params: HarvesterConfigParams) -> Result<Self> {
        let HarvesterConfigParams {
            api_url,
            api_key,
            checkpoint_path,
            stream_id,
            min_backoff,
            max_backoff,
            request_timeout,
            max_response_bytes,
            checkpoint_flush_interval,
            checkpoint_max_pending,
            metrics_interval,
        } = params;

        let config = Self {
            api_url: trimmed_string(api_url),
            api_key: trimmed_string(api_key),
            checkpoint_path,
            stream_id: trimmed_string(stream_id),
            min_backoff,
            max_backoff,
            request_timeout,
            max_response_bytes,
            checkpoint_flush_interval,
            checkpoint_max_pending,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Full alert endpoint URL (including scheme).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Credential attached to every request.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// File holding the persisted cursor.
    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Logical stream identity the cursor is recorded under.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Delay before the first poll and after every page that reports more data.
    pub fn min_backoff(&self) -> Duration {
        self.min_backoff
    }

    /// Ceiling for the idle poll delay.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Per-request deadline applied by the HTTP client.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }

    /// Longest a pending cursor update may wait before the flusher writes it.
    pub fn checkpoint_flush_interval(&self) -> Duration {
        self.checkpoint_flush_interval
    }

    /// Pending cursor updates that force an immediate write.
    pub fn checkpoint_max_pending(&self) -> usize {
        self.checkpoint_max_pending
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.api_url)?;
        ensure_not_empty(&self.api_key, "api_key")?;
        ensure_not_empty(&self.stream_id, "stream_id")?;

        if self.checkpoint_path.as_os_str().is_empty() {
            bail!("checkpoint_path cannot be empty");
        }

        if self.min_backoff.is_zero() {
            bail!("min_backoff must be greater than 0");
        }

        if self.max_backoff < self.min_backoff {
            bail!(
                "max_backoff ({:?}) must be at least min_backoff ({:?})",
                self.max_backoff,
                self.min_backoff
            );
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.max_response_bytes == 0 {
            bail!("max_response_bytes must be greater than 0");
        }

        if self.checkpoint_flush_interval.is_zero() {
            bail!("checkpoint_flush_interval must be greater than 0");
        }

        if self.checkpoint_max_pending == 0 {
            bail!("checkpoint_max_pending must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct HarvesterConfigBuilder {
    api_url: Option<String>,
    api_key: Option<String>,
    checkpoint_path: Option<PathBuf>,
    stream_id: Option<String>,
    min_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    request_timeout: Option<Duration>,
    max_response_bytes: Option<usize>,
    checkpoint_flush_interval: Option<Duration>,
    checkpoint_max_pending: Option<usize>,
    metrics_interval: Option<Duration>,
}

impl HarvesterConfigBuilder {
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn stream_id(mut self, stream: impl Into<String>) -> Self {
        self.stream_id = Some(stream.into());
        self
    }

    pub fn min_backoff(mut self, backoff: Duration) -> Self {
        self.min_backoff = Some(backoff);
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = Some(bytes);
        self
    }

    pub fn checkpoint_flush_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_flush_interval = Some(interval);
        self
    }

    pub fn checkpoint_max_pending(mut self, updates: usize) -> Self {
        self.checkpoint_max_pending = Some(updates);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<HarvesterConfig> {
        let params = HarvesterConfigParams {
            api_url: self.api_url.context("api_url is required")?,
            api_key: self.api_key.context("api_key is required")?,
            checkpoint_path: self
                .checkpoint_path
                .context("checkpoint_path is required")?,
            stream_id: self
                .stream_id
                .unwrap_or_else(|| DEFAULT_STREAM_ID.to_owned()),
            min_backoff: self
                .min_backoff
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_MIN_BACKOFF_SECS)),
            max_backoff: self
                .max_backoff
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS)),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            max_response_bytes: self
                .max_response_bytes
                .unwrap_or(DEFAULT_MAX_RESPONSE_BYTES),
            checkpoint_flush_interval: self
                .checkpoint_flush_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_CHECKPOINT_FLUSH_INTERVAL_SECS)),
            checkpoint_max_pending: self
                .checkpoint_max_pending
                .unwrap_or(DEFAULT_CHECKPOINT_MAX_PENDING),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        HarvesterConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("api_url must start with http:// or https://");
    }
    Ok(())
}

use std::env;
use std::str::FromStr;
use std::time::Duration;

use alert_harvester::{
    EventPublisher, HarvesterConfig, NormalizedEvent, PublishFuture, PublisherError,
    PublisherStage, Runner,
};
use anyhow::{ensure, Context, Result};
use tokio::io::{AsyncWriteExt, Stdout};

const DEFAULT_CHECKPOINT_PATH: &str = "alert-harvester-checkpoint.json";
const DEFAULT_MIN_BACKOFF_SECS: u64 = 1;
const DEFAULT_MAX_BACKOFF_SECS: u64 = 60;
const DEFAULT_LOG_DIRECTIVE: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    init_demo_tracing();

    let config = demo_config_from_env()?;
    tracing::info!(
        api_url = config.api_url(),
        checkpoint = %config.checkpoint_path().display(),
        "starting stdout harvest"
    );

    let mut runner = Runner::new(config, StdoutPublisher::new());
    let telemetry = runner.telemetry();
    let outcome = runner.run_until_ctrl_c().await;

    let snapshot = telemetry.snapshot();
    eprintln!(
        "harvested {} alerts into {} events across {} batches ({} rate limited, {} skipped)",
        snapshot.alerts_processed,
        snapshot.events_published,
        snapshot.batches_fetched,
        snapshot.rate_limited,
        snapshot.alerts_skipped,
    );
    outcome
}

fn init_demo_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    alert_harvester::init_tracing();
}

fn demo_config_from_env() -> Result<HarvesterConfig> {
    let api_url = read_env_or_default("ALERT_HARVESTER_API_URL", "");
    let api_key = read_env_or_default("ALERT_HARVESTER_API_KEY", "");
    ensure!(!api_url.is_empty(), "ALERT_HARVESTER_API_URL must be set");
    ensure!(!api_key.is_empty(), "ALERT_HARVESTER_API_KEY must be set");

    let checkpoint_path =
        read_env_or_default("ALERT_HARVESTER_CHECKPOINT_PATH", DEFAULT_CHECKPOINT_PATH);
    let min_backoff = parse_env_with_default::<u64>(
        "ALERT_HARVESTER_MIN_BACKOFF_SECS",
        DEFAULT_MIN_BACKOFF_SECS,
    )?;
    let max_backoff = parse_env_with_default::<u64>(
        "ALERT_HARVESTER_MAX_BACKOFF_SECS",
        DEFAULT_MAX_BACKOFF_SECS,
    )?;

    HarvesterConfig::builder()
        .api_url(api_url)
        .api_key(api_key)
        .checkpoint_path(checkpoint_path)
        .min_backoff(Duration::from_secs(min_backoff))
        .max_backoff(Duration::from_secs(max_backoff))
        .build()
}

fn read_env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}

/// Writes each event as one JSON line on stdout.
struct StdoutPublisher {
    out: Stdout,
}

impl StdoutPublisher {
    fn new() -> Self {
        Self {
            out: tokio::io::stdout(),
        }
    }
}

impl EventPublisher for StdoutPublisher {
    fn publish_all<'a>(&'a mut self, events: Vec<NormalizedEvent>) -> PublishFuture<'a> {
        Box::pin(async move {
            let mut buffer = Vec::new();
            for event in &events {
                serde_json::to_writer(&mut buffer, event)
                    .map_err(|err| PublisherError::new(PublisherStage::Publish, err.into()))?;
                buffer.push(b'\n');
            }
            self.out
                .write_all(&buffer)
                .await
                .map_err(|err| PublisherError::new(PublisherStage::Publish, err.into()))
        })
    }

    fn close<'a>(&'a mut self) -> PublishFuture<'a> {
        Box::pin(async move {
            self.out
                .flush()
                .await
                .map_err(|err| PublisherError::new(PublisherStage::Close, err.into()))
        })
    }
}

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use alert_harvester::{
    CheckpointOptions, CheckpointStore, Cursor, EventPublisher, HarvestState, HarvesterConfig,
    NormalizedEvent, PublishFuture, PublisherError, PublisherStage, Telemetry,
};
use anyhow::{anyhow, bail, Result};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use super::mock_api::MockAlertApi;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub const TEST_API_KEY: &str = "secret";
/// `Basic base64("secret:")`
pub const TEST_AUTHORIZATION: &str = "Basic c2VjcmV0Og==";

/// Config with short backoffs that points at `server` and keeps its checkpoint in `dir`.
pub fn test_config(server: &MockAlertApi, dir: &Path) -> Result<HarvesterConfig> {
    HarvesterConfig::builder()
        .api_url(server.url())
        .api_key(TEST_API_KEY)
        .checkpoint_path(dir.join("checkpoint.json"))
        .min_backoff(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(40))
        .request_timeout(Duration::from_secs(5))
        .metrics_interval(Duration::from_millis(50))
        .build()
}

/// Reads the cursor stored for the default stream.
pub fn stored_cursor(config: &HarvesterConfig) -> Result<Cursor> {
    let store = CheckpointStore::open(
        config.checkpoint_path(),
        config.stream_id(),
        CheckpointOptions::default(),
        Arc::new(Telemetry::default()),
    )?;
    Ok(store.state())
}

pub fn seed_cursor(config: &HarvesterConfig, cursor: &str) -> Result<()> {
    let store = CheckpointStore::open(
        config.checkpoint_path(),
        config.stream_id(),
        CheckpointOptions::default(),
        Arc::new(Telemetry::default()),
    )?;
    store.persist(&Cursor::from(cursor));
    store.close()
}

pub fn dns_alert() -> Value {
    json!({
        "eventType": "dns",
        "event": {
            "ts": "2021-04-07T09:55:37Z",
            "srcIP": "10.14.1.39",
            "srcHost": "win-3xchk5-lp",
            "query": "hsxfrfokdkojcj.net",
            "qtype": "A"
        },
        "threats": ["suspicious_domain_volume", "unreachable_domain_volume"],
        "wisdom": {
            "flags": ["perplexing_domain", "unique"],
            "domain": "hsxfrfokdkojcj.net"
        }
    })
}

pub fn ip_alert() -> Value {
    json!({
        "eventType": "ip",
        "event": {
            "ts": "2021-04-07T09:57:17Z",
            "srcIP": "10.100.92.3",
            "srcPort": 52065,
            "destIP": "50.116.17.41",
            "destPort": 8009,
            "proto": "tcp"
        },
        "threats": ["sinkholed_destination"]
    })
}

pub fn threat_catalog() -> Value {
    json!({
        "suspicious_domain_volume": {
            "title": "Multiple requests to suspicious domains",
            "severity": 3,
            "policy": false
        },
        "unreachable_domain_volume": {
            "title": "Multiple requests to unreachable domains",
            "severity": 2
        },
        "sinkholed_destination": {
            "title": "Traffic to a known sinkhole indicating infection",
            "severity": 4
        }
    })
}

#[derive(Default)]
pub struct PublisherState {
    pub connects: usize,
    pub closes: usize,
    pub batches: Vec<usize>,
    pub events: Vec<NormalizedEvent>,
}

/// Publisher that records every hand-off into shared state.
#[derive(Clone)]
pub struct RecordingPublisher {
    state: Arc<Mutex<PublisherState>>,
    fail_publish: bool,
}

impl RecordingPublisher {
    pub fn new() -> (Self, Arc<Mutex<PublisherState>>) {
        let state = Arc::new(Mutex::new(PublisherState::default()));
        (
            Self {
                state: state.clone(),
                fail_publish: false,
            },
            state,
        )
    }

    pub fn failing() -> (Self, Arc<Mutex<PublisherState>>) {
        let (mut publisher, state) = Self::new();
        publisher.fail_publish = true;
        (publisher, state)
    }
}

impl EventPublisher for RecordingPublisher {
    fn connect<'a>(&'a mut self) -> PublishFuture<'a> {
        Box::pin(async move {
            self.state.lock().await.connects += 1;
            Ok(())
        })
    }

    fn publish_all<'a>(&'a mut self, events: Vec<NormalizedEvent>) -> PublishFuture<'a> {
        Box::pin(async move {
            if self.fail_publish {
                return Err(PublisherError::new(
                    PublisherStage::Publish,
                    anyhow!("downstream pipeline rejected {} events", events.len()),
                ));
            }
            let mut state = self.state.lock().await;
            state.batches.push(events.len());
            state.events.extend(events);
            Ok(())
        })
    }

    fn close<'a>(&'a mut self) -> PublishFuture<'a> {
        Box::pin(async move {
            self.state.lock().await.closes += 1;
            Ok(())
        })
    }
}

pub async fn wait_for_events(
    state: &Arc<Mutex<PublisherState>>,
    expected: usize,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let published = state.lock().await.events.len();
        if published >= expected {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for {expected} events (published {published})");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_requests(
    server: &MockAlertApi,
    expected: usize,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let seen = server.request_count();
        if seen >= expected {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for {expected} API requests (saw {seen})");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state(
    states: &mut watch::Receiver<HarvestState>,
    expected: HarvestState,
    timeout: Duration,
) -> Result<()> {
    let wait = states.wait_for(|state| *state == expected);
    match tokio::time::timeout(timeout, wait).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => bail!("harvester state channel closed before reaching {expected:?}"),
        Err(_) => bail!("timed out waiting for harvester state {expected:?}"),
    }
}

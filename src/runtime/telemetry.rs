use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters describing harvest progress.
#[derive(Default, Debug)]
pub struct Telemetry {
    batches_fetched: AtomicU64,
    rate_limited: AtomicU64,
    alerts_processed: AtomicU64,
    alerts_skipped: AtomicU64,
    alerts_without_threats: AtomicU64,
    events_published: AtomicU64,
    checkpoint_writes: AtomicU64,
    checkpoint_failures: AtomicU64,
}

impl Telemetry {
    pub fn record_batch(&self, alerts: usize, skipped: usize) {
        self.batches_fetched.fetch_add(1, Ordering::Relaxed);
        self.alerts_processed
            .fetch_add(alerts as u64, Ordering::Relaxed);
        if skipped > 0 {
            self.alerts_skipped
                .fetch_add(skipped as u64, Ordering::Relaxed);
        }
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alerts_without_threats(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.alerts_without_threats
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_events_published(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.events_published
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_checkpoint_write(&self) {
        self.checkpoint_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint_failure(&self) {
        self.checkpoint_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            batches_fetched: self.batches_fetched.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            alerts_processed: self.alerts_processed.load(Ordering::Relaxed),
            alerts_skipped: self.alerts_skipped.load(Ordering::Relaxed),
            alerts_without_threats: self.alerts_without_threats.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            checkpoint_writes: self.checkpoint_writes.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
        }
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub batches_fetched: u64,
    pub rate_limited: u64,
    pub alerts_processed: u64,
    pub alerts_skipped: u64,
    pub alerts_without_threats: u64,
    pub events_published: u64,
    pub checkpoint_writes: u64,
    pub checkpoint_failures: u64,
}

/// Spawns a background task that periodically logs event throughput and harvest counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "alert_harvester::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let published_delta = current
                        .events_published
                        .saturating_sub(last_snapshot.events_published);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        published_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "alert_harvester::metrics",
                        throughput = format!("{throughput:.2}"),
                        batches = current.batches_fetched,
                        alerts = current.alerts_processed,
                        events = current.events_published,
                        rate_limited = current.rate_limited,
                        alerts_skipped = current.alerts_skipped,
                        alerts_without_threats = current.alerts_without_threats,
                        checkpoint_writes = current.checkpoint_writes,
                        checkpoint_failures = current.checkpoint_failures,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}

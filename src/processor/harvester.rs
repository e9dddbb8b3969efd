//! Alert harvesting loop.
//!
//! `AlertHarvester` owns the cursor and drives one iteration at a time:
//! backoff wait, fetch, normalize, publish, checkpoint. The cursor is only
//! advanced after the publisher accepts a batch, so a crash can replay a page
//! but never skip one.

use super::backoff::ExpBackoff;
use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use crate::api::{AlertClient, FetchOutcome};
use crate::model::Cursor;
use crate::normalizer::normalize_batch;
use crate::runtime::checkpoint::{CheckpointOptions, CheckpointStore};
use crate::runtime::config::HarvesterConfig;
use crate::runtime::publisher::EventPublisher;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Error, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Externally observable phase of the harvester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestState {
    Starting,
    Polling,
    RateLimited,
    Publishing,
    Stopped,
}

pub struct AlertHarvester<P: EventPublisher> {
    config: HarvesterConfig,
    publisher: P,
    telemetry: Arc<Telemetry>,
    shutdown_root: CancellationToken,
    state_tx: watch::Sender<HarvestState>,
}

impl<P: EventPublisher> AlertHarvester<P> {
    /// Creates a harvester with its own root cancellation token.
    pub fn new(config: HarvesterConfig, publisher: P) -> Self {
        Self::with_cancellation_token(config, publisher, CancellationToken::new())
    }

    /// Creates a harvester that stops when `shutdown_token` is cancelled.
    pub fn with_cancellation_token(
        config: HarvesterConfig,
        publisher: P,
        shutdown_token: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(HarvestState::Stopped);
        Self {
            config,
            publisher,
            telemetry: Arc::new(Telemetry::default()),
            shutdown_root: shutdown_token,
            state_tx,
        }
    }

    pub fn config(&self) -> &HarvesterConfig {
        &self.config
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn state(&self) -> HarvestState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<HarvestState> {
        self.state_tx.subscribe()
    }

    /// Replaces the root shutdown token. Only call between runs.
    pub fn replace_shutdown_root(&mut self, shutdown: CancellationToken) {
        debug_assert!(
            self.state() == HarvestState::Stopped,
            "shutdown token should not change while the harvester is running"
        );
        self.shutdown_root = shutdown;
    }

    /// Runs until the shutdown token is cancelled (returns `Ok`) or a fatal
    /// fetch/publish error occurs (returns that error). The publisher is
    /// closed and the checkpoint flushed on every exit path.
    pub async fn run(&mut self) -> Result<()> {
        self.set_state(HarvestState::Starting);

        let checkpoint = match self.open_checkpoint() {
            Ok(checkpoint) => checkpoint,
            Err(err) => {
                self.set_state(HarvestState::Stopped);
                return Err(err);
            }
        };

        let client = match AlertClient::from_config(&self.config)
            .context("failed to build alert API client")
        {
            Ok(client) => client,
            Err(err) => {
                self.set_state(HarvestState::Stopped);
                return Err(err);
            }
        };

        if let Err(err) = self.publisher.connect().await {
            tracing::error!(stage = ?err.stage(), error = %err, "event publisher failed to connect");
            self.set_state(HarvestState::Stopped);
            return Err(Error::new(err).context("failed to connect event publisher"));
        }

        tracing::info!(
            endpoint = client.endpoint(),
            stream = self.config.stream_id(),
            "alert harvester is running"
        );

        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: &self.shutdown_root,
            telemetry: self.telemetry.clone(),
            checkpoint: &checkpoint,
            metrics_interval: self.config.metrics_interval(),
        });
        let run_token = lifecycle.run_token.clone();

        let outcome = self.poll_loop(&client, &checkpoint, run_token).await;

        lifecycle.shutdown().await;
        let outcome = self.finish(outcome, &checkpoint).await;
        self.set_state(HarvestState::Stopped);
        outcome
    }

    async fn poll_loop(
        &mut self,
        client: &AlertClient,
        checkpoint: &CheckpointStore,
        run_token: CancellationToken,
    ) -> Result<()> {
        let mut cursor = checkpoint.state();
        let mut backoff = ExpBackoff::new(
            self.config.min_backoff(),
            self.config.max_backoff(),
            run_token,
        );

        tracing::info!(cursor = %cursor, "resuming alert harvest");

        loop {
            if !backoff.wait().await {
                tracing::info!(cursor = %cursor, "shutdown requested; leaving poll loop");
                return Ok(());
            }
            self.set_state(HarvestState::Polling);

            let batch = match client.fetch(&cursor).await {
                Ok(FetchOutcome::Batch(batch)) => batch,
                Ok(FetchOutcome::RateLimited) => {
                    self.set_state(HarvestState::RateLimited);
                    self.telemetry.record_rate_limited();
                    continue;
                }
                Err(err) => {
                    tracing::error!(cursor = %cursor, error = %err, "fatal alert fetch error");
                    return Err(err)
                        .with_context(|| format!("failed to fetch alerts after cursor '{cursor}'"));
                }
            };

            self.set_state(HarvestState::Publishing);
            self.telemetry
                .record_batch(batch.alerts.len(), batch.skipped);

            let summary = normalize_batch(&batch, Utc::now());
            self.telemetry
                .record_alerts_without_threats(summary.alerts_without_threats);

            let published = summary.events.len();
            if published > 0 {
                if let Err(err) = self.publisher.publish_all(summary.events).await {
                    tracing::error!(
                        stage = ?err.stage(),
                        cursor = %cursor,
                        events = published,
                        error = %err,
                        "event publisher rejected batch"
                    );
                    return Err(Error::new(err).context(format!(
                        "failed to publish {published} events; cursor '{cursor}' not advanced"
                    )));
                }
                self.telemetry.record_events_published(published);
            }

            let next: Cursor = batch.cursor;
            tracing::debug!(
                previous = %cursor,
                next = %next,
                more = batch.has_more,
                alerts = batch.alerts.len(),
                events = published,
                "batch handed off"
            );
            cursor = next;
            checkpoint.persist_async(cursor.clone()).await;

            if batch.has_more {
                backoff.reset();
            }
        }
    }

    async fn finish(&mut self, outcome: Result<()>, checkpoint: &CheckpointStore) -> Result<()> {
        if let Err(err) = checkpoint.close_async().await {
            tracing::warn!(error = %err, "final checkpoint flush failed");
        }

        let closed = self.publisher.close().await;
        match (outcome, closed) {
            (Err(err), Err(close_err)) => {
                tracing::warn!(
                    stage = ?close_err.stage(),
                    error = %close_err,
                    "failed to close publisher after fatal error"
                );
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), Err(close_err)) => {
                Err(Error::new(close_err).context("failed to close event publisher"))
            }
            (Ok(()), Ok(())) => {
                tracing::info!("alert harvester stopped");
                Ok(())
            }
        }
    }

    fn open_checkpoint(&self) -> Result<CheckpointStore> {
        let path = self.config.checkpoint_path();
        CheckpointStore::open(
            path,
            self.config.stream_id(),
            CheckpointOptions {
                max_pending_updates: self.config.checkpoint_max_pending(),
                flush_interval: self.config.checkpoint_flush_interval(),
            },
            self.telemetry.clone(),
        )
        .with_context(|| format!("failed to open checkpoint {}", path.display()))
    }

    fn set_state(&self, state: HarvestState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::trace!(from = ?previous, to = ?state, "harvester state transition");
        }
    }
}

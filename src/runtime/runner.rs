use crate::processor::harvester::{AlertHarvester, HarvestState};
use crate::runtime::config::HarvesterConfig;
use crate::runtime::publisher::EventPublisher;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Drives an [`AlertHarvester`] and handles OS signals for graceful shutdowns.
pub struct Runner<P: EventPublisher> {
    harvester: AlertHarvester<P>,
    shutdown: CancellationToken,
}

impl<P: EventPublisher> Runner<P> {
    /// Creates a new runner and wires a root [`CancellationToken`] through the
    /// harvester, its backoff, and its background tasks.
    pub fn new(config: HarvesterConfig, publisher: P) -> Self {
        let shutdown = CancellationToken::new();
        let harvester =
            AlertHarvester::with_cancellation_token(config, publisher, shutdown.clone());
        Self {
            harvester,
            shutdown,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<HarvestState> {
        self.harvester.subscribe_state()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.harvester.telemetry()
    }

    pub fn harvester(&self) -> &AlertHarvester<P> {
        &self.harvester
    }

    /// Runs the harvester until its token is cancelled or a fatal error occurs.
    ///
    /// A fresh token is installed afterwards so the runner can be started again.
    pub async fn run(&mut self) -> Result<()> {
        let outcome = self.harvester.run().await;
        self.reinitialize_shutdown_token();
        outcome
    }

    /// Runs until a Ctrl-C (SIGINT) is received, the shutdown token is cancelled
    /// elsewhere, or the harvester stops on its own.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => {
                    match result {
                        Ok(()) => tracing::info!("Ctrl-C received; shutting down runner"),
                        Err(err) => tracing::warn!(error = %err, "failed to listen for Ctrl-C; shutting down runner"),
                    }
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("runner shutdown token cancelled");
                }
            }
        });

        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");
        let outcome = self.harvester.run().await;

        self.shutdown.cancel();
        if let Err(err) = signal_task.await {
            tracing::warn!(error = %err, "signal listener task panicked");
        }
        self.reinitialize_shutdown_token();
        outcome
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.harvester.replace_shutdown_root(self.shutdown.clone());
    }
}

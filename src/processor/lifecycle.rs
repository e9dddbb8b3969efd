//! Lifecycle orchestration for `AlertHarvester`.

use crate::runtime::checkpoint::CheckpointStore;
use crate::runtime::telemetry::{self, Telemetry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Background tasks scoped to a single harvester run.
pub(crate) struct LifecycleHandles {
    pub run_token: CancellationToken,
    metrics_handle: Option<JoinHandle<()>>,
    flusher_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub shutdown_root: &'a CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub checkpoint: &'a CheckpointStore,
    pub metrics_interval: Duration,
}

impl LifecycleHandles {
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> Self {
        let LifecycleSpawnParams {
            shutdown_root,
            telemetry,
            checkpoint,
            metrics_interval,
        } = params;

        let run_token = shutdown_root.child_token();
        let metrics_handle =
            telemetry::spawn_metrics_reporter(telemetry, run_token.clone(), metrics_interval);
        let flusher_handle = checkpoint.spawn_flusher(run_token.clone());

        Self {
            run_token,
            metrics_handle: Some(metrics_handle),
            flusher_handle: Some(flusher_handle),
        }
    }

    /// Cancels the run token and waits for every background task to exit.
    pub(crate) async fn shutdown(mut self) {
        self.run_token.cancel();

        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }

        if let Some(handle) = self.flusher_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "checkpoint flusher task panicked");
            }
        }
    }
}

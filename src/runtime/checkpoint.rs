//! Durable record of the last harvested cursor per logical stream.
//!
//! Updates are coalesced: a physical write happens once `max_pending_updates`
//! updates accumulate, or when the background flusher ticks with anything
//! pending. Each write re-reads the file and replaces only this store's
//! stream, then lands through a uniquely named temp file and an atomic rename,
//! so a failed write never damages the previous durable state.

use crate::model::Cursor;
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_STREAM_ID: &str = "alerts";
const STATE_VERSION: u32 = 1;

/// Serializes read-merge-write cycles between stores in this process.
static WRITE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointOptions {
    pub max_pending_updates: usize,
    pub flush_interval: Duration,
}

impl Default for CheckpointOptions {
    fn default() -> Self {
        Self {
            max_pending_updates: 1,
            flush_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StreamCheckpoint {
    cursor: Cursor,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    streams: BTreeMap<String, StreamCheckpoint>,
}

impl Default for CheckpointFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            streams: BTreeMap::new(),
        }
    }
}

struct PendingState {
    durable: CheckpointFile,
    cursor: Cursor,
    pending: usize,
}

struct CheckpointInner {
    path: PathBuf,
    stream: String,
    options: CheckpointOptions,
    telemetry: Arc<Telemetry>,
    state: Mutex<PendingState>,
}

/// Cheaply cloneable handle; clones share the same pending state.
#[derive(Clone)]
pub struct CheckpointStore {
    inner: Arc<CheckpointInner>,
}

impl CheckpointStore {
    /// Loads `path`, creating it (and its parent directories) when absent.
    ///
    /// Fails when the location cannot be written or the existing file is not a
    /// checkpoint this crate understands.
    pub fn open(
        path: impl Into<PathBuf>,
        stream: impl Into<String>,
        options: CheckpointOptions,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self> {
        let path = path.into();
        let stream = stream.into();

        if options.max_pending_updates == 0 {
            bail!("max_pending_updates must be greater than 0");
        }
        if options.flush_interval.is_zero() {
            bail!("flush_interval must be greater than 0");
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create checkpoint directory {}", parent.display())
            })?;
        }

        let durable = if path.exists() {
            load_state(&path)?
        } else {
            let state = CheckpointFile::default();
            write_atomic(&path, &state).with_context(|| {
                format!("checkpoint location {} is not writable", path.display())
            })?;
            state
        };

        let cursor = durable
            .streams
            .get(&stream)
            .map(|entry| entry.cursor.clone())
            .unwrap_or_default();

        tracing::info!(
            path = %path.display(),
            stream = %stream,
            cursor = %cursor,
            "checkpoint loaded"
        );

        Ok(Self {
            inner: Arc::new(CheckpointInner {
                path,
                stream,
                options,
                telemetry,
                state: Mutex::new(PendingState {
                    durable,
                    cursor,
                    pending: 0,
                }),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Last recorded cursor. May be ahead of the on-disk value while updates are pending.
    pub fn state(&self) -> Cursor {
        self.lock().cursor.clone()
    }

    /// Cursor currently stored on disk for this stream.
    pub fn durable_state(&self) -> Cursor {
        let state = self.lock();
        state
            .durable
            .streams
            .get(&self.inner.stream)
            .map(|entry| entry.cursor.clone())
            .unwrap_or_default()
    }

    pub fn pending_updates(&self) -> usize {
        self.lock().pending
    }

    /// Records `cursor`. Never fails; write errors are logged and retried on the
    /// next update or flush tick.
    pub fn persist(&self, cursor: &Cursor) {
        let mut state = self.lock();
        if state.pending == 0 && state.cursor == *cursor {
            return;
        }

        state.cursor = cursor.clone();
        state.pending += 1;

        if state.pending >= self.inner.options.max_pending_updates {
            let _ = self.write_locked(&mut state);
        }
    }

    /// Writes any pending update immediately.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock();
        if state.pending == 0 {
            return Ok(());
        }
        self.write_locked(&mut state)
    }

    /// Final flush at shutdown.
    pub fn close(&self) -> Result<()> {
        self.flush()?;
        tracing::debug!(
            path = %self.inner.path.display(),
            stream = %self.inner.stream,
            "checkpoint closed"
        );
        Ok(())
    }

    /// [`persist`](Self::persist) on the blocking pool.
    pub async fn persist_async(&self, cursor: Cursor) {
        let store = self.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || store.persist(&cursor)).await {
            tracing::warn!(error = %err, "checkpoint persist task panicked");
        }
    }

    /// [`close`](Self::close) on the blocking pool.
    pub async fn close_async(&self) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.close())
            .await
            .context("checkpoint close task panicked")?
    }

    /// Spawns the task that writes pending updates every `flush_interval` until
    /// `shutdown` is cancelled.
    pub fn spawn_flusher(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        let period = self.inner.options.flush_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let flusher = store.clone();
                        let flushed = tokio::task::spawn_blocking(move || flusher.flush()).await;
                        if let Err(err) = flushed {
                            tracing::warn!(error = %err, "checkpoint flush task panicked");
                        }
                    }
                }
            }
        })
    }

    fn write_locked(&self, state: &mut PendingState) -> Result<()> {
        let _serialized = WRITE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        let written = self.on_disk_or(&state.durable).and_then(|mut next| {
            next.streams.insert(
                self.inner.stream.clone(),
                StreamCheckpoint {
                    cursor: state.cursor.clone(),
                    updated_at: Utc::now(),
                },
            );
            write_atomic(&self.inner.path, &next).map(|()| next)
        });

        match written {
            Ok(next) => {
                state.durable = next;
                state.pending = 0;
                self.inner.telemetry.record_checkpoint_write();
                tracing::trace!(cursor = %state.cursor, "checkpoint written");
                Ok(())
            }
            Err(err) => {
                self.inner.telemetry.record_checkpoint_failure();
                tracing::warn!(
                    path = %self.inner.path.display(),
                    pending = state.pending,
                    error = %err,
                    "failed to write checkpoint; will retry"
                );
                Err(err)
            }
        }
    }

    /// Current file contents, or `snapshot` when the file has gone missing.
    fn on_disk_or(&self, snapshot: &CheckpointFile) -> Result<CheckpointFile> {
        if self.inner.path.exists() {
            load_state(&self.inner.path)
        } else {
            Ok(snapshot.clone())
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_state(path: &Path) -> Result<CheckpointFile> {
    let content = fs::read(path)
        .with_context(|| format!("failed to read checkpoint {}", path.display()))?;
    let state: CheckpointFile = serde_json::from_slice(&content)
        .with_context(|| format!("checkpoint {} is corrupt", path.display()))?;
    if state.version != STATE_VERSION {
        bail!(
            "checkpoint {} has unsupported version {} (expected {STATE_VERSION})",
            path.display(),
            state.version
        );
    }
    Ok(state)
}

fn write_atomic(path: &Path, state: &CheckpointFile) -> Result<()> {
    let content = serde_json::to_vec_pretty(state).context("failed to encode checkpoint")?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(&content)
        .with_context(|| format!("failed to write {}", tmp.path().display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .with_context(|| format!("failed to sync directory {}", dir.display()))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

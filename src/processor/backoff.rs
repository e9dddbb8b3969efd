use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Exponential poll pacing that doubles on every completed wait and gives up
/// as soon as `shutdown` is cancelled.
#[derive(Debug)]
pub struct ExpBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
    shutdown: CancellationToken,
}

impl ExpBackoff {
    pub fn new(min: Duration, max: Duration, shutdown: CancellationToken) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
            shutdown,
        }
    }

    /// Sleeps for the current delay and grows it toward the ceiling.
    ///
    /// Returns `false` without finishing the sleep when shutdown is (or becomes)
    /// requested; the caller must then leave its loop.
    pub async fn wait(&mut self) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }

        let delay = self.current;
        self.current = next_backoff(self.current, self.max);

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    /// Collapses the delay back to the minimum.
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Delay the next [`wait`](Self::wait) will sleep for.
    pub fn current(&self) -> Duration {
        self.current
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}

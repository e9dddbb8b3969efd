use crate::model::NormalizedEvent;
use anyhow::Error as AnyError;
use core::future::Future;
use core::pin::Pin;

pub type PublishFuture<'a> = Pin<Box<dyn Future<Output = Result<(), PublisherError>> + Send + 'a>>;

/// Enumerates the calls made into an [`EventPublisher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherStage {
    Connect,
    Publish,
    Close,
}

/// Error surfaced by publisher hooks. Connect and publish failures abort the run.
#[derive(Debug)]
pub struct PublisherError {
    stage: PublisherStage,
    source: AnyError,
}

impl PublisherError {
    pub fn new(stage: PublisherStage, source: AnyError) -> Self {
        Self { stage, source }
    }

    pub fn stage(&self) -> PublisherStage {
        self.stage
    }
}

impl core::fmt::Display for PublisherError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} publisher error: {}", self.stage, self.source)
    }
}

impl std::error::Error for PublisherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Downstream event pipeline fed by the harvester.
///
/// Implementations own queueing, batching, and delivery retries. A successful
/// [`publish_all`](Self::publish_all) means the events were accepted; only then
/// does the harvester advance its checkpoint.
pub trait EventPublisher: Send + 'static {
    /// Called once per run before the first fetch.
    fn connect<'a>(&'a mut self) -> PublishFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    /// Hands off every event produced by one fetched batch, in order.
    fn publish_all<'a>(&'a mut self, events: Vec<NormalizedEvent>) -> PublishFuture<'a>;

    fn publish<'a>(&'a mut self, event: NormalizedEvent) -> PublishFuture<'a> {
        self.publish_all(vec![event])
    }

    /// Called once during shutdown to flush and release the connection.
    fn close<'a>(&'a mut self) -> PublishFuture<'a>;
}

pub mod api;
pub mod model;
pub mod normalizer;
pub mod processor;
pub mod runtime;

pub use api::{AlertClient, ClientOptions, FetchError, FetchOutcome};
pub use model::{Alert, AlertBatch, Cursor, NormalizedEvent, ThreatInfo, Wisdom};
pub use normalizer::{normalize, normalize_at, normalize_batch, NormalizeSummary};
pub use processor::backoff::ExpBackoff;
pub use processor::harvester::{AlertHarvester, HarvestState};
pub use runtime::checkpoint::{CheckpointOptions, CheckpointStore};
pub use runtime::config::{HarvesterConfig, HarvesterConfigBuilder, HarvesterConfigParams};
pub use runtime::publisher::{EventPublisher, PublishFuture, PublisherError, PublisherStage};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};

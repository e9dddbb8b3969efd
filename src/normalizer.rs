//! Alert normalization: the kind-agnostic field table and the per-threat
//! fan-out that turns a fetched batch into flat events.

pub mod event;
pub mod fields;

pub use event::{normalize, normalize_at, normalize_batch, NormalizeSummary};

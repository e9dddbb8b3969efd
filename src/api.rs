//! Detection API plumbing: authentication, client options, the wire payload,
//! and the paginated alert client.

pub mod auth;
pub mod client;
pub mod options;
pub mod payload;

pub use client::{AlertClient, FetchError, FetchOutcome};
pub use options::ClientOptions;

//! Runtime glue that wires configs, checkpoints, publishers, telemetry, and
//! runner orchestration.

pub mod checkpoint;
pub mod config;
pub mod publisher;
pub mod runner;
pub mod telemetry;

//! Processor orchestration covering the poll loop, backoff pacing, and
//! run-scoped lifecycle management.

pub mod backoff;
pub mod harvester;
pub mod lifecycle;

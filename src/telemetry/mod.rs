//! # Telemetry Module
//!
//! Merges motor and battery snapshots into time-stamped rows and records
//! them into named runs.
//!
//! This module handles:
//! - Building rows from the latest-value caches (`row`)
//! - The append-only run store with a declared schema (`store`)
//! - Run-level stop predicates (`stop`)
//! - The fixed-cadence sampling loop that ties them together (`scheduler`)

pub mod row;
pub mod scheduler;
pub mod stop;
pub mod store;

pub use row::Row;
pub use scheduler::{RunSummary, Sampler};
pub use stop::{StopCondition, StopPolicy, StopReason};
pub use store::{Dataset, RowSink, RunWriter, Schema};

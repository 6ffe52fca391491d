//! # Civic Sync Library
//!
//! Background synchronization fleet for the citizen data platform.
//!
//! Writes acknowledged by [`civic_persistence::DataManager`] land in
//! the Redis write-buffer with a sync job on the type's queue; this
//! crate drains those queues into MongoDB with retry, exponential
//! backoff, and per-type dead-letter queues. A periodic health probe
//! flips a process-wide degraded gate that pauses draining while
//! writes keep accumulating, and an in-process bounded queue handles
//! phone-verification jobs with batch-flushed results.

pub mod backoff;
pub mod config;
pub mod degraded;
pub mod error;
pub mod metrics;
pub mod service;
pub mod verification;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use config::{EngineConfig, SyncConfig, VerificationConfig};
pub use degraded::{DegradedMode, DegradedProbe, REASON_MEMORY_HIGH, REASON_STORE_DOWN};
pub use error::{Result, SyncError};
pub use metrics::{MetricsSnapshot, SyncMetrics, TypeSnapshot, WorkerSample};
pub use service::SyncService;
pub use verification::{VerificationJob, VerificationQueue, VerificationResult, VerificationSnapshot};
pub use worker::SyncWorker;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! # Engine Configuration
//!
//! Environment-based configuration for the sync service, the degraded
//! mode probe, and the verification queue.

use std::env;
use std::time::Duration;

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_millis(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_u64(name, default_ms))
}

/// Sync worker fleet configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Number of sync workers; zero yields a quiescent service.
    pub worker_count: usize,

    /// Backoff base delay.
    pub base_delay: Duration,

    /// Backoff multiplier.
    pub backoff_factor: f64,

    /// Backoff ceiling.
    pub max_delay: Duration,

    /// Blocking-pop timeout per poll.
    pub pop_timeout: Duration,

    /// Deadline for one job's store upsert.
    pub job_timeout: Duration,

    /// Idle pause while degraded mode is active.
    pub degraded_pause: Duration,

    /// Degraded-mode probe period.
    pub probe_period: Duration,

    /// Budget for each health probe call.
    pub probe_timeout: Duration,

    /// used_memory / maxmemory ratio that marks memory pressure.
    pub memory_pressure_ratio: f64,

    /// Queue-depth monitor sampling period.
    pub monitor_period: Duration,

    /// Bound on the drain wait during `stop`.
    pub drain_timeout: Duration,
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            worker_count: env_usize("SYNC_WORKER_COUNT", 4),
            base_delay: env_millis("SYNC_BACKOFF_BASE_MS", 500),
            backoff_factor: env_f64("SYNC_BACKOFF_FACTOR", 2.0),
            max_delay: env_millis("SYNC_BACKOFF_MAX_MS", 10_000),
            pop_timeout: env_millis("SYNC_POP_TIMEOUT_MS", 1_000),
            job_timeout: env_millis("SYNC_JOB_TIMEOUT_MS", 30_000),
            degraded_pause: env_millis("SYNC_DEGRADED_PAUSE_MS", 500),
            probe_period: env_millis("DEGRADED_PROBE_PERIOD_MS", 10_000),
            probe_timeout: env_millis("DEGRADED_PROBE_TIMEOUT_MS", 2_000),
            memory_pressure_ratio: env_f64("DEGRADED_MEMORY_RATIO", 0.85),
            monitor_period: env_millis("SYNC_MONITOR_PERIOD_MS", 30_000),
            drain_timeout: env_millis("SYNC_DRAIN_TIMEOUT_MS", 10_000),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
            pop_timeout: Duration::from_secs(1),
            job_timeout: Duration::from_secs(30),
            degraded_pause: Duration::from_millis(500),
            probe_period: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
            memory_pressure_ratio: 0.85,
            monitor_period: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Verification queue configuration.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    /// Bounded channel capacity.
    pub capacity: usize,

    /// Worker pool size.
    pub workers: usize,

    /// Result flush period.
    pub flush_interval: Duration,

    /// Flush early once this many results are pending.
    pub flush_batch_size: usize,

    /// Occupancy ratio above which the queue reports unhealthy.
    pub healthy_occupancy: f64,

    /// How recent a worker heartbeat must be to count as alive.
    pub heartbeat_window: Duration,
}

impl VerificationConfig {
    pub fn from_env() -> Self {
        Self {
            capacity: env_usize("VERIFICATION_QUEUE_CAPACITY", 1_000),
            workers: env_usize("VERIFICATION_WORKERS", 4),
            flush_interval: env_millis("VERIFICATION_FLUSH_INTERVAL_MS", 2_000),
            flush_batch_size: env_usize("VERIFICATION_FLUSH_BATCH", 50),
            healthy_occupancy: env_f64("VERIFICATION_HEALTHY_OCCUPANCY", 0.9),
            heartbeat_window: env_millis("VERIFICATION_HEARTBEAT_WINDOW_MS", 30_000),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            workers: 4,
            flush_interval: Duration::from_secs(2),
            flush_batch_size: 50,
            healthy_occupancy: 0.9,
            heartbeat_window: Duration::from_secs(30),
        }
    }
}

/// Top-level configuration for the `civic-syncd` binary.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub redis_url: String,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub log_level: String,
    pub sync: SyncConfig,
    pub verification: VerificationConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            mongo_uri: env::var("MONGO_URI")
                .unwrap_or_else(|_| "mongodb://127.0.0.1:27017".to_string()),
            mongo_database: env::var("MONGO_DATABASE").unwrap_or_else(|_| "civic_data".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            sync: SyncConfig::from_env(),
            verification: VerificationConfig::from_env(),
        }
    }
}

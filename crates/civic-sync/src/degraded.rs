//! # Degraded Mode
//!
//! Process-wide gate that suspends queue draining while the document
//! store is unreachable or the cache is under memory pressure. Writes
//! keep succeeding and accumulate in the write-buffer and queues.
//!
//! The flag is published as an atomic for lock-free readers on the
//! worker hot path; reason and activation time sit behind a mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use civic_persistence::{CacheBackend, DocumentStore};

/// Reason string for a failed store health probe.
pub const REASON_STORE_DOWN: &str = "mongodb_down";

/// Reason string for cache memory pressure.
pub const REASON_MEMORY_HIGH: &str = "redis_memory_high";

#[derive(Debug)]
struct DegradedState {
    reason: String,
    since: Instant,
}

/// Shared degraded-mode gate.
#[derive(Debug, Default)]
pub struct DegradedMode {
    active: AtomicBool,
    state: Mutex<Option<DegradedState>>,
}

impl DegradedMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate the gate. Idempotent: the first activation timestamps;
    /// later calls only refresh the reason.
    pub fn activate(&self, reason: &str) {
        let mut state = self.state.lock().unwrap();
        match state.as_mut() {
            Some(existing) => {
                if existing.reason != reason {
                    existing.reason = reason.to_string();
                }
            }
            None => {
                *state = Some(DegradedState {
                    reason: reason.to_string(),
                    since: Instant::now(),
                });
                self.active.store(true, Ordering::Release);
                tracing::warn!(reason, "Degraded mode activated; queue draining paused");
            }
        }
    }

    /// Clear the gate and its timestamp.
    pub fn deactivate(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(old) = state.take() {
            self.active.store(false, Ordering::Release);
            tracing::info!(
                reason = %old.reason,
                duration_secs = old.since.elapsed().as_secs(),
                "Degraded mode cleared; queue draining resumes"
            );
        }
    }

    /// Lock-free check used by workers between pops.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.state.lock().unwrap().as_ref().map(|s| s.reason.clone())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.state.lock().unwrap().as_ref().map(|s| s.since.elapsed())
    }
}

/// Parse `used_memory` and `maxmemory` out of `INFO memory` text.
///
/// First occurrence of each key wins; malformed lines are skipped.
pub fn parse_memory_info(info: &str) -> (Option<u64>, Option<u64>) {
    let mut used = None;
    let mut max = None;
    for line in info.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("used_memory:") {
            if used.is_none() {
                used = rest.trim().parse().ok();
            }
        } else if let Some(rest) = line.strip_prefix("maxmemory:") {
            if max.is_none() {
                max = rest.trim().parse().ok();
            }
        }
    }
    (used, max)
}

/// Periodic health probe driving a [`DegradedMode`] gate.
pub struct DegradedProbe {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn CacheBackend>,
    degraded: Arc<DegradedMode>,
    period: Duration,
    probe_timeout: Duration,
    memory_pressure_ratio: f64,
}

impl DegradedProbe {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn CacheBackend>,
        degraded: Arc<DegradedMode>,
        period: Duration,
        probe_timeout: Duration,
        memory_pressure_ratio: f64,
    ) -> Self {
        Self {
            store,
            cache,
            degraded,
            period,
            probe_timeout,
            memory_pressure_ratio,
        }
    }

    /// Run one evaluation and flip the gate accordingly.
    pub async fn evaluate_once(&self) {
        if let Some(reason) = self.probe_reason().await {
            self.degraded.activate(reason);
        } else {
            self.degraded.deactivate();
        }
    }

    async fn probe_reason(&self) -> Option<&'static str> {
        match tokio::time::timeout(self.probe_timeout, self.store.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Store health probe failed");
                return Some(REASON_STORE_DOWN);
            }
            Err(_) => {
                tracing::warn!(
                    budget_ms = self.probe_timeout.as_millis() as u64,
                    "Store health probe timed out"
                );
                return Some(REASON_STORE_DOWN);
            }
        }

        match tokio::time::timeout(self.probe_timeout, self.cache.info_memory()).await {
            Ok(Ok(info)) => {
                let (used, max) = parse_memory_info(&info);
                if let (Some(used), Some(max)) = (used, max) {
                    // maxmemory == 0 means unbounded: pressure branch is inert
                    if max > 0 && (used as f64 / max as f64) >= self.memory_pressure_ratio {
                        return Some(REASON_MEMORY_HIGH);
                    }
                }
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Cache memory probe failed");
                None
            }
            Err(_) => None,
        }
    }

    /// Probe loop; exits when the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.evaluate_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Degraded-mode probe stopped");
    }
}

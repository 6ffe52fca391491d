//! # Sync Metrics
//!
//! Word-sized atomic counters and gauges shared by the worker fleet.
//! Counters are pre-allocated per entity type from the registry, so the
//! hot path never takes a lock; worker heartbeats are atomic unix
//! timestamps for the same reason.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use civic_domain::EntityRegistry;

/// Per-type counters and depth gauges.
#[derive(Debug, Default)]
pub struct TypeCounters {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub retried: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub buffer_expired: AtomicU64,
    pub queue_depth: AtomicU64,
    pub dlq_depth: AtomicU64,
}

/// Per-worker throughput sample block.
#[derive(Debug)]
pub struct WorkerCounters {
    pub worker_id: usize,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    /// Unix seconds of the last loop iteration.
    pub last_heartbeat: AtomicI64,
}

impl WorkerCounters {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_heartbeat: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    pub fn heartbeat(&self) {
        self.last_heartbeat.store(Utc::now().timestamp(), Ordering::Relaxed);
    }
}

/// Shared metrics for the sync fleet.
#[derive(Debug)]
pub struct SyncMetrics {
    per_type: HashMap<String, TypeCounters>,
    workers: Mutex<Vec<Arc<WorkerCounters>>>,
}

impl SyncMetrics {
    /// Pre-allocate counters for every registered entity type.
    pub fn for_registry(registry: &EntityRegistry) -> Self {
        let per_type = registry
            .type_tags()
            .map(|tag| (tag.to_string(), TypeCounters::default()))
            .collect();
        Self {
            per_type,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Register a worker's sample block at spawn time.
    pub fn register_worker(&self, counters: Arc<WorkerCounters>) {
        self.workers.lock().unwrap().push(counters);
    }

    fn counters(&self, entity_type: &str) -> Option<&TypeCounters> {
        self.per_type.get(entity_type)
    }

    pub fn incr_processed(&self, entity_type: &str) {
        if let Some(c) = self.counters(entity_type) {
            c.processed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn incr_failed(&self, entity_type: &str) {
        if let Some(c) = self.counters(entity_type) {
            c.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn incr_retried(&self, entity_type: &str) {
        if let Some(c) = self.counters(entity_type) {
            c.retried.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn incr_dead_lettered(&self, entity_type: &str) {
        if let Some(c) = self.counters(entity_type) {
            c.dead_lettered.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn incr_buffer_expired(&self, entity_type: &str) {
        if let Some(c) = self.counters(entity_type) {
            c.buffer_expired.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_queue_depth(&self, entity_type: &str, depth: u64) {
        if let Some(c) = self.counters(entity_type) {
            c.queue_depth.store(depth, Ordering::Relaxed);
        }
    }

    pub fn set_dlq_depth(&self, entity_type: &str, depth: u64) {
        if let Some(c) = self.counters(entity_type) {
            c.dlq_depth.store(depth, Ordering::Relaxed);
        }
    }

    pub fn processed(&self, entity_type: &str) -> u64 {
        self.counters(entity_type)
            .map_or(0, |c| c.processed.load(Ordering::Relaxed))
    }

    pub fn dead_lettered(&self, entity_type: &str) -> u64 {
        self.counters(entity_type)
            .map_or(0, |c| c.dead_lettered.load(Ordering::Relaxed))
    }

    pub fn retried(&self, entity_type: &str) -> u64 {
        self.counters(entity_type)
            .map_or(0, |c| c.retried.load(Ordering::Relaxed))
    }

    pub fn total_processed(&self) -> u64 {
        self.per_type
            .values()
            .map(|c| c.processed.load(Ordering::Relaxed))
            .sum()
    }

    /// Point-in-time snapshot of all counters and gauges.
    pub fn snapshot(&self, degraded_active: bool, degraded_secs: u64) -> MetricsSnapshot {
        let types = self
            .per_type
            .iter()
            .map(|(tag, c)| {
                (
                    tag.clone(),
                    TypeSnapshot {
                        processed: c.processed.load(Ordering::Relaxed),
                        failed: c.failed.load(Ordering::Relaxed),
                        retried: c.retried.load(Ordering::Relaxed),
                        dead_lettered: c.dead_lettered.load(Ordering::Relaxed),
                        buffer_expired: c.buffer_expired.load(Ordering::Relaxed),
                        queue_depth: c.queue_depth.load(Ordering::Relaxed),
                        dlq_depth: c.dlq_depth.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        let workers = self
            .workers
            .lock()
            .unwrap()
            .iter()
            .map(|w| WorkerSample {
                worker_id: w.worker_id,
                processed: w.processed.load(Ordering::Relaxed),
                failed: w.failed.load(Ordering::Relaxed),
                last_heartbeat: w.last_heartbeat.load(Ordering::Relaxed),
            })
            .collect();

        MetricsSnapshot {
            types,
            workers,
            degraded_mode_active: degraded_active,
            degraded_mode_duration_seconds: degraded_secs,
        }
    }
}

/// Serializable per-type counter view.
#[derive(Debug, Clone, Serialize)]
pub struct TypeSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub buffer_expired: u64,
    pub queue_depth: u64,
    pub dlq_depth: u64,
}

/// Serializable per-worker sample.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSample {
    pub worker_id: usize,
    pub processed: u64,
    pub failed: u64,
    pub last_heartbeat: i64,
}

/// Full metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub types: HashMap<String, TypeSnapshot>,
    pub workers: Vec<WorkerSample>,
    pub degraded_mode_active: bool,
    pub degraded_mode_duration_seconds: u64,
}

impl MetricsSnapshot {
    /// Flatten into the exported metric names.
    pub fn flatten(&self) -> HashMap<String, u64> {
        let mut flat = HashMap::new();
        for (tag, c) in &self.types {
            flat.insert(format!("sync_jobs_processed_total{{type=\"{tag}\"}}"), c.processed);
            flat.insert(format!("sync_jobs_failed_total{{type=\"{tag}\"}}"), c.failed);
            flat.insert(format!("sync_jobs_retried_total{{type=\"{tag}\"}}"), c.retried);
            flat.insert(
                format!("sync_jobs_deadlettered_total{{type=\"{tag}\"}}"),
                c.dead_lettered,
            );
            flat.insert(format!("sync_queue_depth{{type=\"{tag}\"}}"), c.queue_depth);
            flat.insert(format!("sync_dlq_depth{{type=\"{tag}\"}}"), c.dlq_depth);
        }
        flat.insert(
            "degraded_mode_active".to_string(),
            u64::from(self.degraded_mode_active),
        );
        flat.insert(
            "degraded_mode_duration_seconds".to_string(),
            self.degraded_mode_duration_seconds,
        );
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_per_type() {
        let metrics = SyncMetrics::for_registry(&EntityRegistry::standard());
        metrics.incr_processed("citizen");
        metrics.incr_processed("citizen");
        metrics.incr_retried("phone_mapping");
        assert_eq!(metrics.processed("citizen"), 2);
        assert_eq!(metrics.retried("phone_mapping"), 1);
        assert_eq!(metrics.processed("phone_mapping"), 0);
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let metrics = SyncMetrics::for_registry(&EntityRegistry::standard());
        metrics.incr_processed("unregistered");
        assert_eq!(metrics.total_processed(), 0);
    }

    #[test]
    fn test_snapshot_flatten_names() {
        let metrics = SyncMetrics::for_registry(&EntityRegistry::standard());
        metrics.incr_processed("citizen");
        metrics.set_queue_depth("citizen", 7);

        let flat = metrics.snapshot(true, 12).flatten();
        assert_eq!(flat["sync_jobs_processed_total{type=\"citizen\"}"], 1);
        assert_eq!(flat["sync_queue_depth{type=\"citizen\"}"], 7);
        assert_eq!(flat["degraded_mode_active"], 1);
        assert_eq!(flat["degraded_mode_duration_seconds"], 12);
    }

    #[test]
    fn test_worker_samples_appear_in_snapshot() {
        let metrics = SyncMetrics::for_registry(&EntityRegistry::standard());
        let worker = Arc::new(WorkerCounters::new(3));
        worker.processed.fetch_add(5, Ordering::Relaxed);
        metrics.register_worker(worker);

        let snapshot = metrics.snapshot(false, 0);
        assert_eq!(snapshot.workers.len(), 1);
        assert_eq!(snapshot.workers[0].worker_id, 3);
        assert_eq!(snapshot.workers[0].processed, 5);
    }
}

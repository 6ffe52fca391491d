//! # Sync Service
//!
//! Owns the worker fleet, the queue-depth monitor, and the degraded
//! mode probe. `start` spawns everything; `stop` broadcasts shutdown
//! and waits a bounded time for the fleet to drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::degraded::{DegradedMode, DegradedProbe};
use crate::metrics::{MetricsSnapshot, SyncMetrics};
use crate::worker::SyncWorker;
use civic_persistence::DataManager;

/// Sync fleet lifecycle owner.
pub struct SyncService {
    manager: Arc<DataManager>,
    config: SyncConfig,
    metrics: Arc<SyncMetrics>,
    degraded: Arc<DegradedMode>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl SyncService {
    pub fn new(manager: Arc<DataManager>, config: SyncConfig) -> Self {
        let metrics = Arc::new(SyncMetrics::for_registry(manager.registry()));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            manager,
            config,
            metrics,
            degraded: Arc::new(DegradedMode::new()),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawn the workers, the depth monitor, and the degraded probe.
    /// Re-starting a running service is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Sync service already started; start is a no-op");
            return;
        }

        let mut handles = self.handles.lock().unwrap();

        for id in 0..self.config.worker_count {
            let worker = SyncWorker::new(
                id,
                self.manager.clone(),
                self.metrics.clone(),
                self.degraded.clone(),
                &self.config,
                self.shutdown_tx.subscribe(),
            );
            handles.push(tokio::spawn(worker.run()));
        }

        handles.push(tokio::spawn(Self::monitor(
            self.manager.clone(),
            self.metrics.clone(),
            self.config.monitor_period,
            self.shutdown_tx.subscribe(),
        )));

        let probe = DegradedProbe::new(
            self.manager.store().clone(),
            self.manager.cache().clone(),
            self.degraded.clone(),
            self.config.probe_period,
            self.config.probe_timeout,
            self.config.memory_pressure_ratio,
        );
        handles.push(tokio::spawn(probe.run(self.shutdown_tx.subscribe())));

        tracing::info!(
            worker_count = self.config.worker_count,
            "Sync service started"
        );
    }

    /// Broadcast shutdown and wait, bounded, for the fleet to drain.
    /// A second stop is a no-op.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().unwrap());

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                tracing::warn!("Worker did not drain in time; aborting");
                handle.abort();
            }
        }

        tracing::info!("Sync service stopped");
    }

    /// Sample every type's queue and DLQ depth into the gauges.
    async fn monitor(
        manager: Arc<DataManager>,
        metrics: Arc<SyncMetrics>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for tag in manager.registry().type_tags() {
                        match manager.queue_depth(tag).await {
                            Ok(depth) => metrics.set_queue_depth(tag, depth),
                            Err(e) => tracing::warn!(tag, error = %e, "Queue depth sample failed"),
                        }
                        match manager.dlq_depth(tag).await {
                            Ok(depth) => metrics.set_dlq_depth(tag, depth),
                            Err(e) => tracing::warn!(tag, error = %e, "DLQ depth sample failed"),
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    pub fn degraded(&self) -> &Arc<DegradedMode> {
        &self.degraded
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_active()
    }

    /// Point-in-time snapshot of all counters, gauges, and the
    /// degraded flag.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(
            self.degraded.is_active(),
            self.degraded.duration().map_or(0, |d| d.as_secs()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use civic_domain::{Citizen, CitizenWrite, EntityRegistry};
    use civic_persistence::{CacheBackend, DocumentStore, MemoryCache, MemoryStore};

    fn test_config(worker_count: usize) -> SyncConfig {
        SyncConfig {
            worker_count,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            pop_timeout: Duration::from_millis(50),
            degraded_pause: Duration::from_millis(50),
            monitor_period: Duration::from_millis(100),
            // Long probe period: tests drive the gate by hand
            probe_period: Duration::from_secs(3600),
            drain_timeout: Duration::from_secs(2),
            ..SyncConfig::default()
        }
    }

    fn harness(
        worker_count: usize,
    ) -> (Arc<MemoryCache>, Arc<MemoryStore>, Arc<DataManager>, SyncService) {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(DataManager::new(
            cache.clone(),
            store.clone(),
            Arc::new(EntityRegistry::standard()),
        ));
        let service = SyncService::new(manager.clone(), test_config(worker_count));
        (cache, store, manager, service)
    }

    fn citizen(cpf: &str, name: &str) -> Citizen {
        Citizen {
            cpf: cpf.to_string(),
            name: name.to_string(),
            social_name: None,
            birth_date: None,
            mother_name: None,
            email: None,
            phone: None,
            address: None,
            updated_at: Utc::now(),
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_happy_write_through() {
        let (cache, store, manager, service) = harness(1);

        let op = CitizenWrite::new(citizen("03561350712", "João"));
        manager.write(&op).await.unwrap();

        assert!(cache.get("citizen:write:03561350712").await.unwrap().is_some());
        assert_eq!(cache.llen("sync:queue:citizen").await.unwrap(), 1);

        service.start();
        let metrics = service.metrics().clone();
        assert!(
            wait_until(
                move || metrics.processed("citizen") == 1,
                Duration::from_secs(1)
            )
            .await
        );

        assert!(cache.get("citizen:write:03561350712").await.unwrap().is_none());
        let doc = store
            .find_one("citizens", "cpf", "03561350712")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["name"], "João");
        assert_eq!(service.metrics().processed("citizen"), 1);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_retry_then_dlq_through_service() {
        let (cache, store, _manager, service) = harness(1);
        store.fail_with("503 service unavailable");

        let mut job =
            civic_persistence::SyncJob::new("citizen", "B", "citizens", serde_json::json!({"cpf": "B"}));
        job.max_retries = 2;
        cache
            .lpush("sync:queue:citizen", &job.encode().unwrap())
            .await
            .unwrap();

        service.start();
        let metrics = service.metrics().clone();
        assert!(
            wait_until(
                move || metrics.dead_lettered("citizen") == 1,
                Duration::from_secs(2)
            )
            .await
        );

        assert_eq!(cache.llen("sync:dlq:citizen").await.unwrap(), 1);
        assert_eq!(cache.llen("sync:queue:citizen").await.unwrap(), 0);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_degraded_gate_pauses_then_drains() {
        let (cache, _store, manager, service) = harness(3);

        service.start();
        // Let the probe's startup evaluation settle before forcing the gate
        tokio::time::sleep(Duration::from_millis(100)).await;
        service.degraded().activate("test");

        for i in 0..10 {
            let op = CitizenWrite::new(citizen(&format!("cpf-{i}"), "paused"));
            manager.write(&op).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(service.metrics().total_processed(), 0);
        assert_eq!(cache.llen("sync:queue:citizen").await.unwrap(), 10);
        assert!(service.is_degraded());

        service.degraded().deactivate();
        let metrics = service.metrics().clone();
        assert!(
            wait_until(
                move || metrics.processed("citizen") == 10,
                Duration::from_secs(2)
            )
            .await
        );
        assert_eq!(cache.llen("sync:queue:citizen").await.unwrap(), 0);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_zero_workers_is_quiescent() {
        let (cache, _store, manager, service) = harness(0);
        service.start();

        for i in 0..3 {
            let op = CitizenWrite::new(citizen(&format!("q-{i}"), "queued"));
            manager.write(&op).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.llen("sync:queue:citizen").await.unwrap(), 3);
        assert_eq!(service.metrics().total_processed(), 0);

        // Depth monitor still samples the growing queue
        let metrics = service.metrics().clone();
        assert!(
            wait_until(
                move || metrics.snapshot(false, 0).types["citizen"].queue_depth == 3,
                Duration::from_secs(1)
            )
            .await
        );

        service.stop().await;
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let (_cache, _store, _manager, service) = harness(1);
        service.start();
        service.start();
        service.stop().await;
        service.stop().await;
    }
}

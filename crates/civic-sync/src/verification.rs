//! # Verification Queue
//!
//! In-process bounded queue and worker pool for phone-verification
//! jobs. Workers claim the verification document with an atomic
//! compare-and-swap (match on phone+code, unused, unexpired; flip to
//! used), then mark the corresponding phone mapping verified. Results
//! accumulate on a channel and a dedicated flusher batch-writes them
//! to the store.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::VerificationConfig;
use crate::error::{Result, SyncError};
use civic_persistence::{DocumentStore, EngineError};

const VERIFICATIONS_COLLECTION: &str = "phone_verifications";
const MAPPINGS_COLLECTION: &str = "phone_cpf_mappings";
const RESULTS_COLLECTION: &str = "phone_verification_results";

/// Interval at which an idle worker refreshes its heartbeat.
const IDLE_HEARTBEAT_TICK: Duration = Duration::from_secs(1);

/// One phone-verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationJob {
    pub phone: String,
    pub code: String,
    pub cpf: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one processed job, pending batch flush.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub job: VerificationJob,
    pub verified: bool,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct VerificationCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    wait_millis: AtomicU64,
}

/// Serializable gauge view of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationSnapshot {
    pub queue_size: u64,
    pub active_workers: u64,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
}

impl VerificationSnapshot {
    pub fn flatten(&self) -> Vec<(String, u64)> {
        vec![
            ("verification_queue_size".to_string(), self.queue_size),
            ("verification_active_workers".to_string(), self.active_workers),
        ]
    }
}

/// Bounded in-process verification queue with a worker pool and a
/// result flusher.
pub struct VerificationQueue {
    config: VerificationConfig,
    tx: Option<mpsc::Sender<VerificationJob>>,
    counters: Arc<VerificationCounters>,
    heartbeats: Arc<Vec<AtomicI64>>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl VerificationQueue {
    /// Build the queue and spawn its workers and flusher.
    pub fn new(store: Arc<dyn DocumentStore>, config: VerificationConfig) -> Self {
        let (tx, rx) = mpsc::channel::<VerificationJob>(config.capacity.max(1));
        let (results_tx, results_rx) = mpsc::channel::<VerificationResult>(config.capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        let counters = Arc::new(VerificationCounters::default());
        let heartbeats: Arc<Vec<AtomicI64>> = Arc::new(
            (0..config.workers)
                .map(|_| AtomicI64::new(Utc::now().timestamp()))
                .collect(),
        );

        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(config.workers + 1);
        for worker_id in 0..config.workers {
            handles.push(tokio::spawn(Self::worker_loop(
                worker_id,
                rx.clone(),
                results_tx.clone(),
                store.clone(),
                counters.clone(),
                heartbeats.clone(),
                shutdown_tx.subscribe(),
            )));
        }
        // Workers hold the only result senders; the flusher observes a
        // closed channel once they exit
        drop(results_tx);

        handles.push(tokio::spawn(Self::flusher_loop(
            results_rx,
            store,
            config.flush_interval,
            config.flush_batch_size,
            shutdown_tx.subscribe(),
        )));

        tracing::info!(
            workers = config.workers,
            capacity = config.capacity,
            "Verification queue started"
        );

        Self {
            config,
            tx: Some(tx),
            counters,
            heartbeats,
            shutdown_tx,
            handles,
        }
    }

    /// Enqueue one job; a full queue is a distinct capacity error with
    /// no state change.
    pub fn enqueue(&self, job: VerificationJob) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(SyncError::QueueClosed)?;
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SyncError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::QueueClosed),
        }
    }

    /// Best-effort bulk enqueue: jobs that do not fit are dropped with
    /// a warning, and partial success still returns `Ok`.
    pub fn bulk_enqueue_jobs(&self, jobs: Vec<VerificationJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        let total = jobs.len();
        let mut dropped = 0usize;
        for job in jobs {
            match self.enqueue(job) {
                Ok(()) => {}
                Err(SyncError::QueueFull) => dropped += 1,
                Err(e) => return Err(e),
            }
        }
        if dropped > 0 {
            tracing::warn!(dropped, total, "Verification bulk enqueue overflowed");
        }
        Ok(())
    }

    pub fn jobs_processed(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Total milliseconds jobs spent waiting in the queue.
    pub fn total_wait_millis(&self) -> u64 {
        self.counters.wait_millis.load(Ordering::Relaxed)
    }

    /// Current queue occupancy.
    pub fn queue_size(&self) -> u64 {
        self.tx
            .as_ref()
            .map_or(0, |tx| (tx.max_capacity() - tx.capacity()) as u64)
    }

    /// Workers with a heartbeat inside the configured window.
    pub fn active_workers(&self) -> u64 {
        let cutoff = Utc::now().timestamp() - self.config.heartbeat_window.as_secs() as i64;
        self.heartbeats
            .iter()
            .filter(|hb| hb.load(Ordering::Relaxed) >= cutoff)
            .count() as u64
    }

    /// Healthy while occupancy stays under the threshold and at least
    /// one worker heartbeat is recent.
    pub fn is_healthy(&self) -> bool {
        let capacity = self.config.capacity.max(1) as f64;
        let occupancy = self.queue_size() as f64 / capacity;
        occupancy < self.config.healthy_occupancy && self.active_workers() > 0
    }

    pub fn snapshot(&self) -> VerificationSnapshot {
        VerificationSnapshot {
            queue_size: self.queue_size(),
            active_workers: self.active_workers(),
            jobs_processed: self.jobs_processed(),
            jobs_failed: self.jobs_failed(),
        }
    }

    /// Close the queue, signal shutdown, and wait for workers and the
    /// flusher to finish.
    pub async fn stop(&mut self) {
        self.tx.take();
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        tracing::info!("Verification queue stopped");
    }

    /// Claim the verification document and mark the mapping verified.
    async fn process_job(
        store: &Arc<dyn DocumentStore>,
        job: &VerificationJob,
    ) -> std::result::Result<bool, EngineError> {
        let now = Utc::now();
        let filter = json!({
            "phone_number": job.phone,
            "code": job.code,
            "used": false,
            "expires_at": { "$gt": now },
        });
        let set = json!({ "used": true, "used_at": now });

        let claimed = store
            .find_one_and_update(VERIFICATIONS_COLLECTION, &filter, &set)
            .await?;
        if claimed.is_none() {
            return Ok(false);
        }

        let mapping_set = json!({ "verified": true, "verified_at": now });
        store
            .update_one(MAPPINGS_COLLECTION, "phone_number", &job.phone, &mapping_set)
            .await?;
        Ok(true)
    }

    async fn worker_loop(
        worker_id: usize,
        rx: Arc<Mutex<mpsc::Receiver<VerificationJob>>>,
        results_tx: mpsc::Sender<VerificationResult>,
        store: Arc<dyn DocumentStore>,
        counters: Arc<VerificationCounters>,
        heartbeats: Arc<Vec<AtomicI64>>,
        shutdown: watch::Receiver<bool>,
    ) {
        loop {
            heartbeats[worker_id].store(Utc::now().timestamp(), Ordering::Relaxed);
            if *shutdown.borrow() {
                break;
            }

            let received = {
                let mut rx = rx.lock().await;
                tokio::time::timeout(IDLE_HEARTBEAT_TICK, rx.recv()).await
            };

            let job = match received {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(_) => continue,
            };

            let wait = (Utc::now() - job.created_at).num_milliseconds().max(0) as u64;
            counters.wait_millis.fetch_add(wait, Ordering::Relaxed);

            let verified = match Self::process_job(&store, &job).await {
                Ok(verified) => verified,
                Err(e) => {
                    tracing::warn!(
                        worker_id,
                        phone = %job.phone,
                        error = %e,
                        "Verification job errored"
                    );
                    false
                }
            };

            counters.processed.fetch_add(1, Ordering::Relaxed);
            if !verified {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }

            let result = VerificationResult {
                job,
                verified,
                completed_at: Utc::now(),
            };
            if results_tx.send(result).await.is_err() {
                tracing::warn!(worker_id, "Result channel closed; flush skipped");
            }
        }
        tracing::debug!(worker_id, "Verification worker stopped");
    }

    async fn flusher_loop(
        mut results_rx: mpsc::Receiver<VerificationResult>,
        store: Arc<dyn DocumentStore>,
        flush_interval: Duration,
        flush_batch_size: usize,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut pending: Vec<VerificationResult> = Vec::new();
        let mut interval = tokio::time::interval(flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    Self::flush(&store, &mut pending).await;
                }
                received = results_rx.recv() => match received {
                    Some(result) => {
                        pending.push(result);
                        if pending.len() >= flush_batch_size {
                            Self::flush(&store, &mut pending).await;
                        }
                    }
                    None => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Drain whatever the workers managed to push before exiting
        while let Ok(result) = results_rx.try_recv() {
            pending.push(result);
        }
        Self::flush(&store, &mut pending).await;
        tracing::debug!("Verification flusher stopped");
    }

    /// Batch-write pending results; an empty batch is a no-op.
    async fn flush(store: &Arc<dyn DocumentStore>, pending: &mut Vec<VerificationResult>) {
        if pending.is_empty() {
            return;
        }

        let docs: Vec<(String, Value)> = pending
            .iter()
            .map(|r| {
                (
                    r.job.phone.clone(),
                    json!({
                        "phone_number": r.job.phone,
                        "code": r.job.code,
                        "cpf": r.job.cpf,
                        "user_id": r.job.user_id,
                        "verified": r.verified,
                        "completed_at": r.completed_at,
                    }),
                )
            })
            .collect();

        match store
            .bulk_upsert(RESULTS_COLLECTION, "phone_number", &docs)
            .await
        {
            Ok(written) => {
                tracing::debug!(written, "Verification results flushed");
                pending.clear();
            }
            Err(e) => {
                tracing::warn!(
                    batch = pending.len(),
                    error = %e,
                    "Verification result flush failed; will retry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_persistence::MemoryStore;

    fn test_config(capacity: usize, workers: usize) -> VerificationConfig {
        VerificationConfig {
            capacity,
            workers,
            flush_interval: Duration::from_millis(50),
            flush_batch_size: 2,
            healthy_occupancy: 0.9,
            heartbeat_window: Duration::from_secs(30),
        }
    }

    fn job(phone: &str, code: &str, cpf: &str) -> VerificationJob {
        VerificationJob {
            phone: phone.to_string(),
            code: code.to_string(),
            cpf: cpf.to_string(),
            user_id: None,
            created_at: Utc::now(),
        }
    }

    fn seed_verification(store: &MemoryStore, phone: &str, code: &str, cpf: &str) {
        store.seed(
            VERIFICATIONS_COLLECTION,
            json!({
                "phone_number": phone,
                "code": code,
                "cpf": cpf,
                "used": false,
                "expires_at": "2030-01-01T00:00:00Z",
            }),
        );
        store.seed(
            MAPPINGS_COLLECTION,
            json!({
                "phone_number": phone,
                "cpf": cpf,
                "verified": false,
            }),
        );
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
    async fn test_batch_verification_flow() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..3 {
            seed_verification(&store, &format!("+552198888000{i}"), "123456", &format!("cpf-{i}"));
        }

        let mut queue = VerificationQueue::new(store.clone(), test_config(10, 2));
        let jobs = (0..3)
            .map(|i| job(&format!("+552198888000{i}"), "123456", &format!("cpf-{i}")))
            .collect();
        queue.bulk_enqueue_jobs(jobs).unwrap();

        {
            let queue = &queue;
            assert!(
                wait_until(move || queue.jobs_processed() >= 3, Duration::from_secs(1)).await
            );
        }

        for doc in store.dump(VERIFICATIONS_COLLECTION) {
            assert_eq!(doc["used"], true);
        }
        for doc in store.dump(MAPPINGS_COLLECTION) {
            assert_eq!(doc["verified"], true);
        }
        assert_eq!(queue.jobs_failed(), 0);

        // Flusher lands the batched results in the store
        let store_probe = store.clone();
        assert!(
            wait_until(
                move || store_probe.dump(RESULTS_COLLECTION).len() == 3,
                Duration::from_secs(1)
            )
            .await
        );

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_enqueue_full_returns_capacity_error() {
        let store = Arc::new(MemoryStore::new());
        // No workers: nothing drains the channel
        let mut queue = VerificationQueue::new(store, test_config(2, 0));

        queue.enqueue(job("+1", "1", "a")).unwrap();
        queue.enqueue(job("+2", "2", "b")).unwrap();
        let err = queue.enqueue(job("+3", "3", "c")).unwrap_err();
        assert!(matches!(err, SyncError::QueueFull));
        assert_eq!(queue.queue_size(), 2);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_empty_bulk_enqueue_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = VerificationQueue::new(store, test_config(2, 0));
        queue.bulk_enqueue_jobs(Vec::new()).unwrap();
        assert_eq!(queue.queue_size(), 0);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_bulk_enqueue_overflow_is_best_effort() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = VerificationQueue::new(store, test_config(2, 0));
        let jobs = (0..5).map(|i| job(&format!("+{i}"), "1", "a")).collect();
        // Partial success still returns Ok
        queue.bulk_enqueue_jobs(jobs).unwrap();
        assert_eq!(queue.queue_size(), 2);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_code_counts_as_failed() {
        let store = Arc::new(MemoryStore::new());
        seed_verification(&store, "+10", "123456", "cpf-x");

        let mut queue = VerificationQueue::new(store.clone(), test_config(10, 1));
        queue.enqueue(job("+10", "999999", "cpf-x")).unwrap();

        {
            let queue = &queue;
            assert!(
                wait_until(move || queue.jobs_processed() == 1, Duration::from_secs(1)).await
            );
        }
        assert_eq!(queue.jobs_failed(), 1);

        let docs = store.dump(VERIFICATIONS_COLLECTION);
        assert_eq!(docs[0]["used"], false);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_health_reflects_occupancy_and_heartbeats() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = VerificationQueue::new(store, test_config(4, 1));
        assert!(queue.is_healthy());
        assert_eq!(queue.active_workers(), 1);
        queue.stop().await;
    }
}

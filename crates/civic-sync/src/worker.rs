//! # Sync Worker
//!
//! Single draining loop over the per-type queues: pop, upsert into the
//! store, clean the write-buffer, refresh the read-cache, retry or
//! dead-letter on failure. Workers idle while degraded mode is active
//! and observe the broadcast shutdown between pops and between
//! retries; a job interrupted mid-execution goes back on its queue
//! with an unchanged retry count.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::backoff::BackoffPolicy;
use crate::config::SyncConfig;
use crate::degraded::DegradedMode;
use crate::metrics::{SyncMetrics, WorkerCounters};
use civic_persistence::{
    CacheKeyspace, CleanupOutcome, DataManager, DlqJob, EngineError, SyncJob,
};

/// One member of the sync fleet.
pub struct SyncWorker {
    id: usize,
    manager: Arc<DataManager>,
    queues: Vec<String>,
    metrics: Arc<SyncMetrics>,
    counters: Arc<WorkerCounters>,
    degraded: Arc<DegradedMode>,
    backoff: BackoffPolicy,
    pop_timeout: Duration,
    job_timeout: Duration,
    degraded_pause: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SyncWorker {
    pub fn new(
        id: usize,
        manager: Arc<DataManager>,
        metrics: Arc<SyncMetrics>,
        degraded: Arc<DegradedMode>,
        config: &SyncConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mut queues: Vec<String> = manager
            .registry()
            .type_tags()
            .map(CacheKeyspace::queue)
            .collect();
        queues.sort_unstable();

        let counters = Arc::new(WorkerCounters::new(id));
        metrics.register_worker(counters.clone());

        Self {
            id,
            manager,
            queues,
            metrics,
            counters,
            degraded,
            backoff: BackoffPolicy::new(config.base_delay, config.backoff_factor, config.max_delay),
            pop_timeout: config.pop_timeout,
            job_timeout: config.job_timeout,
            degraded_pause: config.degraded_pause,
            shutdown,
        }
    }

    /// Drain loop; exits once the shutdown signal fires.
    pub async fn run(mut self) {
        tracing::debug!(worker_id = self.id, "Sync worker started");
        loop {
            self.counters.heartbeat();
            if *self.shutdown.borrow() {
                break;
            }

            // Degraded gate: no pops while active, writes keep queueing
            if self.degraded.is_active() {
                tokio::select! {
                    _ = tokio::time::sleep(self.degraded_pause) => {}
                    _ = self.shutdown.changed() => {}
                }
                continue;
            }

            let popped = tokio::select! {
                res = self.manager.cache().brpop(&self.queues, self.pop_timeout) => res,
                _ = self.shutdown.changed() => continue,
            };

            match popped {
                Ok(Some((queue_key, raw))) => self.handle_entry(&queue_key, raw).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(worker_id = self.id, error = %e, "Queue pop failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.pop_timeout) => {}
                        _ = self.shutdown.changed() => {}
                    }
                }
            }
        }
        tracing::debug!(worker_id = self.id, "Sync worker stopped");
    }

    async fn handle_entry(&mut self, queue_key: &str, raw: String) {
        let entity_type = queue_key
            .strip_prefix("sync:queue:")
            .unwrap_or(queue_key)
            .to_string();

        let job = match SyncJob::decode(&raw) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(
                    worker_id = self.id,
                    entity_type = %entity_type,
                    error = %e,
                    "Undecodable queue entry dead-lettered"
                );
                self.push_dlq(&entity_type, &DlqJob::from_raw(&raw, "decode"))
                    .await;
                self.metrics.incr_failed(&entity_type);
                self.metrics.incr_dead_lettered(&entity_type);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let exec = Self::execute(self.manager.clone(), self.job_timeout, job.clone());
        tokio::pin!(exec);
        let result = tokio::select! {
            res = &mut exec => res,
            _ = self.shutdown.changed() => {
                // Interrupted mid-execution: back on the queue, retry
                // count unchanged, so the job is never left in limbo
                self.requeue(&job).await;
                return;
            }
        };

        match result {
            Ok(()) => self.finish_success(&job).await,
            Err(e) => self.finish_failure(job, e).await,
        }
    }

    async fn execute(
        manager: Arc<DataManager>,
        job_timeout: Duration,
        job: SyncJob,
    ) -> Result<(), EngineError> {
        let natural_key = manager
            .registry()
            .natural_key_for(&job.collection)
            .ok_or_else(|| EngineError::UnknownCollection(job.collection.clone()))?;

        tokio::time::timeout(
            job_timeout,
            manager
                .store()
                .upsert(&job.collection, natural_key, &job.key, &job.data),
        )
        .await
        .map_err(|_| EngineError::Timeout {
            timeout_ms: job_timeout.as_millis() as u64,
        })?
    }

    async fn finish_success(&self, job: &SyncJob) {
        match self
            .manager
            .cleanup_write_buffer(&job.entity_type, &job.key, &job.data)
            .await
        {
            Ok(CleanupOutcome::Removed | CleanupOutcome::Superseded) => {}
            Ok(CleanupOutcome::Missing) => {
                tracing::warn!(
                    entity_type = %job.entity_type,
                    key = %job.key,
                    "Write-buffer entry expired before sync completed"
                );
                self.metrics.incr_buffer_expired(&job.entity_type);
            }
            Err(e) => {
                tracing::warn!(
                    entity_type = %job.entity_type,
                    key = %job.key,
                    error = %e,
                    "Write-buffer cleanup failed"
                );
            }
        }

        if let Err(e) = self
            .manager
            .update_read_cache(&job.entity_type, &job.key, &job.data)
            .await
        {
            tracing::warn!(
                entity_type = %job.entity_type,
                key = %job.key,
                error = %e,
                "Read-cache refresh failed"
            );
        }

        self.metrics.incr_processed(&job.entity_type);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            worker_id = self.id,
            job_id = %job.id,
            entity_type = %job.entity_type,
            key = %job.key,
            "Job synced"
        );
    }

    async fn finish_failure(&mut self, mut job: SyncJob, error: EngineError) {
        let entity_type = job.entity_type.clone();

        if error.is_transient() && job.has_retry_budget() {
            job.retry_count += 1;
            self.metrics.incr_retried(&entity_type);
            let delay = self.backoff.jittered_delay(job.retry_count);
            tracing::warn!(
                worker_id = self.id,
                job_id = %job.id,
                entity_type = %entity_type,
                retry_count = job.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Job failed; retrying after backoff"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => {}
            }
            // Re-append to the tail so other jobs keep making progress
            self.requeue(&job).await;
            return;
        }

        tracing::error!(
            worker_id = self.id,
            job_id = %job.id,
            entity_type = %entity_type,
            attempts = job.retry_count + 1,
            error = %error,
            "Job dead-lettered"
        );
        match DlqJob::from_job(&job, error.to_string()) {
            Ok(dlq) => self.push_dlq(&entity_type, &dlq).await,
            Err(e) => tracing::error!(job_id = %job.id, error = %e, "DLQ record encode failed"),
        }
        self.metrics.incr_failed(&entity_type);
        self.metrics.incr_dead_lettered(&entity_type);
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    async fn requeue(&self, job: &SyncJob) {
        let queue_key = CacheKeyspace::queue(&job.entity_type);
        match job.encode() {
            Ok(encoded) => {
                if let Err(e) = self.manager.cache().lpush(&queue_key, &encoded).await {
                    tracing::error!(job_id = %job.id, error = %e, "Job re-append failed");
                }
            }
            Err(e) => tracing::error!(job_id = %job.id, error = %e, "Job re-encode failed"),
        }
    }

    async fn push_dlq(&self, entity_type: &str, dlq: &DlqJob) {
        let dlq_key = CacheKeyspace::dlq(entity_type);
        match dlq.encode() {
            Ok(encoded) => {
                if let Err(e) = self.manager.cache().lpush(&dlq_key, &encoded).await {
                    tracing::error!(entity_type, error = %e, "DLQ append failed");
                }
            }
            Err(e) => tracing::error!(entity_type, error = %e, "DLQ record encode failed"),
        }
    }
}

//! Worker pool and job lifecycle scheduler.
//!
//! Workers block on the store's pending queue and drive each claimed
//! job through exactly one status transition per attempt. Handlers
//! never touch job status or retry bookkeeping; they only report an
//! [`Outcome`] or an error.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::store::JobStore;
use crate::jobs::types::{Job, JobPayload, JobStatus, Outcome};

pub const STAT_ENQUEUED: &str = "enqueued";
pub const STAT_COMPLETED: &str = "completed";
pub const STAT_FAILED: &str = "failed";
pub const STAT_RETRIED: &str = "retried";
pub const STAT_REQUEUED: &str = "requeued";
pub const STAT_RECOVERED: &str = "recovered";
pub const STAT_EVICTED: &str = "evicted";

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of concurrent worker tasks.
    pub workers: usize,
    /// How long a worker blocks on an empty queue before rechecking
    /// the stop signal.
    pub dequeue_timeout: Duration,
    /// Delay before a failed job's nth retry is `n * backoff_base`.
    pub retry_backoff_base: Duration,
    /// How often the sweeper scans the processing list.
    pub sweep_interval: Duration,
    /// Processing entries older than this are presumed orphaned.
    pub stuck_max_age: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            dequeue_timeout: Duration::from_secs(1),
            retry_backoff_base: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            stuck_max_age: Duration::from_secs(600),
        }
    }
}

/// Handler for one claimed job. Implementations must be idempotent:
/// at-least-once delivery means the same job can arrive twice.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<Outcome>;
}

/// Cheap cloneable enqueue facade. Processors hold one of these to
/// fan out follow-up jobs without a reference cycle back to the queue.
#[derive(Clone)]
pub struct Enqueuer {
    store: Arc<dyn JobStore>,
}

impl std::fmt::Debug for Enqueuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enqueuer").finish_non_exhaustive()
    }
}

impl Enqueuer {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Persist a new job and append it to the pending queue.
    pub async fn enqueue(&self, payload: JobPayload) -> Result<Uuid> {
        let job = Job::new(payload);
        self.store.put_job(&job).await?;
        self.store.push_back_pending(job.id).await?;
        self.store.incr_stat(STAT_ENQUEUED, 1).await?;
        debug!(job_id = %job.id, job_type = job.kind(), "job enqueued");
        Ok(job.id)
    }
}

/// Counters and queue depths for status endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueSnapshot {
    pub pending: i64,
    pub processing: i64,
    pub stats: std::collections::HashMap<String, i64>,
}

struct RunningState {
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct JobQueue {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
    running: Mutex<Option<RunningState>>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, handler: Arc<dyn JobHandler>, config: QueueConfig) -> Self {
        Self {
            store,
            handler,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn enqueuer(&self) -> Enqueuer {
        Enqueuer::new(self.store.clone())
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    /// Spawn the worker pool and the sweeper. A second call while
    /// running is a no-op.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(self.config.workers + 1);

        for worker_id in 0..self.config.workers {
            let ctx = WorkerContext {
                store: self.store.clone(),
                handler: self.handler.clone(),
                config: self.config.clone(),
            };
            let stop = stop_rx.clone();
            handles.push(tokio::spawn(async move {
                ctx.worker_loop(worker_id, stop).await;
            }));
        }

        {
            let ctx = WorkerContext {
                store: self.store.clone(),
                handler: self.handler.clone(),
                config: self.config.clone(),
            };
            let stop = stop_rx;
            handles.push(tokio::spawn(async move {
                ctx.sweeper_loop(stop).await;
            }));
        }

        info!(workers = self.config.workers, "job queue started");
        *running = Some(RunningState { stop_tx, handles });
    }

    /// Signal all tasks to stop and wait for in-flight jobs to finish
    /// their current attempt. Safe to call when not running.
    pub async fn stop(&self) {
        let state = self.running.lock().await.take();
        let Some(state) = state else {
            return;
        };

        let _ = state.stop_tx.send(true);
        for handle in state.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task panicked during shutdown");
            }
        }
        info!("job queue stopped");
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        Ok(QueueSnapshot {
            pending: self.store.queue_len().await?,
            processing: self.store.processing_len().await?,
            stats: self.store.stats().await?,
        })
    }
}

struct WorkerContext {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
}

impl WorkerContext {
    async fn worker_loop(&self, worker_id: usize, stop: watch::Receiver<bool>) {
        debug!(worker_id, "worker started");
        while !*stop.borrow() {
            match self
                .store
                .move_pending_to_processing(self.config.dequeue_timeout)
                .await
            {
                Ok(Some(id)) => self.process_claimed(id).await,
                Ok(None) => {}
                Err(e) => {
                    warn!(worker_id, error = %e, "dequeue failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        debug!(worker_id, "worker stopped");
    }

    /// Drive one claimed id through a single attempt.
    async fn process_claimed(&self, id: Uuid) {
        let mut job = match self.store.get_job(id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                // Record expired or was deleted out from under the
                // queue; drop the orphaned id.
                warn!(job_id = %id, "claimed id has no job record, evicting");
                self.evict(id).await;
                return;
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "job record unreadable, evicting");
                self.evict(id).await;
                let _ = self.store.delete_job(id).await;
                return;
            }
        };

        job.mark_processing();
        if let Err(e) = self.store.put_job(&job).await {
            warn!(job_id = %id, error = %e, "failed to persist processing status");
        }

        debug!(job_id = %id, job_type = job.kind(), "processing job");
        match self.handler.handle(&job).await {
            Ok(Outcome::Done) => self.complete(job).await,
            Ok(Outcome::Requeued) => self.requeue(job).await,
            Err(e) => self.fail_attempt(job, e.to_string()).await,
        }
    }

    async fn complete(&self, mut job: Job) {
        job.mark_completed();
        if let Err(e) = self.store.remove_processing(job.id).await {
            warn!(job_id = %job.id, error = %e, "failed to clear processing entry");
        }
        // Completed records are not kept around; the stats hash is the
        // durable trace.
        if let Err(e) = self.store.delete_job(job.id).await {
            warn!(job_id = %job.id, error = %e, "failed to delete completed job");
        }
        let _ = self.store.incr_stat(STAT_COMPLETED, 1).await;
        debug!(job_id = %job.id, job_type = job.kind(), "job completed");
    }

    /// Node routing: this node cannot run the job, put it back for
    /// another consumer. Retry bookkeeping is deliberately untouched.
    async fn requeue(&self, job: Job) {
        let kind = job.kind();
        let id = job.id;
        self.reset_to_pending(job, STAT_REQUEUED).await;
        debug!(job_id = %id, job_type = kind, "job requeued for another node");
    }

    /// Stuck recovery: the claiming worker is presumed dead, but may
    /// only be slow, so the attempt is not charged against the retry
    /// budget either.
    async fn recover_stuck(&self, job: Job) {
        let kind = job.kind();
        let id = job.id;
        self.reset_to_pending(job, STAT_RECOVERED).await;
        debug!(job_id = %id, job_type = kind, "stuck job reset to pending");
    }

    async fn reset_to_pending(&self, mut job: Job, stat: &'static str) {
        job.status = JobStatus::Pending;
        job.updated_at = chrono::Utc::now();
        job.processed_at = None;
        if let Err(e) = self.store.put_job(&job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist pending job");
        }
        if let Err(e) = self.store.remove_processing(job.id).await {
            warn!(job_id = %job.id, error = %e, "failed to clear processing entry");
        }
        if let Err(e) = self.store.push_back_pending(job.id).await {
            error!(job_id = %job.id, error = %e, "failed to re-enqueue job");
            return;
        }
        let _ = self.store.incr_stat(stat, 1).await;
    }

    async fn fail_attempt(&self, mut job: Job, error_msg: String) {
        job.mark_failed(&error_msg);

        if let Err(e) = self.store.remove_processing(job.id).await {
            warn!(job_id = %job.id, error = %e, "failed to clear processing entry");
        }

        if job.is_retryable() {
            job.mark_retrying();
            if let Err(e) = self.store.put_job(&job).await {
                warn!(job_id = %job.id, error = %e, "failed to persist retrying job");
            }
            let _ = self.store.incr_stat(STAT_RETRIED, 1).await;

            let delay = self.config.retry_backoff_base * job.retry_count;
            warn!(
                job_id = %job.id,
                job_type = job.kind(),
                retry = job.retry_count,
                delay_secs = delay.as_secs(),
                error = %error_msg,
                "job failed, scheduling retry"
            );

            let store = self.store.clone();
            let id = job.id;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = store.push_back_pending(id).await {
                    error!(job_id = %id, error = %e, "failed to re-enqueue retry");
                }
            });
        } else {
            if let Err(e) = self.store.put_job(&job).await {
                warn!(job_id = %job.id, error = %e, "failed to persist failed job");
            }
            let _ = self.store.incr_stat(STAT_FAILED, 1).await;
            error!(
                job_id = %job.id,
                job_type = job.kind(),
                retries = job.retry_count,
                error = %error_msg,
                "job failed permanently"
            );
        }
    }

    async fn evict(&self, id: Uuid) {
        if let Err(e) = self.store.remove_processing(id).await {
            warn!(job_id = %id, error = %e, "failed to evict orphaned id");
        }
        let _ = self.store.incr_stat(STAT_EVICTED, 1).await;
    }

    async fn sweeper_loop(&self, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh start
        // does not sweep jobs claimed milliseconds ago.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_once().await,
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("sweeper stopped");
    }

    /// Recover jobs whose worker died mid-attempt. Old processing
    /// entries are force-reset to pending; there is no per-job lease,
    /// so a false positive on a slow worker means double execution and
    /// handlers must be idempotent.
    async fn sweep_once(&self) {
        let ids = match self.store.list_processing().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "sweep could not list processing jobs");
                return;
            }
        };

        let now = chrono::Utc::now();
        for id in ids {
            match self.store.get_job(id).await {
                Ok(Some(job)) => {
                    let age = job.processing_age(now);
                    if age.num_seconds() >= self.config.stuck_max_age.as_secs() as i64 {
                        warn!(
                            job_id = %id,
                            job_type = job.kind(),
                            age_secs = age.num_seconds(),
                            "stuck job detected, recovering"
                        );
                        self.recover_stuck(job).await;
                    }
                }
                Ok(None) => {
                    warn!(job_id = %id, "processing id has no record, evicting");
                    self.evict(id).await;
                }
                Err(e) => {
                    warn!(job_id = %id, error = %e, "sweep could not read job");
                }
            }
        }
    }
}

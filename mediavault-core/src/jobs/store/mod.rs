//! Durable job storage.
//!
//! The layout is two lists plus one record key per job:
//!
//! * `job_queue`       pending job ids, consumed from the tail
//! * `job_processing`  ids currently claimed by a worker
//! * `job:<id>`        the JSON job record, expiring after 24h
//! * `job_stats`       monotonic counters per lifecycle event
//!
//! A dequeue atomically shifts an id from pending to processing, so a
//! worker crash leaves the id parked in `job_processing` where the
//! sweeper can find it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::types::Job;

pub mod memory;
pub mod redis;

pub use memory::MemoryJobStore;
pub use redis::RedisJobStore;

pub const JOB_KEY_PREFIX: &str = "job:";
pub const JOB_QUEUE_KEY: &str = "job_queue";
pub const JOB_PROCESSING_KEY: &str = "job_processing";
pub const JOB_STATS_KEY: &str = "job_stats";

pub fn job_key(id: Uuid) -> String {
    format!("{JOB_KEY_PREFIX}{id}")
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create or overwrite a job record, refreshing its TTL.
    async fn put_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;

    async fn delete_job(&self, id: Uuid) -> Result<()>;

    /// Append an id to the pending queue (normal enqueue).
    async fn push_back_pending(&self, id: Uuid) -> Result<()>;

    /// Block up to `timeout` for a pending id and atomically move it
    /// to the processing list. `None` on timeout.
    async fn move_pending_to_processing(&self, timeout: Duration) -> Result<Option<Uuid>>;

    /// Drop an id from the processing list once its fate is decided.
    async fn remove_processing(&self, id: Uuid) -> Result<()>;

    /// Snapshot of ids currently in the processing list.
    async fn list_processing(&self) -> Result<Vec<Uuid>>;

    async fn incr_stat(&self, name: &str, delta: i64) -> Result<()>;

    async fn stats(&self) -> Result<HashMap<String, i64>>;

    async fn queue_len(&self) -> Result<i64>;

    async fn processing_len(&self) -> Result<i64>;
}

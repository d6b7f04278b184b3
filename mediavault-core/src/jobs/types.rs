//! Job records and per-type payloads.
//!
//! Payloads form a tagged union so a field-name typo fails at the
//! decode boundary instead of silently producing an empty value. The
//! persisted JSON shape keeps `type` and `payload` as separate fields:
//!
//! ```json
//! {"id":"...","type":"move_asset","payload":{...},"status":"pending",...}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Jobs expire from the store after 24 hours.
pub const JOB_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode/derive variants for one asset through the external pixel
/// engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetProcessingPayload {
    pub asset_id: i64,
    pub asset_uuid: Uuid,
    pub relative_path: String,
    pub file_name: String,
    /// Enqueue an object-store backup once processing succeeds.
    pub enable_backup: bool,
    /// Routing hint: pool the original was uploaded into.
    pub pool_id: i64,
}

/// Push one asset's original into durable off-site object storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectBackupPayload {
    pub asset_id: i64,
    pub asset_uuid: Uuid,
    pub backup_id: i64,
}

/// Remove one off-site copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDeletePayload {
    pub asset_id: i64,
    pub asset_uuid: Uuid,
    pub object_key: String,
    pub bucket: String,
    pub backup_id: i64,
}

/// Paginate a source pool's assets and fan out per-asset move jobs,
/// re-enqueueing itself with a cursor until the pool is exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMoveEnqueuePayload {
    pub source_pool_id: i64,
    pub target_pool_id: i64,
    /// Last asset id already fanned out; 0 = start.
    pub cursor_id: i64,
}

/// Relocate one asset and its variants between two pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveAssetPayload {
    pub asset_id: i64,
    pub source_pool_id: i64,
    pub target_pool_id: i64,
}

/// Remove an asset's files and rows, optionally resolving the
/// moderation report that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteAssetPayload {
    pub asset_id: i64,
    pub asset_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_report_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiated_by_id: Option<i64>,
}

/// Catch variants created after a move completed and relocate them to
/// the asset's current pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileVariantsPayload {
    pub asset_id: i64,
    pub asset_uuid: Uuid,
    /// 0 = use the asset's current pool.
    pub target_pool_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobPayload {
    AssetProcessing(AssetProcessingPayload),
    ObjectBackup(ObjectBackupPayload),
    ObjectDelete(ObjectDeletePayload),
    PoolMoveEnqueue(PoolMoveEnqueuePayload),
    MoveAsset(MoveAssetPayload),
    DeleteAsset(DeleteAssetPayload),
    ReconcileVariants(ReconcileVariantsPayload),
}

impl JobPayload {
    /// Wire name of the job type, used for stats and logging.
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::AssetProcessing(_) => "asset_processing",
            JobPayload::ObjectBackup(_) => "object_backup",
            JobPayload::ObjectDelete(_) => "object_delete",
            JobPayload::PoolMoveEnqueue(_) => "pool_move_enqueue",
            JobPayload::MoveAsset(_) => "move_asset",
            JobPayload::DeleteAsset(_) => "delete_asset",
            JobPayload::ReconcileVariants(_) => "reconcile_variants",
        }
    }
}

/// A durable background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    #[serde(flatten)]
    pub payload: JobPayload,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_msg: String,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Job {
    pub fn new(payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payload,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            processed_at: None,
            completed_at: None,
            error_msg: String::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    pub fn is_retryable(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.max_retries
    }

    pub fn mark_processing(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.updated_at = now;
        self.processed_at = Some(now);
    }

    pub fn mark_completed(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.updated_at = now;
        self.completed_at = Some(now);
        self.error_msg.clear();
    }

    pub fn mark_failed(&mut self, error_msg: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.updated_at = Utc::now();
        self.error_msg = error_msg.into();
        self.retry_count += 1;
    }

    pub fn mark_retrying(&mut self) {
        self.status = JobStatus::Retrying;
        self.updated_at = Utc::now();
    }

    /// Age of the job since it was claimed (falling back through the
    /// update and creation timestamps). Drives stuck-job recovery.
    pub fn processing_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        let started = self.processed_at.unwrap_or(self.updated_at);
        now - started
    }
}

/// What a handler reports back to the scheduler.
///
/// `Requeued` is cooperative node routing, not a failure: the job must
/// run on a different node, so it goes back to pending untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Requeued,
}

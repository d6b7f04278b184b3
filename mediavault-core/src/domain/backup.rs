//! Off-site object-storage backup records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VaultError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
    Deleted,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Uploading => "uploading",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
            BackupStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BackupStatus::Pending),
            "uploading" => Ok(BackupStatus::Uploading),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            "deleted" => Ok(BackupStatus::Deleted),
            other => Err(VaultError::Internal(format!(
                "unknown backup status: {other}"
            ))),
        }
    }
}

/// Tracks one off-site copy of an asset's original file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: i64,
    pub asset_id: i64,
    pub provider: String,
    pub status: BackupStatus,
    pub object_key: String,
    pub bucket: String,
    pub size: i64,
    pub error_message: String,
    pub retry_count: u32,
    /// Node that claimed the upload, for diagnostics.
    pub claimed_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupRecord {
    pub const MAX_UPLOAD_RETRIES: u32 = 5;

    pub fn is_retryable(&self) -> bool {
        self.status == BackupStatus::Failed && self.retry_count < Self::MAX_UPLOAD_RETRIES
    }
}

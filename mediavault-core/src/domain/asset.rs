//! Relocatable asset and variant records.
//!
//! The rows themselves are owned by the external domain layer; the
//! core only reads them and rewrites their `storage_pool_id` pointer,
//! which is the single source of truth for where a file lives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub uuid: Uuid,
    /// Path relative to the pool root, e.g. `original/2026/08/25`.
    pub relative_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub storage_pool_id: i64,
    pub created_at: DateTime<Utc>,
    pub last_viewed_at: Option<DateTime<Utc>>,
}

impl Asset {
    /// Relative path of the original file inside its pool.
    pub fn stored_path(&self) -> String {
        format!("{}/{}", self.relative_path.trim_matches('/'), self.file_name)
    }

    /// Timestamp of the most recent activity, falling back to the
    /// creation time for never-viewed assets.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_viewed_at.unwrap_or(self.created_at)
    }
}

/// A derived rendition of an asset (thumbnail, webp, preview, ...).
///
/// `storage_pool_id = None` means the variant inherits its asset's
/// pool; a differing value is transient and cleaned up by the
/// reconcile job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetVariant {
    pub id: i64,
    pub asset_id: i64,
    pub variant_kind: String,
    pub relative_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub storage_pool_id: Option<i64>,
}

impl AssetVariant {
    pub fn stored_path(&self) -> String {
        format!("{}/{}", self.relative_path.trim_matches('/'), self.file_name)
    }

    /// Pool this variant's file actually lives in.
    pub fn effective_pool_id(&self, asset_pool_id: i64) -> i64 {
        match self.storage_pool_id {
            Some(id) if id > 0 => id,
            _ => asset_pool_id,
        }
    }
}

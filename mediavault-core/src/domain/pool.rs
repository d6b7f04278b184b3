//! Storage pool metadata and capacity helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VaultError;

/// Physical backing of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    Nfs,
    S3,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Local => "local",
            StorageType::Nfs => "nfs",
            StorageType::S3 => "s3",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(StorageType::Local),
            "nfs" => Ok(StorageType::Nfs),
            "s3" => Ok(StorageType::S3),
            other => Err(VaultError::Internal(format!(
                "unsupported storage type: {other}"
            ))),
        }
    }
}

/// Access-latency tier a pool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Hot,
    Warm,
    Cold,
    Archive,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Hot => "hot",
            StorageTier::Warm => "warm",
            StorageTier::Cold => "cold",
            StorageTier::Archive => "archive",
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageTier {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hot" => Ok(StorageTier::Hot),
            "warm" => Ok(StorageTier::Warm),
            "cold" => Ok(StorageTier::Cold),
            "archive" => Ok(StorageTier::Archive),
            other => Err(VaultError::Internal(format!(
                "unsupported storage tier: {other}"
            ))),
        }
    }
}

/// A storage location for assets and their variants.
///
/// `used_size` is only ever mutated through signed deltas at the
/// repository layer; it is never recomputed from a rescan during
/// normal operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePool {
    pub id: i64,
    pub name: String,
    /// Filesystem root for local/NFS pools, `bucket/prefix` for S3 pools.
    pub base_path: String,
    pub storage_type: StorageType,
    pub storage_tier: StorageTier,
    /// Logical node identifier, e.g. `s01`. Empty = no node affinity.
    pub node_id: String,
    /// Base URL of the node's internal upload API; the replication
    /// endpoint is derived from it.
    pub upload_api_url: String,
    pub max_size: i64,
    pub used_size: i64,
    pub is_active: bool,
    pub is_default: bool,
    /// Lower number = higher priority.
    pub priority: i32,
}

impl StoragePool {
    pub fn available(&self) -> i64 {
        self.max_size - self.used_size
    }

    pub fn usage_percent(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        (self.used_size as f64 / self.max_size as f64) * 100.0
    }

    pub fn can_accept(&self, size: i64) -> bool {
        self.is_active && self.available() >= size
    }

    /// Local and NFS pools are bound to the node that mounts them; S3
    /// pools are reachable from anywhere.
    pub fn is_node_affine(&self) -> bool {
        matches!(self.storage_type, StorageType::Local | StorageType::Nfs)
    }

    pub fn is_s3(&self) -> bool {
        self.storage_type == StorageType::S3
    }

    /// Coarse health check: configuration is plausible and the pool is
    /// not over capacity. Local/NFS pools additionally require their
    /// base path to exist on this node.
    pub fn is_healthy(&self) -> bool {
        if self.base_path.trim().is_empty() {
            return false;
        }
        if self.used_size > self.max_size {
            tracing::warn!(
                pool = %self.name,
                used = self.used_size,
                max = self.max_size,
                "pool is over capacity"
            );
            return false;
        }
        if self.is_node_affine() && !std::path::Path::new(&self.base_path).is_dir() {
            return false;
        }
        true
    }
}

/// Cached, read-mostly health snapshot for a pool. Never authoritative
/// for capacity accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolHealth {
    pub pool_id: i64,
    pub healthy: bool,
    pub used_size: i64,
    pub max_size: i64,
    pub usage_percent: f64,
    pub checked_at: DateTime<Utc>,
}

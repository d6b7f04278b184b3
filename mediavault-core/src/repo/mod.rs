//! Persistence traits for pools, assets, and backup records.
//!
//! The core is written against these traits; binaries wire in the
//! Postgres implementations while tests use the in-memory ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Asset, AssetVariant, BackupRecord, StoragePool};
use crate::error::Result;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryAssetRepository, MemoryBackupRepository, MemoryPoolRepository};
pub use postgres::{PgAssetRepository, PgBackupRepository, PgPoolRepository};

#[async_trait]
pub trait PoolRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<StoragePool>>;

    /// Active pools ordered by priority ascending, then id ascending.
    async fn list_active(&self) -> Result<Vec<StoragePool>>;

    async fn default_pool(&self) -> Result<Option<StoragePool>>;

    /// Apply a signed delta to `used_size` without touching any other
    /// column. Concurrent movers each apply their own delta; the sum
    /// stays correct because the update is relative, not a readback.
    async fn adjust_used_size(&self, id: i64, delta: i64) -> Result<()>;

    /// Reset `used_size` to the sum of the asset and variant bytes
    /// actually recorded in the pool. Repairs accounting drift after
    /// crashes mid-move; nothing schedules this automatically.
    async fn recompute_used_size(&self, id: i64) -> Result<i64>;
}

#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn get_asset(&self, id: i64) -> Result<Option<Asset>>;

    async fn variants_of(&self, asset_id: i64) -> Result<Vec<AssetVariant>>;

    /// Flip the asset and all of its variants to `target_pool_id` in
    /// one transaction. Variant rows get an explicit pool id so a
    /// concurrent reader never sees a mixed state.
    async fn update_asset_and_variants_pool(&self, asset_id: i64, target_pool_id: i64)
    -> Result<()>;

    async fn set_variant_pool(&self, variant_id: i64, pool_id: Option<i64>) -> Result<()>;

    /// Keyset page of a pool's assets with `id > cursor_id`, ordered by
    /// id ascending. Drives pool-wide move fan-out.
    async fn assets_in_pool_after(
        &self,
        pool_id: i64,
        cursor_id: i64,
        limit: i64,
    ) -> Result<Vec<Asset>>;

    /// Assets in the given pools whose last activity predates `cutoff`,
    /// oldest activity first. Drives the tiering sweep.
    async fn idle_assets_in_pools(
        &self,
        pool_ids: &[i64],
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Asset>>;

    /// Remove the asset row and its variant rows.
    async fn delete_asset_rows(&self, asset_id: i64) -> Result<()>;

    /// Mark the moderation report that triggered a deletion as resolved.
    async fn resolve_report(&self, report_id: i64, resolved_by: Option<i64>) -> Result<()>;
}

#[async_trait]
pub trait BackupRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<BackupRecord>>;

    async fn backups_for_asset(&self, asset_id: i64) -> Result<Vec<BackupRecord>>;

    async fn create_pending(&self, asset_id: i64, provider: &str) -> Result<BackupRecord>;

    /// Atomically move a pending or failed record to `uploading`,
    /// stamping the claiming node. Returns false when another worker
    /// already holds the claim.
    async fn claim_for_upload(&self, id: i64, node_id: &str) -> Result<bool>;

    async fn mark_completed(
        &self,
        id: i64,
        object_key: &str,
        bucket: &str,
        size: i64,
    ) -> Result<()>;

    /// Record a failure and bump the retry counter.
    async fn mark_failed(&self, id: i64, error: &str) -> Result<()>;

    async fn mark_deleted(&self, id: i64) -> Result<()>;

    /// Failed records still under the retry cap, oldest first.
    async fn retryable(&self, limit: i64) -> Result<Vec<BackupRecord>>;

    /// Records stuck in `uploading` since before `cutoff`. These are
    /// claims from crashed workers and get bounced back to pending.
    async fn stuck_uploading(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupRecord>>;

    /// Bounce a stale claim back to pending so it can be re-claimed.
    async fn release_claim(&self, id: i64) -> Result<()>;
}

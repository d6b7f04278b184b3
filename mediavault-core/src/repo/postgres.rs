//! Postgres-backed repositories.
//!
//! Queries are runtime-checked `query_as` calls against row structs;
//! enum columns travel as text and convert at the edge.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    Asset, AssetVariant, BackupRecord, BackupStatus, StoragePool, StorageTier, StorageType,
};
use crate::error::{Result, VaultError};
use crate::repo::{AssetRepository, BackupRepository, PoolRepository};

#[derive(sqlx::FromRow)]
struct PoolRow {
    id: i64,
    name: String,
    base_path: String,
    storage_type: String,
    storage_tier: String,
    node_id: String,
    upload_api_url: String,
    max_size: i64,
    used_size: i64,
    is_active: bool,
    is_default: bool,
    priority: i32,
}

impl TryFrom<PoolRow> for StoragePool {
    type Error = VaultError;

    fn try_from(row: PoolRow) -> Result<Self> {
        Ok(StoragePool {
            id: row.id,
            name: row.name,
            base_path: row.base_path,
            storage_type: row.storage_type.parse::<StorageType>()?,
            storage_tier: row.storage_tier.parse::<StorageTier>()?,
            node_id: row.node_id,
            upload_api_url: row.upload_api_url,
            max_size: row.max_size,
            used_size: row.used_size,
            is_active: row.is_active,
            is_default: row.is_default,
            priority: row.priority,
        })
    }
}

const POOL_COLUMNS: &str = "id, name, base_path, storage_type, storage_tier, node_id, \
     upload_api_url, max_size, used_size, is_active, is_default, priority";

pub struct PgPoolRepository {
    pool: PgPool,
}

impl PgPoolRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PoolRepository for PgPoolRepository {
    async fn get(&self, id: i64) -> Result<Option<StoragePool>> {
        let row = sqlx::query_as::<_, PoolRow>(&format!(
            "SELECT {POOL_COLUMNS} FROM storage_pools WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(StoragePool::try_from).transpose()
    }

    async fn list_active(&self) -> Result<Vec<StoragePool>> {
        let rows = sqlx::query_as::<_, PoolRow>(&format!(
            "SELECT {POOL_COLUMNS} FROM storage_pools \
             WHERE is_active = TRUE ORDER BY priority ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StoragePool::try_from).collect()
    }

    async fn default_pool(&self) -> Result<Option<StoragePool>> {
        let row = sqlx::query_as::<_, PoolRow>(&format!(
            "SELECT {POOL_COLUMNS} FROM storage_pools \
             WHERE is_default = TRUE AND is_active = TRUE \
             ORDER BY priority ASC, id ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.map(StoragePool::try_from).transpose()
    }

    async fn adjust_used_size(&self, id: i64, delta: i64) -> Result<()> {
        sqlx::query("UPDATE storage_pools SET used_size = used_size + $1 WHERE id = $2")
            .bind(delta)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recompute_used_size(&self, id: i64) -> Result<i64> {
        let (total,) = sqlx::query_as::<_, (i64,)>(
            "UPDATE storage_pools SET used_size = \
               COALESCE((SELECT SUM(a.file_size) FROM assets a \
                         WHERE a.storage_pool_id = storage_pools.id), 0) \
             + COALESCE((SELECT SUM(v.file_size) FROM asset_variants v \
                         JOIN assets a ON a.id = v.asset_id \
                         WHERE CASE WHEN v.storage_pool_id IS NOT NULL \
                                     AND v.storage_pool_id > 0 \
                               THEN v.storage_pool_id \
                               ELSE a.storage_pool_id END = storage_pools.id), 0) \
             WHERE id = $1 RETURNING used_size",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(VaultError::PoolNotFound(id))?;
        Ok(total)
    }
}

#[derive(sqlx::FromRow)]
struct AssetRow {
    id: i64,
    uuid: Uuid,
    relative_path: String,
    file_name: String,
    file_size: i64,
    storage_pool_id: i64,
    created_at: DateTime<Utc>,
    last_viewed_at: Option<DateTime<Utc>>,
}

impl From<AssetRow> for Asset {
    fn from(row: AssetRow) -> Self {
        Asset {
            id: row.id,
            uuid: row.uuid,
            relative_path: row.relative_path,
            file_name: row.file_name,
            file_size: row.file_size,
            storage_pool_id: row.storage_pool_id,
            created_at: row.created_at,
            last_viewed_at: row.last_viewed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    id: i64,
    asset_id: i64,
    variant_kind: String,
    relative_path: String,
    file_name: String,
    file_size: i64,
    storage_pool_id: Option<i64>,
}

impl From<VariantRow> for AssetVariant {
    fn from(row: VariantRow) -> Self {
        AssetVariant {
            id: row.id,
            asset_id: row.asset_id,
            variant_kind: row.variant_kind,
            relative_path: row.relative_path,
            file_name: row.file_name,
            file_size: row.file_size,
            storage_pool_id: row.storage_pool_id,
        }
    }
}

const ASSET_COLUMNS: &str = "id, uuid, relative_path, file_name, file_size, storage_pool_id, \
     created_at, last_viewed_at";

const VARIANT_COLUMNS: &str =
    "id, asset_id, variant_kind, relative_path, file_name, file_size, storage_pool_id";

pub struct PgAssetRepository {
    pool: PgPool,
}

impl PgAssetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssetRepository for PgAssetRepository {
    async fn get_asset(&self, id: i64) -> Result<Option<Asset>> {
        let row = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Asset::from))
    }

    async fn variants_of(&self, asset_id: i64) -> Result<Vec<AssetVariant>> {
        let rows = sqlx::query_as::<_, VariantRow>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM asset_variants \
             WHERE asset_id = $1 ORDER BY id ASC"
        ))
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AssetVariant::from).collect())
    }

    async fn update_asset_and_variants_pool(
        &self,
        asset_id: i64,
        target_pool_id: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE assets SET storage_pool_id = $1 WHERE id = $2")
            .bind(target_pool_id)
            .bind(asset_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE asset_variants SET storage_pool_id = $1 WHERE asset_id = $2")
            .bind(target_pool_id)
            .bind(asset_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_variant_pool(&self, variant_id: i64, pool_id: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE asset_variants SET storage_pool_id = $1 WHERE id = $2")
            .bind(pool_id)
            .bind(variant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn assets_in_pool_after(
        &self,
        pool_id: i64,
        cursor_id: i64,
        limit: i64,
    ) -> Result<Vec<Asset>> {
        let rows = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets \
             WHERE storage_pool_id = $1 AND id > $2 \
             ORDER BY id ASC LIMIT $3"
        ))
        .bind(pool_id)
        .bind(cursor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Asset::from).collect())
    }

    async fn idle_assets_in_pools(
        &self,
        pool_ids: &[i64],
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Asset>> {
        if pool_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets \
             WHERE storage_pool_id = ANY($1) \
               AND COALESCE(last_viewed_at, created_at) < $2 \
             ORDER BY COALESCE(last_viewed_at, created_at) ASC LIMIT $3"
        ))
        .bind(pool_ids)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Asset::from).collect())
    }

    async fn delete_asset_rows(&self, asset_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM asset_variants WHERE asset_id = $1")
            .bind(asset_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM assets WHERE id = $1")
            .bind(asset_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn resolve_report(&self, report_id: i64, resolved_by: Option<i64>) -> Result<()> {
        sqlx::query(
            "UPDATE reports SET status = 'resolved', resolved_by = $1, resolved_at = NOW() \
             WHERE id = $2",
        )
        .bind(resolved_by)
        .bind(report_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct BackupRow {
    id: i64,
    asset_id: i64,
    provider: String,
    status: String,
    object_key: String,
    bucket: String,
    size: i64,
    error_message: String,
    retry_count: i32,
    claimed_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BackupRow> for BackupRecord {
    type Error = VaultError;

    fn try_from(row: BackupRow) -> Result<Self> {
        Ok(BackupRecord {
            id: row.id,
            asset_id: row.asset_id,
            provider: row.provider,
            status: row.status.parse::<BackupStatus>()?,
            object_key: row.object_key,
            bucket: row.bucket,
            size: row.size,
            error_message: row.error_message,
            retry_count: row.retry_count.max(0) as u32,
            claimed_by: row.claimed_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const BACKUP_COLUMNS: &str = "id, asset_id, provider, status, object_key, bucket, size, \
     error_message, retry_count, claimed_by, created_at, updated_at";

pub struct PgBackupRepository {
    pool: PgPool,
}

impl PgBackupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BackupRepository for PgBackupRepository {
    async fn get(&self, id: i64) -> Result<Option<BackupRecord>> {
        let row = sqlx::query_as::<_, BackupRow>(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backup_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BackupRecord::try_from).transpose()
    }

    async fn backups_for_asset(&self, asset_id: i64) -> Result<Vec<BackupRecord>> {
        let rows = sqlx::query_as::<_, BackupRow>(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backup_records \
             WHERE asset_id = $1 ORDER BY id ASC"
        ))
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BackupRecord::try_from).collect()
    }

    async fn create_pending(&self, asset_id: i64, provider: &str) -> Result<BackupRecord> {
        let row = sqlx::query_as::<_, BackupRow>(&format!(
            "INSERT INTO backup_records \
                 (asset_id, provider, status, object_key, bucket, size, \
                  error_message, retry_count, claimed_by, created_at, updated_at) \
             VALUES ($1, $2, 'pending', '', '', 0, '', 0, '', NOW(), NOW()) \
             RETURNING {BACKUP_COLUMNS}"
        ))
        .bind(asset_id)
        .bind(provider)
        .fetch_one(&self.pool)
        .await?;
        BackupRecord::try_from(row)
    }

    async fn claim_for_upload(&self, id: i64, node_id: &str) -> Result<bool> {
        // The status guard in the WHERE clause makes the claim a
        // compare-and-swap: only one node's UPDATE matches.
        let result = sqlx::query(
            "UPDATE backup_records \
             SET status = 'uploading', claimed_by = $1, updated_at = NOW() \
             WHERE id = $2 AND status IN ('pending', 'failed')",
        )
        .bind(node_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        id: i64,
        object_key: &str,
        bucket: &str,
        size: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE backup_records \
             SET status = 'completed', object_key = $1, bucket = $2, size = $3, \
                 error_message = '', updated_at = NOW() \
             WHERE id = $4",
        )
        .bind(object_key)
        .bind(bucket)
        .bind(size)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE backup_records \
             SET status = 'failed', error_message = $1, \
                 retry_count = retry_count + 1, updated_at = NOW() \
             WHERE id = $2",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_deleted(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE backup_records SET status = 'deleted', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retryable(&self, limit: i64) -> Result<Vec<BackupRecord>> {
        let rows = sqlx::query_as::<_, BackupRow>(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backup_records \
             WHERE status = 'failed' AND retry_count < $1 \
             ORDER BY updated_at ASC LIMIT $2"
        ))
        .bind(BackupRecord::MAX_UPLOAD_RETRIES as i32)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BackupRecord::try_from).collect()
    }

    async fn stuck_uploading(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        let rows = sqlx::query_as::<_, BackupRow>(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backup_records \
             WHERE status = 'uploading' AND updated_at < $1 \
             ORDER BY updated_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BackupRecord::try_from).collect()
    }

    async fn release_claim(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE backup_records \
             SET status = 'pending', claimed_by = '', updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

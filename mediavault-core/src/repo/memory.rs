//! In-memory repositories for tests and single-node development runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::{Asset, AssetVariant, BackupRecord, BackupStatus, StoragePool};
use crate::error::Result;
use crate::repo::{AssetRepository, BackupRepository, PoolRepository};

#[derive(Default)]
pub struct MemoryPoolRepository {
    pools: Mutex<HashMap<i64, StoragePool>>,
    assets: Mutex<Option<Arc<MemoryAssetRepository>>>,
}

impl MemoryPoolRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pools(pools: impl IntoIterator<Item = StoragePool>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.pools.lock().unwrap_or_else(|e| e.into_inner());
            for pool in pools {
                map.insert(pool.id, pool);
            }
        }
        repo
    }

    pub fn insert(&self, pool: StoragePool) {
        self.pools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pool.id, pool);
    }

    /// Attach the asset tables so `recompute_used_size` has something
    /// to sum over. In Postgres the join does this for free.
    pub fn link_assets(&self, assets: Arc<MemoryAssetRepository>) {
        *self.assets.lock().unwrap_or_else(|e| e.into_inner()) = Some(assets);
    }
}

#[async_trait]
impl PoolRepository for MemoryPoolRepository {
    async fn get(&self, id: i64) -> Result<Option<StoragePool>> {
        Ok(self
            .pools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }

    async fn list_active(&self) -> Result<Vec<StoragePool>> {
        let mut active: Vec<StoragePool> = self
            .pools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        active.sort_by_key(|p| (p.priority, p.id));
        Ok(active)
    }

    async fn default_pool(&self) -> Result<Option<StoragePool>> {
        Ok(self
            .pools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|p| p.is_default && p.is_active)
            .cloned())
    }

    async fn adjust_used_size(&self, id: i64, delta: i64) -> Result<()> {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pool) = pools.get_mut(&id) {
            pool.used_size += delta;
        }
        Ok(())
    }

    async fn recompute_used_size(&self, id: i64) -> Result<i64> {
        let linked = self
            .assets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        let Some(pool) = pools.get_mut(&id) else {
            return Ok(0);
        };
        if let Some(assets) = linked {
            pool.used_size = assets.bytes_in_pool(id);
        }
        Ok(pool.used_size)
    }
}

#[derive(Default)]
struct AssetTables {
    assets: HashMap<i64, Asset>,
    variants: HashMap<i64, AssetVariant>,
    resolved_reports: Vec<i64>,
}

#[derive(Default)]
pub struct MemoryAssetRepository {
    tables: Mutex<AssetTables>,
}

impl MemoryAssetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_asset(&self, asset: Asset) {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .assets
            .insert(asset.id, asset);
    }

    pub fn insert_variant(&self, variant: AssetVariant) {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .variants
            .insert(variant.id, variant);
    }

    pub fn resolved_reports(&self) -> Vec<i64> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .resolved_reports
            .clone()
    }

    /// Sum of asset and variant bytes whose effective pool is `pool_id`.
    pub fn bytes_in_pool(&self, pool_id: i64) -> i64 {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let assets: i64 = tables
            .assets
            .values()
            .filter(|a| a.storage_pool_id == pool_id)
            .map(|a| a.file_size)
            .sum();
        let variants: i64 = tables
            .variants
            .values()
            .filter(|v| {
                let asset_pool = tables
                    .assets
                    .get(&v.asset_id)
                    .map(|a| a.storage_pool_id)
                    .unwrap_or(0);
                v.effective_pool_id(asset_pool) == pool_id
            })
            .map(|v| v.file_size)
            .sum();
        assets + variants
    }
}

#[async_trait]
impl AssetRepository for MemoryAssetRepository {
    async fn get_asset(&self, id: i64) -> Result<Option<Asset>> {
        Ok(self
            .tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .assets
            .get(&id)
            .cloned())
    }

    async fn variants_of(&self, asset_id: i64) -> Result<Vec<AssetVariant>> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let mut variants: Vec<AssetVariant> = tables
            .variants
            .values()
            .filter(|v| v.asset_id == asset_id)
            .cloned()
            .collect();
        variants.sort_by_key(|v| v.id);
        Ok(variants)
    }

    async fn update_asset_and_variants_pool(
        &self,
        asset_id: i64,
        target_pool_id: i64,
    ) -> Result<()> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(asset) = tables.assets.get_mut(&asset_id) {
            asset.storage_pool_id = target_pool_id;
        }
        for variant in tables.variants.values_mut() {
            if variant.asset_id == asset_id {
                variant.storage_pool_id = Some(target_pool_id);
            }
        }
        Ok(())
    }

    async fn set_variant_pool(&self, variant_id: i64, pool_id: Option<i64>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(variant) = tables.variants.get_mut(&variant_id) {
            variant.storage_pool_id = pool_id;
        }
        Ok(())
    }

    async fn assets_in_pool_after(
        &self,
        pool_id: i64,
        cursor_id: i64,
        limit: i64,
    ) -> Result<Vec<Asset>> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let mut page: Vec<Asset> = tables
            .assets
            .values()
            .filter(|a| a.storage_pool_id == pool_id && a.id > cursor_id)
            .cloned()
            .collect();
        page.sort_by_key(|a| a.id);
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }

    async fn idle_assets_in_pools(
        &self,
        pool_ids: &[i64],
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Asset>> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let mut idle: Vec<Asset> = tables
            .assets
            .values()
            .filter(|a| pool_ids.contains(&a.storage_pool_id) && a.last_activity() < cutoff)
            .cloned()
            .collect();
        idle.sort_by_key(|a| a.last_activity());
        idle.truncate(limit.max(0) as usize);
        Ok(idle)
    }

    async fn delete_asset_rows(&self, asset_id: i64) -> Result<()> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.assets.remove(&asset_id);
        tables.variants.retain(|_, v| v.asset_id != asset_id);
        Ok(())
    }

    async fn resolve_report(&self, report_id: i64, _resolved_by: Option<i64>) -> Result<()> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .resolved_reports
            .push(report_id);
        Ok(())
    }
}

#[derive(Default)]
struct BackupTable {
    next_id: i64,
    records: HashMap<i64, BackupRecord>,
}

#[derive(Default)]
pub struct MemoryBackupRepository {
    table: Mutex<BackupTable>,
}

impl MemoryBackupRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: BackupRecord) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.next_id = table.next_id.max(record.id);
        table.records.insert(record.id, record);
    }
}

#[async_trait]
impl BackupRepository for MemoryBackupRepository {
    async fn get(&self, id: i64) -> Result<Option<BackupRecord>> {
        Ok(self
            .table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .records
            .get(&id)
            .cloned())
    }

    async fn backups_for_asset(&self, asset_id: i64) -> Result<Vec<BackupRecord>> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<BackupRecord> = table
            .records
            .values()
            .filter(|r| r.asset_id == asset_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn create_pending(&self, asset_id: i64, provider: &str) -> Result<BackupRecord> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.next_id += 1;
        let now = Utc::now();
        let record = BackupRecord {
            id: table.next_id,
            asset_id,
            provider: provider.to_string(),
            status: BackupStatus::Pending,
            object_key: String::new(),
            bucket: String::new(),
            size: 0,
            error_message: String::new(),
            retry_count: 0,
            claimed_by: String::new(),
            created_at: now,
            updated_at: now,
        };
        table.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn claim_for_upload(&self, id: i64, node_id: &str) -> Result<bool> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let Some(record) = table.records.get_mut(&id) else {
            return Ok(false);
        };
        if !matches!(record.status, BackupStatus::Pending | BackupStatus::Failed) {
            return Ok(false);
        }
        record.status = BackupStatus::Uploading;
        record.claimed_by = node_id.to_string();
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_completed(
        &self,
        id: i64,
        object_key: &str,
        bucket: &str,
        size: i64,
    ) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = table.records.get_mut(&id) {
            record.status = BackupStatus::Completed;
            record.object_key = object_key.to_string();
            record.bucket = bucket.to_string();
            record.size = size;
            record.error_message.clear();
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = table.records.get_mut(&id) {
            record.status = BackupStatus::Failed;
            record.error_message = error.to_string();
            record.retry_count += 1;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_deleted(&self, id: i64) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = table.records.get_mut(&id) {
            record.status = BackupStatus::Deleted;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn retryable(&self, limit: i64) -> Result<Vec<BackupRecord>> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<BackupRecord> = table
            .records
            .values()
            .filter(|r| r.is_retryable())
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at);
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn stuck_uploading(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<BackupRecord> = table
            .records
            .values()
            .filter(|r| r.status == BackupStatus::Uploading && r.updated_at < cutoff)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at);
        Ok(records)
    }

    async fn release_claim(&self, id: i64) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = table.records.get_mut(&id) {
            record.status = BackupStatus::Pending;
            record.claimed_by.clear();
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StorageTier, StorageType};
    use uuid::Uuid;

    fn pool(id: i64, priority: i32) -> StoragePool {
        StoragePool {
            id,
            name: format!("pool-{id}"),
            base_path: "/tmp".into(),
            storage_type: StorageType::Local,
            storage_tier: StorageTier::Hot,
            node_id: String::new(),
            upload_api_url: String::new(),
            max_size: 1000,
            used_size: 0,
            is_active: true,
            is_default: false,
            priority,
        }
    }

    fn asset(id: i64, pool_id: i64) -> Asset {
        Asset {
            id,
            uuid: Uuid::new_v4(),
            relative_path: "original/2026/08/25".into(),
            file_name: format!("a{id}.jpg"),
            file_size: 10,
            storage_pool_id: pool_id,
            created_at: Utc::now(),
            last_viewed_at: None,
        }
    }

    #[tokio::test]
    async fn active_pools_ordered_by_priority_then_id() {
        let repo = MemoryPoolRepository::with_pools([pool(3, 10), pool(1, 20), pool(2, 10)]);
        let active = repo.list_active().await.unwrap();
        let ids: Vec<i64> = active.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn recompute_repairs_used_size_drift() {
        let pools = MemoryPoolRepository::with_pools([pool(1, 10)]);
        let assets = Arc::new(MemoryAssetRepository::new());
        pools.link_assets(assets.clone());

        assets.insert_asset(asset(1, 1));
        assets.insert_variant(AssetVariant {
            id: 10,
            asset_id: 1,
            variant_kind: "thumbnail".into(),
            relative_path: "variants/thumbnails/2026/08/25".into(),
            file_name: "a1.webp".into(),
            file_size: 2,
            storage_pool_id: None,
        });
        pools.adjust_used_size(1, 999).await.unwrap();

        assert_eq!(pools.recompute_used_size(1).await.unwrap(), 12);
        assert_eq!(pools.get(1).await.unwrap().unwrap().used_size, 12);
    }

    #[tokio::test]
    async fn keyset_pagination() {
        let repo = MemoryAssetRepository::new();
        for id in 1..=5 {
            repo.insert_asset(asset(id, 1));
        }
        repo.insert_asset(asset(6, 2));

        let page = repo.assets_in_pool_after(1, 2, 2).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[tokio::test]
    async fn pool_flip_covers_variants() {
        let repo = MemoryAssetRepository::new();
        repo.insert_asset(asset(1, 1));
        repo.insert_variant(AssetVariant {
            id: 10,
            asset_id: 1,
            variant_kind: "thumbnail".into(),
            relative_path: "variants/thumbnails/2026/08/25".into(),
            file_name: "a1.webp".into(),
            file_size: 2,
            storage_pool_id: None,
        });

        repo.update_asset_and_variants_pool(1, 2).await.unwrap();
        assert_eq!(repo.get_asset(1).await.unwrap().unwrap().storage_pool_id, 2);
        assert_eq!(
            repo.variants_of(1).await.unwrap()[0].storage_pool_id,
            Some(2)
        );
    }

    #[tokio::test]
    async fn backup_claim_is_single_winner() {
        let repo = MemoryBackupRepository::new();
        let record = repo.create_pending(1, "s3").await.unwrap();

        assert!(repo.claim_for_upload(record.id, "s01").await.unwrap());
        assert!(!repo.claim_for_upload(record.id, "s02").await.unwrap());

        let claimed = repo.get(record.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, BackupStatus::Uploading);
        assert_eq!(claimed.claimed_by, "s01");
    }

    #[tokio::test]
    async fn failed_backups_become_retryable_until_cap() {
        let repo = MemoryBackupRepository::new();
        let record = repo.create_pending(1, "s3").await.unwrap();
        repo.claim_for_upload(record.id, "s01").await.unwrap();

        for _ in 0..BackupRecord::MAX_UPLOAD_RETRIES {
            repo.mark_failed(record.id, "net down").await.unwrap();
        }
        assert!(repo.retryable(10).await.unwrap().is_empty());
    }
}

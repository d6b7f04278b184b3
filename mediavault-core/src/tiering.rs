//! Demotion sweep: ages cold-running assets out of hot pools.
//!
//! The sweep only schedules work. Every candidate becomes a regular
//! `move_asset` job, so demotions get the same retry, routing, and
//! reconcile treatment as operator-triggered moves.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::StorageTier;
use crate::error::Result;
use crate::jobs::queue::Enqueuer;
use crate::jobs::types::{JobPayload, MoveAssetPayload};
use crate::registry::PoolRegistry;
use crate::repo::AssetRepository;
use crate::traits::ProcessingStatus;

#[derive(Debug, Clone)]
pub struct TieringConfig {
    /// Assets younger than this never leave the hot tier.
    pub keep_days: i64,
    /// Demotion candidates must have gone unviewed for this long.
    pub no_views_days: i64,
    /// A hot pool is swept only once its usage crosses this percent.
    pub min_usage_percent: f64,
    /// Upper bound on move jobs scheduled per sweep.
    pub max_candidates: i64,
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            keep_days: 30,
            no_views_days: 7,
            min_usage_percent: 80.0,
            max_candidates: 200,
        }
    }
}

pub struct TieringSweep {
    registry: PoolRegistry,
    assets: Arc<dyn AssetRepository>,
    processing: Arc<dyn ProcessingStatus>,
    enqueuer: Enqueuer,
    config: TieringConfig,
}

impl std::fmt::Debug for TieringSweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieringSweep")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TieringSweep {
    pub fn new(
        registry: PoolRegistry,
        assets: Arc<dyn AssetRepository>,
        processing: Arc<dyn ProcessingStatus>,
        enqueuer: Enqueuer,
        config: TieringConfig,
    ) -> Self {
        Self {
            registry,
            assets,
            processing,
            enqueuer,
            config,
        }
    }

    /// One demotion pass. Returns the number of move jobs scheduled.
    pub async fn run_once(&self) -> Result<usize> {
        let hot_pools: Vec<_> = self
            .registry
            .active_by_tier(StorageTier::Hot)
            .await?
            .into_iter()
            .filter(|p| p.usage_percent() >= self.config.min_usage_percent)
            .collect();

        if hot_pools.is_empty() {
            debug!("no hot pool above the usage threshold, skipping sweep");
            return Ok(0);
        }

        let pool_ids: Vec<i64> = hot_pools.iter().map(|p| p.id).collect();
        let now = chrono::Utc::now();
        let activity_cutoff = now - chrono::Duration::days(self.config.no_views_days);
        let age_cutoff = now - chrono::Duration::days(self.config.keep_days);

        // Oldest activity first, so the least-missed assets leave first.
        let candidates = self
            .assets
            .idle_assets_in_pools(&pool_ids, activity_cutoff, self.config.max_candidates)
            .await?;

        let mut scheduled = 0usize;
        for asset in candidates {
            if asset.created_at > age_cutoff {
                continue;
            }
            // Mid-processing assets still grow variants on their pool;
            // let them settle before demotion.
            if !self.processing.is_processing_complete(asset.id).await? {
                debug!(asset_id = asset.id, "still processing, skipping demotion");
                continue;
            }

            let target = match self
                .registry
                .select_by_tier(StorageTier::Warm, asset.file_size)
                .await
            {
                Ok(pool) => pool,
                Err(_) => match self
                    .registry
                    .select_by_tier(StorageTier::Cold, asset.file_size)
                    .await
                {
                    Ok(pool) => pool,
                    Err(e) => {
                        warn!(
                            asset_id = asset.id,
                            error = %e,
                            "no warm or cold capacity for demotion"
                        );
                        continue;
                    }
                },
            };

            self.enqueuer
                .enqueue(JobPayload::MoveAsset(MoveAssetPayload {
                    asset_id: asset.id,
                    source_pool_id: asset.storage_pool_id,
                    target_pool_id: target.id,
                }))
                .await?;
            scheduled += 1;
        }

        if scheduled > 0 {
            info!(scheduled, "tiering sweep scheduled demotions");
        }
        Ok(scheduled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, StoragePool, StorageType};
    use crate::jobs::store::{JobStore, MemoryJobStore};
    use crate::repo::{MemoryAssetRepository, MemoryPoolRepository};
    use crate::traits::MockProcessingStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn pool(id: i64, tier: StorageTier, max: i64, used: i64) -> StoragePool {
        StoragePool {
            id,
            name: format!("pool-{id}"),
            base_path: std::env::temp_dir().to_string_lossy().into_owned(),
            storage_type: StorageType::Local,
            storage_tier: tier,
            node_id: String::new(),
            upload_api_url: String::new(),
            max_size: max,
            used_size: used,
            is_active: true,
            is_default: false,
            priority: 100,
        }
    }

    fn idle_asset(id: i64, pool_id: i64, idle_days: i64, age_days: i64) -> Asset {
        let now = Utc::now();
        Asset {
            id,
            uuid: Uuid::new_v4(),
            relative_path: "original/2026/07/01".into(),
            file_name: format!("a{id}.jpg"),
            file_size: 10,
            storage_pool_id: pool_id,
            created_at: now - chrono::Duration::days(age_days),
            last_viewed_at: Some(now - chrono::Duration::days(idle_days)),
        }
    }

    struct Setup {
        sweep: TieringSweep,
        store: std::sync::Arc<MemoryJobStore>,
        assets: std::sync::Arc<MemoryAssetRepository>,
    }

    fn setup(pools: Vec<StoragePool>, complete: bool) -> Setup {
        let pool_repo = Arc::new(MemoryPoolRepository::with_pools(pools));
        let assets = Arc::new(MemoryAssetRepository::new());
        let store = Arc::new(MemoryJobStore::new());
        let mut status = MockProcessingStatus::new();
        status
            .expect_is_processing_complete()
            .returning(move |_| Ok(complete));

        let sweep = TieringSweep::new(
            PoolRegistry::new(pool_repo),
            assets.clone(),
            Arc::new(status),
            Enqueuer::new(store.clone()),
            TieringConfig::default(),
        );
        Setup {
            sweep,
            store,
            assets,
        }
    }

    #[tokio::test]
    async fn demotes_old_idle_asset_from_full_hot_pool() {
        let s = setup(
            vec![
                pool(1, StorageTier::Hot, 1000, 950),
                pool(2, StorageTier::Warm, 1000, 0),
            ],
            true,
        );
        s.assets.insert_asset(idle_asset(1, 1, 30, 60));

        assert_eq!(s.sweep.run_once().await.unwrap(), 1);
        assert_eq!(s.store.queue_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn quiet_hot_pool_is_not_swept() {
        let s = setup(
            vec![
                pool(1, StorageTier::Hot, 1000, 100),
                pool(2, StorageTier::Warm, 1000, 0),
            ],
            true,
        );
        s.assets.insert_asset(idle_asset(1, 1, 30, 60));

        assert_eq!(s.sweep.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recently_viewed_asset_stays() {
        let s = setup(
            vec![
                pool(1, StorageTier::Hot, 1000, 950),
                pool(2, StorageTier::Warm, 1000, 0),
            ],
            true,
        );
        s.assets.insert_asset(idle_asset(1, 1, 2, 60));

        assert_eq!(s.sweep.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn young_asset_stays_even_when_idle() {
        let s = setup(
            vec![
                pool(1, StorageTier::Hot, 1000, 950),
                pool(2, StorageTier::Warm, 1000, 0),
            ],
            true,
        );
        // Unviewed for 10 days but only 10 days old.
        s.assets.insert_asset(idle_asset(1, 1, 10, 10));

        assert_eq!(s.sweep.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mid_processing_asset_is_skipped() {
        let s = setup(
            vec![
                pool(1, StorageTier::Hot, 1000, 950),
                pool(2, StorageTier::Warm, 1000, 0),
            ],
            false,
        );
        s.assets.insert_asset(idle_asset(1, 1, 30, 60));

        assert_eq!(s.sweep.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn full_warm_tier_falls_back_to_cold() {
        let s = setup(
            vec![
                pool(1, StorageTier::Hot, 1000, 950),
                pool(2, StorageTier::Warm, 1000, 1000),
                pool(3, StorageTier::Cold, 1000, 0),
            ],
            true,
        );
        s.assets.insert_asset(idle_asset(1, 1, 30, 60));

        assert_eq!(s.sweep.run_once().await.unwrap(), 1);
        let id = s
            .store
            .move_pending_to_processing(std::time::Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let job = s.store.get_job(id).await.unwrap().unwrap();
        match job.payload {
            crate::jobs::types::JobPayload::MoveAsset(p) => assert_eq!(p.target_pool_id, 3),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}

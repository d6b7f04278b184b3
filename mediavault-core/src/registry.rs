//! Pool registry: placement decisions and cached health snapshots.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::{PoolHealth, StoragePool, StorageTier};
use crate::error::{Result, VaultError};
use crate::repo::PoolRepository;

/// Health snapshots older than this are recomputed on demand.
const HEALTH_CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedHealth {
    health: PoolHealth,
    refreshed: Instant,
}

/// Read-mostly view over the pool table plus the placement algorithm.
///
/// Cheap to clone; all clones share the health cache.
#[derive(Clone)]
pub struct PoolRegistry {
    repo: Arc<dyn PoolRepository>,
    health: Arc<RwLock<HashMap<i64, CachedHealth>>>,
}

impl PoolRegistry {
    pub fn new(repo: Arc<dyn PoolRepository>) -> Self {
        Self {
            repo,
            health: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, id: i64) -> Result<StoragePool> {
        self.repo
            .get(id)
            .await?
            .ok_or(VaultError::PoolNotFound(id))
    }

    pub async fn list_active(&self) -> Result<Vec<StoragePool>> {
        self.repo.list_active().await
    }

    /// Active pools of one tier, in placement order.
    pub async fn active_by_tier(&self, tier: StorageTier) -> Result<Vec<StoragePool>> {
        Ok(self
            .repo
            .list_active()
            .await?
            .into_iter()
            .filter(|p| p.storage_tier == tier)
            .collect())
    }

    /// Pick the pool a new upload of `size` bytes should land in.
    ///
    /// Preference order: hot pools, then warm pools, then any active
    /// pool, each in (priority, id) order and skipping pools without
    /// capacity. If nothing fits, fall back to the default pool even
    /// when undersized so ingest never hard-fails on a full cluster.
    pub async fn select_for_upload(&self, size: i64) -> Result<StoragePool> {
        let active = self.repo.list_active().await?;

        for tier in [Some(StorageTier::Hot), Some(StorageTier::Warm), None] {
            let found = active
                .iter()
                .filter(|p| tier.is_none_or(|t| p.storage_tier == t))
                .find(|p| p.can_accept(size) && p.is_healthy());
            if let Some(pool) = found {
                return Ok(pool.clone());
            }
        }

        match self.repo.default_pool().await? {
            Some(pool) => {
                warn!(
                    pool = %pool.name,
                    size,
                    available = pool.available(),
                    "no pool has capacity, falling back to default pool"
                );
                Ok(pool)
            }
            None => Err(VaultError::InsufficientCapacity {
                pool: "<none>".into(),
                size,
            }),
        }
    }

    /// Pick a pool of the given tier with room for `size` bytes.
    pub async fn select_by_tier(&self, tier: StorageTier, size: i64) -> Result<StoragePool> {
        self.active_by_tier(tier)
            .await?
            .into_iter()
            .find(|p| p.can_accept(size) && p.is_healthy())
            .ok_or(VaultError::InsufficientCapacity {
                pool: format!("<tier:{tier}>"),
                size,
            })
    }

    pub async fn adjust_used_size(&self, id: i64, delta: i64) -> Result<()> {
        self.repo.adjust_used_size(id, delta).await?;
        // The snapshot is stale now; drop it rather than patching it.
        self.health.write().await.remove(&id);
        Ok(())
    }

    /// Health snapshot for one pool, served from cache within the TTL.
    pub async fn health(&self, id: i64) -> Result<PoolHealth> {
        {
            let cache = self.health.read().await;
            if let Some(entry) = cache.get(&id) {
                if entry.refreshed.elapsed() < HEALTH_CACHE_TTL {
                    return Ok(entry.health.clone());
                }
            }
        }

        let pool = self.get(id).await?;
        let health = PoolHealth {
            pool_id: pool.id,
            healthy: pool.is_healthy(),
            used_size: pool.used_size,
            max_size: pool.max_size,
            usage_percent: pool.usage_percent(),
            checked_at: Utc::now(),
        };
        self.health.write().await.insert(
            id,
            CachedHealth {
                health: health.clone(),
                refreshed: Instant::now(),
            },
        );
        Ok(health)
    }

    /// Health snapshots for every active pool.
    pub async fn health_all(&self) -> Result<Vec<PoolHealth>> {
        let mut out = Vec::new();
        for pool in self.repo.list_active().await? {
            out.push(self.health(pool.id).await?);
        }
        Ok(out)
    }
}

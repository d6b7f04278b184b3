//! Per-type job processors and the dispatcher that routes claimed
//! jobs to them.
//!
//! Every processor is idempotent: at-least-once delivery means any of
//! them can see the same job twice, including after a partial run.

use std::sync::Arc;
use tracing::debug;

use crate::domain::StoragePool;
use crate::error::{Result, VaultError};
use crate::jobs::queue::{Enqueuer, JobHandler};
use crate::jobs::types::{Job, JobPayload, Outcome};
use crate::registry::PoolRegistry;
use crate::replication::ReplicationTransport;
use crate::repo::{AssetRepository, BackupRepository};
use crate::storage::{MoveFileResult, ObjectStorageClient, StorageManager};
use crate::traits::{AssetProcessor, ProcessingStatus};

mod delete;
mod move_asset;
mod object;
mod process;
mod reconcile;

/// Everything a processor may need, shared across all job types.
pub struct ProcessorContext {
    /// Logical id of this node, matched against pool `node_id`s.
    pub node_id: String,
    pub storage: StorageManager,
    pub assets: Arc<dyn AssetRepository>,
    pub backups: Arc<dyn BackupRepository>,
    pub enqueuer: Enqueuer,
    pub asset_processor: Arc<dyn AssetProcessor>,
    pub processing_status: Arc<dyn ProcessingStatus>,
    /// Absent on single-node deployments; any job needing a remote
    /// transfer then fails instead of silently skipping.
    pub replication: Option<Arc<ReplicationTransport>>,
    /// Client for off-site backups. Distinct from S3-tier pools, which
    /// go through the storage manager.
    pub object: Option<Arc<dyn ObjectStorageClient>>,
    /// Bucket off-site backups are written to.
    pub backup_bucket: String,
}

impl std::fmt::Debug for ProcessorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorContext")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl ProcessorContext {
    pub fn registry(&self) -> &PoolRegistry {
        self.storage.registry()
    }

    /// True when the pool's files live on a different node's disks.
    pub fn is_foreign(&self, pool: &StoragePool) -> bool {
        pool.is_node_affine()
            && !pool.node_id.is_empty()
            && !pool.node_id.eq_ignore_ascii_case(&self.node_id)
    }

    /// Move one file from `source` (readable from this node) to
    /// `target`, going through the replication transport when the
    /// target's disks belong to another node.
    pub async fn transfer_file(
        &self,
        source: &StoragePool,
        target: &StoragePool,
        relative: &str,
    ) -> Result<MoveFileResult> {
        if !self.is_foreign(target) {
            return self.storage.migrate(source, target, relative).await;
        }

        let transport = self.replication.as_ref().ok_or_else(|| {
            VaultError::Internal(format!(
                "target pool '{}' is on node '{}' but replication is not configured",
                target.name, target.node_id
            ))
        })?;

        let Some(size) = self.storage.file_size(source, relative).await? else {
            return Ok(MoveFileResult::SourceMissing);
        };

        if source.is_s3() {
            let body = self.storage.read_file(source, relative).await?;
            transport.replicate_bytes(target, relative, body).await?;
        } else {
            let path = StorageManager::full_path(source, relative)?;
            transport.replicate_file(target, relative, &path).await?;
        }

        // The receiving node accounted the target pool when it saved
        // the copy; only the source side is settled here.
        self.storage.delete_file(source, relative).await?;
        Ok(MoveFileResult::Moved(size))
    }
}

/// Routes each claimed job to its processor.
pub struct Processors {
    ctx: Arc<ProcessorContext>,
}

impl std::fmt::Debug for Processors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processors")
            .field("node_id", &self.ctx.node_id)
            .finish_non_exhaustive()
    }
}

impl Processors {
    pub fn new(ctx: Arc<ProcessorContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl JobHandler for Processors {
    async fn handle(&self, job: &Job) -> Result<Outcome> {
        debug!(job_id = %job.id, job_type = job.kind(), "dispatching job");
        match &job.payload {
            JobPayload::AssetProcessing(p) => process::run(&self.ctx, p).await,
            JobPayload::ObjectBackup(p) => object::run_backup(&self.ctx, p).await,
            JobPayload::ObjectDelete(p) => object::run_delete(&self.ctx, p).await,
            JobPayload::PoolMoveEnqueue(p) => move_asset::run_fanout(&self.ctx, p).await,
            JobPayload::MoveAsset(p) => move_asset::run(&self.ctx, p).await,
            JobPayload::DeleteAsset(p) => delete::run(&self.ctx, p).await,
            JobPayload::ReconcileVariants(p) => reconcile::run(&self.ctx, p).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::domain::{StoragePool, StorageTier, StorageType};
    use crate::jobs::store::MemoryJobStore;
    use crate::repo::{MemoryAssetRepository, MemoryBackupRepository, MemoryPoolRepository};
    use crate::traits::{MockAssetProcessor, MockProcessingStatus};
    use tempfile::TempDir;

    pub struct Fixture {
        pub ctx: Arc<ProcessorContext>,
        pub pools: Arc<MemoryPoolRepository>,
        pub assets: Arc<MemoryAssetRepository>,
        pub backups: Arc<MemoryBackupRepository>,
        pub store: Arc<MemoryJobStore>,
        pub dirs: Vec<TempDir>,
    }

    pub fn local_pool(id: i64, dir: &TempDir, tier: StorageTier, node_id: &str) -> StoragePool {
        StoragePool {
            id,
            name: format!("pool-{id}"),
            base_path: dir.path().to_string_lossy().into_owned(),
            storage_type: StorageType::Local,
            storage_tier: tier,
            node_id: node_id.to_string(),
            upload_api_url: String::new(),
            max_size: 1 << 30,
            used_size: 0,
            is_active: true,
            is_default: false,
            priority: 100,
        }
    }

    /// Local pools on node `s01`, no replication, no object store.
    pub fn fixture(pools: Vec<StoragePool>, dirs: Vec<TempDir>) -> Fixture {
        fixture_with(pools, dirs, |_, _| {})
    }

    /// Like [`fixture`] but with a mock object storage client wired in.
    pub fn fixture_object(
        pools: Vec<StoragePool>,
        dirs: Vec<TempDir>,
        configure: impl FnOnce(&mut crate::storage::object::MockObjectStorageClient),
    ) -> Fixture {
        let mut fx = fixture(pools, dirs);
        let mut client = crate::storage::object::MockObjectStorageClient::new();
        configure(&mut client);
        let ctx = Arc::get_mut(&mut fx.ctx).expect("fixture ctx not yet shared");
        ctx.object = Some(Arc::new(client));
        fx
    }

    pub fn fixture_with(
        pools: Vec<StoragePool>,
        dirs: Vec<TempDir>,
        configure: impl FnOnce(&mut MockProcessingStatus, &mut MockAssetProcessor),
    ) -> Fixture {
        let pool_repo = Arc::new(MemoryPoolRepository::with_pools(pools));
        let asset_repo = Arc::new(MemoryAssetRepository::new());
        let backup_repo = Arc::new(MemoryBackupRepository::new());
        let store = Arc::new(MemoryJobStore::new());

        let registry = PoolRegistry::new(pool_repo.clone());
        let storage = StorageManager::new(registry, None);

        let mut status = MockProcessingStatus::new();
        status.expect_is_processing_complete().returning(|_| Ok(true));
        let mut processor = MockAssetProcessor::new();
        configure(&mut status, &mut processor);

        let ctx = Arc::new(ProcessorContext {
            node_id: "s01".to_string(),
            storage,
            assets: asset_repo.clone(),
            backups: backup_repo.clone(),
            enqueuer: Enqueuer::new(store.clone()),
            asset_processor: Arc::new(processor),
            processing_status: Arc::new(status),
            replication: None,
            object: None,
            backup_bucket: "vault-backups".to_string(),
        });

        Fixture {
            ctx,
            pools: pool_repo,
            assets: asset_repo,
            backups: backup_repo,
            store,
            dirs,
        }
    }
}

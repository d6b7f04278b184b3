//! Variant generation for freshly uploaded assets.

use tracing::{debug, info};

use crate::error::Result;
use crate::jobs::processors::ProcessorContext;
use crate::jobs::types::{AssetProcessingPayload, JobPayload, ObjectBackupPayload, Outcome};

pub(crate) async fn run(
    ctx: &ProcessorContext,
    payload: &AssetProcessingPayload,
) -> Result<Outcome> {
    let pool = ctx.registry().get(payload.pool_id).await?;

    // The engine reads the original straight off the pool's disks.
    if ctx.is_foreign(&pool) {
        debug!(
            asset_id = payload.asset_id,
            node = %pool.node_id,
            "processing belongs to another node"
        );
        return Ok(Outcome::Requeued);
    }

    let original = format!(
        "{}/{}",
        payload.relative_path.trim_matches('/'),
        payload.file_name
    );
    let variants = ctx
        .asset_processor
        .process(payload.asset_id, payload.pool_id, &original)
        .await?;

    info!(
        asset_id = payload.asset_id,
        variants = variants.len(),
        "asset processed"
    );

    if payload.enable_backup {
        let record = ctx.backups.create_pending(payload.asset_id, "s3").await?;
        ctx.enqueuer
            .enqueue(JobPayload::ObjectBackup(ObjectBackupPayload {
                asset_id: payload.asset_id,
                asset_uuid: payload.asset_uuid,
                backup_id: record.id,
            }))
            .await?;
    }

    Ok(Outcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StorageTier;
    use crate::jobs::processors::testutil::{fixture, fixture_with, local_pool};
    use crate::jobs::store::JobStore;
    use crate::repo::BackupRepository;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn payload(backup: bool) -> AssetProcessingPayload {
        AssetProcessingPayload {
            asset_id: 1,
            asset_uuid: Uuid::new_v4(),
            relative_path: "original/2026/08/25".into(),
            file_name: "a1.jpg".into(),
            enable_backup: backup,
            pool_id: 1,
        }
    }

    #[tokio::test]
    async fn processes_and_schedules_backup() {
        let dir = TempDir::new().unwrap();
        let pools = vec![local_pool(1, &dir, StorageTier::Hot, "s01")];
        let fx = fixture_with(pools, vec![dir], |_, processor| {
            processor
                .expect_process()
                .withf(|asset_id, pool_id, path| {
                    *asset_id == 1 && *pool_id == 1 && path == "original/2026/08/25/a1.jpg"
                })
                .returning(|_, _, _| Ok(Vec::new()));
        });

        assert_eq!(run(&fx.ctx, &payload(true)).await.unwrap(), Outcome::Done);

        let backups = fx.backups.backups_for_asset(1).await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(fx.store.queue_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn backup_disabled_enqueues_nothing() {
        let dir = TempDir::new().unwrap();
        let pools = vec![local_pool(1, &dir, StorageTier::Hot, "s01")];
        let fx = fixture_with(pools, vec![dir], |_, processor| {
            processor.expect_process().returning(|_, _, _| Ok(Vec::new()));
        });

        assert_eq!(run(&fx.ctx, &payload(false)).await.unwrap(), Outcome::Done);
        assert!(fx.backups.backups_for_asset(1).await.unwrap().is_empty());
        assert_eq!(fx.store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn foreign_pool_requeues_without_processing() {
        let dir = TempDir::new().unwrap();
        let pools = vec![local_pool(1, &dir, StorageTier::Hot, "s02")];
        let fx = fixture(pools, vec![dir]);

        assert_eq!(
            run(&fx.ctx, &payload(true)).await.unwrap(),
            Outcome::Requeued
        );
    }
}

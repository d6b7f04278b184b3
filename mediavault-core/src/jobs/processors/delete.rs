//! Asset deletion: files first, then rows, then cleanup follow-ups.

use tracing::{debug, info, warn};

use crate::domain::BackupStatus;
use crate::error::Result;
use crate::jobs::processors::ProcessorContext;
use crate::jobs::types::{DeleteAssetPayload, JobPayload, ObjectDeletePayload, Outcome};

pub(crate) async fn run(ctx: &ProcessorContext, payload: &DeleteAssetPayload) -> Result<Outcome> {
    let Some(asset) = ctx.assets.get_asset(payload.asset_id).await? else {
        // Rows already gone; a re-delivered delete has nothing to do,
        // but the report (if any) still needs closing.
        debug!(asset_id = payload.asset_id, "asset already deleted");
        resolve_report(ctx, payload).await?;
        return Ok(Outcome::Done);
    };

    let variants = ctx.assets.variants_of(asset.id).await?;

    // Collect every pool that holds one of this asset's files and
    // check affinity before deleting anything, so a wrong-node job
    // never does a partial cleanup.
    let mut pool_ids = vec![asset.storage_pool_id];
    for variant in &variants {
        let id = variant.effective_pool_id(asset.storage_pool_id);
        if !pool_ids.contains(&id) {
            pool_ids.push(id);
        }
    }
    let mut pools = Vec::with_capacity(pool_ids.len());
    for id in pool_ids {
        let pool = ctx.registry().get(id).await?;
        if ctx.is_foreign(&pool) {
            debug!(
                asset_id = asset.id,
                pool = %pool.name,
                node = %pool.node_id,
                "delete belongs to another node"
            );
            return Ok(Outcome::Requeued);
        }
        pools.push(pool);
    }
    let pool_by_id = |id: i64| pools.iter().find(|p| p.id == id);

    if let Some(pool) = pool_by_id(asset.storage_pool_id) {
        ctx.storage.delete_file(pool, &asset.stored_path()).await?;
    }
    for variant in &variants {
        let id = variant.effective_pool_id(asset.storage_pool_id);
        if let Some(pool) = pool_by_id(id) {
            ctx.storage.delete_file(pool, &variant.stored_path()).await?;
        } else {
            warn!(
                asset_id = asset.id,
                variant = %variant.variant_kind,
                pool = id,
                "variant points at unknown pool, skipping file"
            );
        }
    }

    // Off-site copies are removed asynchronously; the records flip to
    // deleted when those jobs land.
    for backup in ctx.backups.backups_for_asset(asset.id).await? {
        if backup.status == BackupStatus::Completed {
            ctx.enqueuer
                .enqueue(JobPayload::ObjectDelete(ObjectDeletePayload {
                    asset_id: asset.id,
                    asset_uuid: asset.uuid,
                    object_key: backup.object_key.clone(),
                    bucket: backup.bucket.clone(),
                    backup_id: backup.id,
                }))
                .await?;
        }
    }

    ctx.assets.delete_asset_rows(asset.id).await?;
    resolve_report(ctx, payload).await?;

    info!(
        asset_id = asset.id,
        variants = variants.len(),
        "asset deleted"
    );
    Ok(Outcome::Done)
}

async fn resolve_report(ctx: &ProcessorContext, payload: &DeleteAssetPayload) -> Result<()> {
    if let Some(report_id) = payload.from_report_id {
        ctx.assets
            .resolve_report(report_id, payload.initiated_by_id)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, AssetVariant, BackupRecord, StorageTier};
    use crate::jobs::processors::testutil::{fixture, local_pool};
    use crate::jobs::store::JobStore;
    use crate::repo::AssetRepository;
    use chrono::Utc;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn asset(id: i64, pool_id: i64) -> Asset {
        Asset {
            id,
            uuid: Uuid::new_v4(),
            relative_path: "original/2026/08/25".into(),
            file_name: format!("a{id}.jpg"),
            file_size: 5,
            storage_pool_id: pool_id,
            created_at: Utc::now(),
            last_viewed_at: None,
        }
    }

    #[tokio::test]
    async fn deletes_files_rows_and_schedules_backup_cleanup() {
        let dir = TempDir::new().unwrap();
        let pools = vec![local_pool(1, &dir, StorageTier::Hot, "s01")];
        let fx = fixture(pools, vec![dir]);

        let a = asset(1, 1);
        fx.assets.insert_asset(a.clone());
        fx.assets.insert_variant(AssetVariant {
            id: 10,
            asset_id: 1,
            variant_kind: "webp".into(),
            relative_path: "variants/webp/2026/08/25".into(),
            file_name: "a1.webp".into(),
            file_size: 3,
            storage_pool_id: None,
        });
        fx.backups.insert(BackupRecord {
            id: 5,
            asset_id: 1,
            provider: "s3".into(),
            status: BackupStatus::Completed,
            object_key: "backups/a1.jpg".into(),
            bucket: "vault-backups".into(),
            size: 5,
            error_message: String::new(),
            retry_count: 0,
            claimed_by: "s01".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        let pool = fx.ctx.registry().get(1).await.unwrap();
        fx.ctx
            .storage
            .save_file(&pool, &a.stored_path(), &b"hello"[..])
            .await
            .unwrap();
        fx.ctx
            .storage
            .save_file(&pool, "variants/webp/2026/08/25/a1.webp", &b"abc"[..])
            .await
            .unwrap();

        let payload = DeleteAssetPayload {
            asset_id: 1,
            asset_uuid: a.uuid,
            from_report_id: Some(77),
            initiated_by_id: Some(3),
        };
        assert_eq!(run(&fx.ctx, &payload).await.unwrap(), Outcome::Done);

        assert!(!fx.ctx.storage.file_exists(&pool, &a.stored_path()).await.unwrap());
        assert!(fx.assets.get_asset(1).await.unwrap().is_none());
        assert!(fx.assets.variants_of(1).await.unwrap().is_empty());
        assert_eq!(fx.assets.resolved_reports(), vec![77]);
        // One object_delete follow-up for the completed backup.
        assert_eq!(fx.store.queue_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rerun_after_deletion_still_resolves_report() {
        let dir = TempDir::new().unwrap();
        let pools = vec![local_pool(1, &dir, StorageTier::Hot, "s01")];
        let fx = fixture(pools, vec![dir]);

        let payload = DeleteAssetPayload {
            asset_id: 1,
            asset_uuid: Uuid::new_v4(),
            from_report_id: Some(8),
            initiated_by_id: None,
        };
        assert_eq!(run(&fx.ctx, &payload).await.unwrap(), Outcome::Done);
        assert_eq!(run(&fx.ctx, &payload).await.unwrap(), Outcome::Done);
        assert_eq!(fx.assets.resolved_reports(), vec![8, 8]);
    }

    #[tokio::test]
    async fn foreign_pool_requeues_before_any_file_is_touched() {
        let dir = TempDir::new().unwrap();
        let pools = vec![local_pool(1, &dir, StorageTier::Hot, "s02")];
        let fx = fixture(pools, vec![dir]);

        let a = asset(1, 1);
        fx.assets.insert_asset(a.clone());

        let payload = DeleteAssetPayload {
            asset_id: 1,
            asset_uuid: a.uuid,
            from_report_id: None,
            initiated_by_id: None,
        };
        assert_eq!(run(&fx.ctx, &payload).await.unwrap(), Outcome::Requeued);
        assert!(fx.assets.get_asset(1).await.unwrap().is_some());
    }
}

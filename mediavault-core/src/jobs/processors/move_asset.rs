//! Asset relocation between pools, plus the pool-wide fan-out job.

use tracing::{debug, info, warn};

use crate::error::{Result, VaultError};
use crate::jobs::processors::ProcessorContext;
use crate::jobs::types::{
    JobPayload, MoveAssetPayload, Outcome, PoolMoveEnqueuePayload, ReconcileVariantsPayload,
};
use crate::storage::MoveFileResult;

/// Assets fanned out per `pool_move_enqueue` attempt. The job
/// re-enqueues itself with a cursor until the pool is drained, so a
/// single attempt never holds a worker for an unbounded scan.
const FANOUT_BATCH: i64 = 200;

/// Move one asset's original and variants from source to target pool,
/// then flip the database pointers and schedule a reconcile pass.
pub(crate) async fn run(ctx: &ProcessorContext, payload: &MoveAssetPayload) -> Result<Outcome> {
    let asset = ctx
        .assets
        .get_asset(payload.asset_id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("asset {}", payload.asset_id)))?;

    let source = ctx.registry().get(payload.source_pool_id).await?;
    let target = ctx.registry().get(payload.target_pool_id).await?;

    // Re-delivered move: the pointer already says target, so a prior
    // attempt got through the database update.
    if asset.storage_pool_id == target.id {
        debug!(asset_id = asset.id, pool = target.id, "asset already at target pool");
        return Ok(Outcome::Done);
    }

    // Source files are read from local disks; only the node that
    // mounts the source pool can run this.
    if ctx.is_foreign(&source) {
        debug!(
            asset_id = asset.id,
            source_node = %source.node_id,
            "move belongs to another node"
        );
        return Ok(Outcome::Requeued);
    }

    if !ctx.processing_status.is_processing_complete(asset.id).await? {
        return Err(VaultError::Internal(format!(
            "asset {} is still processing, deferring move",
            asset.id
        )));
    }

    let original = asset.stored_path();
    match ctx.transfer_file(&source, &target, &original).await? {
        MoveFileResult::Moved(bytes) => {
            debug!(asset_id = asset.id, bytes, "original moved");
        }
        MoveFileResult::SourceMissing => {
            // Nothing to move and nothing trustworthy to point at;
            // leave the rows alone for an operator to look at.
            warn!(
                asset_id = asset.id,
                path = %original,
                "original missing from source pool, skipping move"
            );
            return Ok(Outcome::Done);
        }
    }

    for variant in ctx.assets.variants_of(asset.id).await? {
        if variant.effective_pool_id(asset.storage_pool_id) != source.id {
            continue;
        }
        let path = variant.stored_path();
        match ctx.transfer_file(&source, &target, &path).await? {
            MoveFileResult::Moved(_) => {}
            MoveFileResult::SourceMissing => {
                // A missing rendition is regenerable; keep going.
                warn!(
                    asset_id = asset.id,
                    variant = %variant.variant_kind,
                    path = %path,
                    "variant missing from source pool"
                );
            }
        }
    }

    ctx.assets
        .update_asset_and_variants_pool(asset.id, target.id)
        .await?;

    // Variants created while the files were in flight still point at
    // the source pool; a reconcile pass catches them.
    ctx.enqueuer
        .enqueue(JobPayload::ReconcileVariants(ReconcileVariantsPayload {
            asset_id: asset.id,
            asset_uuid: asset.uuid,
            target_pool_id: target.id,
        }))
        .await?;

    info!(
        asset_id = asset.id,
        source = source.id,
        target = target.id,
        "asset moved"
    );
    Ok(Outcome::Done)
}

/// Page through a source pool's assets and enqueue one move job each.
pub(crate) async fn run_fanout(
    ctx: &ProcessorContext,
    payload: &PoolMoveEnqueuePayload,
) -> Result<Outcome> {
    let page = ctx
        .assets
        .assets_in_pool_after(payload.source_pool_id, payload.cursor_id, FANOUT_BATCH)
        .await?;

    for asset in &page {
        ctx.enqueuer
            .enqueue(JobPayload::MoveAsset(MoveAssetPayload {
                asset_id: asset.id,
                source_pool_id: payload.source_pool_id,
                target_pool_id: payload.target_pool_id,
            }))
            .await?;
    }

    info!(
        source = payload.source_pool_id,
        target = payload.target_pool_id,
        cursor = payload.cursor_id,
        enqueued = page.len(),
        "pool move batch fanned out"
    );

    if page.len() as i64 == FANOUT_BATCH {
        if let Some(last) = page.last() {
            ctx.enqueuer
                .enqueue(JobPayload::PoolMoveEnqueue(PoolMoveEnqueuePayload {
                    source_pool_id: payload.source_pool_id,
                    target_pool_id: payload.target_pool_id,
                    cursor_id: last.id,
                }))
                .await?;
        }
    }

    Ok(Outcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, AssetVariant, StorageTier};
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

    fn two_pool_fixture() -> crate::jobs::processors::testutil::Fixture {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let pools = vec![
            local_pool(1, &src, StorageTier::Hot, "s01"),
            local_pool(2, &dst, StorageTier::Warm, "s01"),
        ];
        fixture(pools, vec![src, dst])
    }

    #[tokio::test]
    async fn moves_files_updates_pointers_and_enqueues_reconcile() {
        let fx = two_pool_fixture();
        let a = asset(1, 1);
        fx.assets.insert_asset(a.clone());
        fx.assets.insert_variant(AssetVariant {
            id: 10,
            asset_id: 1,
            variant_kind: "thumbnail".into(),
            relative_path: "variants/thumbnails/2026/08/25".into(),
            file_name: "a1.webp".into(),
            file_size: 3,
            storage_pool_id: None,
        });

        let source = fx.ctx.registry().get(1).await.unwrap();
        let target = fx.ctx.registry().get(2).await.unwrap();
        fx.ctx
            .storage
            .save_file(&source, &a.stored_path(), &b"hello"[..])
            .await
            .unwrap();
        fx.ctx
            .storage
            .save_file(&source, "variants/thumbnails/2026/08/25/a1.webp", &b"abc"[..])
            .await
            .unwrap();

        let payload = MoveAssetPayload {
            asset_id: 1,
            source_pool_id: 1,
            target_pool_id: 2,
        };
        assert_eq!(run(&fx.ctx, &payload).await.unwrap(), Outcome::Done);

        assert!(fx.ctx.storage.file_exists(&target, &a.stored_path()).await.unwrap());
        assert!(!fx.ctx.storage.file_exists(&source, &a.stored_path()).await.unwrap());

        let moved = fx.assets.get_asset(1).await.unwrap().unwrap();
        assert_eq!(moved.storage_pool_id, 2);
        assert_eq!(
            fx.assets.variants_of(1).await.unwrap()[0].storage_pool_id,
            Some(2)
        );

        // A reconcile job was scheduled for the follow-up pass.
        assert_eq!(fx.store.queue_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rerun_after_completion_is_a_noop() {
        let fx = two_pool_fixture();
        fx.assets.insert_asset(asset(1, 2));

        let payload = MoveAssetPayload {
            asset_id: 1,
            source_pool_id: 1,
            target_pool_id: 2,
        };
        assert_eq!(run(&fx.ctx, &payload).await.unwrap(), Outcome::Done);
        assert_eq!(fx.store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_original_leaves_rows_untouched() {
        let fx = two_pool_fixture();
        fx.assets.insert_asset(asset(1, 1));

        let payload = MoveAssetPayload {
            asset_id: 1,
            source_pool_id: 1,
            target_pool_id: 2,
        };
        assert_eq!(run(&fx.ctx, &payload).await.unwrap(), Outcome::Done);
        assert_eq!(fx.assets.get_asset(1).await.unwrap().unwrap().storage_pool_id, 1);
        assert_eq!(fx.store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn foreign_source_node_requeues() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let pools = vec![
            local_pool(1, &src, StorageTier::Hot, "s02"),
            local_pool(2, &dst, StorageTier::Warm, "s01"),
        ];
        let fx = fixture(pools, vec![src, dst]);
        fx.assets.insert_asset(asset(1, 1));

        let payload = MoveAssetPayload {
            asset_id: 1,
            source_pool_id: 1,
            target_pool_id: 2,
        };
        assert_eq!(run(&fx.ctx, &payload).await.unwrap(), Outcome::Requeued);
    }

    #[tokio::test]
    async fn missing_asset_row_is_an_error() {
        let fx = two_pool_fixture();
        let payload = MoveAssetPayload {
            asset_id: 99,
            source_pool_id: 1,
            target_pool_id: 2,
        };
        assert!(matches!(
            run(&fx.ctx, &payload).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn fanout_pages_and_chains_itself() {
        let fx = two_pool_fixture();
        for id in 1..=FANOUT_BATCH + 5 {
            fx.assets.insert_asset(asset(id, 1));
        }

        let payload = PoolMoveEnqueuePayload {
            source_pool_id: 1,
            target_pool_id: 2,
            cursor_id: 0,
        };
        assert_eq!(run_fanout(&fx.ctx, &payload).await.unwrap(), Outcome::Done);

        // One move job per asset in the batch, plus the chained fanout.
        assert_eq!(fx.store.queue_len().await.unwrap(), FANOUT_BATCH + 1);

        let tail = PoolMoveEnqueuePayload {
            source_pool_id: 1,
            target_pool_id: 2,
            cursor_id: FANOUT_BATCH,
        };
        assert_eq!(run_fanout(&fx.ctx, &tail).await.unwrap(), Outcome::Done);
        assert_eq!(
            fx.store.queue_len().await.unwrap(),
            FANOUT_BATCH + 1 + 5
        );
    }
}

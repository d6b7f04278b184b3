//! Post-move reconciliation of asset variants.
//!
//! Variant generation can race a move: a rendition written to the old
//! pool after the mover's snapshot ends up stranded. This pass runs
//! after every move and drags stragglers to the asset's current pool.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::jobs::processors::ProcessorContext;
use crate::jobs::types::{Outcome, ReconcileVariantsPayload};
use crate::storage::MoveFileResult;

pub(crate) async fn run(
    ctx: &ProcessorContext,
    payload: &ReconcileVariantsPayload,
) -> Result<Outcome> {
    let Some(asset) = ctx.assets.get_asset(payload.asset_id).await? else {
        // Deleted between the move and this pass; nothing to converge.
        debug!(asset_id = payload.asset_id, "asset gone, nothing to reconcile");
        return Ok(Outcome::Done);
    };

    let target_id = if payload.target_pool_id > 0 {
        payload.target_pool_id
    } else {
        asset.storage_pool_id
    };
    let target = ctx.registry().get(target_id).await?;

    let mut moved = 0usize;
    for variant in ctx.assets.variants_of(asset.id).await? {
        let current_id = variant.effective_pool_id(asset.storage_pool_id);
        if current_id == target.id {
            continue;
        }

        let current = ctx.registry().get(current_id).await?;
        // Stragglers are read from their current pool's disks.
        if ctx.is_foreign(&current) {
            debug!(
                asset_id = asset.id,
                variant = %variant.variant_kind,
                node = %current.node_id,
                "straggler lives on another node, requeueing"
            );
            return Ok(Outcome::Requeued);
        }

        let path = variant.stored_path();
        match ctx.transfer_file(&current, &target, &path).await? {
            MoveFileResult::Moved(_) => {
                ctx.assets
                    .set_variant_pool(variant.id, Some(target.id))
                    .await?;
                moved += 1;
            }
            MoveFileResult::SourceMissing => {
                // Pointer says one thing, disk says another. Point the
                // row at the target anyway; the rendition regenerates
                // on next access.
                warn!(
                    asset_id = asset.id,
                    variant = %variant.variant_kind,
                    path = %path,
                    "straggler file missing, repointing row"
                );
                ctx.assets
                    .set_variant_pool(variant.id, Some(target.id))
                    .await?;
            }
        }
    }

    if moved > 0 {
        info!(asset_id = asset.id, moved, pool = target.id, "variants reconciled");
    }
    Ok(Outcome::Done)
}

//! Off-site backup upload and deletion against the object store.

use tracing::{debug, info, warn};

use crate::domain::BackupStatus;
use crate::error::{Result, VaultError};
use crate::jobs::processors::ProcessorContext;
use crate::jobs::types::{ObjectBackupPayload, ObjectDeletePayload, Outcome};

/// Upload one asset's original to the backup bucket.
///
/// The claim on the backup record is the cross-node mutex: whichever
/// node flips it to `uploading` does the transfer, everyone else
/// drops the job.
pub(crate) async fn run_backup(
    ctx: &ProcessorContext,
    payload: &ObjectBackupPayload,
) -> Result<Outcome> {
    let Some(record) = ctx.backups.get(payload.backup_id).await? else {
        warn!(backup_id = payload.backup_id, "backup record missing");
        return Ok(Outcome::Done);
    };

    if matches!(record.status, BackupStatus::Completed | BackupStatus::Deleted) {
        debug!(backup_id = record.id, status = %record.status, "backup already settled");
        return Ok(Outcome::Done);
    }

    let Some(asset) = ctx.assets.get_asset(payload.asset_id).await? else {
        ctx.backups
            .mark_failed(record.id, "asset row no longer exists")
            .await?;
        return Ok(Outcome::Done);
    };

    // The original is read from the pool that holds it; route before
    // claiming so a wrong-node attempt leaves the record claimable.
    let pool = ctx.registry().get(asset.storage_pool_id).await?;
    if ctx.is_foreign(&pool) {
        debug!(
            backup_id = record.id,
            node = %pool.node_id,
            "backup source lives on another node"
        );
        return Ok(Outcome::Requeued);
    }

    let client = ctx
        .object
        .as_ref()
        .ok_or_else(|| VaultError::Internal("no object storage client configured".into()))?;

    if !ctx.backups.claim_for_upload(record.id, &ctx.node_id).await? {
        debug!(backup_id = record.id, "backup claimed elsewhere");
        return Ok(Outcome::Done);
    }

    let path = asset.stored_path();
    let body = match ctx.storage.read_file(&pool, &path).await {
        Ok(body) => body,
        Err(e) => {
            ctx.backups.mark_failed(record.id, &e.to_string()).await?;
            return Err(e);
        }
    };

    let size = body.len() as i64;
    let key = format!("backups/{}/{}", asset.uuid, asset.file_name);
    if let Err(e) = client.put(&ctx.backup_bucket, &key, body).await {
        ctx.backups.mark_failed(record.id, &e.to_string()).await?;
        return Err(e);
    }

    ctx.backups
        .mark_completed(record.id, &key, &ctx.backup_bucket, size)
        .await?;
    info!(
        backup_id = record.id,
        asset_id = asset.id,
        key = %key,
        size,
        "backup uploaded"
    );
    Ok(Outcome::Done)
}

/// Remove one off-site copy and retire its record.
pub(crate) async fn run_delete(
    ctx: &ProcessorContext,
    payload: &ObjectDeletePayload,
) -> Result<Outcome> {
    let client = ctx
        .object
        .as_ref()
        .ok_or_else(|| VaultError::Internal("no object storage client configured".into()))?;

    // Deleting an already-deleted object is a success for S3-likes,
    // so a re-delivered job converges on its own.
    client.delete(&payload.bucket, &payload.object_key).await?;
    ctx.backups.mark_deleted(payload.backup_id).await?;

    info!(
        backup_id = payload.backup_id,
        key = %payload.object_key,
        "off-site copy deleted"
    );
    Ok(Outcome::Done)
}

//! Internal endpoint receiving cross-node file replications.
//!
//! A peer node pushes one file as a multipart form (`pool_id`,
//! `stored_path`, `size`, `sha256`, `file`). The body is spooled to a
//! temp file while being hashed, and nothing touches the pool until
//! the checksum and capacity checks pass.

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use constant_time_eq::constant_time_eq;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use mediavault_core::StorageManager;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

pub async fn replicate(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    if state.replication_secret.is_empty() {
        return Err(AppError::unavailable("replication is not configured"));
    }
    authorize(&headers, &state.replication_secret)?;

    let mut pool_id: Option<i64> = None;
    let mut path: Option<String> = None;
    let mut declared_size: Option<i64> = None;
    let mut checksum: Option<String> = None;
    let mut spooled: Option<(tempfile::NamedTempFile, String, i64)> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("pool_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(e.to_string()))?;
                pool_id = Some(
                    text.parse()
                        .map_err(|_| AppError::bad_request("pool_id is not an integer"))?,
                );
            }
            Some("stored_path") => {
                path = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::bad_request(e.to_string()))?,
                );
            }
            Some("size") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(e.to_string()))?;
                declared_size = Some(
                    text.parse()
                        .map_err(|_| AppError::bad_request("size is not an integer"))?,
                );
            }
            Some("sha256") => {
                checksum = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::bad_request(e.to_string()))?
                        .to_lowercase(),
                );
            }
            Some("file") => {
                let tmp = tempfile::NamedTempFile::new()
                    .map_err(|e| AppError::internal(format!("spool file: {e}")))?;
                let mut writer = tokio::fs::File::from_std(
                    tmp.reopen()
                        .map_err(|e| AppError::internal(format!("spool file: {e}")))?,
                );
                let mut hasher = Sha256::new();
                let mut total: i64 = 0;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| AppError::bad_request(format!("truncated upload: {e}")))?
                {
                    hasher.update(&chunk);
                    total += chunk.len() as i64;
                    writer
                        .write_all(&chunk)
                        .await
                        .map_err(|e| AppError::internal(format!("spool write: {e}")))?;
                }
                writer
                    .flush()
                    .await
                    .map_err(|e| AppError::internal(format!("spool write: {e}")))?;
                spooled = Some((tmp, hex::encode(hasher.finalize()), total));
            }
            _ => {}
        }
    }

    let pool_id = pool_id.ok_or_else(|| AppError::bad_request("missing pool_id field"))?;
    let raw_path = path.ok_or_else(|| AppError::bad_request("missing stored_path field"))?;
    let checksum = checksum.ok_or_else(|| AppError::bad_request("missing sha256 field"))?;
    let (tmp, computed, received_size) =
        spooled.ok_or_else(|| AppError::bad_request("missing file field"))?;

    if let Some(declared) = declared_size {
        if declared != received_size {
            return Err(AppError::bad_request(format!(
                "declared size {declared} does not match received {received_size} bytes"
            )));
        }
    }

    let clean = StorageManager::clean_relative_path(&raw_path)?;
    if !clean.starts_with("original/") && !clean.starts_with("variants/") {
        return Err(AppError::bad_request(
            "path must be under original/ or variants/",
        ));
    }

    let pool = state.registry.get(pool_id).await?;
    if !pool.node_id.eq_ignore_ascii_case(&state.node_id) {
        return Err(AppError::bad_request(format!(
            "pool '{}' is hosted on node '{}', not '{}'",
            pool.name, pool.node_id, state.node_id
        )));
    }
    if !pool.is_active || !pool.is_healthy() {
        return Err(AppError::unavailable(format!(
            "pool '{}' cannot accept writes",
            pool.name
        )));
    }

    // Same path with the same bytes already present: the sender is
    // retrying a transfer that actually landed.
    if state.storage.file_size(&pool, &clean).await? == Some(received_size) {
        info!(pool = %pool.name, path = %clean, "replica already present");
        return Ok((
            StatusCode::OK,
            Json(json!({ "status": "exists", "path": clean, "size": received_size })),
        ));
    }

    if !pool.can_accept(received_size) {
        return Err(AppError::insufficient_storage(format!(
            "pool '{}' lacks {received_size} bytes of capacity",
            pool.name
        )));
    }

    if computed != checksum {
        warn!(pool = %pool.name, path = %clean, "replication checksum mismatch");
        return Err(AppError::unprocessable(format!(
            "checksum mismatch for {clean}"
        )));
    }

    let reader = tokio::fs::File::from_std(
        tmp.reopen()
            .map_err(|e| AppError::internal(format!("spool file: {e}")))?,
    );
    let written = state.storage.save_file(&pool, &clean, reader).await?;

    info!(pool = %pool.name, path = %clean, size = written, "replica committed");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "replicated", "path": clean, "size": written })),
    ))
}

fn authorize(headers: &HeaderMap, secret: &str) -> AppResult<()> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;

    if !constant_time_eq(token.as_bytes(), secret.as_bytes()) {
        return Err(AppError::unauthorized("invalid replication token"));
    }
    Ok(())
}

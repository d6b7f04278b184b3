//! Read-only job and pool status endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .queue
        .store()
        .get_job(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("job {id}")))?;
    Ok(Json(job))
}

/// GET /api/queue/stats
pub async fn queue_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(state.queue.snapshot().await?))
}

/// GET /api/pools/health
pub async fn pools_health(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(state.registry.health_all().await?))
}

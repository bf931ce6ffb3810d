use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::extractor::AdminAuth;
use crate::error::AppError;
use crate::models::{QueueItem, QueueStatus};
use crate::queue::TickReport;
use crate::state::SharedState;
use crate::store::ListFilter;

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, AppError> {
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<QueueStatus>)
        .transpose()
        .map_err(|e| AppError::BadRequest(format!("{e}")))?;

    let filter = ListFilter {
        status,
        limit: params.limit.unwrap_or(50).clamp(1, 500),
        offset: params.offset.unwrap_or(0).max(0),
    };

    let items = state.queue.store().list(&filter).await?;

    Ok(Json(json!({
        "items": items,
        "limit": filter.limit,
        "offset": filter.offset,
    })))
}

pub async fn get(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<QueueItem>, AppError> {
    let item = state
        .queue
        .store()
        .find(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Queue item not found".to_string()))?;
    Ok(Json(item))
}

/// Put a failed row back on the schedule.
pub async fn requeue(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<QueueItem>, AppError> {
    if let Some(item) = state.queue.requeue(id).await? {
        return Ok(Json(item));
    }

    match state.queue.store().find(id).await? {
        Some(item) => Err(AppError::Conflict(format!(
            "Queue item is {}, only failed items can be requeued",
            item.status
        ))),
        None => Err(AppError::NotFound("Queue item not found".to_string())),
    }
}

pub async fn tick(_auth: AdminAuth, State(state): State<SharedState>) -> Json<TickReport> {
    Json(state.queue.run_batch().await)
}

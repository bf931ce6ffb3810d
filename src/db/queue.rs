use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{Completion, NewQueueItem, QueueItem, QueueStatus};

pub async fn create(pool: &PgPool, item: &NewQueueItem) -> Result<QueueItem, sqlx::Error> {
    let diag = item.diagnostics.clone().unwrap_or_default();
    let last_error_at = item.diagnostics.as_ref().map(|_| item.created_at);

    sqlx::query_as::<_, QueueItem>(
        "INSERT INTO crm_queue (
             status, next_run_at, tries, mode, operation, payload, device_id, authorize,
             api_url, endpoint_id, timeout_secs, idempotency_token,
             http_status, response_status, error_id, error_message,
             created_at, updated_at, last_error_at
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                 $13, $14, $15, $16, $17, $17, $18)
         RETURNING *",
    )
    .bind(item.status.as_str())
    .bind(item.next_run_at)
    .bind(item.tries)
    .bind(item.mode.as_str())
    .bind(&item.operation)
    .bind(&item.payload)
    .bind(&item.device_id)
    .bind(item.authorize)
    .bind(&item.api_url)
    .bind(&item.endpoint_id)
    .bind(item.timeout_secs)
    .bind(&item.idempotency_token)
    .bind(diag.http_status)
    .bind(diag.response_status)
    .bind(diag.error_id)
    .bind(diag.error_message)
    .bind(item.created_at)
    .bind(last_error_at)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>("SELECT * FROM crm_queue WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Newest first, optionally restricted to one status.
pub async fn list(
    pool: &PgPool,
    status: Option<QueueStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM crm_queue
         WHERE ($1::text IS NULL OR status = $1)
         ORDER BY id DESC LIMIT $2 OFFSET $3",
    )
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Rows eligible for the current tick, oldest schedule first.
pub async fn find_due(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM crm_queue
         WHERE status IN ('new', 'retry', 'locked')
           AND (next_run_at IS NULL OR next_run_at <= $1)
           AND (locked_until IS NULL OR locked_until < $1)
         ORDER BY next_run_at ASC NULLS FIRST, id ASC
         LIMIT $2",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Take the lease only if the row is still due and unleased. Returns false
/// when another tick got there first.
pub async fn claim(
    pool: &PgPool,
    id: i64,
    now: DateTime<Utc>,
    locked_until: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE crm_queue
         SET status = 'locked', locked_until = $3, updated_at = $2
         WHERE id = $1
           AND status IN ('new', 'retry', 'locked')
           AND (next_run_at IS NULL OR next_run_at <= $2)
           AND (locked_until IS NULL OR locked_until < $2)",
    )
    .bind(id)
    .bind(now)
    .bind(locked_until)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Settle a locked row. Returns false if the row is no longer locked.
pub async fn complete(
    pool: &PgPool,
    id: i64,
    completion: &Completion,
) -> Result<bool, sqlx::Error> {
    let result = match &completion.diagnostics {
        Some(diag) => {
            sqlx::query(
                "UPDATE crm_queue
                 SET status = $2,
                     tries = GREATEST(tries, $3),
                     next_run_at = COALESCE($4, next_run_at),
                     locked_until = NULL,
                     http_status = $5,
                     response_status = $6,
                     error_id = $7,
                     error_message = $8,
                     updated_at = $9,
                     last_error_at = $9
                 WHERE id = $1 AND status = 'locked'",
            )
            .bind(id)
            .bind(completion.status.as_str())
            .bind(completion.tries)
            .bind(completion.next_run_at)
            .bind(diag.http_status)
            .bind(&diag.response_status)
            .bind(&diag.error_id)
            .bind(&diag.error_message)
            .bind(completion.at)
            .execute(pool)
            .await?
        }
        None => {
            sqlx::query(
                "UPDATE crm_queue
                 SET status = $2,
                     tries = GREATEST(tries, $3),
                     next_run_at = COALESCE($4, next_run_at),
                     locked_until = NULL,
                     updated_at = $5
                 WHERE id = $1 AND status = 'locked'",
            )
            .bind(id)
            .bind(completion.status.as_str())
            .bind(completion.tries)
            .bind(completion.next_run_at)
            .bind(completion.at)
            .execute(pool)
            .await?
        }
    };
    Ok(result.rows_affected() == 1)
}

/// Operator re-drive: a failed row becomes due again immediately.
pub async fn requeue(pool: &PgPool, id: i64, now: DateTime<Utc>) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE crm_queue
         SET status = 'retry', next_run_at = $2, locked_until = NULL, updated_at = $2
         WHERE id = $1 AND status = 'failed'",
    )
    .bind(id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{ListFilter, QueueStore, StoreError};
use crate::models::{Completion, NewQueueItem, QueueItem, QueueStatus};

/// In-process store with the same conditional-update semantics as Postgres.
#[derive(Default)]
pub struct MemoryQueueStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    last_id: i64,
    rows: BTreeMap<i64, QueueItem>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, ordered by id.
    pub async fn all(&self) -> Vec<QueueItem> {
        self.inner.lock().await.rows.values().cloned().collect()
    }
}

fn is_due(row: &QueueItem, now: DateTime<Utc>) -> bool {
    row.status.is_pending()
        && row.next_run_at.is_none_or(|t| t <= now)
        && row.locked_until.is_none_or(|t| t < now)
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn add(&self, item: NewQueueItem) -> Result<QueueItem, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.last_id += 1;
        let diag = item.diagnostics.clone().unwrap_or_default();
        let row = QueueItem {
            id: inner.last_id,
            status: item.status,
            next_run_at: item.next_run_at,
            locked_until: None,
            tries: item.tries,
            mode: item.mode,
            operation: item.operation,
            payload: item.payload,
            device_id: item.device_id,
            authorize: item.authorize,
            api_url: item.api_url,
            endpoint_id: item.endpoint_id,
            timeout_secs: item.timeout_secs,
            idempotency_token: item.idempotency_token,
            http_status: diag.http_status,
            response_status: diag.response_status,
            error_id: diag.error_id,
            error_message: diag.error_message,
            created_at: item.created_at,
            updated_at: item.created_at,
            last_error_at: item.diagnostics.map(|_| item.created_at),
        };
        inner.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find(&self, id: i64) -> Result<Option<QueueItem>, StoreError> {
        Ok(self.inner.lock().await.rows.get(&id).cloned())
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<QueueItem>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .values()
            .rev()
            .filter(|row| filter.status.is_none_or(|s| row.status == s))
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<QueueItem> = inner
            .rows
            .values()
            .filter(|row| is_due(row, now))
            .cloned()
            .collect();
        // None sorts before Some, matching NULLS FIRST.
        rows.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn claim(
        &self,
        id: i64,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) if is_due(row, now) => {
                row.status = QueueStatus::Locked;
                row.locked_until = Some(locked_until);
                row.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(&self, id: i64, completion: &Completion) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner
            .rows
            .get_mut(&id)
            .filter(|row| row.status == QueueStatus::Locked)
        else {
            return Ok(false);
        };

        row.status = completion.status;
        row.tries = row.tries.max(completion.tries);
        if let Some(next_run_at) = completion.next_run_at {
            row.next_run_at = Some(next_run_at);
        }
        row.locked_until = None;
        row.updated_at = completion.at;
        if let Some(diag) = &completion.diagnostics {
            row.http_status = diag.http_status;
            row.response_status = diag.response_status.clone();
            row.error_id = diag.error_id.clone();
            row.error_message = diag.error_message.clone();
            row.last_error_at = Some(completion.at);
        }
        Ok(true)
    }

    async fn requeue(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&id) {
            Some(row) if row.status == QueueStatus::Failed => {
                row.status = QueueStatus::Retry;
                row.next_run_at = Some(now);
                row.locked_until = None;
                row.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

//! Durable queue storage behind a small keyed, filterable table interface.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db;
use crate::models::{Completion, NewQueueItem, QueueItem, QueueStatus};

pub use memory::MemoryQueueStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<QueueStatus>,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn add(&self, item: NewQueueItem) -> Result<QueueItem, StoreError>;

    async fn find(&self, id: i64) -> Result<Option<QueueItem>, StoreError>;

    async fn list(&self, filter: &ListFilter) -> Result<Vec<QueueItem>, StoreError>;

    /// Up to `limit` rows in `New`/`Retry`/`Locked` whose schedule has arrived
    /// and whose lease has expired, ordered by `next_run_at` (unset first), then `id`.
    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>, StoreError>;

    /// Conditionally lease a due row until `locked_until`.
    async fn claim(
        &self,
        id: i64,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Settle a locked row and clear its lease.
    async fn complete(&self, id: i64, completion: &Completion) -> Result<bool, StoreError>;

    /// Move a failed row back to `Retry`, due at `now`.
    async fn requeue(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError>;
}

pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn add(&self, item: NewQueueItem) -> Result<QueueItem, StoreError> {
        Ok(db::queue::create(&self.pool, &item).await?)
    }

    async fn find(&self, id: i64) -> Result<Option<QueueItem>, StoreError> {
        Ok(db::queue::find_by_id(&self.pool, id).await?)
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<QueueItem>, StoreError> {
        Ok(db::queue::list(&self.pool, filter.status, filter.limit, filter.offset).await?)
    }

    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>, StoreError> {
        Ok(db::queue::find_due(&self.pool, now, limit).await?)
    }

    async fn claim(
        &self,
        id: i64,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(db::queue::claim(&self.pool, id, now, locked_until).await?)
    }

    async fn complete(&self, id: i64, completion: &Completion) -> Result<bool, StoreError> {
        Ok(db::queue::complete(&self.pool, id, completion).await?)
    }

    async fn requeue(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(db::queue::requeue(&self.pool, id, now).await?)
    }
}

//! Delivery orchestration: immediate attempt with fallback to the durable
//! retry queue, and the periodic tick that replays due rows.
//!
//! Facade policy: the send methods never surface internal faults (storage
//! errors, a client that cannot be built). Those are logged, recorded where
//! possible, and reported as `Ok(None)`. The only `Err` a caller sees is a
//! classified, non-retryable [`ClientError`], so business code can react to
//! e.g. field-level validation messages.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::client::{ClientError, ClientRegistry, ErrorKind, Mode, OperationCall, Payload};
use crate::config::{ApiConfig, QueueConfig};
use crate::models::{Completion, Diagnostics, NewQueueItem, QueueItem, QueueStatus};
use crate::store::QueueStore;

/// Counts for one tick, plus when the scheduler should run the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub fetched: usize,
    pub claimed: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
    pub reschedule_after_secs: u64,
}

impl TickReport {
    pub fn reschedule_after(&self) -> Duration {
        Duration::from_secs(self.reschedule_after_secs)
    }
}

enum Attempt {
    Delivered,
    Retry(ClientError),
    Failed(Diagnostics, String),
}

pub struct QueueService {
    store: Arc<dyn QueueStore>,
    clients: Arc<ClientRegistry>,
    api: ApiConfig,
    queue: QueueConfig,
}

impl QueueService {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clients: Arc<ClientRegistry>,
        api: ApiConfig,
        queue: QueueConfig,
    ) -> Self {
        Self {
            store,
            clients,
            api,
            queue,
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    pub fn queue_config(&self) -> &QueueConfig {
        &self.queue
    }

    pub async fn send_sync(
        &self,
        operation: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Result<Option<Value>, ClientError> {
        self.send_or_queue(OperationCall::new(Mode::Sync, operation, payload))
            .await
    }

    pub async fn send_async(
        &self,
        operation: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Result<Option<Value>, ClientError> {
        self.send_or_queue(OperationCall::new(Mode::Async, operation, payload))
            .await
    }

    pub async fn send_or_queue(&self, call: OperationCall) -> Result<Option<Value>, ClientError> {
        let api = self.api.clone();
        self.send_or_queue_with(&api, call).await
    }

    /// Immediate path with a per-call connection override.
    pub async fn send_or_queue_with(
        &self,
        api: &ApiConfig,
        mut call: OperationCall,
    ) -> Result<Option<Value>, ClientError> {
        let token = call
            .idempotency_token
            .take()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(generate_token);
        call.idempotency_token = Some(token.clone());

        let now = Utc::now();

        let Some(client) = self.clients.get(&api.settings()) else {
            let diag = Diagnostics::message("client initialization failed");
            self.log_failure(&call.operation, &token, &diag, &call.payload.stored_text());
            self.record(api, &call, &token, QueueStatus::Failed, None, Some(diag), now)
                .await;
            return Ok(None);
        };

        match client.execute(&call).await {
            Ok(data) => Ok(data),
            Err(err) if err.is_already_processed() => {
                tracing::debug!(
                    operation = %call.operation,
                    token = %token,
                    "CRM reports transaction already processed"
                );
                Ok(None)
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(
                    channel = %self.queue.log_channel,
                    operation = %call.operation,
                    token = %token,
                    "CRM call failed, queued for retry: {}",
                    err.summary()
                );
                let next_run_at = after(now, self.queue.retry_interval);
                self.record(
                    api,
                    &call,
                    &token,
                    QueueStatus::Retry,
                    Some(next_run_at),
                    Some(Diagnostics::from(&err)),
                    now,
                )
                .await;
                Ok(None)
            }
            Err(err) if err.kind == ErrorKind::Validation => {
                self.log_failure(
                    &call.operation,
                    &token,
                    &Diagnostics::from(&err),
                    &call.payload.stored_text(),
                );
                Err(err)
            }
            Err(err) => {
                let diag = Diagnostics::from(&err);
                self.log_failure(&call.operation, &token, &diag, &call.payload.stored_text());
                self.record(api, &call, &token, QueueStatus::Failed, None, Some(diag), now)
                    .await;
                Err(err)
            }
        }
    }

    /// Run one tick against the current time.
    pub async fn run_batch(&self) -> TickReport {
        self.run_batch_at(Utc::now()).await
    }

    /// One pass over due rows, strictly sequential. Never fails: every
    /// outcome is written back to the store.
    pub async fn run_batch_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            reschedule_after_secs: self.queue.tick_interval.as_secs(),
            ..Default::default()
        };

        let limit = i64::try_from(self.queue.batch_size).unwrap_or(i64::MAX);
        let rows = match self.store.due(now, limit).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(
                    channel = %self.queue.log_channel,
                    "Failed to fetch due queue rows: {e}"
                );
                return report;
            }
        };
        report.fetched = rows.len();

        let lease = after(now, self.queue.lock_duration);
        for row in rows {
            match self.store.claim(row.id, now, lease).await {
                Ok(true) => report.claimed += 1,
                Ok(false) => {
                    tracing::debug!(id = row.id, "Queue row claimed elsewhere, skipping");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(id = row.id, "Failed to claim queue row: {e}");
                    report.skipped += 1;
                    continue;
                }
            }

            let tries = row.tries.saturating_add(1);
            let completion = match self.replay(&row).await {
                Attempt::Delivered => {
                    report.succeeded += 1;
                    Completion::success(now, row.tries)
                }
                Attempt::Retry(err) => {
                    report.retried += 1;
                    tracing::warn!(
                        channel = %self.queue.log_channel,
                        id = row.id,
                        operation = %row.operation,
                        token = %row.idempotency_token,
                        tries,
                        "Queued CRM call failed again: {}",
                        err.summary()
                    );
                    Completion::retry(
                        now,
                        tries,
                        after(now, self.queue.retry_interval),
                        Diagnostics::from(&err),
                    )
                }
                Attempt::Failed(diag, summary) => {
                    report.failed += 1;
                    tracing::error!(
                        channel = %self.queue.log_channel,
                        id = row.id,
                        operation = %row.operation,
                        token = %row.idempotency_token,
                        tries,
                        data = %row.payload,
                        "Queued CRM call failed permanently: {summary}"
                    );
                    Completion::failed(now, tries, diag)
                }
            };

            match self.store.complete(row.id, &completion).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    id = row.id,
                    status = %completion.status,
                    "Queue row lease was lost before completion"
                ),
                Err(e) => tracing::error!(
                    channel = %self.queue.log_channel,
                    id = row.id,
                    status = %completion.status,
                    "Failed to update queue row: {e}"
                ),
            }
        }

        if report.fetched > 0 {
            tracing::info!(
                fetched = report.fetched,
                succeeded = report.succeeded,
                retried = report.retried,
                failed = report.failed,
                skipped = report.skipped,
                "CRM queue tick finished"
            );
        }

        report
    }

    /// Operator re-drive of a failed row.
    pub async fn requeue(&self, id: i64) -> Result<Option<QueueItem>, crate::store::StoreError> {
        if !self.store.requeue(id, Utc::now()).await? {
            return Ok(None);
        }
        tracing::info!(id, "Failed queue row requeued by operator");
        self.store.find(id).await
    }

    async fn replay(&self, row: &QueueItem) -> Attempt {
        let timeout = Duration::from_secs(u64::try_from(row.timeout_secs).unwrap_or(0));
        let settings = self.api.settings_for(&row.api_url, &row.endpoint_id, timeout);

        let Some(client) = self.clients.get(&settings) else {
            return Attempt::Failed(
                Diagnostics::message("client initialization failed"),
                "client initialization failed".to_string(),
            );
        };

        let call = OperationCall {
            mode: row.mode,
            operation: row.operation.clone(),
            payload: Payload::Raw(row.payload.clone()),
            device_id: row.device_id.clone(),
            authorize: row.authorize,
            idempotency_token: Some(row.idempotency_token.clone()),
        };

        match client.execute(&call).await {
            Ok(_) => Attempt::Delivered,
            Err(err) if err.is_already_processed() => Attempt::Delivered,
            Err(err) if err.is_retryable() => Attempt::Retry(err),
            Err(err) => Attempt::Failed(Diagnostics::from(&err), err.summary()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        api: &ApiConfig,
        call: &OperationCall,
        token: &str,
        status: QueueStatus,
        next_run_at: Option<DateTime<Utc>>,
        diagnostics: Option<Diagnostics>,
        now: DateTime<Utc>,
    ) {
        let item = NewQueueItem {
            status,
            next_run_at,
            tries: 1,
            mode: call.mode,
            operation: call.operation.clone(),
            payload: call.payload.stored_text(),
            device_id: call.device_id.clone(),
            authorize: call.authorize,
            api_url: api.api_url.clone(),
            endpoint_id: api.endpoint_id.clone(),
            timeout_secs: i32::try_from(api.timeout_secs()).unwrap_or(i32::MAX),
            idempotency_token: token.to_string(),
            diagnostics,
            created_at: now,
        };

        match self.store.add(item).await {
            Ok(row) => {
                tracing::debug!(id = row.id, status = %row.status, "CRM call recorded in queue")
            }
            Err(e) => tracing::error!(
                channel = %self.queue.log_channel,
                operation = %call.operation,
                token,
                "Failed to record CRM call in queue: {e}"
            ),
        }
    }

    fn log_failure(&self, operation: &str, token: &str, diag: &Diagnostics, data: &str) {
        tracing::error!(
            channel = %self.queue.log_channel,
            operation,
            token,
            http_status = diag.http_status,
            response_status = diag.response_status.as_deref(),
            error_id = diag.error_id.as_deref(),
            error_message = diag.error_message.as_deref(),
            data,
            "CRM call failed"
        );
    }
}

/// Random v4 identifier used as the transaction id.
pub fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

/// `now + d`, saturating at the latest representable instant.
fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

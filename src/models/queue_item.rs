use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::{ClientError, Mode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    New,
    Retry,
    Locked,
    Success,
    Failed,
}

impl QueueStatus {
    /// Statuses a tick may pick up.
    pub const PENDING: [QueueStatus; 3] =
        [QueueStatus::New, QueueStatus::Retry, QueueStatus::Locked];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::New => "new",
            QueueStatus::Retry => "retry",
            QueueStatus::Locked => "locked",
            QueueStatus::Success => "success",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn is_pending(&self) -> bool {
        Self::PENDING.contains(self)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown queue status: {0}")]
pub struct UnknownStatus(String);

impl FromStr for QueueStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(QueueStatus::New),
            "retry" => Ok(QueueStatus::Retry),
            "locked" => Ok(QueueStatus::Locked),
            "success" => Ok(QueueStatus::Success),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for QueueStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueueItem {
    pub id: i64,
    #[sqlx(try_from = "String")]
    pub status: QueueStatus,
    pub next_run_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    pub tries: i32,
    #[sqlx(try_from = "String")]
    pub mode: Mode,
    pub operation: String,
    pub payload: String,
    pub device_id: Option<String>,
    pub authorize: bool,
    pub api_url: String,
    pub endpoint_id: String,
    pub timeout_secs: i32,
    pub idempotency_token: String,
    pub http_status: Option<i32>,
    pub response_status: Option<String>,
    pub error_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Diagnostics from the most recent attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub http_status: Option<i32>,
    pub response_status: Option<String>,
    pub error_id: Option<String>,
    pub error_message: Option<String>,
}

impl Diagnostics {
    /// For failures that never produced a classified error.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

impl From<&ClientError> for Diagnostics {
    fn from(err: &ClientError) -> Self {
        let detail = &err.detail;
        Self {
            http_status: (detail.http_status > 0).then_some(i32::from(detail.http_status)),
            response_status: detail.response_status.clone(),
            error_id: detail.error_id.clone(),
            error_message: detail
                .error_message
                .clone()
                .or_else(|| Some(err.message.clone())),
        }
    }
}

/// A row as written by the immediate path.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub status: QueueStatus,
    pub next_run_at: Option<DateTime<Utc>>,
    pub tries: i32,
    pub mode: Mode,
    pub operation: String,
    pub payload: String,
    pub device_id: Option<String>,
    pub authorize: bool,
    pub api_url: String,
    pub endpoint_id: String,
    pub timeout_secs: i32,
    pub idempotency_token: String,
    pub diagnostics: Option<Diagnostics>,
    pub created_at: DateTime<Utc>,
}

/// Terminal or retry state written after a claimed row was attempted.
///
/// The lock is always cleared. `next_run_at` is only overwritten when set,
/// and diagnostics (with `last_error_at`) only when present.
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: QueueStatus,
    pub tries: i32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub diagnostics: Option<Diagnostics>,
    pub at: DateTime<Utc>,
}

impl Completion {
    pub fn success(at: DateTime<Utc>, tries: i32) -> Self {
        Self {
            status: QueueStatus::Success,
            tries,
            next_run_at: None,
            diagnostics: None,
            at,
        }
    }

    pub fn retry(
        at: DateTime<Utc>,
        tries: i32,
        next_run_at: DateTime<Utc>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            status: QueueStatus::Retry,
            tries,
            next_run_at: Some(next_run_at),
            diagnostics: Some(diagnostics),
            at,
        }
    }

    pub fn failed(at: DateTime<Utc>, tries: i32, diagnostics: Diagnostics) -> Self {
        Self {
            status: QueueStatus::Failed,
            tries,
            next_run_at: None,
            diagnostics: Some(diagnostics),
            at,
        }
    }
}

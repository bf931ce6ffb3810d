//! Classified failures of a single CRM operation call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HTTP statuses that are retried when the body carries no recognized status.
pub const RETRYABLE_HTTP_STATUSES: [u16; 4] = [500, 502, 503, 504];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Bad client configuration or call arguments.
    Config,
    /// Payload could not be serialized or is not valid JSON.
    Encoding,
    /// Connection failure or timeout.
    Transport,
    /// A 2xx response whose body is not valid JSON.
    InvalidResponse,
    /// The remote already handled this idempotency token.
    TransactionAlreadyProcessed,
    Validation,
    Protocol,
    InternalServer,
    /// Any other non-2xx response.
    Http,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::Encoding => "EncodingError",
            ErrorKind::Transport => "TransportError",
            ErrorKind::InvalidResponse => "InvalidResponseError",
            ErrorKind::TransactionAlreadyProcessed => "TransactionAlreadyProcessed",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::InternalServer => "InternalServerError",
            ErrorKind::Http => "HttpError",
        }
    }

    /// Map a response body `status` value onto a kind. Unknown values yield `None`.
    pub fn from_response_status(status: &str) -> Option<Self> {
        match status {
            "TransactionAlreadyProcessed" => Some(ErrorKind::TransactionAlreadyProcessed),
            "ValidationError" => Some(ErrorKind::Validation),
            "ProtocolError" => Some(ErrorKind::Protocol),
            "InternalServerError" => Some(ErrorKind::InternalServer),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMessage {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub message: String,
}

/// Everything the remote told us about a failed call.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    /// 0 when no response was received.
    pub http_status: u16,
    pub response_status: Option<String>,
    pub error_id: Option<String>,
    pub error_message: Option<String>,
    pub validation_messages: Vec<ValidationMessage>,
    #[serde(skip)]
    pub response_body: Option<String>,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ClientError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: ErrorDetail,
}

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: ErrorDetail::default(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encoding, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn http_status(&self) -> u16 {
        self.detail.http_status
    }

    /// True when the remote reported the idempotency token as already handled.
    pub fn is_already_processed(&self) -> bool {
        self.kind == ErrorKind::TransactionAlreadyProcessed
    }

    /// Whether the call should be retried later from the queue.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Transport | ErrorKind::InternalServer => true,
            ErrorKind::Http => RETRYABLE_HTTP_STATUSES.contains(&self.detail.http_status),
            _ => false,
        }
    }

    /// One-line summary for operator logs.
    pub fn summary(&self) -> String {
        format!(
            "{} [kind={} http={} status={} errorId={} message={}]",
            self.message,
            self.kind,
            self.detail.http_status,
            self.detail.response_status.as_deref().unwrap_or("-"),
            self.detail.error_id.as_deref().unwrap_or("-"),
            self.detail.error_message.as_deref().unwrap_or("-"),
        )
    }
}

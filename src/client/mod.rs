//! HTTP transport for the CRM operations API.
//!
//! One [`CrmClient`] executes one operation call per [`CrmClient::execute`]:
//! it serializes the payload, builds the `/v3/operations/{mode}` request,
//! sends it under a single timeout bound and classifies the outcome.

pub mod error;
pub mod registry;
pub mod response;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::{ClientError, ErrorDetail, ErrorKind, ValidationMessage};
pub use registry::ClientRegistry;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Sync,
    Async,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Sync => "sync",
            Mode::Async => "async",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown mode: {0}")]
pub struct UnknownMode(String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(Mode::Sync),
            "async" => Ok(Mode::Async),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = UnknownMode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Operation payload: a structured value, or JSON text that is passed through
/// verbatim once it has been checked to parse.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Raw(String),
}

impl Payload {
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, ClientError> {
        serde_json::to_value(value)
            .map(Payload::Json)
            .map_err(|e| ClientError::encoding(format!("failed to encode data to JSON: {e}")))
    }

    /// The request body. Structured values keep Unicode and slashes unescaped.
    pub fn to_json_text(&self) -> Result<String, ClientError> {
        match self {
            Payload::Json(value) => serde_json::to_string(value)
                .map_err(|e| ClientError::encoding(format!("failed to encode data to JSON: {e}"))),
            Payload::Raw(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(ClientError::encoding("data must be a non-empty JSON string"));
                }
                serde_json::from_str::<serde::de::IgnoredAny>(text).map_err(|e| {
                    ClientError::encoding(format!("data contains invalid JSON: {e}"))
                })?;
                Ok(text.to_string())
            }
        }
    }

    /// Text persisted in a queue row, even when the payload failed validation.
    pub fn stored_text(&self) -> String {
        match self {
            Payload::Json(value) => value.to_string(),
            Payload::Raw(text) => text.clone(),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

/// One logical operation call.
#[derive(Debug, Clone)]
pub struct OperationCall {
    pub mode: Mode,
    pub operation: String,
    pub payload: Payload,
    pub device_id: Option<String>,
    pub authorize: bool,
    pub idempotency_token: Option<String>,
}

impl OperationCall {
    pub fn new(mode: Mode, operation: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            mode,
            operation: operation.into(),
            payload: payload.into(),
            device_id: None,
            authorize: false,
            idempotency_token: None,
        }
    }

    pub fn sync(operation: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self::new(Mode::Sync, operation, payload)
    }

    pub fn asynchronous(operation: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self::new(Mode::Async, operation, payload)
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn authorized(mut self, authorize: bool) -> Self {
        self.authorize = authorize;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.idempotency_token = Some(token.into());
        self
    }
}

/// Connection parameters a client is built from. Also the cache key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ClientSettings {
    pub api_url: String,
    pub endpoint_id: String,
    pub secret_key: Option<String>,
    pub timeout: Duration,
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field("api_url", &self.api_url)
            .field("endpoint_id", &self.endpoint_id)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub struct CrmClient {
    http: reqwest::Client,
    base_url: String,
    endpoint_id: String,
    secret_key: Option<String>,
    timeout: Duration,
}

impl CrmClient {
    /// Validate settings and build a client.
    ///
    /// The scheme defaults to `https://` and trailing slashes are stripped.
    pub fn new(settings: &ClientSettings) -> Result<Self, ClientError> {
        let api_url = settings.api_url.trim();
        let endpoint_id = settings.endpoint_id.trim();

        if api_url.is_empty() {
            return Err(ClientError::config("apiUrl is required"));
        }
        if endpoint_id.is_empty() {
            return Err(ClientError::config("endpointId is required"));
        }
        if settings.timeout.is_zero() {
            return Err(ClientError::config("timeout must be greater than 0"));
        }

        let lower = api_url.to_ascii_lowercase();
        let base_url = if lower.starts_with("http://") || lower.starts_with("https://") {
            api_url.to_string()
        } else {
            format!("https://{api_url}")
        };
        let base_url = base_url.trim_end_matches('/').to_string();

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout)
            .build()
            .map_err(|e| ClientError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            endpoint_id: endpoint_id.to_string(),
            secret_key: settings
                .secret_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
            timeout: settings.timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `{base}/v3/operations/{mode}?endpointId=..&operation=..[&deviceUUID=..][&transactionId=..]`
    /// with every value percent-encoded per RFC 3986.
    pub fn operation_url(
        &self,
        mode: Mode,
        operation: &str,
        device_id: Option<&str>,
        transaction_id: Option<&str>,
    ) -> String {
        let mut query = vec![("endpointId", self.endpoint_id.as_str()), ("operation", operation)];
        if let Some(device_id) = device_id.filter(|d| !d.is_empty()) {
            query.push(("deviceUUID", device_id));
        }
        if let Some(transaction_id) = transaction_id.filter(|t| !t.is_empty()) {
            query.push(("transactionId", transaction_id));
        }

        let query = query
            .into_iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}/v3/operations/{}?{query}", self.base_url, mode)
    }

    /// Execute one call. `Ok(None)` means the remote answered with an empty body.
    pub async fn execute(&self, call: &OperationCall) -> Result<Option<Value>, ClientError> {
        let operation = call.operation.trim();
        if operation.is_empty() {
            return Err(ClientError::config("operation is required"));
        }

        let body = call.payload.to_json_text()?;

        let mut req = self
            .http
            .post(self.operation_url(
                call.mode,
                operation,
                call.device_id.as_deref(),
                call.idempotency_token.as_deref(),
            ))
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .header(ACCEPT, "application/json");

        if call.authorize {
            let key = self.secret_key.as_deref().ok_or_else(|| {
                ClientError::config("secretKey is required for authorized requests")
            })?;
            req = req.header(AUTHORIZATION, format!("SecretKey {key}"));
        }

        let resp = req.body(body).send().await.map_err(transport_error)?;
        let http_status = resp.status().as_u16();
        let text = resp.text().await.map_err(transport_error)?;

        tracing::debug!(
            operation,
            mode = %call.mode,
            http_status,
            "CRM operation answered"
        );

        response::classify(http_status, &text)
    }
}

fn transport_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::transport("request timed out")
    } else {
        ClientError::transport(format!("request failed: {e}"))
    }
}

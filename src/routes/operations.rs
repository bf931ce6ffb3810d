use axum::extract::{Path, Query, State};
use axum::Json;
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::extractor::AdminAuth;
use crate::client::{Mode, OperationCall, Payload};
use crate::error::AppError;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct OperationParams {
    #[serde(rename = "deviceUUID")]
    pub device_uuid: Option<String>,
    #[serde(default)]
    pub authorization: bool,
    #[serde(rename = "transactionId")]
    pub transaction_id: Option<String>,
}

/// Send an operation through the facade: delivered now, or queued for retry.
pub async fn execute(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path((mode, operation)): Path<(String, String)>,
    Query(params): Query<OperationParams>,
    body: String,
) -> Result<Json<Value>, AppError> {
    let mode: Mode = mode
        .parse()
        .map_err(|e| AppError::BadRequest(format!("{e}")))?;

    // Forwarded and stored byte for byte once it is known to parse.
    let payload = if body.trim().is_empty() {
        Payload::Json(json!({}))
    } else {
        serde_json::from_str::<IgnoredAny>(&body)
            .map_err(|e| AppError::BadRequest(format!("Body is not valid JSON: {e}")))?;
        Payload::Raw(body)
    };

    let mut call = OperationCall::new(mode, operation, payload)
        .authorized(params.authorization);
    if let Some(device_id) = params.device_uuid.filter(|d| !d.is_empty()) {
        call = call.with_device_id(device_id);
    }
    if let Some(token) = params.transaction_id {
        call = call.with_token(token);
    }

    let data = state.queue.send_or_queue(call).await?;

    Ok(Json(json!({ "status": "ok", "data": data })))
}

use serde_json::Value;

use super::error::{ClientError, ErrorDetail, ErrorKind, ValidationMessage};

/// Turn a raw HTTP response into decoded data or a classified error.
///
/// Empty bodies are never parsed. A recognized `status` field wins over the
/// HTTP status code in both directions: a 200 carrying `ValidationError` is a
/// validation failure, and a 500 carrying `ValidationError` is too.
pub fn classify(http_status: u16, body: &str) -> Result<Option<Value>, ClientError> {
    let trimmed = body.trim();
    let parsed = if trimmed.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(trimmed))
    };

    if (200..300).contains(&http_status) {
        return match parsed {
            None => Ok(None),
            Some(Err(e)) => Err(ClientError::new(
                ErrorKind::InvalidResponse,
                format!("invalid JSON response: {e} (HTTP {http_status})"),
            )
            .with_detail(ErrorDetail {
                http_status,
                response_body: Some(body.to_string()),
                ..Default::default()
            })),
            Some(Ok(decoded)) => match recognized_kind(&decoded) {
                Some(_) => Err(from_body(http_status, Some(&decoded), body, None)),
                None => Ok(Some(decoded)),
            },
        };
    }

    match parsed {
        Some(Err(e)) => Err(from_body(
            http_status,
            None,
            body,
            Some(format!("invalid JSON error response: {e}")),
        )),
        Some(Ok(decoded)) => Err(from_body(http_status, Some(&decoded), body, None)),
        None => Err(from_body(http_status, None, body, None)),
    }
}

fn recognized_kind(decoded: &Value) -> Option<ErrorKind> {
    decoded
        .get("status")
        .and_then(Value::as_str)
        .and_then(ErrorKind::from_response_status)
}

fn string_field(decoded: Option<&Value>, key: &str) -> Option<String> {
    decoded
        .and_then(|v| v.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn from_body(
    http_status: u16,
    decoded: Option<&Value>,
    body: &str,
    fallback: Option<String>,
) -> ClientError {
    let response_status = string_field(decoded, "status");
    let error_id = string_field(decoded, "errorId");
    let error_message = string_field(decoded, "errorMessage");
    let raw_validation = decoded.and_then(|v| v.get("validationMessages"));
    let validation_messages: Vec<ValidationMessage> = raw_validation
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let kind = response_status
        .as_deref()
        .and_then(ErrorKind::from_response_status)
        .unwrap_or(ErrorKind::Http);

    let mut message = String::from("CRM error");
    if let Some(status) = &response_status {
        message.push_str(&format!(": {status}"));
    }
    if let Some(text) = &error_message {
        message.push_str(&format!(" - {text}"));
    } else if raw_validation.is_some_and(|v| !v.is_null()) {
        message.push_str(" - Validation error");
    } else if let Some(text) = &fallback {
        message.push_str(&format!(" - {text}"));
    }
    if http_status > 0 {
        message.push_str(&format!(" (HTTP {http_status})"));
    }
    if let Some(id) = &error_id {
        message.push_str(&format!(" [errorId {id}]"));
    }

    ClientError::new(kind, message).with_detail(ErrorDetail {
        http_status,
        response_status,
        error_id,
        error_message,
        validation_messages,
        response_body: Some(body.to_string()),
    })
}

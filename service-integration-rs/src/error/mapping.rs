//! Error mapping for downstream HTTP responses
//!
//! Non-2xx responses from integrated services carry a `detail` field that
//! is used as the error message.

use reqwest::StatusCode;
use serde_json::Value;

use super::IntegrationError;
use crate::util::truncate_string;

/// Longest raw body quoted in an error message
const MAX_BODY_IN_MESSAGE: usize = 200;

/// Extract a human readable message from an error response body
pub fn extract_detail(status: StatusCode, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let detail = json
            .get("detail")
            .or_else(|| json.get("message"))
            .or_else(|| json.get("error"));

        match detail {
            Some(Value::String(message)) => return message.clone(),
            Some(Value::Null) | None => {}
            // FastAPI validation errors put a list of objects here
            Some(other) => return other.to_string(),
        }
    }

    if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, truncate_string(body.trim(), MAX_BODY_IN_MESSAGE))
    }
}

/// Map a non-2xx HTTP response to an IntegrationError
pub fn map_http_error(status: StatusCode, body: &str, service: &str) -> IntegrationError {
    let message = extract_detail(status, body);

    match status.as_u16() {
        404 => IntegrationError::not_found(format!("{} (from {})", message, service)),
        408 => IntegrationError::timeout(service, message),
        400..=499 => IntegrationError::Client {
            service: service.to_string(),
            status: status.as_u16(),
            message,
        },
        _ => IntegrationError::connection(service, format!("HTTP {}: {}", status.as_u16(), message)),
    }
}

/// Helper function to classify HTTP errors by category
pub fn classify_http_error(status: StatusCode) -> &'static str {
    match status.as_u16() {
        404 => "not_found",
        408 => "timeout",
        400..=499 => "client",
        500..=599 => "server",
        _ => "unknown",
    }
}

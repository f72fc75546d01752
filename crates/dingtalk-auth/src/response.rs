//! Helpers for reading auth endpoint responses.

use reqwest::header::HeaderMap;
use serde_json::Value;

/// Response header carrying the server's request id.
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Body fields checked for a human-readable detail, in priority order.
/// Nested paths are `/`-separated.
const DETAIL_PATHS: [&str; 5] = [
    "/message",
    "/detail",
    "/detail/message",
    "/detail/errmsg",
    "/errmsg",
];

/// Unwrap a `{ "data": {...} }` envelope.
///
/// Returns `data` when it is an object, the body itself when the body is an
/// object without such an envelope, and `None` for non-object bodies.
pub fn unwrap_payload(body: &Value) -> Option<&Value> {
    if !body.is_object() {
        return None;
    }
    match body.get("data") {
        Some(data) if data.is_object() => Some(data),
        _ => Some(body),
    }
}

/// First non-empty string found under the conventional detail fields.
pub fn extract_detail(body: &Value) -> Option<String> {
    DETAIL_PATHS.iter().find_map(|path| {
        body.pointer(path)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Request id from the response headers. Header names are case-insensitive.
pub fn request_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read a body as JSON, yielding `None` on any read or parse failure.
pub(crate) async fn read_json_lenient(response: reqwest::Response) -> Option<Value> {
    let bytes = response.bytes().await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Interpret a JSON value as a non-empty string. Numbers are accepted and
/// rendered in decimal.
pub(crate) fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Interpret a JSON value as an unsigned integer, accepting numeric strings.
pub(crate) fn coerce_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

//! JSON-RPC 2.0 framing: newline-delimited UTF-8 JSON on stdin/stdout,
//! stderr is log only.
//!
//! Three inbound shapes collapse to one (`Request`, discriminated by
//! whether `id` is present downstream, not here — a request's `id` may be
//! `null` per JSON-RPC 2.0). Two outbound shapes: `Response` (carries an
//! `id`, either `result` or `error`) and `Notification` (no `id`).

use std::io::{self, Write};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dictate_core::DictateError;

/// One line of input/output must not exceed this many bytes. A longer line
/// is a fatal protocol error (§4.1).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

pub const ERROR_PARSE_ERROR: i64 = -32700;
pub const ERROR_INVALID_REQUEST: i64 = -32600;
pub const ERROR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERROR_INVALID_PARAMS: i64 = -32602;
pub const ERROR_INTERNAL: i64 = -32603;

/// Application-specific range is `-32099..-32000` per §4.1. The reference
/// sidecar only ever allocated the first nine of these; every other
/// `DictateError::kind()` gets a code assigned here in declaration order so
/// the full taxonomy has a stable numeric home. The `data.kind` string is
/// the contract host implementations key off; the number is advisory.
fn app_error_code(kind: &str) -> i64 {
    match kind {
        "E_NOT_READY" => -32001,
        "E_MIC_PERMISSION" => -32002,
        "E_DEVICE_NOT_FOUND" => -32003,
        "E_AUDIO_IO" => -32004,
        "E_NETWORK" => -32005,
        "E_DISK_FULL" => -32006,
        "E_CACHE_CORRUPT" => -32007,
        "E_MODEL_LOAD" => -32008,
        "E_TRANSCRIBE" => -32009,
        "E_INVALID_SESSION" => -32010,
        "E_ALREADY_RECORDING" => -32011,
        "E_MODEL_IN_USE" => -32012,
        "E_CANCELED" => -32013,
        "E_UNSUPPORTED_FAMILY" => -32014,
        "E_LANGUAGE_UNSUPPORTED" => -32015,
        "E_DEVICE_UNAVAILABLE" => -32016,
        "E_LOCK" => -32017,
        "E_ALREADY_RUNNING" => -32018,
        _ => -32000,
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub id: Option<Value>,
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct Response {
    jsonrpc: &'static str,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct Notification {
    jsonrpc: &'static str,
    method: String,
    params: Value,
}

pub fn make_success(id: Option<Value>, result: Value) -> Response {
    Response {
        jsonrpc: "2.0",
        id,
        result: Some(result),
        error: None,
    }
}

pub fn make_error(id: Option<Value>, code: i64, message: String, kind: &str) -> Response {
    make_error_with_data(id, code, message, kind, Value::Null)
}

pub fn make_error_with_data(
    id: Option<Value>,
    code: i64,
    message: String,
    kind: &str,
    mut data: Value,
) -> Response {
    if data.is_null() {
        data = serde_json::json!({});
    }
    data["kind"] = Value::String(kind.to_string());
    Response {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(ErrorBody {
            code,
            message,
            data,
        }),
    }
}

/// Maps an engine error onto a wire response keyed to `id`.
pub fn error_response(id: Option<Value>, err: &DictateError) -> Response {
    let kind = err.kind();
    make_error(id, app_error_code(kind), err.to_string(), kind)
}

pub fn notification(method: &str, params: Value) -> Notification {
    Notification {
        jsonrpc: "2.0",
        method: method.to_string(),
        params,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("JSON syntax error: {0}")]
    ParseError(String),
    #[error("invalid JSON-RPC request: {0}")]
    InvalidRequest(String),
}

/// Parses one line of input. Empty/whitespace-only lines return `Ok(None)`
/// and are silently skipped (not an error).
pub fn parse_line(line: &str) -> Result<Option<Request>, FrameError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| FrameError::ParseError(e.to_string()))?;

    let Value::Object(mut map) = value else {
        return Err(FrameError::InvalidRequest(
            "request must be a JSON object".to_string(),
        ));
    };

    match map.get("jsonrpc") {
        Some(Value::String(v)) if v == "2.0" => {}
        _ => {
            return Err(FrameError::InvalidRequest(
                "missing or invalid \"jsonrpc\" field".to_string(),
            ))
        }
    }

    let method = match map.remove("method") {
        Some(Value::String(m)) => m,
        _ => {
            return Err(FrameError::InvalidRequest(
                "missing or invalid \"method\" field".to_string(),
            ))
        }
    };

    let id = map.remove("id");
    let params = map.remove("params").unwrap_or(Value::Null);

    Ok(Some(Request { method, id, params }))
}

/// Serializes stdout writes through one mutex so a long-running notification
/// and a response can never interleave mid-line (§9 design note: build the
/// full message, then one `write_all` + flush under the lock).
pub struct OutputSink {
    stdout: Mutex<io::Stdout>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(io::stdout()),
        }
    }

    fn write_line(&self, line: String) {
        let mut guard = self.stdout.lock();
        let _ = guard.write_all(line.as_bytes());
        let _ = guard.write_all(b"\n");
        let _ = guard.flush();
    }

    pub fn write_response(&self, response: &Response) {
        match serde_json::to_string(response) {
            Ok(line) => self.write_line(line),
            Err(e) => log(&format!("failed to serialize response: {e}")),
        }
    }

    pub fn write_notification(&self, notification: &Notification) {
        match serde_json::to_string(notification) {
            Ok(line) => self.write_line(line),
            Err(e) => log(&format!("failed to serialize notification: {e}")),
        }
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::new()
    }
}

/// stderr-only diagnostic log. Never called with request `params` or
/// transcribed text (§7 privacy policy).
pub fn log(message: &str) {
    eprintln!("[dictate-sidecar] {message}");
    let _ = io::stderr().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_line_is_skipped() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   \n").unwrap().is_none());
    }

    #[test]
    fn parses_well_formed_request() {
        let req = parse_line(r#"{"jsonrpc":"2.0","id":1,"method":"system.ping","params":{}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(req.method, "system.ping");
        assert_eq!(req.id, Some(Value::from(1)));
    }

    #[test]
    fn missing_jsonrpc_is_invalid() {
        let err = parse_line(r#"{"id":1,"method":"system.ping"}"#).unwrap_err();
        assert!(matches!(err, FrameError::InvalidRequest(_)));
    }

    #[test]
    fn missing_method_is_invalid() {
        let err = parse_line(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert!(matches!(err, FrameError::InvalidRequest(_)));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = parse_line("{not json").unwrap_err();
        assert!(matches!(err, FrameError::ParseError(_)));
    }

    #[test]
    fn null_id_round_trips() {
        let req = parse_line(r#"{"jsonrpc":"2.0","id":null,"method":"system.ping"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(req.id, Some(Value::Null));
    }

    #[test]
    fn app_error_codes_are_stable_and_distinct() {
        let kinds = [
            "E_NOT_READY",
            "E_MIC_PERMISSION",
            "E_DEVICE_NOT_FOUND",
            "E_AUDIO_IO",
            "E_NETWORK",
            "E_DISK_FULL",
            "E_CACHE_CORRUPT",
            "E_MODEL_LOAD",
            "E_TRANSCRIBE",
            "E_INVALID_SESSION",
            "E_ALREADY_RECORDING",
            "E_MODEL_IN_USE",
            "E_CANCELED",
            "E_UNSUPPORTED_FAMILY",
            "E_LANGUAGE_UNSUPPORTED",
            "E_DEVICE_UNAVAILABLE",
            "E_LOCK",
            "E_ALREADY_RUNNING",
        ];
        let mut codes: Vec<i64> = kinds.iter().map(|k| app_error_code(k)).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(codes.iter().all(|c| (-32099..=-32000).contains(c)));
    }
}

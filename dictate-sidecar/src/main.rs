//! Sidecar entry point: reads newline-delimited JSON-RPC requests from
//! stdin, dispatches them, and writes responses/notifications to stdout.
//! One request is fully handled before the next is read (§5 scheduling
//! model) — long operations (`asr.initialize`, `model.download`) block
//! this loop by design; recording and transcription run on their own
//! threads so they don't.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use dictate_core::cache::default_cache_root;
use dictate_sidecar::protocol::{self, FrameError, MAX_LINE_LENGTH};
use dictate_sidecar::state::SidecarState;
use dictate_sidecar::dispatch;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let output = Arc::new(protocol::OutputSink::new());
    let cache_root = default_cache_root();
    if let Err(e) = std::fs::create_dir_all(&cache_root) {
        protocol::log(&format!("failed to create cache root {}: {e}", cache_root.display()));
    }
    let state = Arc::new(SidecarState::new(cache_root, Arc::clone(&output)));

    protocol::log(&format!(
        "sidecar starting (version {}, protocol {})",
        dispatch::VERSION,
        dispatch::PROTOCOL_VERSION
    ));

    let stdin = io::stdin();
    let mut shutdown_requested = false;

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                protocol::log(&format!("stdin read error: {e}, shutting down"));
                break;
            }
        };

        if line.len() > MAX_LINE_LENGTH {
            protocol::log(&format!(
                "line exceeds maximum length ({} > {MAX_LINE_LENGTH}), fatal",
                line.len()
            ));
            return ExitCode::FAILURE;
        }

        let request = match protocol::parse_line(&line) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(FrameError::ParseError(msg)) => {
                protocol::log(&format!("parse error: {msg}"));
                output.write_response(&protocol::make_error_with_data(
                    None,
                    protocol::ERROR_PARSE_ERROR,
                    msg,
                    "E_INTERNAL",
                    serde_json::json!({"reason": "JSON syntax error"}),
                ));
                continue;
            }
            Err(FrameError::InvalidRequest(msg)) => {
                protocol::log(&format!("invalid request: {msg}"));
                output.write_response(&protocol::make_error_with_data(
                    None,
                    protocol::ERROR_INVALID_REQUEST,
                    msg,
                    "E_INVALID_PARAMS",
                    serde_json::json!({"reason": "invalid JSON-RPC structure"}),
                ));
                continue;
            }
        };

        let (response, shutdown) = dispatch::dispatch(&state, request);
        output.write_response(&response);
        if shutdown {
            shutdown_requested = true;
            protocol::log("shutdown complete");
            break;
        }
    }

    if !shutdown_requested {
        protocol::log("EOF received, shutting down");
    }
    protocol::log("server exiting");
    let _ = io::stdout().flush();
    ExitCode::SUCCESS
}

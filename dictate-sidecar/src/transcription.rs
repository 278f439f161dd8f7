//! Notification pipeline (C11): the detached per-session worker that turns
//! raw captured audio into a terminal `event.transcription_complete` or
//! `event.transcription_error`, gated by the session tracker so each
//! session emits at most once (I1/I2, P1).

use std::sync::Arc;

use serde_json::json;

use dictate_core::audio::preprocess::{preprocess, PreprocessOptions};
use dictate_core::text;

use crate::state::SidecarState;

/// Spawns the worker on its own OS thread. The ASR backends do blocking
/// CPU/ONNX work, matching the "transcription runs on a detached worker
/// task per session" model in §5.
pub fn spawn(
    state: Arc<SidecarState>,
    session_id: String,
    raw_audio: Vec<f32>,
    capture_rate: u32,
    channels: u16,
    options: PreprocessOptions,
) {
    std::thread::Builder::new()
        .name(format!("dictate-transcribe-{session_id}"))
        .spawn(move || run(&state, &session_id, &raw_audio, capture_rate, channels, options))
        .ok();
}

fn run(
    state: &Arc<SidecarState>,
    session_id: &str,
    raw_audio: &[f32],
    capture_rate: u32,
    channels: u16,
    options: PreprocessOptions,
) {
    let outcome = transcribe_one(state, raw_audio, capture_rate, channels, options);

    if !state.tracker.should_emit(session_id) {
        // Cancelled, or (shouldn't happen) already delivered.
        return;
    }

    match outcome {
        Ok((text, language, confidence, duration_ms)) => {
            if state.tracker.mark_completed(session_id) {
                emit_complete(state, session_id, &text, duration_ms, language, confidence);
            }
        }
        Err(err) => {
            if state.tracker.mark_error(session_id) {
                emit_error(state, session_id, err.kind(), &err.to_string());
            }
        }
    }
}

type Transcribed = (String, Option<String>, Option<f32>, u64);

fn transcribe_one(
    state: &Arc<SidecarState>,
    raw_audio: &[f32],
    capture_rate: u32,
    channels: u16,
    options: PreprocessOptions,
) -> dictate_core::Result<Transcribed> {
    let samples = preprocess(raw_audio, capture_rate, channels, options)?;

    if samples.is_empty() {
        // §4.6: an empty trimmed signal still satisfies I1 with empty text.
        return Ok((String::new(), None, None, 0));
    }

    let result = state.asr.transcribe(&samples, 16_000)?;

    let rules = state.rules.lock().clone();
    let processed = text::process(&result.text, &rules)?;

    Ok((
        processed.text,
        result.language,
        result.confidence,
        result.duration_ms,
    ))
}

fn emit_complete(
    state: &Arc<SidecarState>,
    session_id: &str,
    text: &str,
    duration_ms: u64,
    language: Option<String>,
    confidence: Option<f32>,
) {
    let params = json!({
        "session_id": session_id,
        "text": text,
        "duration_ms": duration_ms,
        "confidence": confidence,
        "language": language,
        "final_text": text,
    });
    state
        .output
        .write_notification(&crate::protocol::notification(
            "event.transcription_complete",
            params,
        ));
}

fn emit_error(state: &Arc<SidecarState>, session_id: &str, kind: &str, message: &str) {
    let params = json!({
        "session_id": session_id,
        "kind": kind,
        "message": message,
    });
    state
        .output
        .write_notification(&crate::protocol::notification(
            "event.transcription_error",
            params,
        ));
}

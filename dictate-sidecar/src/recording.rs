//! Recording pipeline (C7 + C11): `recording.start` / `recording.stop` /
//! `recording.cancel`, plus the optional trailing-silence auto-stop watcher.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use dictate_core::audio::device::{default_device, find_device_by_uid};
use dictate_core::audio::preprocess::PreprocessOptions;
use dictate_core::audio::CaptureHandle;
use dictate_core::buffering::AudioChunk;
use dictate_core::buffering::SessionRingBuffer;
use dictate_core::vad::{AutoStopDetector, VadBackendKind, VadConfig};
use dictate_core::{DictateError, Result};

use crate::state::{ActiveRecording, SidecarState};
use crate::transcription;

const DEFAULT_MAX_DURATION_SECS: u32 = 120;
const VAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize, Default)]
pub struct VadParams {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub silence_ms: Option<u32>,
    #[serde(default)]
    pub min_speech_ms: Option<u32>,
    #[serde(default)]
    pub energy_threshold: Option<f32>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub aggressiveness: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StartParams {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub device_uid: Option<String>,
    #[serde(default)]
    pub vad: Option<VadParams>,
    #[serde(default)]
    pub language: Option<String>,
}

fn parse_backend(s: &str) -> VadBackendKind {
    match s {
        "energy" => VadBackendKind::Energy,
        "webrtcvad" => VadBackendKind::Webrtcvad,
        "silero" => VadBackendKind::Silero,
        _ => VadBackendKind::Auto,
    }
}

pub fn start(state: &Arc<SidecarState>, params: Value) -> Result<Value> {
    let params: StartParams = serde_json::from_value(params)
        .map_err(|e| DictateError::Other(anyhow::anyhow!("invalid params: {e}")))?;

    if state.recording.lock().is_some() {
        return Err(DictateError::AlreadyRecording);
    }

    let device = match &params.device_uid {
        Some(uid) => find_device_by_uid(uid).ok_or_else(|| DictateError::DeviceNotFound {
            uid: uid.clone(),
        })?,
        None => default_device().ok_or(DictateError::MicPermission)?,
    };

    let session_id = params
        .session_id
        .clone()
        .unwrap_or_else(|| state.generate_session_id());

    let ring = Arc::new(SessionRingBuffer::new(
        device.default_sample_rate,
        device.channels,
        DEFAULT_MAX_DURATION_SECS,
    ));

    let capture = CaptureHandle::spawn(Some(device.uid.clone()), Arc::clone(&ring))?;

    // Re-lock after spawn succeeds: a concurrent start between the idle
    // check above and here is impossible because the dispatcher is
    // single-threaded cooperative (§5) — this call runs to completion
    // before the next request is read.
    *state.recording.lock() = Some(ActiveRecording {
        session_id: session_id.clone(),
        ring: Arc::clone(&ring),
        capture,
    });

    state.output.write_notification(&dictate_sidecar_event(
        "event.status_changed",
        json!({"state": "recording", "session_id": session_id}),
    ));

    spawn_level_reporter(Arc::clone(state), session_id.clone(), Arc::clone(&ring));

    if let Some(vad) = params.vad.filter(|v| v.enabled) {
        spawn_vad_watcher(Arc::clone(state), session_id.clone(), ring, vad);
    }

    Ok(json!({ "session_id": session_id }))
}

#[derive(Debug, Deserialize)]
pub struct SessionIdParams {
    pub session_id: String,
}

pub fn stop(state: &Arc<SidecarState>, params: Value) -> Result<Value> {
    let params: SessionIdParams = serde_json::from_value(params)
        .map_err(|e| DictateError::Other(anyhow::anyhow!("invalid params: {e}")))?;
    finish(state, &params.session_id, FinishReason::Stopped)
}

enum FinishReason {
    Stopped,
    AutoStopped,
}

/// Shared tail end of `recording.stop` and the VAD auto-stop watcher: take
/// the active recording (if it's still the one named), drain it, register
/// the session with the tracker, and spawn the transcription task.
fn finish(state: &Arc<SidecarState>, session_id: &str, reason: FinishReason) -> Result<Value> {
    let mut guard = state.recording.lock();
    let active = match guard.as_ref() {
        None => return Err(DictateError::NotRecording),
        Some(active) if active.session_id != session_id => {
            return Err(DictateError::InvalidSession)
        }
        Some(_) => guard.take().unwrap(),
    };
    drop(guard);

    let snapshot = active.ring.drain_snapshot();
    let sample_rate = active.capture.sample_rate;
    let channels = active.capture.channels;
    active.capture.stop();

    let audio_duration_ms = if sample_rate > 0 {
        (snapshot.len() as u64 * 1000) / (sample_rate as u64 * channels.max(1) as u64)
    } else {
        0
    };

    // Registered before the response is written so a cancel the host sends
    // immediately after cannot race an unregistered session id.
    state.tracker.register(session_id);

    transcription::spawn(
        Arc::clone(state),
        session_id.to_string(),
        snapshot,
        sample_rate,
        channels,
        PreprocessOptions::default(),
    );

    if matches!(reason, FinishReason::AutoStopped) {
        state.output.write_notification(&dictate_sidecar_event(
            "event.status_changed",
            json!({"state": "transcribing", "session_id": session_id}),
        ));
    }

    Ok(json!({
        "session_id": session_id,
        "audio_duration_ms": audio_duration_ms,
        "sample_rate": sample_rate,
        "channels": channels,
    }))
}

pub fn cancel(state: &Arc<SidecarState>, params: Value) -> Result<Value> {
    let params: SessionIdParams = serde_json::from_value(params)
        .map_err(|e| DictateError::Other(anyhow::anyhow!("invalid params: {e}")))?;

    let mut guard = state.recording.lock();
    let active = match guard.as_ref() {
        None => return Err(DictateError::NotRecording),
        Some(active) if active.session_id != params.session_id => {
            return Err(DictateError::InvalidSession)
        }
        Some(_) => guard.take().unwrap(),
    };
    drop(guard);

    active.capture.stop();
    // Buffered audio is dropped along with `active`; no transcription task
    // is ever spawned for a cancelled session.
    state.tracker.mark_cancelled(&params.session_id);

    state.output.write_notification(&dictate_sidecar_event(
        "event.status_changed",
        json!({"state": "idle", "session_id": params.session_id}),
    ));

    Ok(json!({ "cancelled": true, "session_id": params.session_id }))
}

fn spawn_vad_watcher(
    state: Arc<SidecarState>,
    session_id: String,
    ring: Arc<SessionRingBuffer>,
    params: VadParams,
) {
    let config = VadConfig::new(
        16_000,
        params.silence_ms.unwrap_or(1500),
        params.min_speech_ms.unwrap_or(250),
        params.energy_threshold.unwrap_or(0.02),
        params
            .backend
            .as_deref()
            .map(parse_backend)
            .unwrap_or_default(),
        params.aggressiveness.unwrap_or(1),
    );
    let window_samples = (ring.sample_rate as usize * ring.channels.max(1) as usize
        * VAD_POLL_INTERVAL.as_millis() as usize)
        / 1000;
    let channels = ring.channels;
    let sample_rate = ring.sample_rate;

    std::thread::Builder::new()
        .name("dictate-vad-watch".into())
        .spawn(move || {
            let mut detector = AutoStopDetector::with_backend(config, None);
            loop {
                std::thread::sleep(VAD_POLL_INTERVAL);

                // The watched session is no longer the active recording —
                // it was stopped or cancelled through the normal path.
                if state
                    .recording
                    .lock()
                    .as_ref()
                    .map(|a| a.session_id != session_id)
                    .unwrap_or(true)
                {
                    return;
                }

                let raw = ring.peek_recent(window_samples);
                if raw.is_empty() {
                    continue;
                }
                let mono = dictate_core::audio::preprocess::downmix_mono(&raw, channels);
                let chunk = AudioChunk::new(mono, sample_rate);
                if detector.feed_audio(&chunk) == dictate_core::vad::VadState::AutoStop {
                    let _ = finish(&state, &session_id, FinishReason::AutoStopped);
                    return;
                }
            }
        })
        .ok();
}

const LEVEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Emits `event.audio_level{source:"recording"}` for the duration of the
/// active recording (§4.5 — the recorder reports its own level; the
/// standalone meter must not overlap it on the same device).
fn spawn_level_reporter(state: Arc<SidecarState>, session_id: String, ring: Arc<SessionRingBuffer>) {
    let window_samples = (ring.sample_rate as usize
        * ring.channels.max(1) as usize
        * LEVEL_POLL_INTERVAL.as_millis() as usize)
        / 1000;

    std::thread::Builder::new()
        .name("dictate-level-report".into())
        .spawn(move || loop {
            std::thread::sleep(LEVEL_POLL_INTERVAL);

            if state
                .recording
                .lock()
                .as_ref()
                .map(|a| a.session_id != session_id)
                .unwrap_or(true)
            {
                return;
            }

            let raw = ring.peek_recent(window_samples);
            if raw.is_empty() {
                continue;
            }
            let (rms, peak) = dictate_core::audio::level(&raw);
            state.output.write_notification(&dictate_sidecar_event(
                "event.audio_level",
                json!({"rms": rms, "peak": peak, "source": "recording", "session_id": session_id}),
            ));
        })
        .ok();
}

fn dictate_sidecar_event(method: &str, params: Value) -> crate::protocol::Notification {
    crate::protocol::notification(method, params)
}

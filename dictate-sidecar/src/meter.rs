//! Standalone audio meter (C7, §4.5): a lightweight capture stream that
//! emits `event.audio_level{source:"meter"}` on a timer, independent of the
//! recorder. At most one runs; it must not share a device with an active
//! recording.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use dictate_core::audio::device::{default_device, find_device_by_uid};
use dictate_core::audio::CaptureHandle;
use dictate_core::buffering::SessionRingBuffer;
use dictate_core::{DictateError, Result};

use crate::state::{ActiveMeter, SidecarState};

const DEFAULT_MAX_DURATION_SECS: u32 = 10;

#[derive(Debug, Deserialize, Default)]
pub struct MeterStartParams {
    #[serde(default)]
    pub device_uid: Option<String>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

pub fn start(state: &Arc<SidecarState>, params: Value) -> Result<Value> {
    let params: MeterStartParams = serde_json::from_value(params)
        .map_err(|e| DictateError::Other(anyhow::anyhow!("invalid params: {e}")))?;

    if state.meter.lock().is_some() {
        return Err(DictateError::AlreadyRunning);
    }

    let device = match &params.device_uid {
        Some(uid) => find_device_by_uid(uid).ok_or_else(|| DictateError::DeviceNotFound {
            uid: uid.clone(),
        })?,
        None => default_device().ok_or(DictateError::MicPermission)?,
    };

    if state
        .recording
        .lock()
        .as_ref()
        .map(|r| r.capture.device.uid == device.uid)
        .unwrap_or(false)
    {
        return Err(DictateError::AlreadyRunning);
    }

    let interval_ms = params.interval_ms.unwrap_or(80).clamp(20, 500);

    let ring = Arc::new(SessionRingBuffer::new(
        device.default_sample_rate,
        device.channels,
        DEFAULT_MAX_DURATION_SECS,
    ));
    let capture = CaptureHandle::spawn(Some(device.uid.clone()), Arc::clone(&ring))?;

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    *state.meter.lock() = Some(ActiveMeter {
        interval_ms,
        capture,
        stop: Arc::clone(&stop),
    });

    spawn_reporter(Arc::clone(state), ring, interval_ms, stop);

    Ok(json!({ "running": true, "interval_ms": interval_ms }))
}

pub fn stop(state: &Arc<SidecarState>) -> Result<Value> {
    let active = state.meter.lock().take();
    match active {
        Some(active) => {
            active.stop.store(true, std::sync::atomic::Ordering::Release);
            active.capture.stop();
            Ok(json!({ "running": false }))
        }
        None => Ok(json!({ "running": false })),
    }
}

pub fn status(state: &Arc<SidecarState>) -> Value {
    let guard = state.meter.lock();
    match guard.as_ref() {
        Some(active) => json!({ "running": true, "interval_ms": active.interval_ms }),
        None => json!({ "running": false }),
    }
}

fn spawn_reporter(
    state: Arc<SidecarState>,
    ring: Arc<SessionRingBuffer>,
    interval_ms: u64,
    stop: Arc<std::sync::atomic::AtomicBool>,
) {
    let interval = Duration::from_millis(interval_ms);
    let window_samples =
        (ring.sample_rate as usize * ring.channels.max(1) as usize * interval_ms as usize) / 1000;

    std::thread::Builder::new()
        .name("dictate-meter-report".into())
        .spawn(move || loop {
            std::thread::sleep(interval);
            if stop.load(std::sync::atomic::Ordering::Acquire) {
                return;
            }
            let raw = ring.peek_recent(window_samples);
            if raw.is_empty() {
                continue;
            }
            let (rms, peak) = dictate_core::audio::level(&raw);
            state
                .output
                .write_notification(&crate::protocol::notification(
                    "event.audio_level",
                    json!({"rms": rms, "peak": peak, "source": "meter"}),
                ));
        })
        .ok();
}

//! Process-wide sidecar state: everything a handler needs by reference.
//!
//! Per §9's "replace singletons with explicit owned state" design note,
//! there is exactly one `SidecarState`, built once in `main` and handed to
//! every handler by reference — no mutable globals.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use dictate_core::audio::device::AudioDevice;
use dictate_core::buffering::SessionRingBuffer;
use dictate_core::text::ReplacementRule;
use dictate_core::{AsrEngine, SessionTracker};

/// Device the dispatcher last selected via `audio.set_device`. A
/// single-valued cell; only the dispatcher ever writes it (§5).
pub struct DeviceCell {
    inner: Mutex<Option<AudioDevice>>,
}

impl DeviceCell {
    fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Option<AudioDevice> {
        self.inner.lock().clone()
    }

    pub fn set(&self, device: AudioDevice) {
        *self.inner.lock() = Some(device);
    }
}

/// The one recording session allowed to be active at a time.
pub struct ActiveRecording {
    pub session_id: String,
    pub ring: Arc<SessionRingBuffer>,
    pub capture: dictate_core::audio::CaptureHandle,
}

/// The one audio meter allowed to run at a time (independent of recording).
pub struct ActiveMeter {
    pub interval_ms: u64,
    pub capture: dictate_core::audio::CaptureHandle,
    pub stop: Arc<std::sync::atomic::AtomicBool>,
}

pub struct SidecarState {
    pub cache_root: PathBuf,
    pub asr: AsrEngine,
    pub tracker: SessionTracker,
    pub device: DeviceCell,
    pub recording: Mutex<Option<ActiveRecording>>,
    pub meter: Mutex<Option<ActiveMeter>>,
    pub rules: Mutex<Vec<ReplacementRule>>,
    pub output: Arc<crate::protocol::OutputSink>,
    session_counter: AtomicU64,
}

impl SidecarState {
    pub fn new(cache_root: PathBuf, output: Arc<crate::protocol::OutputSink>) -> Self {
        Self {
            cache_root,
            asr: AsrEngine::new(),
            tracker: SessionTracker::default(),
            device: DeviceCell::new(),
            recording: Mutex::new(None),
            meter: Mutex::new(None),
            rules: Mutex::new(Vec::new()),
            output,
            session_counter: AtomicU64::new(0),
        }
    }

    /// Whether a recording is currently active, and if so its session id —
    /// used both by `status.get` and to reject a second `recording.start`
    /// with `E_ALREADY_RECORDING` (scenario 3).
    pub fn active_recording_session(&self) -> Option<String> {
        self.recording
            .lock()
            .as_ref()
            .map(|r| r.session_id.clone())
    }

    /// Generates a session id when the caller didn't supply one. Not a
    /// cryptographic UUID — just unique within this process's lifetime,
    /// which is all the tracker requires.
    pub fn generate_session_id(&self) -> String {
        let seq = self.session_counter.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let mut hasher = Sha256::new();
        hasher.update(format!("{nanos}-{seq}-{}", std::process::id()));
        let digest = hasher.finalize();
        hex_prefix(&digest, 16)
    }
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        if out.len() >= chars {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(chars);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let output = Arc::new(crate::protocol::OutputSink::new());
        let state = SidecarState::new(PathBuf::from("/tmp/dictate-test-cache"), output);
        let a = state.generate_session_id();
        let b = state.generate_session_id();
        assert_ne!(a, b);
    }
}

//! ASR engine (C9): a process-wide, family-dispatched backend behind an
//! idempotent `initialize()`.
//!
//! Mirrors the fast-path-then-locked-double-check shape used throughout this
//! crate for "expensive to (re)do, cheap to confirm already done" state:
//! check under the state mutex with no I/O; if it doesn't already satisfy
//! the request, serialize through `init_lock` and check again before paying
//! for a model load or download.

pub mod parakeet;
pub mod whisper;

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::{self, DownloadProgress, ModelManifest};
use crate::error::{DictateError, Result};
use crate::resources::{self, MODEL_MANIFESTS_DIR_REL};

/// Model family a manifest declares; selects which backend handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsrFamily {
    Parakeet,
    Whisper,
}

impl AsrFamily {
    pub fn known_families() -> &'static str {
        "parakeet, whisper"
    }

    fn from_manifest_str(family: &str) -> Result<Self> {
        match family {
            "parakeet" => Ok(AsrFamily::Parakeet),
            "whisper" => Ok(AsrFamily::Whisper),
            other => Err(DictateError::UnsupportedFamily {
                family: other.to_string(),
                known: Self::known_families().to_string(),
            }),
        }
    }
}

/// Device preference as requested over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePref {
    Auto,
    Cuda,
    Cpu,
}

impl DevicePref {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(DevicePref::Auto),
            "cuda" => Ok(DevicePref::Cuda),
            "cpu" => Ok(DevicePref::Cpu),
            other => Err(DictateError::DeviceUnavailable {
                requested: other.to_string(),
            }),
        }
    }
}

/// This build only links the CPU execution provider — the workspace's `ort`
/// dependency doesn't enable a CUDA feature, so there is no EP to select
/// even when hardware is present. `cuda` therefore always resolves to
/// `E_DEVICE_UNAVAILABLE` and `auto` always resolves to `cpu`.
fn cuda_available() -> bool {
    false
}

pub fn select_device(pref: DevicePref) -> Result<String> {
    match pref {
        DevicePref::Cpu => Ok("cpu".to_string()),
        DevicePref::Cuda => {
            if cuda_available() {
                Ok("cuda".to_string())
            } else {
                Err(DictateError::DeviceUnavailable {
                    requested: "cuda".to_string(),
                })
            }
        }
        DevicePref::Auto => Ok(if cuda_available() { "cuda" } else { "cpu" }.to_string()),
    }
}

/// Validates a forced language code. `None` or `"auto"` means auto-detect
/// and normalizes to `None`. Anything else must be a 2-letter ISO 639-1 code.
pub fn validate_language(language: Option<&str>) -> Result<Option<String>> {
    match language {
        None => Ok(None),
        Some(l) if l.eq_ignore_ascii_case("auto") => Ok(None),
        Some(l) => {
            let code = l.trim().to_ascii_lowercase();
            if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
                Ok(Some(code))
            } else {
                Err(DictateError::LanguageUnsupported(l.to_string()))
            }
        }
    }
}

/// State machine surfaced via `asr.status` / `model.get_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsrState {
    Uninitialized,
    Downloading,
    Loading,
    Ready,
    Error,
}

/// One transcription outcome.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: Option<String>,
    pub confidence: Option<f32>,
    pub duration_ms: u64,
}

/// Progress callback payload during backend `initialize`.
#[derive(Debug, Clone)]
pub struct InitProgress {
    pub state: String,
    pub detail: String,
}

/// The minimum capability set every model family must implement.
pub trait AsrBackend: Send {
    fn initialize(
        &mut self,
        model_path: &Path,
        device: &str,
        on_progress: &mut dyn FnMut(InitProgress),
    ) -> Result<()>;

    fn transcribe(&mut self, audio: &[f32], sample_rate: u32) -> Result<TranscriptionResult>;

    fn set_language(&mut self, language: Option<&str>) -> Result<()>;

    fn is_ready(&self) -> bool;
    fn get_device(&self) -> String;
    fn unload(&mut self);
}

/// Static enum registration in place of a runtime string-keyed dictionary —
/// the family is resolved once from the manifest and dispatch thereafter is
/// a plain match, so an unregistered family can never slip through.
enum Backend {
    Parakeet(parakeet::ParakeetBackend),
    Whisper(whisper::WhisperBackend),
}

impl Backend {
    fn new(family: AsrFamily) -> Self {
        match family {
            AsrFamily::Parakeet => Backend::Parakeet(parakeet::ParakeetBackend::new()),
            AsrFamily::Whisper => Backend::Whisper(whisper::WhisperBackend::new()),
        }
    }
}

impl AsrBackend for Backend {
    fn initialize(
        &mut self,
        model_path: &Path,
        device: &str,
        on_progress: &mut dyn FnMut(InitProgress),
    ) -> Result<()> {
        match self {
            Backend::Parakeet(b) => b.initialize(model_path, device, on_progress),
            Backend::Whisper(b) => b.initialize(model_path, device, on_progress),
        }
    }

    fn transcribe(&mut self, audio: &[f32], sample_rate: u32) -> Result<TranscriptionResult> {
        match self {
            Backend::Parakeet(b) => b.transcribe(audio, sample_rate),
            Backend::Whisper(b) => b.transcribe(audio, sample_rate),
        }
    }

    fn set_language(&mut self, language: Option<&str>) -> Result<()> {
        match self {
            Backend::Parakeet(b) => b.set_language(language),
            Backend::Whisper(b) => b.set_language(language),
        }
    }

    fn is_ready(&self) -> bool {
        match self {
            Backend::Parakeet(b) => b.is_ready(),
            Backend::Whisper(b) => b.is_ready(),
        }
    }

    fn get_device(&self) -> String {
        match self {
            Backend::Parakeet(b) => b.get_device(),
            Backend::Whisper(b) => b.get_device(),
        }
    }

    fn unload(&mut self) {
        match self {
            Backend::Parakeet(b) => b.unload(),
            Backend::Whisper(b) => b.unload(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitResult {
    pub status: &'static str,
    pub model_id: String,
    pub device: String,
}

#[derive(Debug, Clone)]
pub struct AsrStatus {
    pub state: AsrState,
    pub ready: bool,
    pub model_id: Option<String>,
    pub device: Option<String>,
}

/// What the engine is currently initialized against — used for the fast
/// path's identity check.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Identity {
    model_id: String,
    device_pref: String,
    language: Option<String>,
}

struct Inner {
    state: AsrState,
    identity: Option<Identity>,
    device: Option<String>,
    backend: Option<Backend>,
}

/// Process-wide ASR singleton. Owned by `SidecarState` and handed to
/// handlers by reference rather than stashed behind a global.
pub struct AsrEngine {
    inner: Mutex<Inner>,
    init_lock: Mutex<()>,
}

impl Default for AsrEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AsrEngine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: AsrState::Uninitialized,
                identity: None,
                device: None,
                backend: None,
            }),
            init_lock: Mutex::new(()),
        }
    }

    fn matches(inner: &Inner, identity: &Identity) -> bool {
        inner.state == AsrState::Ready && inner.identity.as_ref() == Some(identity)
    }

    /// Idempotent initialize. On the fast path (already ready with this
    /// exact `(model_id, device_pref, language)`) returns in well under a
    /// millisecond and never touches disk or network (satisfies P9).
    pub fn initialize(
        &self,
        cache_root: &Path,
        model_id: &str,
        device_pref: DevicePref,
        language: Option<&str>,
        mut on_progress: impl FnMut(DownloadProgress),
    ) -> Result<InitResult> {
        let device_pref_str = match device_pref {
            DevicePref::Auto => "auto",
            DevicePref::Cuda => "cuda",
            DevicePref::Cpu => "cpu",
        }
        .to_string();
        let language = validate_language(language)?;
        let identity = Identity {
            model_id: model_id.to_string(),
            device_pref: device_pref_str,
            language,
        };

        {
            let inner = self.inner.lock();
            if Self::matches(&inner, &identity) {
                return Ok(InitResult {
                    status: "ready",
                    model_id: identity.model_id,
                    device: inner.device.clone().unwrap_or_default(),
                });
            }
        }

        let _init_guard = self.init_lock.lock();

        {
            let inner = self.inner.lock();
            if Self::matches(&inner, &identity) {
                return Ok(InitResult {
                    status: "ready",
                    model_id: identity.model_id,
                    device: inner.device.clone().unwrap_or_default(),
                });
            }
        }

        let device = select_device(device_pref)?;
        let manifest = load_manifest(model_id)?;
        let family = AsrFamily::from_manifest_str(&manifest.model_family)?;

        self.inner.lock().state = AsrState::Downloading;
        let model_dir = match cache::status_of(cache_root, model_id) {
            cache::ModelStatus::Ready => cache_root.join(model_id),
            _ => cache::install_model(cache_root, &manifest, &mut on_progress)?,
        };

        self.inner.lock().state = AsrState::Loading;
        let mut backend = Backend::new(family);
        let init_result = (|| -> Result<()> {
            backend.set_language(language_ref(&identity.language))?;
            backend.initialize(&model_dir, &device, &mut |_progress| {})
        })();

        if let Err(e) = init_result {
            self.inner.lock().state = AsrState::Error;
            return Err(e);
        }

        let mut inner = self.inner.lock();
        if let Some(mut previous) = inner.backend.take() {
            previous.unload();
        }
        inner.state = AsrState::Ready;
        inner.device = Some(device.clone());
        inner.identity = Some(identity.clone());
        inner.backend = Some(backend);

        Ok(InitResult {
            status: "ready",
            model_id: identity.model_id,
            device,
        })
    }

    pub fn transcribe(&self, audio: &[f32], sample_rate: u32) -> Result<TranscriptionResult> {
        let mut inner = self.inner.lock();
        if inner.state != AsrState::Ready {
            return Err(DictateError::NotReady);
        }
        let backend = inner.backend.as_mut().ok_or(DictateError::NotReady)?;
        backend.transcribe(audio, sample_rate)
    }

    pub fn status(&self) -> AsrStatus {
        let inner = self.inner.lock();
        AsrStatus {
            state: inner.state,
            ready: inner.state == AsrState::Ready,
            model_id: inner.identity.as_ref().map(|i| i.model_id.clone()),
            device: inner.device.clone(),
        }
    }

    pub fn loaded_model_id(&self) -> Option<String> {
        self.inner.lock().identity.as_ref().map(|i| i.model_id.clone())
    }

    pub fn unload(&self) {
        let _init_guard = self.init_lock.lock();
        let mut inner = self.inner.lock();
        if let Some(mut backend) = inner.backend.take() {
            backend.unload();
        }
        inner.state = AsrState::Uninitialized;
        inner.identity = None;
        inner.device = None;
    }
}

fn language_ref(language: &Option<String>) -> Option<&str> {
    language.as_deref()
}

/// Loads the manifest for `model_id` from the shared model-manifests
/// directory. Public so the dispatcher can resolve model families/sizes for
/// `model.get_status` / `model.download` without duplicating the search.
pub fn load_manifest(model_id: &str) -> Result<ModelManifest> {
    let path =
        resources::resolve_shared_path(&format!("{MODEL_MANIFESTS_DIR_REL}/{model_id}.json"))?;
    let bytes = std::fs::read(&path)?;
    let manifest: ModelManifest = serde_json::from_slice(&bytes).map_err(anyhow::Error::from)?;
    Ok(manifest)
}

/// Used by tests and by callers that already have a manifest in hand
/// (e.g. the self-test harness installing a synthetic model).
pub fn resolve_model_dir(cache_root: &Path, model_id: &str) -> PathBuf {
    cache_root.join(model_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_family_lists_known_families() {
        let err = AsrFamily::from_manifest_str("nemo-rnnt").unwrap_err();
        assert_eq!(err.kind(), "E_UNSUPPORTED_FAMILY");
        match err {
            DictateError::UnsupportedFamily { known, .. } => {
                assert!(known.contains("parakeet"));
                assert!(known.contains("whisper"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn device_pref_cuda_is_unavailable_in_this_build() {
        let err = select_device(DevicePref::Cuda).unwrap_err();
        assert_eq!(err.kind(), "E_DEVICE_UNAVAILABLE");
    }

    #[test]
    fn device_pref_auto_resolves_to_cpu() {
        assert_eq!(select_device(DevicePref::Auto).unwrap(), "cpu");
    }

    #[test]
    fn device_pref_cpu_is_always_ok() {
        assert_eq!(select_device(DevicePref::Cpu).unwrap(), "cpu");
    }

    #[test]
    fn language_auto_and_none_both_mean_autodetect() {
        assert_eq!(validate_language(None).unwrap(), None);
        assert_eq!(validate_language(Some("auto")).unwrap(), None);
    }

    #[test]
    fn language_normalizes_case() {
        assert_eq!(validate_language(Some("EN")).unwrap(), Some("en".to_string()));
    }

    #[test]
    fn language_rejects_bad_codes() {
        let err = validate_language(Some("english")).unwrap_err();
        assert_eq!(err.kind(), "E_LANGUAGE_UNSUPPORTED");
    }

    #[test]
    fn fresh_engine_reports_uninitialized() {
        let engine = AsrEngine::new();
        let status = engine.status();
        assert_eq!(status.state, AsrState::Uninitialized);
        assert!(!status.ready);
    }

    #[test]
    fn transcribe_before_init_is_not_ready() {
        let engine = AsrEngine::new();
        let err = engine.transcribe(&[0.0; 160], 16_000).unwrap_err();
        assert_eq!(err.kind(), "E_NOT_READY");
    }
}

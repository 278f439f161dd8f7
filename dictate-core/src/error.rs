//! Error taxonomy shared by every component in the engine.
//!
//! Each variant carries a stable `kind()` string — the machine-readable
//! contract the dispatcher puts in `data.kind` on the wire. The numeric
//! JSON-RPC code is derived from the variant at the dispatcher boundary,
//! not stored here.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DictateError {
    #[error("engine is not ready")]
    NotReady,
    #[error("microphone permission denied")]
    MicPermission,
    #[error("audio device not found: {uid}")]
    DeviceNotFound { uid: String },
    #[error("audio device unavailable: {requested}")]
    DeviceUnavailable { requested: String },
    #[error("audio I/O error: {0}")]
    AudioIo(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    DiskFull { required: u64, available: u64 },
    #[error("model cache entry is corrupt: {0}")]
    CacheCorrupt(String),
    #[error("failed to acquire cache lock within timeout")]
    Lock,
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("model not found: {model_id}")]
    ModelNotFound { model_id: String },
    #[error("model currently in use by the ASR engine")]
    ModelInUse,
    #[error("transcription failed: {0}")]
    Transcribe(String),
    #[error("unknown session id")]
    InvalidSession,
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("no recording in progress")]
    NotRecording,
    #[error("a meter is already running")]
    AlreadyRunning,
    #[error("operation was canceled")]
    Canceled,
    #[error("unsupported model family '{family}'; known families: {known}")]
    UnsupportedFamily { family: String, known: String },
    #[error("unsupported language code '{0}'")]
    LanguageUnsupported(String),
    #[error("resource not found under 'shared/{relative}'; tried: {tried:?}")]
    ResourceNotFound {
        relative: String,
        tried: Vec<PathBuf>,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DictateError {
    /// Stable `data.kind` contract code.
    pub fn kind(&self) -> &'static str {
        match self {
            DictateError::NotReady => "E_NOT_READY",
            DictateError::MicPermission => "E_MIC_PERMISSION",
            DictateError::DeviceNotFound { .. } => "E_DEVICE_NOT_FOUND",
            DictateError::DeviceUnavailable { .. } => "E_DEVICE_UNAVAILABLE",
            DictateError::AudioIo(_) => "E_AUDIO_IO",
            DictateError::Network(_) => "E_NETWORK",
            DictateError::DiskFull { .. } => "E_DISK_FULL",
            DictateError::CacheCorrupt(_) => "E_CACHE_CORRUPT",
            DictateError::Lock => "E_LOCK",
            DictateError::ModelLoad(_) => "E_MODEL_LOAD",
            DictateError::ModelNotFound { .. } => "E_MODEL_LOAD",
            DictateError::ModelInUse => "E_MODEL_IN_USE",
            DictateError::Transcribe(_) => "E_TRANSCRIBE",
            DictateError::InvalidSession => "E_INVALID_SESSION",
            DictateError::AlreadyRecording => "E_ALREADY_RECORDING",
            DictateError::NotRecording => "E_NOT_READY",
            DictateError::AlreadyRunning => "E_ALREADY_RUNNING",
            DictateError::Canceled => "E_CANCELED",
            DictateError::UnsupportedFamily { .. } => "E_UNSUPPORTED_FAMILY",
            DictateError::LanguageUnsupported(_) => "E_LANGUAGE_UNSUPPORTED",
            DictateError::ResourceNotFound { .. } => "E_INTERNAL",
            DictateError::Io(_) => "E_INTERNAL",
            DictateError::Other(_) => "E_INTERNAL",
        }
    }
}

pub type Result<T> = std::result::Result<T, DictateError>;

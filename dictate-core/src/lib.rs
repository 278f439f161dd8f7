//! # dictate-core
//!
//! Engine library backing the dictate-sidecar JSON-RPC process: audio
//! capture, VAD, ASR backends, the model cache, and the text replacement
//! pipeline.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureHandle → SessionRingBuffer → preprocess → AsrEngine
//!                                                                   │
//!                                                          transcript text
//!                                                                   │
//!                                                        text::process (rules)
//! ```
//!
//! The audio callback is zero-alloc; preprocessing and transcription run on
//! a detached worker, never on the real-time capture thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[cfg(feature = "onnx")]
pub mod asr;
pub mod audio;
pub mod buffering;
pub mod cache;
pub mod error;
pub mod resources;
pub mod session;
pub mod text;
pub mod vad;

// Convenience re-exports for downstream crates
pub use error::{DictateError, Result};
pub use session::{SessionState, SessionTracker};

#[cfg(feature = "onnx")]
pub use asr::{AsrBackend, AsrEngine, AsrFamily, AsrState, DevicePref, TranscriptionResult};
#[cfg(feature = "onnx")]
pub use vad::SileroVad;

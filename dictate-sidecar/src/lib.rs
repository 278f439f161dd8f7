//! Library surface for the `dictate-sidecar` binary and its integration
//! tests/self-test harness. `main.rs` is a thin wrapper around [`dispatch`]
//! and [`protocol`]; exposing them here lets `tests/` exercise the
//! dispatcher directly without spawning a child process.

pub mod dispatch;
pub mod meter;
pub mod model;
pub mod protocol;
pub mod recording;
pub mod replacements;
pub mod state;
pub mod transcription;

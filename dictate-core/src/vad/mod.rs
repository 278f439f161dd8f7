//! Voice Activity Detection (VAD) abstraction and auto-stop state machine.
//!
//! The `VoiceActivityDetector` trait is the primary extensibility point:
//! swap in `EnergyVad` (the always-available fallback), `SileroVad` (neural,
//! `onnx` feature), or any future backend without touching the state
//! machine that drives `recording.stop` on trailing silence.

pub mod energy;

#[cfg(feature = "onnx")]
pub mod silero;

#[cfg(feature = "onnx")]
pub use silero::SileroVad;

use crate::buffering::AudioChunk;
use energy::EnergyVad;

/// Whether a given audio frame contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// The frame contains speech energy above threshold.
    Speech,
    /// The frame is silent (or below threshold, including hangover period).
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Trait for all VAD implementations.
///
/// Implementors may be stateful (hangover counters, RNN hidden states, etc.).
pub trait VoiceActivityDetector: Send + 'static {
    /// Analyse a chunk and return a speech/silence decision.
    ///
    /// The chunk's `sample_rate` should match whatever rate this detector
    /// was configured for. Resampling is the caller's responsibility.
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision;

    /// Reset any internal state (e.g. hangover counters, hidden states).
    fn reset(&mut self);
}

/// Which backend a session asked for. `Auto` degrades gracefully: a
/// `webrtcvad`-equivalent crate is not part of this build, so `Auto` tries
/// `Silero` (when the `onnx` feature is compiled and a model is supplied)
/// and otherwise falls back to `Energy`. Requesting `Webrtcvad` explicitly
/// also degrades to `Energy` rather than failing the call, matching the
/// "unsupported ... -> next backend -> energy" fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadBackendKind {
    #[default]
    Auto,
    Energy,
    Webrtcvad,
    Silero,
}

/// VAD tuning, clamped to its valid range on construction so a caller never
/// has to special-case out-of-range input from the wire.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    pub sample_rate: u32,
    pub silence_ms: u32,
    pub min_speech_ms: u32,
    pub energy_threshold: f32,
    pub backend: VadBackendKind,
    pub aggressiveness: u8,
}

impl VadConfig {
    pub fn new(
        sample_rate: u32,
        silence_ms: u32,
        min_speech_ms: u32,
        energy_threshold: f32,
        backend: VadBackendKind,
        aggressiveness: u8,
    ) -> Self {
        Self {
            sample_rate,
            silence_ms: silence_ms.clamp(400, 5000),
            min_speech_ms: min_speech_ms.clamp(100, 2000),
            energy_threshold: energy_threshold.max(0.0),
            backend,
            aggressiveness: aggressiveness.min(3),
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::new(16_000, 1500, 250, 0.02, VadBackendKind::Auto, 1)
    }
}

/// States of the trailing-silence auto-stop detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    WaitingForSpeech,
    Speech,
    Silence,
    AutoStop,
}

/// Drives `VadState` from a sequence of arbitrary-length audio chunks.
/// Sticky once `AutoStop` is reached: `feed_audio` becomes a no-op.
pub struct AutoStopDetector {
    backend: Box<dyn VoiceActivityDetector>,
    config: VadConfig,
    state: VadState,
    speech_ms: u32,
    silence_ms: u32,
}

impl AutoStopDetector {
    pub fn new(backend: Box<dyn VoiceActivityDetector>, config: VadConfig) -> Self {
        Self {
            backend,
            config,
            state: VadState::WaitingForSpeech,
            speech_ms: 0,
            silence_ms: 0,
        }
    }

    /// Builds the configured backend, falling back per the documented chain
    /// when the requested one isn't available in this build.
    ///
    /// `silero_model` is the path to a loaded Silero VAD model, if one is
    /// available; without the `onnx` feature or a model path, any request
    /// for `Silero` (directly or via `Auto`) falls through to `Energy`.
    pub fn with_backend(
        config: VadConfig,
        #[cfg_attr(not(feature = "onnx"), allow(unused_variables))] silero_model: Option<
            &std::path::Path,
        >,
    ) -> Self {
        let backend: Box<dyn VoiceActivityDetector> = match config.backend {
            VadBackendKind::Energy | VadBackendKind::Webrtcvad => {
                Box::new(EnergyVad::from_config(&config))
            }
            #[cfg(feature = "onnx")]
            VadBackendKind::Silero | VadBackendKind::Auto => {
                match silero_model.and_then(|p| silero::SileroVad::new(p, &config).ok()) {
                    Some(vad) => Box::new(vad),
                    None => Box::new(EnergyVad::from_config(&config)),
                }
            }
            #[cfg(not(feature = "onnx"))]
            VadBackendKind::Silero | VadBackendKind::Auto => {
                Box::new(EnergyVad::from_config(&config))
            }
        };
        Self::new(backend, config)
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// Classifies `chunk` and advances the state machine. Returns the
    /// resulting state. No-op once `AutoStop` has been reached (P10).
    pub fn feed_audio(&mut self, chunk: &AudioChunk) -> VadState {
        if self.state == VadState::AutoStop {
            return self.state;
        }

        let chunk_ms = chunk_duration_ms(chunk);
        let decision = self.backend.classify(chunk);

        if decision.is_speech() {
            self.speech_ms = self.speech_ms.saturating_add(chunk_ms);
            self.silence_ms = 0;
            self.state = VadState::Speech;
            return self.state;
        }

        if self.speech_ms < self.config.min_speech_ms {
            // Silence before enough speech has accumulated doesn't count.
            self.state = VadState::WaitingForSpeech;
            return self.state;
        }

        self.silence_ms = self.silence_ms.saturating_add(chunk_ms);
        if self.silence_ms >= self.config.silence_ms {
            self.state = VadState::AutoStop;
        } else {
            self.state = VadState::Silence;
        }
        self.state
    }

    pub fn reset(&mut self) {
        self.backend.reset();
        self.state = VadState::WaitingForSpeech;
        self.speech_ms = 0;
        self.silence_ms = 0;
    }
}

pub(crate) fn chunk_duration_ms(chunk: &AudioChunk) -> u32 {
    if chunk.sample_rate == 0 {
        return 0;
    }
    ((chunk.samples.len() as u64 * 1000) / chunk.sample_rate as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_ms(amplitude: f32, ms: u32) -> AudioChunk {
        let sample_rate = 16_000u32;
        let len = (sample_rate as u64 * ms as u64 / 1000) as usize;
        AudioChunk::new(vec![amplitude; len], sample_rate)
    }

    fn detector(min_speech_ms: u32, silence_ms: u32) -> AutoStopDetector {
        let config = VadConfig::new(
            16_000,
            silence_ms,
            min_speech_ms,
            0.02,
            VadBackendKind::Energy,
            1,
        );
        AutoStopDetector::new(Box::new(EnergyVad::new(0.02, 0)), config)
    }

    #[test]
    fn starts_waiting_for_speech() {
        let d = detector(200, 400);
        assert_eq!(d.state(), VadState::WaitingForSpeech);
    }

    #[test]
    fn silence_before_min_speech_stays_waiting() {
        let mut d = detector(500, 400);
        let state = d.feed_audio(&chunk_ms(0.0, 200));
        assert_eq!(state, VadState::WaitingForSpeech);
    }

    #[test]
    fn speech_then_short_silence_does_not_autostop() {
        let mut d = detector(100, 1000);
        assert_eq!(d.feed_audio(&chunk_ms(0.5, 200)), VadState::Speech);
        assert_eq!(d.feed_audio(&chunk_ms(0.0, 200)), VadState::Silence);
    }

    #[test]
    fn trailing_silence_past_threshold_triggers_autostop() {
        let mut d = detector(100, 400);
        assert_eq!(d.feed_audio(&chunk_ms(0.5, 200)), VadState::Speech);
        assert_eq!(d.feed_audio(&chunk_ms(0.0, 200)), VadState::Silence);
        assert_eq!(d.feed_audio(&chunk_ms(0.0, 300)), VadState::AutoStop);
    }

    #[test]
    fn autostop_is_sticky() {
        let mut d = detector(100, 400);
        d.feed_audio(&chunk_ms(0.5, 200));
        d.feed_audio(&chunk_ms(0.0, 500));
        assert_eq!(d.state(), VadState::AutoStop);
        // Loud speech afterwards must not pull the detector back out.
        assert_eq!(d.feed_audio(&chunk_ms(0.9, 500)), VadState::AutoStop);
        assert_eq!(d.state(), VadState::AutoStop);
    }

    #[test]
    fn config_clamps_out_of_range_values() {
        let cfg = VadConfig::new(16_000, 10, 5_000_000, -1.0, VadBackendKind::Auto, 9);
        assert_eq!(cfg.silence_ms, 400);
        assert_eq!(cfg.min_speech_ms, 2000);
        assert_eq!(cfg.energy_threshold, 0.0);
        assert_eq!(cfg.aggressiveness, 3);
    }

    #[test]
    fn reset_returns_to_waiting_for_speech() {
        let mut d = detector(100, 400);
        d.feed_audio(&chunk_ms(0.5, 200));
        d.reset();
        assert_eq!(d.state(), VadState::WaitingForSpeech);
    }
}

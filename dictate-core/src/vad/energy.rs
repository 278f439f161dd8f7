//! Energy-based VAD: RMS threshold plus a hangover window measured in
//! milliseconds rather than frame count, so it tracks variable-length
//! chunks the same way `AutoStopDetector` tracks its own speech/silence
//! accumulators (see `chunk_duration_ms` in `vad/mod.rs`).
//!
//! 1. Compute RMS of the incoming chunk.
//! 2. If RMS ≥ `threshold` → emit `Speech`, refill the hangover window.
//! 3. If RMS < `threshold` and the hangover window hasn't drained → emit
//!    `Speech`, drain it by the chunk's duration (prevents clipping
//!    syllable endings on short, frequent chunks).
//! 4. Otherwise → emit `Silence`.

use super::{chunk_duration_ms, VadConfig, VadDecision, VoiceActivityDetector};
use crate::buffering::AudioChunk;

/// Default hangover window: long enough to ride out a brief stop-consonant
/// gap without a fixed frame count (which only behaves correctly at the one
/// chunk size it was tuned for).
const DEFAULT_HANGOVER_MS: u32 = 160;

/// Energy-based voice activity detector, built straight from a session's
/// [`VadConfig`] so it shares one threshold source with every other backend.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// RMS amplitude threshold. Frames above this are considered speech.
    threshold: f32,
    /// Hangover window length in milliseconds.
    hangover_ms: u32,
    /// Milliseconds of hangover remaining.
    hangover_remaining_ms: u32,
}

impl EnergyVad {
    /// Build an `EnergyVad` directly from the session's VAD config, reusing
    /// its `energy_threshold` rather than taking a separate threshold
    /// argument the caller would have to keep in sync.
    pub fn from_config(config: &VadConfig) -> Self {
        Self::new(config.energy_threshold, DEFAULT_HANGOVER_MS)
    }

    /// Create a new `EnergyVad` with an explicit threshold and hangover
    /// window (milliseconds), for callers outside the `VadConfig` path
    /// (unit tests, or a bare energy detector with no auto-stop machinery).
    pub fn new(threshold: f32, hangover_ms: u32) -> Self {
        Self {
            threshold,
            hangover_ms,
            hangover_remaining_ms: 0,
        }
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.02, DEFAULT_HANGOVER_MS)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision {
        let rms = Self::rms(&chunk.samples);

        if rms >= self.threshold {
            self.hangover_remaining_ms = self.hangover_ms;
            return VadDecision::Speech;
        }

        if self.hangover_remaining_ms > 0 {
            self.hangover_remaining_ms = self
                .hangover_remaining_ms
                .saturating_sub(chunk_duration_ms(chunk));
            return VadDecision::Speech;
        }

        VadDecision::Silence
    }

    fn reset(&mut self) {
        self.hangover_remaining_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_ms(amplitude: f32, ms: u32) -> AudioChunk {
        let sample_rate = 16_000u32;
        let len = (sample_rate as u64 * ms as u64 / 1000) as usize;
        AudioChunk::new(vec![amplitude; len], sample_rate)
    }

    #[test]
    fn silence_below_threshold() {
        let mut vad = EnergyVad::new(0.02, 0);
        assert_eq!(vad.classify(&chunk_ms(0.0, 20)), VadDecision::Silence);
    }

    #[test]
    fn speech_above_threshold() {
        let mut vad = EnergyVad::new(0.02, 0);
        assert_eq!(vad.classify(&chunk_ms(0.5, 20)), VadDecision::Speech);
    }

    #[test]
    fn hangover_extends_speech_by_elapsed_duration() {
        let mut vad = EnergyVad::new(0.02, 150);

        assert_eq!(vad.classify(&chunk_ms(0.5, 20)), VadDecision::Speech);

        // 3 * 50ms = 150ms of silence exactly drains the hangover window.
        assert_eq!(vad.classify(&chunk_ms(0.0, 50)), VadDecision::Speech);
        assert_eq!(vad.classify(&chunk_ms(0.0, 50)), VadDecision::Speech);
        assert_eq!(vad.classify(&chunk_ms(0.0, 50)), VadDecision::Speech);

        // Hangover exhausted: next silent chunk is Silence.
        assert_eq!(vad.classify(&chunk_ms(0.0, 50)), VadDecision::Silence);
    }

    #[test]
    fn long_silent_chunk_drains_hangover_in_one_step() {
        let mut vad = EnergyVad::new(0.02, 150);
        assert_eq!(vad.classify(&chunk_ms(0.5, 20)), VadDecision::Speech);
        // A single 500ms silent chunk outlasts the whole hangover window.
        assert_eq!(vad.classify(&chunk_ms(0.0, 500)), VadDecision::Speech);
        assert_eq!(vad.classify(&chunk_ms(0.0, 20)), VadDecision::Silence);
    }

    #[test]
    fn reset_clears_hangover() {
        let mut vad = EnergyVad::new(0.02, 150);
        vad.classify(&chunk_ms(0.5, 20));
        vad.reset();
        assert_eq!(vad.classify(&chunk_ms(0.0, 20)), VadDecision::Silence);
    }

    #[test]
    fn empty_chunk_is_silence() {
        let mut vad = EnergyVad::default();
        let chunk = AudioChunk::new(vec![], 16000);
        assert_eq!(vad.classify(&chunk), VadDecision::Silence);
    }

    #[test]
    fn from_config_uses_its_energy_threshold() {
        let config = VadConfig::new(16_000, 1500, 250, 0.4, super::super::VadBackendKind::Energy, 1);
        let mut vad = EnergyVad::from_config(&config);
        // Below 0.4 should be silence even though it'd trip the default 0.02.
        assert_eq!(vad.classify(&chunk_ms(0.1, 20)), VadDecision::Silence);
        assert_eq!(vad.classify(&chunk_ms(0.5, 20)), VadDecision::Speech);
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let rms = EnergyVad::rms(&samples);
        assert!((rms - 0.5).abs() < 1e-5, "rms={rms}");
    }
}

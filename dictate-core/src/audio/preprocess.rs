//! Deterministic audio preprocessing pipeline (C5).
//!
//! Locked stage order, preserved bit-for-bit from the reference
//! implementation's documented contract: float32 → downmix mono →
//! resample 16 kHz → DC-offset removal → peak-clamp → optional
//! peak-normalize → optional silence trim. Output is always float32 mono
//! 16 kHz.

use crate::audio::resample::resample_all;
use crate::error::Result;

pub const TARGET_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone, Copy)]
pub struct PreprocessOptions {
    pub normalize: bool,
    pub trim_silence: bool,
    /// dB threshold (relative to full scale) below which leading/trailing
    /// samples are considered silence. Typically negative, e.g. -40.0.
    pub trim_threshold_db: f32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            normalize: false,
            trim_silence: false,
            trim_threshold_db: -40.0,
        }
    }
}

/// Downmixes `channels`-interleaved samples to mono by channel mean.
pub fn downmix_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels as usize;
    if channels <= 1 {
        return samples.to_vec();
    }
    let frames = samples.len() / channels;
    let mut out = Vec::with_capacity(frames);
    for f in 0..frames {
        let base = f * channels;
        let sum: f32 = samples[base..base + channels].iter().sum();
        out.push(sum / channels as f32);
    }
    out
}

/// Subtracts the signal mean (DC offset) in place.
pub fn remove_dc_offset(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }
    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    for s in samples.iter_mut() {
        *s -= mean;
    }
}

/// Clamps every sample to `[-1.0, 1.0]` in place.
pub fn peak_clamp(samples: &mut [f32]) {
    for s in samples.iter_mut() {
        *s = s.clamp(-1.0, 1.0);
    }
}

/// Scales so the loudest sample reaches full scale. No-op on silence.
pub fn peak_normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0f32, |acc, &s| acc.max(s.abs()));
    if peak <= f32::EPSILON {
        return;
    }
    let gain = 1.0 / peak;
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Trims leading/trailing runs of samples below `threshold_db` full-scale.
/// Returns an empty vec if every sample is below threshold.
pub fn trim_silence(samples: &[f32], threshold_db: f32) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let threshold = db_to_linear(threshold_db);
    let start = samples.iter().position(|&s| s.abs() >= threshold);
    let Some(start) = start else {
        return Vec::new();
    };
    let end = samples
        .iter()
        .rposition(|&s| s.abs() >= threshold)
        .unwrap_or(start);
    samples[start..=end].to_vec()
}

/// Runs the complete locked pipeline. `capture_rate`/`channels` describe
/// the raw buffer as captured; output is always mono f32 at
/// `TARGET_SAMPLE_RATE`.
pub fn preprocess(
    raw: &[f32],
    capture_rate: u32,
    channels: u16,
    options: PreprocessOptions,
) -> Result<Vec<f32>> {
    let mono = downmix_mono(raw, channels);
    let mut resampled = resample_all(capture_rate, TARGET_SAMPLE_RATE, &mono)?;
    remove_dc_offset(&mut resampled);
    peak_clamp(&mut resampled);
    if options.normalize {
        peak_normalize(&mut resampled);
    }
    if options.trim_silence {
        resampled = trim_silence(&resampled, options.trim_threshold_db);
    }
    Ok(resampled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_stereo() {
        let out = downmix_mono(&[1.0, -1.0, 0.5, 0.5], 2);
        assert_eq!(out, vec![0.0, 0.5]);
    }

    #[test]
    fn downmix_mono_is_passthrough() {
        let out = downmix_mono(&[0.1, 0.2], 1);
        assert_eq!(out, vec![0.1, 0.2]);
    }

    #[test]
    fn dc_offset_is_removed() {
        let mut samples = vec![1.0, 1.0, 1.0];
        remove_dc_offset(&mut samples);
        assert!(samples.iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn clamp_bounds_to_unit_range() {
        let mut samples = vec![2.0, -2.0, 0.3];
        peak_clamp(&mut samples);
        assert_eq!(samples, vec![1.0, -1.0, 0.3]);
    }

    #[test]
    fn normalize_scales_to_full_scale() {
        let mut samples = vec![0.25, -0.5, 0.1];
        peak_normalize(&mut samples);
        assert!((samples[1].abs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_is_noop_on_silence() {
        let mut samples = vec![0.0, 0.0];
        peak_normalize(&mut samples);
        assert_eq!(samples, vec![0.0, 0.0]);
    }

    #[test]
    fn trim_strips_leading_and_trailing_silence() {
        let samples = vec![0.0001, 0.0001, 0.5, 0.6, 0.0001];
        let trimmed = trim_silence(&samples, -40.0);
        assert_eq!(trimmed, vec![0.5, 0.6]);
    }

    #[test]
    fn trim_all_silence_yields_empty() {
        let samples = vec![0.0; 10];
        assert!(trim_silence(&samples, -40.0).is_empty());
    }

    #[test]
    fn full_pipeline_produces_mono_16k() {
        let raw = vec![0.5f32; 48_000 * 2]; // 1s stereo @ 48kHz
        let out = preprocess(&raw, 48_000, 2, PreprocessOptions::default()).unwrap();
        assert!(!out.is_empty());
        assert!(out.iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let out = preprocess(&[], 16_000, 1, PreprocessOptions::default()).unwrap();
        assert!(out.is_empty());
    }
}

//! Audio sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! `cpal` captures audio at the device's native rate (commonly 48 kHz on
//! Windows, 44.1/48 kHz elsewhere); every ASR backend expects 16 kHz mono
//! f32. `RateConverter` bridges that gap on the non-real-time pipeline
//! thread, where allocation is allowed.
//!
//! When capture rate == target rate, `RateConverter` is a zero-copy
//! passthrough — no rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{DictateError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    resampler: Option<FastFixedIn<f32>>,
    input_buf: Vec<f32>,
    chunk_size: usize,
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    pub fn new(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| DictateError::AudioIo(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Processes incoming samples, returning resampled output (may be
    /// empty — partial input is accumulated for the next call or `finish`).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..self.chunk_size);
        }
        result
    }

    /// Flushes any remaining partial input by zero-padding it to a full
    /// chunk, processing once more, and trimming the output proportionally.
    /// Call once after the last `process` call for a one-shot buffer.
    pub fn finish(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };
        if self.input_buf.is_empty() {
            return Vec::new();
        }
        let remaining = self.input_buf.len();
        let mut padded = self.input_buf.clone();
        padded.resize(self.chunk_size, 0.0);
        self.input_buf.clear();

        match resampler.process_into_buffer(&[&padded[..]], &mut self.output_buf, None) {
            Ok((_consumed, produced)) => {
                let keep = ((produced as f64) * (remaining as f64) / (self.chunk_size as f64))
                    .round() as usize;
                self.output_buf[0][..produced.min(keep)].to_vec()
            }
            Err(e) => {
                error!("resampler finish error: {e}");
                Vec::new()
            }
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// One-shot resample of a complete buffer (used by the offline preprocessor
/// rather than the streaming capture path).
pub fn resample_all(capture_rate: u32, target_rate: u32, samples: &[f32]) -> Result<Vec<f32>> {
    let mut rc = RateConverter::new(capture_rate, target_rate, 1024)?;
    let mut out = rc.process(samples);
    out.extend(rc.finish());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&samples);
        assert_eq!(out, samples);
    }

    #[test]
    fn ratio_48k_to_16k_correct_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(!rc.is_passthrough());
        let samples = vec![0.0f32; 960];
        let out = rc.process(&samples);
        assert!(!out.is_empty());
        let expected = 320usize;
        assert!((out.len() as isize - expected as isize).unsigned_abs() <= 10);
    }

    #[test]
    fn partial_accumulation_returns_empty() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out = rc.process(&vec![0.0f32; 500]);
        assert!(out.is_empty());
    }

    #[test]
    fn multiple_partial_chunks_accumulate() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out1 = rc.process(&vec![0.0f32; 500]);
        assert!(out1.is_empty());
        let out2 = rc.process(&vec![0.0f32; 500]);
        assert!(!out2.is_empty());
    }

    #[test]
    fn one_shot_resample_covers_whole_buffer() {
        let samples = vec![0.1f32; 2000];
        let out = resample_all(48_000, 16_000, &samples).unwrap();
        // ~2000/3 = 666 samples at 16kHz, allow slack for the padded tail.
        assert!(out.len() > 500 && out.len() < 800, "got {}", out.len());
    }
}

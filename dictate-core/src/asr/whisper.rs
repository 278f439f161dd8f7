//! Whisper backend via the `ort` crate.
//!
//! Targets the HuggingFace `optimum` separate encoder + decoder export:
//! - `encoder_model.onnx` — input `[1,80,3000]` → `last_hidden_state [1,1500,384]`
//! - `decoder_model.onnx` — `input_ids [1,seq]` + `encoder_hidden_states [1,1500,384]`
//!   → `logits [1,seq,vocab]`
//! - `tokenizer.json`     — HuggingFace fast tokenizer
//!
//! Greedy (argmax) decode, no key/value cache — simpler and slower than a
//! cached decode loop, but correct, and this backend isn't on the
//! real-time audio path (it runs once per finished recording session).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use ndarray::{Array2, Array3};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Value;
use rustfft::{num_complex::Complex, FftPlanner};
use tokenizers::Tokenizer;
use tracing::info;

use super::{AsrBackend, InitProgress, TranscriptionResult};
use crate::error::{DictateError, Result};

const N_FFT: usize = 400;
const N_FREQS: usize = N_FFT / 2 + 1; // 201
const HOP: usize = 160;
const N_MELS: usize = 80;
const N_FRAMES: usize = 3_000; // 30s at a 10ms hop
const MEL_SAMPLES: usize = N_FRAMES * HOP;

const EOT: i64 = 50257;
const SOT_FALLBACK: i64 = 50258;
const MAX_TOKENS: usize = 224;

fn create_session(model_path: &Path) -> Result<Session> {
    let logical_cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let intra_threads = logical_cores.clamp(2, 8);

    SessionBuilder::new()
        .map_err(|e| DictateError::ModelLoad(e.to_string()))?
        .with_intra_threads(intra_threads)
        .map_err(|e| DictateError::ModelLoad(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::All)
        .map_err(|e| DictateError::ModelLoad(e.to_string()))?
        .commit_from_file(model_path)
        .map_err(|e| DictateError::ModelLoad(e.to_string()))
}

fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

fn hz_to_mel_slaney(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4_f32).ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz_slaney(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4_f32).ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

fn build_mel_filters(fft_size: usize, sr: u32, n_mels: usize, fmin: f32, fmax: f32) -> Vec<Vec<f32>> {
    let n_freqs = fft_size / 2 + 1;
    let mel_min = hz_to_mel_slaney(fmin);
    let mel_max = hz_to_mel_slaney(fmax);

    let mel_pts: Vec<f32> = (0..=(n_mels + 1))
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
        .collect();
    let hz_pts: Vec<f32> = mel_pts.iter().map(|&m| mel_to_hz_slaney(m)).collect();
    let fft_freqs: Vec<f32> = (0..n_freqs)
        .map(|k| k as f32 * sr as f32 / fft_size as f32)
        .collect();

    let mut filters = vec![vec![0f32; n_freqs]; n_mels];
    for m in 0..n_mels {
        let lower = hz_pts[m];
        let center = hz_pts[m + 1];
        let upper = hz_pts[m + 2];
        let down_denom = (center - lower).max(1e-10);
        let up_denom = (upper - center).max(1e-10);
        let enorm = 2.0 / (upper - lower).max(1e-10);
        for (k, &freq) in fft_freqs.iter().enumerate() {
            let w = if freq >= lower && freq <= center {
                (freq - lower) / down_denom
            } else if freq > center && freq <= upper {
                (upper - freq) / up_denom
            } else {
                0.0
            };
            filters[m][k] = (w * enorm).max(0.0);
        }
    }
    filters
}

fn normalize_rms_in_place(samples: &mut [f32], target_rms: f32) {
    if samples.is_empty() {
        return;
    }
    let sum_sq = samples.iter().map(|s| s * s).sum::<f32>();
    let rms = (sum_sq / samples.len() as f32).sqrt();
    if rms <= 1e-6 {
        return;
    }
    let gain = (target_rms / rms).clamp(0.8, 15.0);
    for s in samples.iter_mut() {
        *s = (*s * gain).clamp(-1.0, 1.0);
    }
}

fn reflect_index(mut i: isize, len: usize) -> usize {
    let max = len as isize - 1;
    while i < 0 || i > max {
        if i < 0 {
            i = -i;
        } else {
            i = 2 * max - i;
        }
    }
    i as usize
}

fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    if pad == 0 {
        return samples.to_vec();
    }
    if samples.is_empty() {
        return vec![0.0; pad * 2];
    }
    if samples.len() == 1 {
        return vec![samples[0]; samples.len() + pad * 2];
    }
    let n = samples.len() as isize;
    let mut out = Vec::with_capacity(samples.len() + 2 * pad);
    for i in -(pad as isize)..(n + pad as isize) {
        out.push(samples[reflect_index(i, samples.len())]);
    }
    out
}

fn postprocess_transcript_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    capitalize_sentence_starts(collapsed.trim())
}

fn capitalize_sentence_starts(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut capitalize_next = true;
    for ch in text.chars() {
        if capitalize_next && ch.is_alphabetic() {
            out.extend(ch.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(ch);
            if matches!(ch, '.' | '!' | '?') {
                capitalize_next = true;
            }
        }
    }
    out
}

/// Whisper ONNX backend. Loads encoder/decoder sessions and a tokenizer,
/// runs a fixed 30s-window log-mel spectrogram, and greedily decodes.
pub struct WhisperBackend {
    encoder: Option<Session>,
    decoder: Option<Session>,
    tokenizer: Option<Tokenizer>,
    device: String,
    language: Option<String>,
    n_mels: usize,
    mel_filters: Vec<Vec<f32>>,
    hann_window: Vec<f32>,
    fft: Arc<dyn rustfft::Fft<f32>>,
}

impl WhisperBackend {
    pub fn new() -> Self {
        Self {
            encoder: None,
            decoder: None,
            tokenizer: None,
            device: "cpu".to_string(),
            language: None,
            n_mels: N_MELS,
            mel_filters: build_mel_filters(N_FFT, 16_000, N_MELS, 0.0, 8_000.0),
            hann_window: build_hann_window(N_FFT),
            fft: Arc::from(FftPlanner::<f32>::new().plan_fft_forward(N_FFT)),
        }
    }

    fn log_mel_spectrogram(&self, samples: &[f32], active_samples: usize) -> Array3<f32> {
        let mut normalized = samples.to_vec();
        normalize_rms_in_place(&mut normalized, 0.10);
        let centered = reflect_pad(&normalized, N_FFT / 2);
        let active_samples = active_samples.min(MEL_SAMPLES);
        let active_frames = ((active_samples + N_FFT + HOP - 1) / HOP).clamp(1, N_FRAMES);

        let mut mel = Array3::<f32>::zeros((1, self.n_mels, N_FRAMES));
        let mut fft_buf = vec![Complex::new(0.0f32, 0.0); N_FFT];

        for frame in 0..active_frames {
            let start = frame * HOP;
            for v in fft_buf.iter_mut() {
                *v = Complex::new(0.0, 0.0);
            }
            for i in 0..N_FFT {
                fft_buf[i] = Complex::new(centered[start + i] * self.hann_window[i], 0.0);
            }
            self.fft.process(&mut fft_buf);

            for m in 0..self.n_mels {
                let mut energy = 0.0f32;
                for k in 0..N_FREQS {
                    energy += self.mel_filters[m][k] * fft_buf[k].norm_sqr();
                }
                mel[[0, m, frame]] = energy;
            }
        }

        mel.mapv_inplace(|v| v.max(1e-10).log10());
        let max_val = mel.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        mel.mapv_inplace(|v| v.max(max_val - 8.0));
        mel.mapv_inplace(|v| (v + 4.0) / 4.0);
        mel
    }

    fn token_id_or(tokenizer: &Tokenizer, token: &str, fallback: i64) -> i64 {
        tokenizer
            .token_to_id(token)
            .map(|id| id as i64)
            .unwrap_or(fallback)
    }

    /// Greedy argmax decode over the full sequence each step (no KV cache).
    fn greedy_decode(
        decoder: &mut Session,
        tokenizer: &Tokenizer,
        encoder_hidden: &Array3<f32>,
    ) -> Result<Vec<i64>> {
        let sot = Self::token_id_or(tokenizer, "<|startoftranscript|>", SOT_FALLBACK);
        let mut generated = vec![sot];

        for _ in 0..MAX_TOKENS {
            let seq_len = generated.len();
            let input_ids = Array2::from_shape_vec((1, seq_len), generated.clone())
                .map_err(|e| DictateError::Transcribe(e.to_string()))?;
            let ids_val = Value::from_array(input_ids)
                .map_err(|e: ort::Error| DictateError::Transcribe(e.to_string()))?;
            let hidden_val = Value::from_array(encoder_hidden.clone())
                .map_err(|e: ort::Error| DictateError::Transcribe(e.to_string()))?;

            let outputs = decoder
                .run(ort::inputs![
                    "input_ids" => ids_val,
                    "encoder_hidden_states" => hidden_val,
                ])
                .map_err(|e| DictateError::Transcribe(e.to_string()))?;
            let (shape, data) = outputs["logits"]
                .try_extract_tensor::<f32>()
                .map_err(|e| DictateError::Transcribe(e.to_string()))?;

            let vocab = *shape.last().ok_or_else(|| {
                DictateError::Transcribe("decoder produced an empty logits shape".to_string())
            })? as usize;
            let last_step_start = (seq_len - 1) * vocab;
            let last_logits = &data[last_step_start..last_step_start + vocab];

            let next_token = last_logits
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(idx, _)| idx as i64)
                .unwrap_or(EOT);

            if next_token == EOT {
                break;
            }
            generated.push(next_token);
        }

        Ok(generated)
    }
}

impl Default for WhisperBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AsrBackend for WhisperBackend {
    fn initialize(
        &mut self,
        model_path: &Path,
        device: &str,
        on_progress: &mut dyn FnMut(InitProgress),
    ) -> Result<()> {
        on_progress(InitProgress {
            state: "loading_model".to_string(),
            detail: "loading Whisper encoder/decoder".to_string(),
        });

        let encoder_path: PathBuf = model_path.join("encoder_model.onnx");
        let decoder_path: PathBuf = model_path.join("decoder_model.onnx");
        let tokenizer_path: PathBuf = model_path.join("tokenizer.json");
        for path in [&encoder_path, &decoder_path, &tokenizer_path] {
            if !path.exists() {
                return Err(DictateError::ModelNotFound {
                    model_id: path.display().to_string(),
                });
            }
        }

        let start = Instant::now();
        let mut encoder = create_session(&encoder_path)?;

        if let Some(shape) = encoder
            .inputs()
            .first()
            .and_then(|i| i.dtype().tensor_shape())
            .filter(|s| s.len() >= 2)
        {
            let mel_bins = shape[1];
            if mel_bins > 0 && mel_bins as usize != self.n_mels {
                self.n_mels = mel_bins as usize;
                self.mel_filters = build_mel_filters(N_FFT, 16_000, self.n_mels, 0.0, 8_000.0);
            }
        }

        let decoder = create_session(&decoder_path)?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| DictateError::ModelLoad(e.to_string()))?;

        // Dummy encoder forward pass to populate CPU caches.
        let dummy = Array3::<f32>::zeros((1, self.n_mels, N_FRAMES));
        let dummy_val = Value::from_array(dummy)
            .map_err(|e: ort::Error| DictateError::ModelLoad(e.to_string()))?;
        encoder
            .run(ort::inputs!["input_features" => dummy_val])
            .map_err(|e| DictateError::ModelLoad(e.to_string()))?;

        info!(elapsed_ms = start.elapsed().as_millis(), device, "Whisper model loaded");

        self.encoder = Some(encoder);
        self.decoder = Some(decoder);
        self.tokenizer = Some(tokenizer);
        self.device = device.to_string();

        on_progress(InitProgress {
            state: "ready".to_string(),
            detail: format!("Whisper ready on {device}"),
        });
        Ok(())
    }

    fn transcribe(&mut self, audio: &[f32], sample_rate: u32) -> Result<TranscriptionResult> {
        if !self.is_ready() {
            return Err(DictateError::NotReady);
        }
        if sample_rate != 16_000 {
            return Err(DictateError::Transcribe(format!(
                "expected 16000 Hz audio, got {sample_rate}"
            )));
        }

        let start = Instant::now();
        let mut samples = audio.to_vec();
        let active_samples = samples.len().min(MEL_SAMPLES);
        samples.resize(MEL_SAMPLES, 0.0);

        let mel = self.log_mel_spectrogram(&samples, active_samples);
        let mel_val = Value::from_array(mel)
            .map_err(|e: ort::Error| DictateError::Transcribe(e.to_string()))?;

        let encoder = self.encoder.as_mut().unwrap();
        let decoder = self.decoder.as_mut().unwrap();
        let tokenizer = self.tokenizer.as_ref().unwrap();

        let enc_out = encoder
            .run(ort::inputs!["input_features" => mel_val])
            .map_err(|e| DictateError::Transcribe(e.to_string()))?;
        let (enc_shape, enc_data) = enc_out["last_hidden_state"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DictateError::Transcribe(e.to_string()))?;
        let (n_frames, d_model) = if enc_shape.len() >= 3 {
            (enc_shape[1] as usize, enc_shape[2] as usize)
        } else {
            let d = 384usize;
            (enc_data.len() / d, d)
        };
        let hidden = Array3::from_shape_vec((1, n_frames, d_model), enc_data.to_vec())
            .map_err(|e| DictateError::Transcribe(e.to_string()))?;

        let tokens = Self::greedy_decode(decoder, tokenizer, &hidden)?;
        let text = tokenizer
            .decode(&tokens.iter().map(|&t| t as u32).collect::<Vec<_>>(), true)
            .map_err(|e| DictateError::Transcribe(e.to_string()))?;
        let text = postprocess_transcript_text(&text);

        Ok(TranscriptionResult {
            text,
            language: self.language.clone().or_else(|| Some("en".to_string())),
            confidence: None,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn set_language(&mut self, language: Option<&str>) -> Result<()> {
        self.language = language.map(|s| s.to_string());
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.encoder.is_some() && self.decoder.is_some() && self.tokenizer.is_some()
    }

    fn get_device(&self) -> String {
        self.device.clone()
    }

    fn unload(&mut self) {
        self.encoder = None;
        self.decoder = None;
        self.tokenizer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_files_are_reported() {
        let mut backend = WhisperBackend::new();
        let err = backend
            .initialize(Path::new("/nonexistent/whisper"), "cpu", &mut |_| {})
            .unwrap_err();
        assert_eq!(err.kind(), "E_MODEL_LOAD");
    }

    #[test]
    fn fresh_backend_is_not_ready() {
        let backend = WhisperBackend::new();
        assert!(!backend.is_ready());
    }

    #[test]
    fn postprocess_collapses_whitespace_and_capitalizes() {
        let out = postprocess_transcript_text("  hello   world. how are you?  ");
        assert_eq!(out, "Hello world. How are you?");
    }

    #[test]
    fn transcribe_before_init_is_not_ready() {
        let mut backend = WhisperBackend::new();
        let err = backend.transcribe(&[0.0; 160], 16_000).unwrap_err();
        assert_eq!(err.kind(), "E_NOT_READY");
    }
}

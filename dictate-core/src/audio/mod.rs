//! Audio capture via the `cpal` backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not allocate, block on a mutex/condvar for long, or perform I/O.
//! Every sample-format branch below mixes down to mono and forwards the
//! frame to a caller-supplied sink in one `push`/`call` — the only lock
//! taken is the `SessionRingBuffer`'s, held only around the push itself.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). Capture therefore runs on a dedicated OS thread created and
//! torn down by `Recorder`/`Meter`; the stream never crosses a thread
//! boundary.

pub mod device;
pub mod preprocess;
pub mod resample;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, StreamConfig,
};
use tracing::{error, info, warn};

use crate::buffering::SessionRingBuffer;
use crate::error::{DictateError, Result};
use device::AudioDevice;

/// A sink that receives mixed-down mono f32 frames from the capture thread.
pub trait FrameSink: Send + 'static {
    fn push(&self, frame: &[f32]);
}

impl FrameSink for Arc<SessionRingBuffer> {
    fn push(&self, frame: &[f32]) {
        SessionRingBuffer::push(self, frame);
    }
}

/// Opens the requested (or default) input device and runs `sink` on every
/// captured frame until `running` is cleared. Blocks the calling thread for
/// the stream's lifetime — call this from a dedicated `std::thread`.
#[cfg(feature = "audio-cpal")]
pub fn run_capture_thread<S: FrameSink + Sync>(
    device_uid: Option<String>,
    running: Arc<AtomicBool>,
    sink: S,
    ready_tx: mpsc::Sender<Result<(u32, u16, AudioDevice)>>,
    stop_rx: mpsc::Receiver<()>,
) {
    use cpal::traits::HostTrait;

    let host = cpal::default_host();
    let chosen = device_uid
        .as_deref()
        .and_then(device::find_device_by_uid)
        .or_else(device::default_device);

    let Some(descriptor) = chosen else {
        let _ = ready_tx.send(Err(DictateError::DeviceNotFound {
            uid: device_uid.unwrap_or_default(),
        }));
        return;
    };

    let cpal_device = match host
        .input_devices()
        .ok()
        .and_then(|mut it| it.find(|d| d.name().ok().as_deref() == Some(descriptor.name.as_str())))
    {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err(DictateError::DeviceNotFound {
                uid: descriptor.uid.clone(),
            }));
            return;
        }
    };

    let supported = match cpal_device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(DictateError::AudioIo(e.to_string())));
            return;
        }
    };

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let sink = Arc::new(sink);
    let running_cb = Arc::clone(&running);
    let sink_cb = Arc::clone(&sink);
    let ch = channels as usize;

    let build_result = match supported.sample_format() {
        SampleFormat::F32 => {
            let mut mix: Vec<f32> = Vec::new();
            cpal_device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    downmix_f32(data, ch, &mut mix);
                    sink_cb.push(&mix);
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
        }
        SampleFormat::I16 => {
            let mut mix: Vec<f32> = Vec::new();
            cpal_device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / ch;
                    mix.resize(frames, 0.0);
                    for f in 0..frames {
                        let base = f * ch;
                        let mut sum = 0f32;
                        for c in 0..ch {
                            sum += data[base + c] as f32 / 32768.0;
                        }
                        mix[f] = sum / ch as f32;
                    }
                    sink_cb.push(&mix);
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
        }
        SampleFormat::U8 => {
            let mut mix: Vec<f32> = Vec::new();
            cpal_device.build_input_stream(
                &config,
                move |data: &[u8], _| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / ch;
                    mix.resize(frames, 0.0);
                    for f in 0..frames {
                        let base = f * ch;
                        let mut sum = 0f32;
                        for c in 0..ch {
                            sum += (data[base + c] as f32 - 128.0) / 128.0;
                        }
                        mix[f] = sum / ch as f32;
                    }
                    sink_cb.push(&mix);
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
        }
        fmt => {
            let _ = ready_tx.send(Err(DictateError::AudioIo(format!(
                "unsupported sample format: {fmt:?}"
            ))));
            return;
        }
    };

    let stream = match build_result {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(DictateError::AudioIo(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(DictateError::AudioIo(e.to_string())));
        return;
    }

    info!(device = descriptor.name.as_str(), sample_rate, channels, "capture stream started");
    if ready_tx
        .send(Ok((sample_rate, channels, descriptor)))
        .is_err()
    {
        return;
    }

    // Block until told to stop; the stream runs on its own OS callback.
    let _ = stop_rx.recv();
    running.store(false, Ordering::Release);
}

fn downmix_f32(data: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.clear();
        out.extend_from_slice(data);
        return;
    }
    let frames = data.len() / channels;
    out.resize(frames, 0.0);
    for f in 0..frames {
        let base = f * channels;
        let mut sum = 0f32;
        for c in 0..channels {
            sum += data[base + c];
        }
        out[f] = sum / channels as f32;
    }
}

/// Handle to a running capture stream (recorder or meter). Tearing down
/// stops the OS thread and joins it.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    pub sample_rate: u32,
    pub channels: u16,
    pub device: AudioDevice,
}

impl CaptureHandle {
    #[cfg(feature = "audio-cpal")]
    pub fn spawn<S: FrameSink + Sync>(device_uid: Option<String>, sink: S) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let running_thread = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name("dictate-audio-capture".into())
            .spawn(move || {
                run_capture_thread(device_uid, running_thread, sink, ready_tx, stop_rx)
            })
            .map_err(|e| DictateError::AudioIo(e.to_string()))?;

        let (sample_rate, channels, descriptor) = ready_rx
            .recv()
            .map_err(|_| DictateError::AudioIo("capture thread exited before ready".into()))??;

        Ok(Self {
            running,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            sample_rate,
            channels,
            device: descriptor,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn spawn<S: FrameSink>(_device_uid: Option<String>, _sink: S) -> Result<Self> {
        Err(DictateError::AudioIo(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            if let Err(e) = handle.join() {
                warn!("capture thread panicked: {e:?}");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// RMS and peak absolute amplitude over a window of samples.
pub fn level(samples: &[f32]) -> (f32, f32) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum_sq = 0f64;
    let mut peak = 0f32;
    for &s in samples {
        sum_sq += (s as f64) * (s as f64);
        peak = peak.max(s.abs());
    }
    let rms = ((sum_sq / samples.len() as f64).sqrt()) as f32;
    (rms, peak)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let mut out = Vec::new();
        downmix_f32(&[1.0, -1.0, 0.5, 0.5], 2, &mut out);
        assert_eq!(out, vec![0.0, 0.5]);
    }

    #[test]
    fn downmix_passthrough_mono() {
        let mut out = Vec::new();
        downmix_f32(&[0.1, 0.2, 0.3], 1, &mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn level_of_silence_is_zero() {
        assert_eq!(level(&[0.0, 0.0, 0.0]), (0.0, 0.0));
    }

    #[test]
    fn level_reports_peak_and_rms() {
        let (rms, peak) = level(&[1.0, -1.0, 1.0, -1.0]);
        assert!((rms - 1.0).abs() < 1e-6);
        assert!((peak - 1.0).abs() < 1e-6);
    }
}

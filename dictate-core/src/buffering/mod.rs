//! Bounded audio ring buffer backing one recording session.
//!
//! Capacity is `max_duration_secs * sample_rate`; once full, the oldest
//! samples are discarded to make room for the newest (per §3 "Audio
//! buffer" and the GLOSSARY's ring-buffer definition). The producer is the
//! real-time capture callback; `recording.stop` and the meter task are the
//! two consumers. A single `parking_lot::Mutex` guards the buffer — held
//! only around push/pop, never around allocation, matching the
//! concurrency model's real-time constraint.

use std::collections::VecDeque;

use parking_lot::Mutex;

pub const DEFAULT_MAX_DURATION_SECS: u32 = 120;

/// A contiguous block of mono PCM samples at a known sample rate, handed
/// from [`SessionRingBuffer`] to the VAD and ASR stages. Allocated once per
/// `recording.stop` / meter tick, never on the real-time capture callback.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

pub struct SessionRingBuffer {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
    pub sample_rate: u32,
    pub channels: u16,
}

impl SessionRingBuffer {
    pub fn new(sample_rate: u32, channels: u16, max_duration_secs: u32) -> Self {
        let capacity = sample_rate as usize * max_duration_secs as usize;
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity.min(1 << 20))),
            capacity,
            sample_rate,
            channels,
        }
    }

    /// Pushes newly-captured mono samples, discarding the oldest samples if
    /// the buffer is at capacity. Allocation-free on the steady-state path.
    pub fn push(&self, data: &[f32]) {
        let mut guard = self.samples.lock();
        if data.len() >= self.capacity {
            guard.clear();
            guard.extend(data[data.len() - self.capacity..].iter().copied());
            return;
        }
        let overflow = (guard.len() + data.len()).saturating_sub(self.capacity);
        for _ in 0..overflow {
            guard.pop_front();
        }
        guard.extend(data.iter().copied());
    }

    /// Non-destructive peek of the most recent `n` samples, for the live
    /// meter. Does not affect what `drain_snapshot` later returns.
    pub fn peek_recent(&self, n: usize) -> Vec<f32> {
        let guard = self.samples.lock();
        let len = guard.len();
        let start = len.saturating_sub(n);
        guard.iter().skip(start).copied().collect()
    }

    /// Drains the entire buffer into a snapshot (used by `recording.stop`).
    pub fn drain_snapshot(&self) -> Vec<f32> {
        let mut guard = self.samples.lock();
        guard.drain(..).collect()
    }

    /// Drains the buffer straight into an [`AudioChunk`] at this buffer's
    /// sample rate, the form `recording.stop` hands to VAD/ASR.
    pub fn drain_chunk(&self) -> AudioChunk {
        AudioChunk::new(self.drain_snapshot(), self.sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_within_capacity_keeps_everything() {
        let buf = SessionRingBuffer::new(1000, 1, 1);
        buf.push(&[1.0, 2.0, 3.0]);
        assert_eq!(buf.drain_snapshot(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn overflow_discards_oldest() {
        let buf = SessionRingBuffer::new(4, 1, 1); // capacity 4
        buf.push(&[1.0, 2.0, 3.0]);
        buf.push(&[4.0, 5.0, 6.0]);
        // total pushed = 6, capacity = 4 -> oldest two (1.0, 2.0) dropped
        assert_eq!(buf.drain_snapshot(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn drain_empties_buffer() {
        let buf = SessionRingBuffer::new(10, 1, 1);
        buf.push(&[1.0, 2.0]);
        let _ = buf.drain_snapshot();
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_single_push_keeps_tail() {
        let buf = SessionRingBuffer::new(3, 1, 1); // capacity 3
        buf.push(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(buf.drain_snapshot(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn drain_chunk_carries_the_buffers_sample_rate() {
        let buf = SessionRingBuffer::new(16_000, 1, 1);
        buf.push(&[0.1, 0.2, 0.3]);
        let chunk = buf.drain_chunk();
        assert_eq!(chunk.sample_rate, 16_000);
        assert_eq!(chunk.samples, vec![0.1, 0.2, 0.3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_audio_chunk_reports_empty() {
        let chunk = AudioChunk::new(vec![], 16_000);
        assert!(chunk.is_empty());
        assert_eq!(chunk.duration_secs(), 0.0);
    }
}

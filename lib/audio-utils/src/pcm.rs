//! Interleaved 16-bit PCM helpers.

use crate::{AudioProcessError, Result};

/// 100-nanosecond ticks per second, the unit of every media timestamp.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    pub const fn i16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
        }
    }

    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.block_align()
    }

    /// Frames covering `duration` 100ns ticks, rounded to the nearest frame.
    pub fn frames_for(&self, duration: i64) -> usize {
        if duration <= 0 {
            return 0;
        }
        let duration_ms = duration as f64 / 10_000.0;
        (self.sample_rate as f64 * duration_ms / 1000.0).round() as usize
    }

    /// Bytes of silence covering `duration` 100ns ticks.
    pub fn silence_len(&self, duration: i64) -> usize {
        self.frames_for(duration) * self.block_align()
    }

    /// Playback length of `bytes` in 100ns ticks.
    pub fn duration_of(&self, bytes: usize) -> i64 {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return 0;
        }
        (bytes as i128 * TICKS_PER_SECOND as i128 / bps as i128) as i64
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(AudioProcessError::Format(format!(
                "invalid pcm format {}Hz/{}ch",
                self.sample_rate, self.channels
            )));
        }
        if self.bits_per_sample != 16 {
            return Err(AudioProcessError::Format(format!(
                "{} bits per sample",
                self.bits_per_sample
            )));
        }
        Ok(())
    }
}

pub fn silence(len: usize) -> Vec<u8> {
    vec![0; len]
}

#[inline]
pub fn f32_to_i16_sample(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[inline]
pub fn i16_to_f32_sample(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

/// Rewrite little-endian f32 samples as i16 in the front half of `buf`.
/// Returns the new byte length.
pub fn f32_to_i16_in_place(buf: &mut [u8]) -> usize {
    let count = buf.len() / 4;
    for i in 0..count {
        let src = i * 4;
        let sample = f32::from_le_bytes([buf[src], buf[src + 1], buf[src + 2], buf[src + 3]]);
        let [lo, hi] = f32_to_i16_sample(sample).to_le_bytes();
        buf[i * 2] = lo;
        buf[i * 2 + 1] = hi;
    }
    count * 2
}

pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

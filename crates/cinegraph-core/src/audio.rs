//! Audio parameters and planar sample buffers.

use serde::{Deserialize, Serialize};

use crate::time::{RationalTime, Rounding};

/// Storage format of audio samples on disk or from a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    S16,
    #[default]
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::F32 => 4,
        }
    }
}

/// Sample rate, channel count and storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channel_count: u32,
    pub format: SampleFormat,
}

impl AudioParams {
    pub const fn new(sample_rate: u32, channel_count: u32, format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channel_count,
            format,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channel_count > 0
    }

    /// Duration of one sample.
    pub fn timebase(&self) -> RationalTime {
        RationalTime::new(1, self.sample_rate.max(1) as i64)
    }

    /// Index of the sample that plays at `time`.
    pub fn time_to_samples(&self, time: RationalTime) -> i64 {
        time.to_timestamp(self.timebase(), Rounding::Floor)
    }

    pub fn samples_to_time(&self, samples: i64) -> RationalTime {
        RationalTime::from_timestamp(samples, self.timebase())
    }

    /// Bytes for `samples` interleaved frames in this format.
    pub fn samples_to_bytes(&self, samples: usize) -> usize {
        samples * self.channel_count as usize * self.format.bytes_per_sample()
    }
}

impl Default for AudioParams {
    fn default() -> Self {
        Self::new(48000, 2, SampleFormat::F32)
    }
}

// ── Sample buffer ───────────────────────────────────────────────

/// Planar 32-bit float audio, one `Vec` per channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBuffer {
    params: Option<AudioParams>,
    channels: Vec<Vec<f32>>,
}

impl SampleBuffer {
    /// Allocate `sample_count` frames of silence.
    pub fn new(params: AudioParams, sample_count: usize) -> Self {
        Self {
            params: Some(params),
            channels: vec![vec![0.0; sample_count]; params.channel_count as usize],
        }
    }

    /// Build from channel data. Channels shorter than the longest are padded.
    pub fn from_planar(params: AudioParams, mut channels: Vec<Vec<f32>>) -> Self {
        channels.resize(params.channel_count as usize, Vec::new());
        let len = channels.iter().map(Vec::len).max().unwrap_or(0);
        for ch in &mut channels {
            ch.resize(len, 0.0);
        }
        Self {
            params: Some(params),
            channels,
        }
    }

    /// Build from interleaved samples.
    pub fn from_interleaved(params: AudioParams, data: &[f32]) -> Self {
        let count = params.channel_count.max(1) as usize;
        let mut channels = vec![Vec::with_capacity(data.len() / count); count];
        for frame in data.chunks_exact(count) {
            for (ch, s) in channels.iter_mut().zip(frame) {
                ch.push(*s);
            }
        }
        Self {
            params: Some(params),
            channels,
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.params.is_some()
    }

    pub fn audio_params(&self) -> Option<&AudioParams> {
        self.params.as_ref()
    }

    pub fn sample_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        self.channels.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn channel_mut(&mut self, index: usize) -> Option<&mut Vec<f32>> {
        self.channels.get_mut(index)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn set_sample_count(&mut self, count: usize) {
        for ch in &mut self.channels {
            ch.resize(count, 0.0);
        }
    }

    pub fn silence(&mut self) {
        for ch in &mut self.channels {
            ch.fill(0.0);
        }
    }

    /// Zero the samples in `[start, end)`.
    pub fn silence_range(&mut self, start: usize, end: usize) {
        for ch in &mut self.channels {
            let end = end.min(ch.len());
            if start < end {
                ch[start..end].fill(0.0);
            }
        }
    }

    pub fn transform_volume(&mut self, volume: f32) {
        for ch in &mut self.channels {
            for s in ch.iter_mut() {
                *s *= volume;
            }
        }
    }

    pub fn transform_volume_for_channel(&mut self, channel: usize, volume: f32) {
        if let Some(ch) = self.channels.get_mut(channel) {
            for s in ch.iter_mut() {
                *s *= volume;
            }
        }
    }

    /// Hard-limit every sample to `[-1, 1]`.
    pub fn clamp(&mut self) {
        for ch in &mut self.channels {
            for s in ch.iter_mut() {
                *s = s.clamp(-1.0, 1.0);
            }
        }
    }

    /// Append another buffer's samples channel by channel.
    pub fn append(&mut self, other: &SampleBuffer) {
        if self.params.is_none() {
            *self = other.clone();
            return;
        }
        for (dst, src) in self.channels.iter_mut().zip(&other.channels) {
            dst.extend_from_slice(src);
        }
    }

    /// Copy of the samples in `[start, start + len)`, clipped to the buffer.
    pub fn mid(&self, start: usize, len: usize) -> SampleBuffer {
        let channels = self
            .channels
            .iter()
            .map(|ch| {
                let s = start.min(ch.len());
                let e = (start + len).min(ch.len());
                ch[s..e].to_vec()
            })
            .collect();
        Self {
            params: self.params,
            channels,
        }
    }

    /// Mix `other` into this buffer starting at `offset`.
    pub fn mix_in(&mut self, other: &SampleBuffer, offset: usize) {
        for (dst, src) in self.channels.iter_mut().zip(&other.channels) {
            for (i, s) in src.iter().enumerate() {
                if let Some(d) = dst.get_mut(offset + i) {
                    *d += *s;
                }
            }
        }
    }

    pub fn to_interleaved(&self) -> Vec<f32> {
        let count = self.sample_count();
        let mut out = Vec::with_capacity(count * self.channels.len());
        for i in 0..count {
            for ch in &self.channels {
                out.push(ch[i]);
            }
        }
        out
    }
}

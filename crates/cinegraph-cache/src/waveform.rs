//! Waveform summaries and their cache.
//!
//! Audio renders produce min/max pairs per block of samples so the timeline
//! can draw waveforms without touching the PCM again.

use cinegraph_core::{AudioParams, RationalTime, SampleBuffer, TimeRange};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::playback::PlaybackCache;

/// Source samples summarized by one waveform entry.
pub const WAVEFORM_SAMPLES_PER_PIXEL: usize = 256;

/// A min/max pair representing the amplitude range at a pixel position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WaveformSample {
    pub min: f32,
    pub max: f32,
}

/// Pre-computed waveform data for a single audio channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    /// Samples per waveform pixel (the reduction ratio).
    pub samples_per_pixel: usize,
    /// Min/max pairs for display.
    pub data: Vec<WaveformSample>,
    /// Source sample rate.
    pub sample_rate: u32,
}

impl Waveform {
    /// Compute a waveform from mono samples.
    pub fn compute(samples: &[f32], samples_per_pixel: usize, sample_rate: u32) -> Self {
        if samples_per_pixel == 0 || samples.is_empty() {
            return Self {
                samples_per_pixel: samples_per_pixel.max(1),
                data: Vec::new(),
                sample_rate,
            };
        }

        let data = samples
            .chunks(samples_per_pixel)
            .map(|chunk| {
                chunk.iter().fold(
                    WaveformSample {
                        min: f32::MAX,
                        max: f32::MIN,
                    },
                    |acc, &s| WaveformSample {
                        min: acc.min.min(s),
                        max: acc.max.max(s),
                    },
                )
            })
            .collect();

        Self {
            samples_per_pixel,
            data,
            sample_rate,
        }
    }

    /// Get the RMS of the peaks for a range of pixels.
    pub fn rms_range(&self, start_pixel: usize, end_pixel: usize) -> f32 {
        let start = start_pixel.min(self.data.len());
        let end = end_pixel.min(self.data.len());
        if start >= end {
            return 0.0;
        }

        let sum: f64 = self.data[start..end]
            .iter()
            .map(|s| {
                let peak = s.max.abs().max(s.min.abs()) as f64;
                peak * peak
            })
            .sum();
        (sum / (end - start) as f64).sqrt() as f32
    }

    /// Duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.data.len() * self.samples_per_pixel) as f64 / self.sample_rate as f64
    }
}

/// Per-channel waveforms covering one rendered span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioWaveform {
    pub range: TimeRange,
    pub channels: Vec<Waveform>,
}

impl AudioWaveform {
    pub fn from_samples(range: TimeRange, samples: &SampleBuffer) -> Self {
        let rate = samples
            .audio_params()
            .map(|p| p.sample_rate)
            .unwrap_or_default();
        Self {
            range,
            channels: samples
                .channels()
                .iter()
                .map(|ch| Waveform::compute(ch, WAVEFORM_SAMPLES_PER_PIXEL, rate))
                .collect(),
        }
    }
}

// ── Waveform cache ──────────────────────────────────────────────

/// In-memory store of waveform summaries with playback-cache bookkeeping.
#[derive(Debug)]
pub struct AudioWaveformCache {
    base: PlaybackCache,
    params: Mutex<AudioParams>,
    segments: Mutex<Vec<AudioWaveform>>,
}

impl AudioWaveformCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            base: PlaybackCache::new(dir),
            params: Mutex::new(AudioParams::default()),
            segments: Mutex::new(Vec::new()),
        }
    }

    pub fn playback(&self) -> &PlaybackCache {
        &self.base
    }

    pub fn parameters(&self) -> AudioParams {
        *self.params.lock()
    }

    pub fn set_parameters(&self, params: AudioParams) {
        let changed = {
            let mut current = self.params.lock();
            let changed = *current != params;
            *current = params;
            changed
        };
        if changed {
            self.invalidate(TimeRange::ALL);
        }
    }

    /// Store the summary for a rendered span and validate it.
    pub fn write(&self, waveform: AudioWaveform) {
        let range = waveform.range;
        {
            let mut segments = self.segments.lock();
            segments.retain(|s| !s.range.overlaps_with(&range, false, false));
            segments.push(waveform);
            segments.sort_by_key(|s| s.range.in_point());
        }
        self.base.validate(range);
    }

    /// Summaries overlapping `range`, in time order.
    pub fn summary_for(&self, range: TimeRange) -> Vec<AudioWaveform> {
        self.segments
            .lock()
            .iter()
            .filter(|s| s.range.overlaps_with(&range, false, false))
            .cloned()
            .collect()
    }

    pub fn has_summary_at(&self, time: RationalTime) -> bool {
        self.segments.lock().iter().any(|s| s.range.contains(time))
    }

    /// Invalidate and drop every summary touching `range`.
    pub fn invalidate(&self, range: TimeRange) {
        self.segments
            .lock()
            .retain(|s| !s.range.overlaps_with(&range, false, false));
        self.base.invalidate(range);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_core::SampleFormat;

    #[test]
    fn test_waveform_basic() {
        // 100 samples, 10 per pixel → 10 pixels
        let samples: Vec<f32> = (0..100).map(|i| (i as f32 / 100.0) * 2.0 - 1.0).collect();
        let wf = Waveform::compute(&samples, 10, 44100);
        assert_eq!(wf.data.len(), 10);
        assert!(wf.data[0].min < -0.8);
        assert!(wf.data[0].max < 0.0);
        assert!(wf.data[9].min > 0.7);
        assert!(wf.data[9].max > 0.9);
    }

    #[test]
    fn test_waveform_rms() {
        let samples = vec![0.5f32; 1000];
        let wf = Waveform::compute(&samples, 100, 48000);
        let rms = wf.rms_range(0, wf.data.len());
        assert!((rms - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_waveform_empty() {
        let wf = Waveform::compute(&[], 100, 48000);
        assert!(wf.data.is_empty());
        assert_eq!(wf.duration_seconds(), 0.0);
    }

    #[test]
    fn test_cache_write_and_invalidate() {
        let cache = AudioWaveformCache::new("/tmp/unused");
        let params = AudioParams::new(48000, 2, SampleFormat::F32);
        let samples = SampleBuffer::new(params, 48000);

        cache.write(AudioWaveform::from_samples(TimeRange::seconds(0, 1), &samples));
        cache.write(AudioWaveform::from_samples(TimeRange::seconds(1, 2), &samples));
        assert_eq!(cache.summary_for(TimeRange::seconds(0, 2)).len(), 2);
        assert_eq!(cache.summary_for(TimeRange::seconds(0, 2))[0].channels.len(), 2);
        assert!(cache.playback().is_validated(&TimeRange::seconds(0, 2)));

        cache.invalidate(TimeRange::seconds(1, 2));
        assert_eq!(cache.summary_for(TimeRange::seconds(0, 2)).len(), 1);
        assert!(!cache.has_summary_at(RationalTime::new(3, 2)));
    }
}

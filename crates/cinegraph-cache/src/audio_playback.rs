//! Segmented PCM cache of rendered audio.
//!
//! Rendered audio is split into fixed-length segments stored as raw
//! interleaved little-endian `f32` at `{cache_dir}/{uuid}/audio/{index}.pcm`.
//! A write touches only the segments its range overlaps.

use cinegraph_core::{AudioParams, RationalTime, Result, SampleBuffer, TimeRange};
use parking_lot::RwLock;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::playback::PlaybackCache;

const BYTES_PER_SAMPLE: usize = 4;

#[derive(Debug)]
pub struct AudioPlaybackCache {
    base: PlaybackCache,
    params: RwLock<AudioParams>,
    segment_secs: i64,
}

impl AudioPlaybackCache {
    pub fn new(dir: impl Into<PathBuf>, segment_secs: u64) -> Self {
        Self {
            base: PlaybackCache::new(dir),
            params: RwLock::new(AudioParams::default()),
            segment_secs: segment_secs.max(1) as i64,
        }
    }

    pub fn playback(&self) -> &PlaybackCache {
        &self.base
    }

    pub fn parameters(&self) -> AudioParams {
        *self.params.read()
    }

    /// Changing the sample layout invalidates every stored segment.
    pub fn set_parameters(&self, params: AudioParams) {
        if *self.params.read() == params {
            return;
        }
        *self.params.write() = params;
        self.base.invalidate_all();
    }

    fn samples_per_segment(&self, params: &AudioParams) -> i64 {
        params.sample_rate as i64 * self.segment_secs
    }

    /// File holding segment `index`.
    pub fn segment_path(&self, index: i64) -> PathBuf {
        self.base
            .cache_path()
            .join("audio")
            .join(format!("{index}.pcm"))
    }

    /// Store `samples` as the audio for `range` and validate it.
    ///
    /// Samples beyond the range are ignored; a short buffer validates only
    /// what it covers.
    pub fn write_part(&self, range: TimeRange, samples: &SampleBuffer) -> Result<()> {
        let params = self.parameters();
        if range.is_empty() || !params.is_valid() {
            return Ok(());
        }
        let channels = params.channel_count as usize;
        let start = params.time_to_samples(range.in_point()).max(0);
        let wanted = params.time_to_samples(range.out_point()) - start;
        let count = wanted.min(samples.sample_count() as i64).max(0);
        if count == 0 {
            return Ok(());
        }

        let per_segment = self.samples_per_segment(&params);
        let mut written = 0i64;
        while written < count {
            let abs = start + written;
            let segment = abs.div_euclid(per_segment);
            let offset = abs.rem_euclid(per_segment);
            let chunk = (per_segment - offset).min(count - written);

            let mut bytes = Vec::with_capacity(chunk as usize * channels * BYTES_PER_SAMPLE);
            for i in 0..chunk as usize {
                for ch in 0..channels {
                    let s = samples
                        .channel(ch)
                        .get(written as usize + i)
                        .copied()
                        .unwrap_or(0.0);
                    bytes.extend_from_slice(&s.to_le_bytes());
                }
            }

            let path = self.segment_path(segment);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)?;
            file.seek(SeekFrom::Start(
                (offset as usize * channels * BYTES_PER_SAMPLE) as u64,
            ))?;
            file.write_all(&bytes)?;
            written += chunk;
        }

        let end = if count == wanted {
            range.out_point()
        } else {
            params.samples_to_time(start + count)
        };
        debug!("Audio cache {} wrote {} samples", self.base.uuid(), count);
        self.base.validate(TimeRange::new(range.in_point(), end));
        Ok(())
    }

    /// Read back `range`. Anything not on disk comes back as silence.
    pub fn read(&self, range: TimeRange) -> SampleBuffer {
        let params = self.parameters();
        let start = params.time_to_samples(range.in_point()).max(0);
        let count = (params.time_to_samples(range.out_point()) - start).max(0) as usize;
        let channels = params.channel_count as usize;
        let mut out = SampleBuffer::new(params, count);
        if count == 0 || channels == 0 {
            return out;
        }

        let per_segment = self.samples_per_segment(&params);
        let mut done = 0usize;
        while done < count {
            let abs = start + done as i64;
            let segment = abs.div_euclid(per_segment);
            let offset = abs.rem_euclid(per_segment);
            let chunk = ((per_segment - offset) as usize).min(count - done);

            match self.read_segment(segment, offset, chunk, channels) {
                Ok(data) => {
                    for (i, frame) in data.chunks_exact(channels).enumerate() {
                        for (ch, s) in frame.iter().enumerate() {
                            if let Some(dst) = out.channel_mut(ch) {
                                dst[done + i] = *s;
                            }
                        }
                    }
                }
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to read audio segment {}: {}", segment, e);
                    }
                }
            }
            done += chunk;
        }
        out
    }

    fn read_segment(
        &self,
        segment: i64,
        offset: i64,
        samples: usize,
        channels: usize,
    ) -> std::io::Result<Vec<f32>> {
        let mut file = fs::File::open(self.segment_path(segment))?;
        file.seek(SeekFrom::Start(
            (offset as usize * channels * BYTES_PER_SAMPLE) as u64,
        ))?;
        let mut bytes = Vec::with_capacity(samples * channels * BYTES_PER_SAMPLE);
        file.take((samples * channels * BYTES_PER_SAMPLE) as u64)
            .read_to_end(&mut bytes)?;
        Ok(bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Segment length as time.
    pub fn segment_length(&self) -> RationalTime {
        RationalTime::from_integer(self.segment_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_core::SampleFormat;

    fn params() -> AudioParams {
        AudioParams::new(100, 2, SampleFormat::F32)
    }

    #[test]
    fn test_write_read_across_segments() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioPlaybackCache::new(dir.path(), 1);
        cache.set_parameters(params());

        let left: Vec<f32> = (0..150).map(|i| i as f32 / 150.0).collect();
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        let buf = SampleBuffer::from_planar(params(), vec![left.clone(), right]);

        let range = TimeRange::new(RationalTime::new(1, 2), RationalTime::from_integer(2));
        cache.write_part(range, &buf).unwrap();
        assert!(cache.playback().is_validated(&range));
        assert!(cache.segment_path(0).exists());
        assert!(cache.segment_path(1).exists());

        let back = cache.read(range);
        assert_eq!(back.sample_count(), 150);
        assert_eq!(back.channel(0), left.as_slice());
        assert_eq!(back.channel(1)[10], -left[10]);
    }

    #[test]
    fn test_missing_reads_silence() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioPlaybackCache::new(dir.path(), 10);
        cache.set_parameters(params());
        let back = cache.read(TimeRange::seconds(3, 4));
        assert_eq!(back.sample_count(), 100);
        assert!(back.channel(0).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_short_buffer_validates_covered_part() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioPlaybackCache::new(dir.path(), 10);
        cache.set_parameters(params());
        let buf = SampleBuffer::new(params(), 50);
        cache.write_part(TimeRange::seconds(0, 1), &buf).unwrap();
        assert!(cache
            .playback()
            .is_validated(&TimeRange::new(RationalTime::ZERO, RationalTime::new(1, 2))));
        assert!(!cache.playback().is_validated(&TimeRange::seconds(0, 1)));
    }

    #[test]
    fn test_parameter_change_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioPlaybackCache::new(dir.path(), 10);
        cache.set_parameters(params());
        cache.write_part(TimeRange::seconds(0, 1), &SampleBuffer::new(params(), 100)).unwrap();
        cache.set_parameters(AudioParams::new(200, 2, SampleFormat::F32));
        assert!(cache.playback().validated_ranges().is_empty());
    }
}

//! Disk cache of rendered video frames.
//!
//! Every frame lives in its own file at `{cache_dir}/{uuid}/{timestamp}`,
//! where the timestamp is the frame time quantized to the cache timebase.
//! Any thread can compute the path on its own; no lookup table is shared.

use cinegraph_core::{
    CineError, Frame, PixelFormat, RationalTime, Result, Rounding, TimeRange, VideoParams,
};
use parking_lot::RwLock;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::playback::PlaybackCache;

const FRAME_MAGIC: &[u8; 4] = b"CGFR";
const FRAME_VERSION: u8 = 1;

/// Thumbnail caches share the frame cache implementation with a fixed timebase.
pub type ThumbnailCache = FrameHashCache;

/// Frame cache keyed by quantized timestamp.
#[derive(Debug)]
pub struct FrameHashCache {
    base: PlaybackCache,
    timebase: RwLock<RationalTime>,
    fixed_timebase: bool,
}

impl FrameHashCache {
    pub fn new(dir: impl Into<PathBuf>, timebase: RationalTime) -> Self {
        Self {
            base: PlaybackCache::new(dir),
            timebase: RwLock::new(timebase),
            fixed_timebase: false,
        }
    }

    /// A thumbnail cache, quantized to 1/10 s.
    pub fn new_thumbnail(dir: impl Into<PathBuf>) -> Self {
        Self {
            base: PlaybackCache::new(dir),
            timebase: RwLock::new(RationalTime::new(1, 10)),
            fixed_timebase: true,
        }
    }

    pub fn playback(&self) -> &PlaybackCache {
        &self.base
    }

    pub fn timebase(&self) -> RationalTime {
        *self.timebase.read()
    }

    /// Change the quantization. Everything cached so far is invalidated.
    pub fn set_timebase(&self, timebase: RationalTime) {
        if self.fixed_timebase || timebase == self.timebase() {
            return;
        }
        *self.timebase.write() = timebase;
        self.base.invalidate_all();
    }

    pub fn to_timestamp(&self, time: RationalTime) -> i64 {
        time.to_timestamp(self.timebase(), Rounding::Round)
    }

    pub fn to_time(&self, timestamp: i64) -> RationalTime {
        RationalTime::from_timestamp(timestamp, self.timebase())
    }

    /// Range covered by one quantized frame.
    pub fn timestamp_range(&self, timestamp: i64) -> TimeRange {
        TimeRange::new(self.to_time(timestamp), self.to_time(timestamp + 1))
    }

    pub fn validate_timestamp(&self, timestamp: i64) {
        self.base.validate(self.timestamp_range(timestamp));
    }

    pub fn validate_time(&self, time: RationalTime) {
        self.validate_timestamp(self.to_timestamp(time));
    }

    pub fn is_frame_cached(&self, time: RationalTime) -> bool {
        self.base
            .validated_ranges()
            .contains_time(self.to_time(self.to_timestamp(time)))
    }

    pub fn invalidate(&self, range: TimeRange) {
        self.base.invalidate(range);
    }

    /// Deterministic file path for a frame.
    pub fn cache_path_name(cache_dir: &Path, uuid: Uuid, timestamp: i64) -> PathBuf {
        cache_dir.join(uuid.to_string()).join(timestamp.to_string())
    }

    /// Path the frame at `time` is (or will be) stored at.
    pub fn filename_for_time(&self, time: RationalTime) -> PathBuf {
        Self::cache_path_name(
            &self.base.cache_dir(),
            self.base.uuid_for_time(time),
            self.to_timestamp(time),
        )
    }

    /// Path of a cached frame if one has been validated for `time`.
    pub fn valid_cache_filename(&self, time: RationalTime) -> Option<PathBuf> {
        if self.is_frame_cached(time) {
            Some(self.filename_for_time(time))
        } else {
            None
        }
    }

    /// Write `frame` to the slot for `time` without validating it.
    pub fn save_cache_frame(&self, time: RationalTime, frame: &Frame) -> Result<PathBuf> {
        let path = Self::cache_path_name(
            &self.base.cache_dir(),
            self.base.uuid(),
            self.to_timestamp(time),
        );
        Self::save_cache_frame_to(&path, frame)?;
        Ok(path)
    }

    /// Load the validated frame at `time`.
    pub fn load_cache_frame(&self, time: RationalTime) -> Option<Frame> {
        let path = self.valid_cache_filename(time)?;
        match Self::load_cache_frame_from(&path) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("Failed to load cached frame {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Drop the validation of whatever timestamp `path` stored, if it belongs here.
    pub fn file_deleted(&self, path: &Path) {
        let Some(timestamp) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<i64>().ok())
        else {
            return;
        };
        let owner = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .and_then(|n| Uuid::parse_str(n).ok());
        if owner == Some(self.base.uuid()) {
            self.base.invalidate(self.timestamp_range(timestamp));
        }
    }

    /// Write a raw frame dump: header followed by tightly packed rows.
    ///
    /// The file is written beside its destination and renamed into place so
    /// concurrent readers never observe a partial frame.
    pub fn save_cache_frame_to(path: &Path, frame: &Frame) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("partial");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            let params = frame.params();
            out.write_all(FRAME_MAGIC)?;
            out.write_all(&[FRAME_VERSION, format_code(params.format), params.channel_count as u8, 0])?;
            out.write_all(&params.width.to_le_bytes())?;
            out.write_all(&params.height.to_le_bytes())?;
            out.write_all(&params.timebase.numer().to_le_bytes())?;
            out.write_all(&params.timebase.denom().to_le_bytes())?;
            for y in 0..frame.height() {
                out.write_all(frame.row(y))?;
            }
            out.flush()?;
        }
        fs::rename(&tmp, path)?;
        debug!("Saved cache frame {}", path.display());
        Ok(())
    }

    pub fn load_cache_frame_from(path: &Path) -> Result<Frame> {
        let mut input = BufReader::new(File::open(path)?);
        let mut header = [0u8; 32];
        input.read_exact(&mut header)?;
        if &header[0..4] != FRAME_MAGIC || header[4] != FRAME_VERSION {
            return Err(CineError::Cache(format!("{} is not a cache frame", path.display())));
        }
        let format = format_from_code(header[5])
            .ok_or_else(|| CineError::UnsupportedFormat(format!("pixel format code {}", header[5])))?;
        let channel_count = header[6] as u32;
        let read_u32 = |at: usize| u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);
        let read_i64 = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&header[at..at + 8]);
            i64::from_le_bytes(b)
        };
        let width = read_u32(8);
        let height = read_u32(12);
        let (numer, denom) = (read_i64(16), read_i64(24));
        if denom == 0 {
            return Err(CineError::Cache(format!("{} has an invalid timebase", path.display())));
        }

        let params = VideoParams::new(width, height, RationalTime::new(numer, denom), format, channel_count);
        if !params.is_valid() {
            return Err(CineError::Cache(format!("{} has invalid video params", path.display())));
        }
        let mut frame = Frame::new(params);
        for y in 0..height {
            input.read_exact(frame.row_mut(y))?;
        }
        Ok(frame)
    }
}

fn format_code(format: PixelFormat) -> u8 {
    match format {
        PixelFormat::U8 => 1,
        PixelFormat::U16 => 2,
        PixelFormat::F16 => 3,
        PixelFormat::F32 => 4,
    }
}

fn format_from_code(code: u8) -> Option<PixelFormat> {
    match code {
        1 => Some(PixelFormat::U8),
        2 => Some(PixelFormat::U16),
        3 => Some(PixelFormat::F16),
        4 => Some(PixelFormat::F32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_core::Color;

    fn cache(dir: &Path) -> FrameHashCache {
        FrameHashCache::new(dir, RationalTime::new(1, 24))
    }

    #[test]
    fn test_cache_path_name_is_deterministic() {
        let dir = Path::new("/cache");
        let uuid = Uuid::new_v4();
        let a = FrameHashCache::cache_path_name(dir, uuid, 42);
        let b = std::thread::spawn(move || FrameHashCache::cache_path_name(Path::new("/cache"), uuid, 42))
            .join()
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, FrameHashCache::cache_path_name(dir, uuid, 43));
        assert_ne!(a, FrameHashCache::cache_path_name(dir, Uuid::new_v4(), 42));
        assert_eq!(a, dir.join(uuid.to_string()).join("42"));
    }

    #[test]
    fn test_validate_time_quantizes() {
        let c = cache(Path::new("/tmp/unused"));
        c.validate_time(RationalTime::new(1, 24));
        assert!(c.is_frame_cached(RationalTime::new(1, 24)));
        assert!(c.is_frame_cached(RationalTime::new(3, 96)));
        assert!(!c.is_frame_cached(RationalTime::ZERO));
        assert!(!c.is_frame_cached(RationalTime::new(2, 24)));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let c = cache(dir.path());
        let params = VideoParams::new(5, 3, c.timebase(), PixelFormat::U16, 4);
        let mut frame = Frame::new(params);
        frame.set_pixel(4, 2, Color::new(0.25, 0.5, 1.0, 1.0));

        let t = RationalTime::new(5, 24);
        c.save_cache_frame(t, &frame).unwrap();
        assert!(c.load_cache_frame(t).is_none(), "not validated yet");

        c.validate_time(t);
        let loaded = c.load_cache_frame(t).unwrap();
        assert_eq!(loaded.params(), frame.params());
        for y in 0..3 {
            assert_eq!(loaded.row(y), frame.row(y));
        }
    }

    #[test]
    fn test_set_timebase_invalidates() {
        let c = cache(Path::new("/tmp/unused"));
        c.validate_timestamp(0);
        c.set_timebase(RationalTime::new(1, 30));
        assert!(!c.is_frame_cached(RationalTime::ZERO));
    }

    #[test]
    fn test_thumbnail_timebase_fixed() {
        let c = FrameHashCache::new_thumbnail(Path::new("/tmp/unused"));
        c.set_timebase(RationalTime::new(1, 24));
        assert_eq!(c.timebase(), RationalTime::new(1, 10));
    }

    #[test]
    fn test_file_deleted_invalidates_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let c = cache(dir.path());
        c.validate_timestamp(7);
        c.file_deleted(&FrameHashCache::cache_path_name(dir.path(), Uuid::new_v4(), 7));
        assert!(c.is_frame_cached(c.to_time(7)));
        c.file_deleted(&FrameHashCache::cache_path_name(dir.path(), c.playback().uuid(), 7));
        assert!(!c.is_frame_cached(c.to_time(7)));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk");
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        assert!(FrameHashCache::load_cache_frame_from(&path).is_err());
    }
}

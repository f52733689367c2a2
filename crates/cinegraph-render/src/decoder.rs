//! Decoder interface, registry and the built-in pattern decoder.
//!
//! Decoders are created per `(decoder id, stream)` and reused through the
//! [`DecoderCache`](crate::render_cache::DecoderCache). Retrieval failures are
//! reported as a [`RetrieveState`] rather than an error so a render can carry
//! on without the footage.

use cinegraph_core::{
    AudioParams, CancelAtom, Frame, PixelFormat, RationalTime, SampleBuffer, TimeRange,
    VideoParams,
};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{RenderError, Result};

/// One stream of one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodecStream {
    pub filename: String,
    pub stream_index: i32,
}

impl CodecStream {
    pub fn new(filename: impl Into<String>, stream_index: i32) -> Self {
        Self {
            filename: filename.into(),
            stream_index,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.filename.is_empty() && self.stream_index >= 0
    }
}

impl fmt::Display for CodecStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.stream_index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveVideoParams {
    pub time: RationalTime,
    /// Output raster; the divider is applied by the decoder.
    pub video_params: VideoParams,
    pub format: PixelFormat,
}

impl RetrieveVideoParams {
    pub fn new(time: RationalTime, video_params: VideoParams) -> Self {
        Self {
            time,
            format: video_params.format,
            video_params,
        }
    }
}

/// Why a retrieval produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveState {
    FailedToOpen,
    UnknownError,
    /// Audio must be conformed to the requested parameters first.
    WaitingForConform,
}

impl fmt::Display for RetrieveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FailedToOpen => "failed to open",
            Self::UnknownError => "unknown error",
            Self::WaitingForConform => "waiting for conform",
        };
        f.write_str(s)
    }
}

/// What a decoder found in a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FootageDescription {
    pub decoder_id: String,
    pub video_streams: Vec<VideoParams>,
    pub audio_streams: Vec<AudioParams>,
    pub length: RationalTime,
}

impl FootageDescription {
    pub fn is_valid(&self) -> bool {
        !self.decoder_id.is_empty()
            && (!self.video_streams.is_empty() || !self.audio_streams.is_empty())
    }
}

pub trait Decoder: Send {
    fn id(&self) -> &'static str;

    fn open(&mut self, stream: &CodecStream) -> Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn stream(&self) -> Option<&CodecStream>;

    fn retrieve_video(
        &mut self,
        params: &RetrieveVideoParams,
        cancel: Option<&CancelAtom>,
    ) -> std::result::Result<Frame, RetrieveState>;

    fn retrieve_audio(
        &mut self,
        range: TimeRange,
        params: &AudioParams,
        cancel: Option<&CancelAtom>,
    ) -> std::result::Result<SampleBuffer, RetrieveState>;

    /// Write the open stream resampled to `params`, one planar file per channel.
    fn conform_audio(
        &mut self,
        output_filenames: &[PathBuf],
        params: &AudioParams,
        cancel: Option<&CancelAtom>,
    ) -> Result<bool>;

    fn probe(&self, filename: &str, cancel: Option<&CancelAtom>) -> Option<FootageDescription>;
}

// ── Registry ────────────────────────────────────────────────────

pub type DecoderConstructor = Arc<dyn Fn() -> Box<dyn Decoder> + Send + Sync>;

/// Decoders available by id.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    constructors: BTreeMap<&'static str, DecoderConstructor>,
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(PatternDecoder::ID, Arc::new(|| Box::new(PatternDecoder::new())));
        registry
    }

    pub fn register(&mut self, id: &'static str, constructor: DecoderConstructor) {
        if self.constructors.insert(id, constructor).is_some() {
            warn!("Decoder '{}' registered twice, keeping the last one", id);
        }
    }

    pub fn create(&self, id: &str) -> Option<Box<dyn Decoder>> {
        self.constructors.get(id).map(|c| c())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(id)
    }

    /// Ask every decoder in turn until one recognizes `filename`.
    pub fn probe(&self, filename: &str, cancel: Option<&CancelAtom>) -> Option<FootageDescription> {
        for (id, constructor) in &self.constructors {
            if cancel.is_some_and(CancelAtom::is_cancelled) {
                return None;
            }
            if let Some(desc) = constructor().probe(filename, cancel) {
                debug!(decoder = id, filename, "Probed footage");
                return Some(desc);
            }
        }
        None
    }
}

// ── Pattern decoder ─────────────────────────────────────────────

/// Synthesizes color bars and a sine tone for any file name.
///
/// A file name of the form `pattern:<seconds>` sets the footage length,
/// anything else is ten seconds long.
#[derive(Debug, Default)]
pub struct PatternDecoder {
    stream: Option<CodecStream>,
    length: RationalTime,
}

impl PatternDecoder {
    pub const ID: &'static str = "pattern";
    pub const TONE_HZ: f64 = 440.0;

    pub fn new() -> Self {
        Self::default()
    }

    fn length_of(filename: &str) -> RationalTime {
        filename
            .strip_prefix("pattern:")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|&s| s > 0)
            .map_or(RationalTime::from_integer(10), RationalTime::from_integer)
    }

    fn tone(range: TimeRange, params: &AudioParams) -> SampleBuffer {
        let count = params.time_to_samples(range.length()).max(0) as usize;
        let start = params.time_to_samples(range.in_point());
        let rate = f64::from(params.sample_rate.max(1));
        let mut buf = SampleBuffer::new(*params, count);
        for ch in 0..buf.channel_count() {
            if let Some(samples) = buf.channel_mut(ch) {
                for (i, s) in samples.iter_mut().enumerate() {
                    let t = (start + i as i64) as f64 / rate;
                    *s = (0.25 * (std::f64::consts::TAU * Self::TONE_HZ * t).sin()) as f32;
                }
            }
        }
        buf
    }
}

impl Decoder for PatternDecoder {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn open(&mut self, stream: &CodecStream) -> Result<()> {
        if !stream.is_valid() {
            return Err(RenderError::Decoder(format!("invalid stream '{}'", stream)));
        }
        self.length = Self::length_of(&stream.filename);
        self.stream = Some(stream.clone());
        info!(%stream, "Opened pattern stream");
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&self) -> Option<&CodecStream> {
        self.stream.as_ref()
    }

    fn retrieve_video(
        &mut self,
        params: &RetrieveVideoParams,
        cancel: Option<&CancelAtom>,
    ) -> std::result::Result<Frame, RetrieveState> {
        if !self.is_open() {
            return Err(RetrieveState::FailedToOpen);
        }
        if cancel.is_some_and(CancelAtom::is_cancelled) {
            return Err(RetrieveState::UnknownError);
        }
        let mut vp = params.video_params;
        vp.format = params.format;
        let mut frame = Frame::test_pattern(vp);
        frame.set_timestamp(params.time);
        Ok(frame)
    }

    fn retrieve_audio(
        &mut self,
        range: TimeRange,
        params: &AudioParams,
        cancel: Option<&CancelAtom>,
    ) -> std::result::Result<SampleBuffer, RetrieveState> {
        if !self.is_open() {
            return Err(RetrieveState::FailedToOpen);
        }
        if !params.is_valid() || cancel.is_some_and(CancelAtom::is_cancelled) {
            return Err(RetrieveState::UnknownError);
        }
        Ok(Self::tone(range, params))
    }

    fn conform_audio(
        &mut self,
        output_filenames: &[PathBuf],
        params: &AudioParams,
        cancel: Option<&CancelAtom>,
    ) -> Result<bool> {
        if !self.is_open() {
            return Err(RenderError::Decoder("conform on a closed decoder".into()));
        }
        let buf = Self::tone(TimeRange::new(RationalTime::ZERO, self.length), params);
        for (ch, path) in output_filenames.iter().enumerate() {
            if cancel.is_some_and(CancelAtom::is_cancelled) {
                return Ok(false);
            }
            write_planar(path, buf.channel(ch))?;
        }
        Ok(true)
    }

    fn probe(&self, filename: &str, _cancel: Option<&CancelAtom>) -> Option<FootageDescription> {
        if filename.is_empty() {
            return None;
        }
        Some(FootageDescription {
            decoder_id: Self::ID.to_string(),
            video_streams: vec![VideoParams::default()],
            audio_streams: vec![AudioParams::default()],
            length: Self::length_of(filename),
        })
    }
}

fn write_planar(path: &Path, samples: &[f32]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut w = BufWriter::new(fs::File::create(path)?);
    for s in samples {
        w.write_all(&s.to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_registry_creates_pattern() {
        let registry = DecoderRegistry::with_builtins();
        assert!(registry.contains("pattern"));
        assert!(registry.create("ffmpeg").is_none());
        let d = registry.create("pattern").unwrap();
        assert_eq!(d.id(), "pattern");
        assert!(!d.is_open());
    }

    #[test]
    fn test_closed_decoder_fails_to_open() {
        let mut d = PatternDecoder::new();
        let p = RetrieveVideoParams::new(RationalTime::ZERO, VideoParams::default());
        assert_eq!(d.retrieve_video(&p, None).unwrap_err(), RetrieveState::FailedToOpen);
        assert!(d.open(&CodecStream::new("", 0)).is_err());
    }

    #[test]
    fn test_retrieve_video_and_audio() {
        let mut d = PatternDecoder::new();
        d.open(&CodecStream::new("pattern:4", 0)).unwrap();

        let vp = VideoParams::new(16, 8, RationalTime::new(1, 25), PixelFormat::U8, 4);
        let frame = d
            .retrieve_video(&RetrieveVideoParams::new(RationalTime::new(1, 25), vp), None)
            .unwrap();
        assert_eq!(frame.width(), 16);
        assert_eq!(frame.get_pixel(0, 0), cinegraph_core::Color::WHITE);

        let ap = AudioParams::default();
        let buf = d
            .retrieve_audio(TimeRange::new(RationalTime::ZERO, RationalTime::new(1, 10)), &ap, None)
            .unwrap();
        assert_eq!(buf.sample_count(), ap.sample_rate as usize / 10);
        assert_eq!(buf.channel(0)[0], 0.0);
    }

    #[test]
    fn test_cancelled_retrieval() {
        let mut d = PatternDecoder::new();
        d.open(&CodecStream::new("a", 0)).unwrap();
        let cancel = CancelAtom::new();
        cancel.cancel();
        let r = d.retrieve_audio(TimeRange::seconds(0, 1), &AudioParams::default(), Some(&cancel));
        assert_eq!(r.unwrap_err(), RetrieveState::UnknownError);
        assert!(cancel.heard_cancel());
    }

    #[test]
    fn test_conform_writes_one_file_per_channel() {
        let dir = TempDir::new().unwrap();
        let mut d = PatternDecoder::new();
        d.open(&CodecStream::new("pattern:1", 0)).unwrap();
        let ap = AudioParams::default();
        let files: Vec<PathBuf> = (0..ap.channel_count)
            .map(|c| dir.path().join(format!("conform.{c}.pcm")))
            .collect();
        assert!(d.conform_audio(&files, &ap, None).unwrap());
        let len = fs::metadata(&files[0]).unwrap().len();
        assert_eq!(len, u64::from(ap.sample_rate) * 4);
    }

    #[test]
    fn test_probe_length() {
        let registry = DecoderRegistry::with_builtins();
        let desc = registry.probe("pattern:3", None).unwrap();
        assert!(desc.is_valid());
        assert_eq!(desc.length, RationalTime::from_integer(3));
        assert!(registry.probe("", None).is_none());
    }
}

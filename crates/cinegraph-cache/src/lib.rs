//! CineGraph Cache - disk-backed playback caches
//!
//! Rendered output is remembered per time range:
//! - `PlaybackCache`: validated/requested ranges, passthroughs, events
//! - `FrameHashCache`: one file per quantized frame timestamp
//! - `AudioPlaybackCache`: segmented PCM files
//! - `AudioWaveformCache`: min/max summaries for drawing
//! - `DiskCacheFolder`: byte quota with LRU eviction

pub mod audio_playback;
pub mod disk;
pub mod frame_hash;
pub mod playback;
pub mod waveform;

pub use audio_playback::AudioPlaybackCache;
pub use disk::DiskCacheFolder;
pub use frame_hash::{FrameHashCache, ThumbnailCache};
pub use playback::{CacheEvent, Passthrough, PlaybackCache};
pub use waveform::{AudioWaveform, AudioWaveformCache, Waveform, WaveformSample};

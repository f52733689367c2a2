//! What a render ticket asks for.

use cinegraph_core::{
    AudioParams, ColorProcessorPtr, PixelFormat, RationalTime, TimeRange, VideoParams,
};
use cinegraph_node::{LoopMode, NodeId, Project};
use glam::DMat4;
use parking_lot::RwLock;
use std::sync::Arc;

/// A project readable from render threads.
pub type SharedProject = Arc<RwLock<Project>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Full quality, e.g. for export.
    Offline,
    /// Preview quality.
    #[default]
    Online,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnType {
    /// Download the result into a CPU frame.
    #[default]
    Frame,
    Texture,
    /// Render for side effects only.
    Null,
}

/// Which of the rendered node's caches receives the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTarget {
    Video,
    Thumbnail,
}

#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub project: SharedProject,
    pub node: NodeId,
    pub time: RationalTime,
    pub video_params: VideoParams,
    pub audio_params: AudioParams,
    pub mode: RenderMode,
    pub return_type: ReturnType,
    pub loop_mode: LoopMode,
    /// Load the frame from the node's video cache when it is already there.
    pub use_cache: bool,
    pub cache: Option<CacheTarget>,
    pub force_size: Option<(u32, u32)>,
    pub force_format: Option<PixelFormat>,
    pub force_channel_count: Option<u32>,
    pub force_matrix: Option<DMat4>,
    pub force_color_output: Option<ColorProcessorPtr>,
}

impl VideoRequest {
    pub fn new(project: SharedProject, node: NodeId, time: RationalTime, video_params: VideoParams) -> Self {
        Self {
            project,
            node,
            time,
            video_params,
            audio_params: AudioParams::default(),
            mode: RenderMode::default(),
            return_type: ReturnType::default(),
            loop_mode: LoopMode::Off,
            use_cache: false,
            cache: None,
            force_size: None,
            force_format: None,
            force_channel_count: None,
            force_matrix: None,
            force_color_output: None,
        }
    }

    /// Raster of the returned frame after every override.
    pub fn output_params(&self) -> VideoParams {
        let mut p = self.video_params;
        if let Some((w, h)) = self.force_size {
            p.width = w;
            p.height = h;
        }
        if let Some(f) = self.force_format {
            p.format = f;
        }
        if let Some(c) = self.force_channel_count {
            p.channel_count = c;
        }
        p
    }

    /// Whether the rendered texture needs a conversion pass before returning.
    pub fn needs_conversion(&self) -> bool {
        self.force_size.is_some()
            || self.force_format.is_some()
            || self.force_channel_count.is_some()
            || self.force_matrix.is_some()
            || self.force_color_output.is_some()
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.time, self.time + self.video_params.timebase)
    }
}

#[derive(Debug, Clone)]
pub struct AudioRequest {
    pub project: SharedProject,
    pub node: NodeId,
    pub range: TimeRange,
    pub audio_params: AudioParams,
    pub mode: RenderMode,
    pub generate_waveform: bool,
    pub clamp: bool,
}

impl AudioRequest {
    pub fn new(project: SharedProject, node: NodeId, range: TimeRange, audio_params: AudioParams) -> Self {
        Self {
            project,
            node,
            range,
            audio_params,
            mode: RenderMode::default(),
            generate_waveform: false,
            clamp: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RenderRequest {
    Video(VideoRequest),
    Audio(AudioRequest),
    /// Traverse without producing pixels so decoders get opened ahead of time.
    DryRun(VideoRequest),
}

impl RenderRequest {
    pub fn node(&self) -> NodeId {
        match self {
            Self::Video(r) | Self::DryRun(r) => r.node,
            Self::Audio(r) => r.node,
        }
    }
}

//! Video parameters and CPU-side frame buffers.
//!
//! A [`Frame`] stores packed pixels with a 64-byte aligned line size so it can
//! be handed to a render backend upload without repacking.

use half::f16;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::color::Color;
use crate::time::RationalTime;

/// Per-channel sample format of a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit unsigned normalized
    U8,
    /// 16-bit unsigned normalized
    U16,
    /// 16-bit half float
    #[default]
    F16,
    /// 32-bit float
    F32,
}

impl PixelFormat {
    pub fn bytes_per_channel(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 | Self::F16 => 2,
            Self::F32 => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::F32)
    }

    /// Read one channel value at the start of `bytes`.
    #[inline]
    pub fn read_channel(self, bytes: &[u8]) -> f32 {
        match self {
            Self::U8 => bytes[0] as f32 / 255.0,
            Self::U16 => u16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / 65535.0,
            Self::F16 => f16::from_ne_bytes([bytes[0], bytes[1]]).to_f32(),
            Self::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Write one channel value at the start of `bytes`, quantizing as needed.
    #[inline]
    pub fn write_channel(self, bytes: &mut [u8], value: f32) {
        match self {
            Self::U8 => bytes[0] = (value.clamp(0.0, 1.0) * 255.0).round() as u8,
            Self::U16 => {
                let v = (value.clamp(0.0, 1.0) * 65535.0).round() as u16;
                bytes[..2].copy_from_slice(&v.to_ne_bytes());
            }
            Self::F16 => bytes[..2].copy_from_slice(&f16::from_f32(value).to_ne_bytes()),
            Self::F32 => bytes[..4].copy_from_slice(&value.to_ne_bytes()),
        }
    }
}

/// Field order of interlaced material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Interlacing {
    #[default]
    None,
    TopFirst,
    BottomFirst,
}

/// Everything needed to describe a video raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    /// Always 1 for 2D textures.
    pub depth: u32,
    /// Duration of one frame.
    pub timebase: RationalTime,
    pub format: PixelFormat,
    pub channel_count: u32,
    pub pixel_aspect_ratio: f64,
    pub interlacing: Interlacing,
    /// Resolution divider used for proxy-quality rendering.
    pub divider: u32,
}

impl VideoParams {
    pub fn new(
        width: u32,
        height: u32,
        timebase: RationalTime,
        format: PixelFormat,
        channel_count: u32,
    ) -> Self {
        Self {
            width,
            height,
            depth: 1,
            timebase,
            format,
            channel_count,
            pixel_aspect_ratio: 1.0,
            interlacing: Interlacing::None,
            divider: 1,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.depth > 0
            && self.channel_count > 0
            && self.channel_count <= 4
            && self.timebase > RationalTime::ZERO
            && self.divider > 0
    }

    /// Width after applying the divider.
    pub fn effective_width(&self) -> u32 {
        (self.width / self.divider.max(1)).max(1)
    }

    /// Height after applying the divider.
    pub fn effective_height(&self) -> u32 {
        (self.height / self.divider.max(1)).max(1)
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.format.bytes_per_channel() * self.channel_count as usize
    }

    /// Aligned line size in bytes for a raster of `width` pixels.
    pub fn line_size_for(&self, width: u32) -> usize {
        let min_stride = width as usize * self.bytes_per_pixel();
        (min_stride + 63) & !63
    }

    /// Copy with the divider applied to width and height.
    pub fn scaled(&self) -> Self {
        Self {
            width: self.effective_width(),
            height: self.effective_height(),
            divider: 1,
            ..*self
        }
    }
}

impl Default for VideoParams {
    fn default() -> Self {
        Self::new(1920, 1080, RationalTime::new(1, 30), PixelFormat::default(), 4)
    }
}

// ── Frame ───────────────────────────────────────────────────────

/// A video frame in CPU memory.
#[derive(Debug, Clone)]
pub struct Frame {
    params: VideoParams,
    line_size: usize,
    data: Vec<u8>,
    timestamp: RationalTime,
}

/// Arc-wrapped frame for shared ownership.
pub type FramePtr = Arc<Frame>;

impl Frame {
    /// Allocate a zeroed frame for the given parameters, divider applied.
    pub fn new(params: VideoParams) -> Self {
        let params = params.scaled();
        let line_size = params.line_size_for(params.width);
        Self {
            params,
            line_size,
            data: vec![0u8; line_size * params.height as usize],
            timestamp: RationalTime::ZERO,
        }
    }

    /// Wrap an existing buffer. Returns `None` if it is too small.
    pub fn from_buffer(params: VideoParams, line_size: usize, data: Vec<u8>) -> Option<Self> {
        let params = params.scaled();
        let row = params.width as usize * params.bytes_per_pixel();
        if line_size < row || data.len() < line_size * params.height as usize {
            return None;
        }
        Some(Self {
            params,
            line_size,
            data,
            timestamp: RationalTime::ZERO,
        })
    }

    #[inline]
    pub fn params(&self) -> &VideoParams {
        &self.params
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.params.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.params.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.params.format
    }

    #[inline]
    pub fn channel_count(&self) -> u32 {
        self.params.channel_count
    }

    /// Bytes per row including padding.
    #[inline]
    pub fn line_size(&self) -> usize {
        self.line_size
    }

    /// Row stride in pixels.
    pub fn line_size_pixels(&self) -> usize {
        self.line_size / self.params.bytes_per_pixel().max(1)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn allocated_size(&self) -> usize {
        self.data.len()
    }

    pub fn timestamp(&self) -> RationalTime {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: RationalTime) {
        self.timestamp = timestamp;
    }

    /// Pixel bytes of one row without padding.
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.line_size;
        &self.data[start..start + self.params.width as usize * self.params.bytes_per_pixel()]
    }

    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.line_size;
        let len = self.params.width as usize * self.params.bytes_per_pixel();
        &mut self.data[start..start + len]
    }

    /// Read a pixel. Missing channels read as 0, missing alpha as 1.
    pub fn get_pixel(&self, x: u32, y: u32) -> Color {
        if x >= self.width() || y >= self.height() {
            return Color::TRANSPARENT;
        }
        let format = self.params.format;
        let bpc = format.bytes_per_channel();
        let channels = self.params.channel_count as usize;
        let offset = y as usize * self.line_size + x as usize * bpc * channels;
        let mut out = [0.0, 0.0, 0.0, 1.0];
        for (c, slot) in out.iter_mut().enumerate().take(channels.min(4)) {
            *slot = format.read_channel(&self.data[offset + c * bpc..]);
        }
        Color::from_array(out)
    }

    /// Write a pixel, dropping channels the frame doesn't store.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x >= self.width() || y >= self.height() {
            return;
        }
        let format = self.params.format;
        let bpc = format.bytes_per_channel();
        let channels = self.params.channel_count as usize;
        let offset = y as usize * self.line_size + x as usize * bpc * channels;
        for (c, value) in color.to_array().into_iter().enumerate().take(channels.min(4)) {
            format.write_channel(&mut self.data[offset + c * bpc..], value);
        }
    }

    pub fn fill(&mut self, color: Color) {
        for y in 0..self.height() {
            for x in 0..self.width() {
                self.set_pixel(x, y, color);
            }
        }
    }

    /// Copy into a frame with a different format and/or channel count.
    pub fn convert_to(&self, format: PixelFormat, channel_count: u32) -> Frame {
        let mut params = self.params;
        params.format = format;
        params.channel_count = channel_count;
        let mut out = Frame::new(params);
        out.timestamp = self.timestamp;
        for y in 0..self.height() {
            for x in 0..self.width() {
                out.set_pixel(x, y, self.get_pixel(x, y));
            }
        }
        out
    }

    /// Create a test pattern frame (color bars).
    pub fn test_pattern(params: VideoParams) -> Self {
        const BARS: [Color; 8] = [
            Color::WHITE,
            Color::new(1.0, 1.0, 0.0, 1.0),
            Color::new(0.0, 1.0, 1.0, 1.0),
            Color::GREEN,
            Color::new(1.0, 0.0, 1.0, 1.0),
            Color::RED,
            Color::BLUE,
            Color::BLACK,
        ];
        let mut frame = Self::new(params);
        let width = frame.width();
        for y in 0..frame.height() {
            for x in 0..width {
                frame.set_pixel(x, y, BARS[(x * 8 / width) as usize]);
            }
        }
        frame
    }
}

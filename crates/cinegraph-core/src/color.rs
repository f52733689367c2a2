//! Color types, color spaces and color processors.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::frame::Frame;

/// RGBA color with 32-bit float components.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// Create a new color from RGBA components.
    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Create a color from RGB with alpha = 1.0.
    #[inline]
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Create a color from 8-bit RGBA values.
    #[inline]
    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: a as f32 / 255.0,
        }
    }

    #[inline]
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    #[inline]
    pub fn from_array(c: [f32; 4]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }

    /// Premultiply alpha.
    #[inline]
    pub fn premultiply(self) -> Self {
        Self {
            r: self.r * self.a,
            g: self.g * self.a,
            b: self.b * self.a,
            a: self.a,
        }
    }

    /// Undo alpha premultiplication. Fully transparent colors stay as they are.
    #[inline]
    pub fn unpremultiply(self) -> Self {
        if self.a <= 0.0 {
            return self;
        }
        Self {
            r: self.r / self.a,
            g: self.g / self.a,
            b: self.b / self.a,
            a: self.a,
        }
    }

    /// Linear interpolation between two colors.
    #[inline]
    pub fn lerp(self, other: Self, t: f32) -> Self {
        Self {
            r: self.r + (other.r - self.r) * t,
            g: self.g + (other.g - self.g) * t,
            b: self.b + (other.b - self.b) * t,
            a: self.a + (other.a - self.a) * t,
        }
    }

    // Common colors
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    pub const RED: Self = Self::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Self = Self::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Self = Self::new(0.0, 0.0, 1.0, 1.0);
}

// ── Color spaces ────────────────────────────────────────────────

/// Transfer function (gamma/OETF/EOTF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransferFunction {
    /// Linear (gamma 1.0)
    Linear,
    /// sRGB transfer function
    #[default]
    Srgb,
    /// Rec. 709 transfer function
    Rec709,
    /// PQ (Perceptual Quantizer) for HDR
    Pq,
    /// HLG (Hybrid Log-Gamma) for HDR
    Hlg,
}

impl TransferFunction {
    /// Encode a linear value for display.
    pub fn apply(self, linear: f32) -> f32 {
        match self {
            Self::Linear => linear,
            Self::Srgb => {
                if linear <= 0.0031308 {
                    linear * 12.92
                } else {
                    1.055 * linear.powf(1.0 / 2.4) - 0.055
                }
            }
            Self::Rec709 => {
                if linear < 0.018 {
                    linear * 4.5
                } else {
                    1.099 * linear.powf(0.45) - 0.099
                }
            }
            Self::Pq => {
                let (m1, m2, c1, c2, c3) = PQ_CONSTANTS;
                let y = linear.max(0.0).powf(m1);
                ((c1 + c2 * y) / (1.0 + c3 * y)).powf(m2)
            }
            Self::Hlg => {
                let (a, b, c) = HLG_CONSTANTS;
                if linear <= 1.0 / 12.0 {
                    (3.0 * linear.max(0.0)).sqrt()
                } else {
                    a * (12.0 * linear - b).ln() + c
                }
            }
        }
    }

    /// Decode a display value to linear.
    pub fn invert(self, display: f32) -> f32 {
        match self {
            Self::Linear => display,
            Self::Srgb => {
                if display <= 0.04045 {
                    display / 12.92
                } else {
                    ((display + 0.055) / 1.055).powf(2.4)
                }
            }
            Self::Rec709 => {
                if display < 0.081 {
                    display / 4.5
                } else {
                    ((display + 0.099) / 1.099).powf(1.0 / 0.45)
                }
            }
            Self::Pq => {
                let (m1, m2, c1, c2, c3) = PQ_CONSTANTS;
                let e = display.max(0.0).powf(1.0 / m2);
                ((e - c1).max(0.0) / (c2 - c3 * e)).powf(1.0 / m1)
            }
            Self::Hlg => {
                let (a, b, c) = HLG_CONSTANTS;
                if display <= 0.5 {
                    display * display / 3.0
                } else {
                    (((display - c) / a).exp() + b) / 12.0
                }
            }
        }
    }
}

const PQ_CONSTANTS: (f32, f32, f32, f32, f32) =
    (0.159_301_76, 78.843_75, 0.835_937_5, 18.851_563, 18.6875);
const HLG_CONSTANTS: (f32, f32, f32) = (0.178_832_77, 0.284_668_92, 0.559_910_7);

/// Named color spaces known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ColorSpace {
    #[default]
    Srgb,
    LinearSrgb,
    Rec709,
    Rec2020,
    Rec2100Pq,
    Rec2100Hlg,
    AcesCg,
}

impl ColorSpace {
    pub const ALL: [ColorSpace; 7] = [
        Self::Srgb,
        Self::LinearSrgb,
        Self::Rec709,
        Self::Rec2020,
        Self::Rec2100Pq,
        Self::Rec2100Hlg,
        Self::AcesCg,
    ];

    /// Display name, also used as the lookup key.
    pub fn name(self) -> &'static str {
        match self {
            Self::Srgb => "sRGB",
            Self::LinearSrgb => "Linear",
            Self::Rec709 => "Rec.709",
            Self::Rec2020 => "Rec.2020",
            Self::Rec2100Pq => "Rec.2100 PQ",
            Self::Rec2100Hlg => "Rec.2100 HLG",
            Self::AcesCg => "ACEScg",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    pub fn transfer(self) -> TransferFunction {
        match self {
            Self::Srgb => TransferFunction::Srgb,
            Self::LinearSrgb | Self::AcesCg => TransferFunction::Linear,
            Self::Rec709 | Self::Rec2020 => TransferFunction::Rec709,
            Self::Rec2100Pq => TransferFunction::Pq,
            Self::Rec2100Hlg => TransferFunction::Hlg,
        }
    }
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Project-wide color management settings.
///
/// Rendering happens in `reference_space`; footage is converted from its
/// input space on decode, viewers convert to `display_space` on output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorManager {
    pub reference_space: String,
    pub default_input_space: String,
    pub display_space: String,
}

impl Default for ColorManager {
    fn default() -> Self {
        Self {
            reference_space: ColorSpace::LinearSrgb.name().to_string(),
            default_input_space: ColorSpace::Srgb.name().to_string(),
            display_space: ColorSpace::Srgb.name().to_string(),
        }
    }
}

impl ColorManager {
    /// Processor converting footage in `input` to the reference space.
    pub fn input_processor(&self, input: &str) -> ColorProcessorPtr {
        ColorProcessor::create(input, &self.reference_space)
    }

    /// Processor converting the reference space to the display space.
    pub fn display_processor(&self) -> ColorProcessorPtr {
        ColorProcessor::create(&self.reference_space, &self.display_space)
    }
}

// ── Color processor ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Conversion {
    source: ColorSpace,
    dest: ColorSpace,
}

/// A conversion between two named color spaces.
///
/// Construction never fails: unknown space names leave a null processor,
/// which converts nothing and reports an empty [`id`](Self::id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorProcessor {
    conversion: Option<Conversion>,
    id: String,
}

pub type ColorProcessorPtr = Arc<ColorProcessor>;

impl ColorProcessor {
    pub fn create(source: &str, dest: &str) -> ColorProcessorPtr {
        let conversion = match (ColorSpace::from_name(source), ColorSpace::from_name(dest)) {
            (Some(source), Some(dest)) => Some(Conversion { source, dest }),
            _ => {
                warn!("Failed to create color processor from '{}' to '{}'", source, dest);
                None
            }
        };
        let id = conversion
            .map(|c| format!("{}>{}", c.source.name(), c.dest.name()))
            .unwrap_or_default();
        Arc::new(Self { conversion, id })
    }

    pub fn null() -> ColorProcessorPtr {
        Arc::new(Self {
            conversion: None,
            id: String::new(),
        })
    }

    pub fn is_null(&self) -> bool {
        self.conversion.is_none()
    }

    /// Cache key for this conversion. Empty for a null processor.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn convert_color(&self, c: Color) -> Color {
        let Some(conv) = self.conversion else {
            return c;
        };
        if conv.source == conv.dest {
            return c;
        }
        let src = conv.source.transfer();
        let dst = conv.dest.transfer();
        let map = |v: f32| dst.apply(src.invert(v));
        Color::new(map(c.r), map(c.g), map(c.b), c.a)
    }

    /// Convert every pixel of a frame in place.
    pub fn convert_frame(&self, frame: &mut Frame) {
        if self.is_null() {
            return;
        }
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                let c = frame.get_pixel(x, y);
                frame.set_pixel(x, y, self.convert_color(c));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PixelFormat, VideoParams};
    use crate::time::RationalTime;

    #[test]
    fn test_color_rgba8_conversion() {
        let color = Color::from_rgba8(255, 128, 0, 255);
        assert!((color.r - 1.0).abs() < 0.01);
        assert!((color.g - 0.5).abs() < 0.01);
        assert_eq!(color.b, 0.0);
        assert_eq!(color.a, 1.0);
    }

    #[test]
    fn test_srgb_transfer_round_trip() {
        let tf = TransferFunction::Srgb;
        let linear = 0.5;
        let back = tf.invert(tf.apply(linear));
        assert!((linear - back).abs() < 0.001);
    }

    #[test]
    fn test_pq_round_trip() {
        let tf = TransferFunction::Pq;
        let back = tf.invert(tf.apply(0.25));
        assert!((back - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_processor_linear_to_srgb() {
        let proc = ColorProcessor::create("Linear", "sRGB");
        assert!(!proc.is_null());
        assert_eq!(proc.id(), "Linear>sRGB");
        let c = proc.convert_color(Color::new(0.5, 0.0, 1.0, 0.5));
        assert!((c.r - TransferFunction::Srgb.apply(0.5)).abs() < 1e-6);
        assert_eq!(c.b, 1.0);
        assert_eq!(c.a, 0.5);
    }

    #[test]
    fn test_null_processor_passes_through() {
        let proc = ColorProcessor::create("Nonexistent", "sRGB");
        assert!(proc.is_null());
        assert_eq!(proc.id(), "");
        let c = Color::new(0.2, 0.3, 0.4, 1.0);
        assert_eq!(proc.convert_color(c), c);

        let mut frame = Frame::new(VideoParams::new(2, 2, RationalTime::new(1, 24), PixelFormat::F32, 4));
        frame.fill(c);
        proc.convert_frame(&mut frame);
        assert_eq!(frame.get_pixel(1, 1), c);
    }

    #[test]
    fn test_color_manager_defaults() {
        let mgr = ColorManager::default();
        assert_eq!(mgr.display_processor().id(), "Linear>sRGB");
        assert_eq!(mgr.input_processor("sRGB").id(), "sRGB>Linear");
    }
}

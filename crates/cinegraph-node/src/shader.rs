//! Shader descriptions handed from nodes to the renderer.

use serde::{Deserialize, Serialize};

/// Kernels every backend implements natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinShader {
    /// Copies `tex_in`.
    Passthrough,
    /// Composites `blend_in` over `base_in` (premultiplied).
    AlphaOver,
    /// Takes even rows from `top_in` and odd rows from `bottom_in`.
    Interlace,
    /// Fills with `color_in`.
    SolidFill,
    /// Multiplies `tex_in` by the 4x4 `matrix_in`.
    ColorMatrix,
}

impl BuiltinShader {
    pub fn id(self) -> &'static str {
        match self {
            Self::Passthrough => "builtin:passthrough",
            Self::AlphaOver => "builtin:alpha_over",
            Self::Interlace => "builtin:interlace",
            Self::SolidFill => "builtin:solid",
            Self::ColorMatrix => "builtin:color_matrix",
        }
    }
}

/// Input names read by the builtin kernels.
pub mod inputs {
    pub const TEXTURE: &str = "tex_in";
    pub const BASE: &str = "base_in";
    pub const BLEND: &str = "blend_in";
    pub const TOP: &str = "top_in";
    pub const BOTTOM: &str = "bottom_in";
    pub const COLOR: &str = "color_in";
    pub const MATRIX: &str = "matrix_in";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderSource {
    Builtin(BuiltinShader),
    /// Source text for backends with a shader compiler.
    Glsl { fragment: String, vertex: Option<String> },
}

/// What a node hands back when asked for the code behind a shader id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderCode {
    pub source: ShaderSource,
}

impl ShaderCode {
    pub fn builtin(shader: BuiltinShader) -> Self {
        Self {
            source: ShaderSource::Builtin(shader),
        }
    }

    pub fn glsl(fragment: impl Into<String>) -> Self {
        Self {
            source: ShaderSource::Glsl {
                fragment: fragment.into(),
                vertex: None,
            },
        }
    }

    pub fn as_builtin(&self) -> Option<BuiltinShader> {
        match self.source {
            ShaderSource::Builtin(b) => Some(b),
            ShaderSource::Glsl { .. } => None,
        }
    }
}

impl Default for ShaderCode {
    fn default() -> Self {
        Self::builtin(BuiltinShader::Passthrough)
    }
}

/// A request for the shader a node uses for `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderRequest {
    pub id: String,
}

impl ShaderRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Sampling filter applied to a texture input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
    MipmappedLinear,
}

//! Error types for rendering.

use cinegraph_core::CineError;
use cinegraph_node::{GraphError, TextureHandle};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Unsupported shader: {0}")]
    UnsupportedShader(String),

    #[error("Unknown texture {0:?}")]
    UnknownTexture(TextureHandle),

    #[error("Parameter mismatch: {0}")]
    ParamsMismatch(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Render thread error: {0}")]
    Thread(String),

    #[error("Engine error: {0}")]
    Engine(#[from] CineError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RenderError>;

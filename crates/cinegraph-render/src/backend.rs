//! The operations a render backend has to provide.
//!
//! Everything above this trait (texture reuse, color management, shader
//! caching, interlacing) lives in [`Renderer`](crate::renderer::Renderer) and
//! works with any backend.

use cinegraph_core::{Color, VideoParams};
use cinegraph_node::{ShaderCode, ShaderJob, TextureHandle};
use std::sync::Arc;

use crate::error::Result;

/// Backend-specific compiled shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderHandle(pub u64);

pub trait RenderBackend: Send {
    fn name(&self) -> &str;

    fn init(&mut self) -> Result<()>;

    fn post_init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release every allocation. The backend may be initialized again.
    fn destroy(&mut self);

    /// Allocate a texture, optionally filled from `data` rows `linesize` apart.
    fn create_native_texture(
        &mut self,
        params: &VideoParams,
        data: Option<(&[u8], usize)>,
    ) -> Result<TextureHandle>;

    fn destroy_native_texture(&mut self, handle: TextureHandle);

    /// Must be lossless for every pixel format.
    fn upload_to_texture(
        &mut self,
        handle: TextureHandle,
        params: &VideoParams,
        data: &[u8],
        linesize: usize,
    ) -> Result<()>;

    /// Must be lossless for every pixel format.
    fn download_from_texture(
        &mut self,
        handle: TextureHandle,
        params: &VideoParams,
        data: &mut [u8],
        linesize: usize,
    ) -> Result<()>;

    fn clear_destination(&mut self, handle: TextureHandle, color: Color) -> Result<()>;

    fn create_native_shader(&mut self, code: &ShaderCode) -> Result<ShaderHandle>;

    fn destroy_native_shader(&mut self, shader: ShaderHandle);

    /// Run `shader` with `job`'s values into `dest`.
    ///
    /// Texture values in the job must already be resolved to native textures.
    fn blit(
        &mut self,
        shader: ShaderHandle,
        job: &ShaderJob,
        dest: TextureHandle,
        dest_params: &VideoParams,
        clear_destination: bool,
    ) -> Result<()>;

    fn get_pixel_from_texture(
        &mut self,
        handle: TextureHandle,
        params: &VideoParams,
        x: u32,
        y: u32,
    ) -> Result<Color>;
}

/// Creates one backend per render thread.
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn RenderBackend> + Send + Sync>;

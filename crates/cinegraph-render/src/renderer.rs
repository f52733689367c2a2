//! Backend-independent rendering on top of a [`RenderBackend`].
//!
//! The renderer reuses released textures, caches compiled shaders per shader
//! id, keeps color contexts per processor id and implements the operations
//! that are compositions of backend calls (color managed blits, interlacing,
//! iterative shaders).

use cinegraph_core::{Color, ColorProcessor, ColorProcessorPtr, Frame, PixelFormat, VideoParams};
use cinegraph_node::shader::inputs::{BOTTOM, TOP};
use cinegraph_node::{
    BuiltinShader, Job, NativeTexture, NodeValue, NodeValueData, NodeValueRow, NodeValueType,
    ShaderCode, ShaderJob, Texture, TextureHandle, TexturePtr,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use glam::{DMat4, DVec4};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::backend::{RenderBackend, ShaderHandle};
use crate::error::{RenderError, Result};

// ── Texture pool ────────────────────────────────────────────────

/// Textures are interchangeable when their allocations match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TextureKey {
    width: u32,
    height: u32,
    depth: u32,
    format: PixelFormat,
    channels: u32,
}

impl TextureKey {
    fn of(params: &VideoParams) -> Self {
        let p = params.scaled();
        Self {
            width: p.width,
            height: p.height,
            depth: p.depth,
            format: p.format,
            channels: p.channel_count,
        }
    }
}

#[derive(Debug)]
struct FreeTexture {
    handle: TextureHandle,
    key: TextureKey,
    released: Instant,
}

#[derive(Debug, Default)]
struct TexturePool {
    live: HashMap<TextureHandle, TextureKey>,
    free: Vec<FreeTexture>,
}

/// A color conversion ready to run on this renderer.
#[derive(Debug)]
struct ColorContext {
    processor: ColorProcessorPtr,
    last_used: Instant,
}

// ── Renderer ────────────────────────────────────────────────────

pub struct Renderer {
    backend: Mutex<Box<dyn RenderBackend>>,
    pool: Mutex<TexturePool>,
    shaders: Mutex<HashMap<String, ShaderHandle>>,
    color_contexts: Mutex<HashMap<String, ColorContext>>,
    release_tx: Sender<TextureHandle>,
    release_rx: Receiver<TextureHandle>,
    max_life: Duration,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.backend.lock().name())
            .field("max_life", &self.max_life)
            .finish()
    }
}

impl Renderer {
    pub fn new(backend: Box<dyn RenderBackend>, max_life: Duration) -> Self {
        let (release_tx, release_rx) = unbounded();
        Self {
            backend: Mutex::new(backend),
            pool: Mutex::new(TexturePool::default()),
            shaders: Mutex::new(HashMap::new()),
            color_contexts: Mutex::new(HashMap::new()),
            release_tx,
            release_rx,
            max_life,
        }
    }

    pub fn backend_name(&self) -> String {
        self.backend.lock().name().to_string()
    }

    pub fn init(&self) -> Result<()> {
        let mut backend = self.backend.lock();
        backend.init()?;
        backend.post_init()?;
        debug!(backend = backend.name(), "Renderer initialized");
        Ok(())
    }

    /// Free every texture, shader and color context and shut the backend down.
    pub fn destroy(&self) {
        let mut pool = self.pool.lock();
        let mut backend = self.backend.lock();
        for (handle, _) in pool.live.drain() {
            backend.destroy_native_texture(handle);
        }
        pool.free.clear();
        for (_, shader) in self.shaders.lock().drain() {
            backend.destroy_native_shader(shader);
        }
        self.color_contexts.lock().clear();
        backend.destroy();
    }

    // ── Textures ────────────────────────────────────────────────

    /// Move textures dropped since the last call onto the free list.
    fn collect_released(&self, pool: &mut TexturePool) {
        let now = Instant::now();
        while let Ok(handle) = self.release_rx.try_recv() {
            if let Some(key) = pool.live.get(&handle).copied() {
                pool.free.push(FreeTexture {
                    handle,
                    key,
                    released: now,
                });
            }
        }
    }

    /// Destroy free textures idle longer than the maximum lifetime.
    pub fn sweep(&self) -> usize {
        let mut pool = self.pool.lock();
        self.collect_released(&mut pool);
        let max_life = self.max_life;
        let (expired, kept): (Vec<_>, Vec<_>) = pool
            .free
            .drain(..)
            .partition(|f| f.released.elapsed() >= max_life);
        pool.free = kept;

        let mut backend = self.backend.lock();
        for f in &expired {
            pool.live.remove(&f.handle);
            backend.destroy_native_texture(f.handle);
        }
        if !expired.is_empty() {
            trace!(count = expired.len(), "Destroyed idle textures");
        }
        expired.len()
    }

    pub fn create_texture(&self, params: &VideoParams) -> Result<TexturePtr> {
        self.create_texture_with_data(params, None)
    }

    fn create_texture_with_data(
        &self,
        params: &VideoParams,
        data: Option<(&[u8], usize)>,
    ) -> Result<TexturePtr> {
        self.sweep();
        let key = TextureKey::of(params);
        let mut pool = self.pool.lock();
        let mut backend = self.backend.lock();

        let reused = pool
            .free
            .iter()
            .position(|f| f.key == key)
            .map(|i| pool.free.swap_remove(i).handle);

        let handle = match reused {
            Some(handle) => {
                if let Some((bytes, linesize)) = data {
                    backend.upload_to_texture(handle, params, bytes, linesize)?;
                }
                handle
            }
            None => {
                let handle = backend.create_native_texture(params, data)?;
                pool.live.insert(handle, key);
                handle
            }
        };

        Ok(Texture::native(
            *params,
            NativeTexture::new(handle, Some(self.release_tx.clone())),
        ))
    }

    /// A texture holding a copy of `frame`.
    pub fn create_texture_from_frame(&self, frame: &Frame) -> Result<TexturePtr> {
        self.create_texture_with_data(frame.params(), Some((frame.data(), frame.line_size())))
    }

    fn native(texture: &Texture) -> Result<TextureHandle> {
        texture.native_handle().ok_or_else(|| {
            RenderError::Backend("texture has no backend allocation".into())
        })
    }

    pub fn upload_to_texture(&self, texture: &Texture, frame: &Frame) -> Result<()> {
        let handle = Self::native(texture)?;
        self.backend
            .lock()
            .upload_to_texture(handle, texture.params(), frame.data(), frame.line_size())
    }

    pub fn download_texture(&self, texture: &Texture) -> Result<Frame> {
        let handle = Self::native(texture)?;
        let mut frame = Frame::new(*texture.params());
        let linesize = frame.line_size();
        self.backend
            .lock()
            .download_from_texture(handle, texture.params(), frame.data_mut(), linesize)?;
        Ok(frame)
    }

    pub fn clear_destination(&self, texture: &Texture, color: Color) -> Result<()> {
        let handle = Self::native(texture)?;
        self.backend.lock().clear_destination(handle, color)
    }

    pub fn get_pixel(&self, texture: &Texture, x: u32, y: u32) -> Result<Color> {
        let handle = Self::native(texture)?;
        self.backend
            .lock()
            .get_pixel_from_texture(handle, texture.params(), x, y)
    }

    // ── Shaders ─────────────────────────────────────────────────

    fn shader_for(&self, id: &str, code: &ShaderCode) -> Result<ShaderHandle> {
        let mut shaders = self.shaders.lock();
        if let Some(h) = shaders.get(id) {
            return Ok(*h);
        }
        let handle = self.backend.lock().create_native_shader(code)?;
        debug!(shader = id, "Compiled shader");
        shaders.insert(id.to_string(), handle);
        Ok(handle)
    }

    /// Run `job` into `dest`, feeding each pass of an iterative job back into
    /// its iterative input.
    pub fn blit(
        &self,
        code: &ShaderCode,
        job: &ShaderJob,
        dest: &TexturePtr,
        clear_destination: bool,
    ) -> Result<()> {
        let shader = self.shader_for(job.shader_id(), code)?;
        let dest_handle = Self::native(dest)?;
        let params = *dest.params();

        let iterations = job.iterations().max(1);
        let iterative_input = job.iterative_input().map(str::to_string);
        if iterations == 1 || iterative_input.is_none() {
            return self
                .backend
                .lock()
                .blit(shader, job, dest_handle, &params, clear_destination);
        }

        let mut job = job.clone();
        let mut previous: Option<TexturePtr> = None;
        for i in 0..iterations {
            let target = if i + 1 == iterations {
                Arc::clone(dest)
            } else {
                self.create_texture(&params)?
            };
            if let (Some(prev), Some(input)) = (&previous, &iterative_input) {
                job.insert(
                    input.clone(),
                    NodeValue::new(
                        NodeValueType::Texture,
                        NodeValueData::Texture(Arc::clone(prev)),
                        None,
                    ),
                );
            }
            let handle = Self::native(&target)?;
            self.backend
                .lock()
                .blit(shader, &job, handle, &params, clear_destination)?;
            previous = Some(target);
        }
        Ok(())
    }

    pub fn blit_builtin(
        &self,
        shader: BuiltinShader,
        row: &NodeValueRow,
        dest: &TexturePtr,
        clear_destination: bool,
    ) -> Result<()> {
        let job = ShaderJob::builtin(shader, row);
        self.blit(&ShaderCode::builtin(shader), &job, dest, clear_destination)
    }

    /// Weave the even rows of `top` and the odd rows of `bottom` into `dest`.
    pub fn interlace_texture(
        &self,
        top: &TexturePtr,
        bottom: &TexturePtr,
        dest: &TexturePtr,
    ) -> Result<()> {
        let mut row = NodeValueRow::new();
        for (name, tex) in [(TOP, top), (BOTTOM, bottom)] {
            row.insert(
                name.to_string(),
                NodeValue::new(
                    NodeValueType::Texture,
                    NodeValueData::Texture(Arc::clone(tex)),
                    None,
                ),
            );
        }
        self.blit_builtin(BuiltinShader::Interlace, &row, dest, true)
    }

    // ── Color management ────────────────────────────────────────

    fn color_context(&self, processor: &ColorProcessorPtr) -> ColorProcessorPtr {
        let mut contexts = self.color_contexts.lock();
        let ctx = contexts
            .entry(processor.id().to_string())
            .or_insert_with(|| {
                trace!(id = processor.id(), "New color context");
                ColorContext {
                    processor: Arc::clone(processor),
                    last_used: Instant::now(),
                }
            });
        ctx.last_used = Instant::now();
        Arc::clone(&ctx.processor)
    }

    /// Convert `source` through `processor` into `dest`, resampling to the
    /// destination size and format.
    ///
    /// Colors are unpremultiplied around the conversion when
    /// `input_premultiplied` is set. A null processor leaves colors as they are.
    pub fn blit_color_managed(
        &self,
        processor: &ColorProcessorPtr,
        source: &Texture,
        dest: &Texture,
        matrix: Option<DMat4>,
        input_premultiplied: bool,
    ) -> Result<()> {
        let processor = if processor.is_null() {
            ColorProcessor::null()
        } else {
            self.color_context(processor)
        };
        let src = self.download_texture(source)?;
        let mut out = Frame::new(*dest.params());
        let (w, h) = (out.width(), out.height());
        let (sw, sh) = (src.width().max(1), src.height().max(1));

        for y in 0..h {
            let sy = (u64::from(y) * u64::from(sh) / u64::from(h.max(1))) as u32;
            for x in 0..w {
                let sx = (u64::from(x) * u64::from(sw) / u64::from(w.max(1))) as u32;
                let mut c = src.get_pixel(sx, sy);
                if input_premultiplied {
                    c = c.unpremultiply();
                }
                c = processor.convert_color(c);
                if let Some(m) = matrix {
                    let v = m * DVec4::new(c.r as f64, c.g as f64, c.b as f64, c.a as f64);
                    c = Color::new(v.x as f32, v.y as f32, v.z as f32, v.w as f32);
                }
                if input_premultiplied {
                    c = c.premultiply();
                }
                out.set_pixel(x, y, c);
            }
        }
        self.upload_to_texture(dest, &out)
    }

    /// Drop color contexts unused for longer than the maximum lifetime.
    pub fn clear_old_color_contexts(&self) {
        let max_life = self.max_life;
        self.color_contexts
            .lock()
            .retain(|_, c| c.last_used.elapsed() < max_life);
    }

    // ── Introspection ───────────────────────────────────────────

    /// Backend allocations, in use or free.
    pub fn texture_count(&self) -> usize {
        self.pool.lock().live.len()
    }

    pub fn free_texture_count(&self) -> usize {
        let mut pool = self.pool.lock();
        self.collect_released(&mut pool);
        pool.free.len()
    }

    pub fn shader_count(&self) -> usize {
        self.shaders.lock().len()
    }

    pub fn color_context_count(&self) -> usize {
        self.color_contexts.lock().len()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let in_use = {
            let mut pool = self.pool.lock();
            self.collect_released(&mut pool);
            pool.live.len() - pool.free.len()
        };
        if in_use > 0 {
            warn!(in_use, "Renderer dropped while textures are still referenced");
        }
        self.destroy();
    }
}

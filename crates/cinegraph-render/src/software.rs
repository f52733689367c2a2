//! CPU render backend.
//!
//! Textures are plain [`Frame`]s stored in their own pixel format, so
//! upload and download are byte copies. Built-in kernels run row-parallel on
//! rayon and work in `f32` RGBA.

use cinegraph_core::{Color, Frame, VideoParams};
use cinegraph_node::shader::inputs::{BASE, BLEND, BOTTOM, COLOR, MATRIX, TEXTURE, TOP};
use cinegraph_node::{BuiltinShader, Job, ShaderCode, ShaderJob, ShaderSource, TextureHandle};
use glam::{DMat4, DVec4};
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::backend::{RenderBackend, ShaderHandle};
use crate::error::{RenderError, Result};

#[derive(Debug, Default)]
pub struct SoftwareBackend {
    textures: HashMap<TextureHandle, Frame>,
    shaders: HashMap<ShaderHandle, BuiltinShader>,
    next_id: u64,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn frame(&self, handle: TextureHandle) -> Result<&Frame> {
        self.textures
            .get(&handle)
            .ok_or(RenderError::UnknownTexture(handle))
    }

    fn check_params(frame: &Frame, params: &VideoParams) -> Result<()> {
        let p = params.scaled();
        let f = frame.params();
        if p.width != f.width
            || p.height != f.height
            || p.format != f.format
            || p.channel_count != f.channel_count
        {
            return Err(RenderError::ParamsMismatch(format!(
                "texture is {}x{} {:?}x{}, got {}x{} {:?}x{}",
                f.width, f.height, f.format, f.channel_count, p.width, p.height, p.format, p.channel_count
            )));
        }
        Ok(())
    }
}

// ── Kernels ─────────────────────────────────────────────────────

/// Values a kernel reads, with textures resolved to frames.
struct KernelInputs<'a> {
    textures: HashMap<&'a str, &'a Frame>,
    color: Color,
    matrix: DMat4,
}

impl KernelInputs<'_> {
    /// Nearest sample of `name` at destination pixel `(x, y)`.
    fn sample(&self, name: &str, x: u32, y: u32, w: u32, h: u32) -> Color {
        let Some(f) = self.textures.get(name) else {
            return Color::TRANSPARENT;
        };
        if f.width() == w && f.height() == h {
            return f.get_pixel(x, y);
        }
        let sx = (u64::from(x) * u64::from(f.width()) / u64::from(w.max(1))) as u32;
        let sy = (u64::from(y) * u64::from(f.height()) / u64::from(h.max(1))) as u32;
        f.get_pixel(sx, sy)
    }
}

fn alpha_over(base: Color, blend: Color) -> Color {
    let inv = 1.0 - blend.a;
    Color::new(
        blend.r + base.r * inv,
        blend.g + base.g * inv,
        blend.b + base.b * inv,
        blend.a + base.a * inv,
    )
}

fn shade(shader: BuiltinShader, inputs: &KernelInputs<'_>, x: u32, y: u32, w: u32, h: u32) -> Color {
    match shader {
        BuiltinShader::Passthrough => inputs.sample(TEXTURE, x, y, w, h),
        BuiltinShader::AlphaOver => alpha_over(
            inputs.sample(BASE, x, y, w, h),
            inputs.sample(BLEND, x, y, w, h),
        ),
        BuiltinShader::Interlace => {
            let field = if y % 2 == 0 { TOP } else { BOTTOM };
            inputs.sample(field, x, y, w, h)
        }
        BuiltinShader::SolidFill => inputs.color,
        BuiltinShader::ColorMatrix => {
            let c = inputs.sample(TEXTURE, x, y, w, h);
            let v = inputs.matrix * DVec4::new(c.r as f64, c.g as f64, c.b as f64, c.a as f64);
            Color::new(v.x as f32, v.y as f32, v.z as f32, v.w as f32)
        }
    }
}

impl RenderBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn init(&mut self) -> Result<()> {
        debug!("Software backend initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        debug!(textures = self.textures.len(), "Destroying software backend");
        self.textures.clear();
        self.shaders.clear();
    }

    fn create_native_texture(
        &mut self,
        params: &VideoParams,
        data: Option<(&[u8], usize)>,
    ) -> Result<TextureHandle> {
        if params.width == 0 || params.height == 0 || params.channel_count == 0 {
            return Err(RenderError::ParamsMismatch(format!(
                "cannot allocate {}x{}x{}",
                params.width, params.height, params.channel_count
            )));
        }
        let handle = TextureHandle(self.next());
        self.textures.insert(handle, Frame::new(*params));
        if let Some((bytes, linesize)) = data {
            self.upload_to_texture(handle, params, bytes, linesize)?;
        }
        trace!(?handle, "Created texture");
        Ok(handle)
    }

    fn destroy_native_texture(&mut self, handle: TextureHandle) {
        self.textures.remove(&handle);
    }

    fn upload_to_texture(
        &mut self,
        handle: TextureHandle,
        params: &VideoParams,
        data: &[u8],
        linesize: usize,
    ) -> Result<()> {
        let frame = self
            .textures
            .get_mut(&handle)
            .ok_or(RenderError::UnknownTexture(handle))?;
        Self::check_params(frame, params)?;
        let row_len = frame.row(0).len();
        if linesize < row_len || data.len() < linesize * (frame.height() as usize - 1) + row_len {
            return Err(RenderError::ParamsMismatch("upload buffer too small".into()));
        }
        for y in 0..frame.height() {
            let start = y as usize * linesize;
            frame.row_mut(y).copy_from_slice(&data[start..start + row_len]);
        }
        Ok(())
    }

    fn download_from_texture(
        &mut self,
        handle: TextureHandle,
        params: &VideoParams,
        data: &mut [u8],
        linesize: usize,
    ) -> Result<()> {
        let frame = self.frame(handle)?;
        Self::check_params(frame, params)?;
        let row_len = frame.row(0).len();
        if linesize < row_len || data.len() < linesize * (frame.height() as usize - 1) + row_len {
            return Err(RenderError::ParamsMismatch("download buffer too small".into()));
        }
        for y in 0..frame.height() {
            let start = y as usize * linesize;
            data[start..start + row_len].copy_from_slice(frame.row(y));
        }
        Ok(())
    }

    fn clear_destination(&mut self, handle: TextureHandle, color: Color) -> Result<()> {
        self.textures
            .get_mut(&handle)
            .ok_or(RenderError::UnknownTexture(handle))?
            .fill(color);
        Ok(())
    }

    fn create_native_shader(&mut self, code: &ShaderCode) -> Result<ShaderHandle> {
        match &code.source {
            ShaderSource::Builtin(b) => {
                let handle = ShaderHandle(self.next());
                self.shaders.insert(handle, *b);
                Ok(handle)
            }
            ShaderSource::Glsl { .. } => Err(RenderError::UnsupportedShader(
                "software backend only runs built-in kernels".into(),
            )),
        }
    }

    fn destroy_native_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader);
    }

    fn blit(
        &mut self,
        shader: ShaderHandle,
        job: &ShaderJob,
        dest: TextureHandle,
        dest_params: &VideoParams,
        clear_destination: bool,
    ) -> Result<()> {
        let kernel = *self
            .shaders
            .get(&shader)
            .ok_or_else(|| RenderError::UnsupportedShader(format!("{shader:?}")))?;
        let mut out = self
            .textures
            .remove(&dest)
            .ok_or(RenderError::UnknownTexture(dest))?;
        if let Err(e) = Self::check_params(&out, dest_params) {
            self.textures.insert(dest, out);
            return Err(e);
        }
        if clear_destination {
            out.fill(Color::TRANSPARENT);
        }

        let (w, h) = (out.width(), out.height());
        let rows: Vec<Vec<Color>> = {
            let mut textures = HashMap::new();
            for (name, value) in job.values() {
                let handle = value.to_texture().and_then(|t| t.native_handle());
                if let Some(f) = handle.and_then(|h| self.textures.get(&h)) {
                    textures.insert(name.as_str(), f);
                }
            }
            let inputs = KernelInputs {
                textures,
                color: job.get(COLOR).to_color(),
                matrix: job
                    .values()
                    .get(MATRIX)
                    .map_or(DMat4::IDENTITY, |v| v.to_matrix()),
            };
            (0..h)
                .into_par_iter()
                .map(|y| (0..w).map(|x| shade(kernel, &inputs, x, y, w, h)).collect())
                .collect()
        };

        for (y, row) in rows.into_iter().enumerate() {
            for (x, c) in row.into_iter().enumerate() {
                out.set_pixel(x as u32, y as u32, c);
            }
        }
        self.textures.insert(dest, out);
        Ok(())
    }

    fn get_pixel_from_texture(
        &mut self,
        handle: TextureHandle,
        _params: &VideoParams,
        x: u32,
        y: u32,
    ) -> Result<Color> {
        Ok(self.frame(handle)?.get_pixel(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_core::{PixelFormat, RationalTime};
    use cinegraph_node::{NativeTexture, NodeValue, NodeValueData, NodeValueRow, NodeValueType, Texture};
    use proptest::prelude::*;

    fn params(format: PixelFormat, channels: u32) -> VideoParams {
        VideoParams::new(5, 3, RationalTime::new(1, 30), format, channels)
    }

    #[test]
    fn test_upload_download_lossless_every_format() {
        for format in [PixelFormat::U8, PixelFormat::U16, PixelFormat::F16, PixelFormat::F32] {
            let p = params(format, 4);
            let linesize = p.line_size_for(p.width) + 16;
            let data: Vec<u8> = (0..linesize * p.height as usize).map(|i| (i * 7 % 251) as u8).collect();

            let mut b = SoftwareBackend::new();
            let h = b.create_native_texture(&p, Some((&data, linesize))).unwrap();
            let mut back = vec![0u8; data.len()];
            b.download_from_texture(h, &p, &mut back, linesize).unwrap();

            let row = p.width as usize * p.bytes_per_pixel();
            for y in 0..p.height as usize {
                let r = y * linesize..y * linesize + row;
                assert_eq!(back[r.clone()], data[r], "{format:?} row {y}");
            }
        }
    }

    #[test]
    fn test_mismatched_params_rejected() {
        let mut b = SoftwareBackend::new();
        let h = b.create_native_texture(&params(PixelFormat::U8, 4), None).unwrap();
        let mut buf = vec![0u8; 1024];
        let err = b.download_from_texture(h, &params(PixelFormat::F32, 4), &mut buf, 256);
        assert!(matches!(err, Err(RenderError::ParamsMismatch(_))));
    }

    fn native(handle: TextureHandle, p: VideoParams) -> NodeValue {
        NodeValue::new(
            NodeValueType::Texture,
            NodeValueData::Texture(Texture::native(p, NativeTexture::new(handle, None))),
            None,
        )
    }

    #[test]
    fn test_alpha_over_kernel() {
        let p = params(PixelFormat::F32, 4);
        let mut b = SoftwareBackend::new();
        let base = b.create_native_texture(&p, None).unwrap();
        let blend = b.create_native_texture(&p, None).unwrap();
        let dest = b.create_native_texture(&p, None).unwrap();
        b.clear_destination(base, Color::RED).unwrap();
        b.clear_destination(blend, Color::new(0.0, 0.0, 0.5, 0.5)).unwrap();

        let mut row = NodeValueRow::new();
        row.insert(BASE.into(), native(base, p));
        row.insert(BLEND.into(), native(blend, p));
        let job = ShaderJob::builtin(BuiltinShader::AlphaOver, &row);
        let shader = b
            .create_native_shader(&ShaderCode::builtin(BuiltinShader::AlphaOver))
            .unwrap();
        b.blit(shader, &job, dest, &p, true).unwrap();

        let c = b.get_pixel_from_texture(dest, &p, 2, 1).unwrap();
        assert_eq!(c, Color::new(0.5, 0.0, 0.5, 1.0));
    }

    #[test]
    fn test_glsl_unsupported() {
        let mut b = SoftwareBackend::new();
        assert!(b.create_native_shader(&ShaderCode::glsl("void main() {}")).is_err());
    }

    proptest! {
        #[test]
        fn prop_u16_round_trip(values in proptest::collection::vec(any::<u8>(), 5 * 3 * 4 * 2)) {
            let p = params(PixelFormat::U16, 4);
            let linesize = 5 * 4 * 2;
            let mut b = SoftwareBackend::new();
            let h = b.create_native_texture(&p, Some((&values, linesize))).unwrap();
            let mut back = vec![0u8; values.len()];
            b.download_from_texture(h, &p, &mut back, linesize).unwrap();
            prop_assert_eq!(back, values);
        }
    }
}

//! Runs one render ticket on a render thread.
//!
//! [`RenderProcessor`] is the [`JobProcessor`] that actually executes jobs:
//! shaders and color transforms go through the thread's [`Renderer`],
//! footage through the shared decoder cache, generated frames through the
//! node's CPU generator.

use cinegraph_cache::{AudioWaveform, FrameHashCache};
use cinegraph_core::{
    AudioParams, CancelAtomPtr, Color, ColorProcessor, Frame, RationalTime, SampleBuffer,
    TimeRange, VideoParams,
};
use cinegraph_node::{
    CacheJob, ColorTransformJob, FootageJob, GenerateJob, JobProcessor, Node, NodeTraverser,
    NodeValueType, ShaderJob, ShaderRequest, Texture, TexturePtr,
};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::decoder::{CodecStream, DecoderRegistry, RetrieveVideoParams};
use crate::frame_manager::FrameManager;
use crate::render_cache::{DecoderCache, ShaderCache};
use crate::renderer::Renderer;
use crate::request::{AudioRequest, CacheTarget, RenderMode, RenderRequest, ReturnType, VideoRequest};
use crate::ticket::{RenderTicket, TicketResult};

/// Caches and pools shared by every render thread.
#[derive(Debug)]
pub struct RenderResources {
    pub registry: Arc<DecoderRegistry>,
    pub decoders: DecoderCache,
    pub shaders: ShaderCache,
    pub frames: FrameManager,
}

impl RenderResources {
    pub fn new(registry: Arc<DecoderRegistry>, frames: FrameManager) -> Self {
        Self {
            registry,
            decoders: DecoderCache::new(),
            shaders: ShaderCache::new(),
            frames,
        }
    }
}

pub struct RenderProcessor<'a> {
    renderer: &'a Renderer,
    resources: &'a RenderResources,
    cancel: CancelAtomPtr,
    /// Open decoders but produce no pixels.
    dry_run: bool,
}

impl<'a> RenderProcessor<'a> {
    pub fn new(renderer: &'a Renderer, resources: &'a RenderResources, cancel: CancelAtomPtr) -> Self {
        Self {
            renderer,
            resources,
            cancel,
            dry_run: false,
        }
    }

    /// Run `ticket` and finish it, with a result unless it failed or was cancelled.
    pub fn process(ticket: &RenderTicket, renderer: &'a Renderer, resources: &'a RenderResources) {
        let mut processor = Self::new(renderer, resources, Arc::clone(ticket.cancel_atom()));
        let result = match ticket.request() {
            RenderRequest::Video(req) => processor.render_video(req),
            RenderRequest::Audio(req) => processor.render_audio(req),
            RenderRequest::DryRun(req) => {
                processor.dry_run = true;
                processor.run_dry(req);
                None
            }
        };
        if ticket.is_cancelled() {
            debug!(ticket = ticket.id().0, "Ticket cancelled");
            ticket.finish();
        } else {
            ticket.finish_with(result);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ── Video ───────────────────────────────────────────────────

    fn render_params(req: &VideoRequest) -> VideoParams {
        let mut params = req.video_params;
        if req.mode == RenderMode::Offline {
            params.divider = 1;
        }
        params
    }

    pub fn render_video(&mut self, req: &VideoRequest) -> Option<TicketResult> {
        if self.is_cancelled() {
            return None;
        }
        let project = req.project.read();
        let Some(node) = project.node(req.node) else {
            warn!(node = %req.node, "Render requested for a missing node");
            return None;
        };
        let caches = Arc::clone(node.caches());
        let params = Self::render_params(req);

        let cached = if req.use_cache {
            caches.video.load_cache_frame(req.time)
        } else {
            None
        };

        let texture = match cached {
            Some(frame) => {
                trace!(time = %req.time, "Using cached frame");
                self.texture_from_frame(&frame)?
            }
            None => {
                let range = TimeRange::new(req.time, req.time + params.timebase);
                let cancel = Arc::clone(&self.cancel);
                let mut traverser = NodeTraverser::new(&project, self)
                    .with_video_params(params)
                    .with_audio_params(req.audio_params)
                    .with_loop_mode(req.loop_mode)
                    .with_cancel(cancel);
                let mut value = traverser
                    .generate_table(req.node, range)
                    .get(&[NodeValueType::Texture], "");
                traverser.resolve_jobs(&mut value, range);
                drop(traverser);
                match value.to_texture().filter(|t| t.native_handle().is_some()) {
                    Some(t) => t,
                    None => self.blank_texture(&params)?,
                }
            }
        };
        drop(project);

        if self.is_cancelled() {
            return None;
        }
        let texture = if req.needs_conversion() || texture.params().scaled() != params.scaled() {
            self.convert(req, &texture)?
        } else {
            texture
        };

        if let Some(target) = req.cache {
            let frame = self.download(&texture)?;
            let cache = match target {
                CacheTarget::Video => &caches.video,
                CacheTarget::Thumbnail => &caches.thumbnail,
            };
            if let Err(e) = cache.save_cache_frame(req.time, &frame) {
                warn!("Failed to save cache frame at {}: {}", req.time, e);
            }
            return self.finish_video(req, texture, Some(frame));
        }
        self.finish_video(req, texture, None)
    }

    fn finish_video(
        &self,
        req: &VideoRequest,
        texture: TexturePtr,
        downloaded: Option<Frame>,
    ) -> Option<TicketResult> {
        match req.return_type {
            ReturnType::Texture => Some(TicketResult::Texture(texture)),
            ReturnType::Null => None,
            ReturnType::Frame => {
                let mut frame = match downloaded {
                    Some(f) => f,
                    None => self.download(&texture)?,
                };
                frame.set_timestamp(req.time);
                Some(TicketResult::Frame(Arc::new(frame)))
            }
        }
    }

    fn download(&self, texture: &Texture) -> Option<Frame> {
        self.renderer
            .download_texture(texture)
            .map_err(|e| warn!("Failed to download texture: {}", e))
            .ok()
    }

    fn texture_from_frame(&self, frame: &Frame) -> Option<TexturePtr> {
        self.renderer
            .create_texture_from_frame(frame)
            .map_err(|e| warn!("Failed to upload frame: {}", e))
            .ok()
    }

    fn blank_texture(&self, params: &VideoParams) -> Option<TexturePtr> {
        let tex = self
            .renderer
            .create_texture(params)
            .map_err(|e| warn!("Failed to create texture: {}", e))
            .ok()?;
        if let Err(e) = self.renderer.clear_destination(&tex, Color::TRANSPARENT) {
            warn!("Failed to clear texture: {}", e);
        }
        Some(tex)
    }

    /// Apply the forced size, format, channel count, matrix and color output.
    fn convert(&self, req: &VideoRequest, texture: &Texture) -> Option<TexturePtr> {
        let out = req.output_params();
        let dest = self
            .renderer
            .create_texture(&out)
            .map_err(|e| warn!("Failed to create output texture: {}", e))
            .ok()?;
        let processor = req
            .force_color_output
            .clone()
            .unwrap_or_else(ColorProcessor::null);
        self.renderer
            .blit_color_managed(&processor, texture, &dest, req.force_matrix, true)
            .map_err(|e| warn!("Output conversion failed: {}", e))
            .ok()?;
        Some(dest)
    }

    // ── Audio ───────────────────────────────────────────────────

    pub fn render_audio(&mut self, req: &AudioRequest) -> Option<TicketResult> {
        if self.is_cancelled() {
            return None;
        }
        let project = req.project.read();
        if !project.contains(req.node) {
            warn!(node = %req.node, "Audio requested for a missing node");
            return None;
        }
        let count = req.audio_params.time_to_samples(req.range.length()).max(0) as usize;

        let cancel = Arc::clone(&self.cancel);
        let mut traverser = NodeTraverser::new(&project, self)
            .with_audio_params(req.audio_params)
            .with_cancel(cancel);
        let mut value = traverser
            .generate_table(req.node, req.range)
            .get(&[NodeValueType::Samples], "");
        traverser.resolve_audio_jobs(&mut value, req.range);
        drop(traverser);
        drop(project);

        if self.is_cancelled() {
            return None;
        }
        let mut buffer = match value.to_samples() {
            Some(s) if s.is_allocated() => (*s).clone(),
            _ => SampleBuffer::new(req.audio_params, count),
        };
        buffer.set_sample_count(count);
        if req.clamp {
            buffer.clamp();
        }
        let waveform = req
            .generate_waveform
            .then(|| AudioWaveform::from_samples(req.range, &buffer));
        Some(TicketResult::Samples {
            buffer: Arc::new(buffer),
            waveform,
        })
    }

    // ── Dry run ─────────────────────────────────────────────────

    fn run_dry(&mut self, req: &VideoRequest) {
        let project = req.project.read();
        if !project.contains(req.node) {
            return;
        }
        let params = Self::render_params(req);
        let range = req.range();
        let cancel = Arc::clone(&self.cancel);
        let mut traverser = NodeTraverser::new(&project, self)
            .with_video_params(params)
            .with_audio_params(req.audio_params)
            .with_loop_mode(req.loop_mode)
            .with_cancel(cancel);
        let mut value = traverser
            .generate_table(req.node, range)
            .get(&[NodeValueType::Texture], "");
        traverser.resolve_jobs(&mut value, range);
    }

    fn decoder_for(&self, job: &FootageJob) -> Option<crate::render_cache::DecoderPtr> {
        let stream = CodecStream::new(job.filename.clone(), job.stream_index);
        self.resources
            .decoders
            .resolve(&self.resources.registry, &job.decoder_id, &stream)
            .map_err(|e| warn!(%stream, "Failed to open decoder: {}", e))
            .ok()
    }

    fn clear(&self, dest: &TexturePtr) {
        if dest.native_handle().is_some() {
            if let Err(e) = self.renderer.clear_destination(dest, Color::TRANSPARENT) {
                warn!("Failed to clear texture: {}", e);
            }
        }
    }
}

impl JobProcessor for RenderProcessor<'_> {
    fn create_texture(&mut self, params: &VideoParams) -> TexturePtr {
        if self.dry_run {
            return Texture::dummy(*params);
        }
        match self.renderer.create_texture(params) {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to create texture: {}", e);
                Texture::dummy(*params)
            }
        }
    }

    fn create_sample_buffer(&mut self, params: &AudioParams, sample_count: usize) -> SampleBuffer {
        SampleBuffer::new(*params, sample_count)
    }

    fn process_shader(&mut self, node: &Node, job: &ShaderJob, dest: &TexturePtr) {
        if self.dry_run || self.is_cancelled() {
            return;
        }
        let key = (node.kind_id().to_string(), job.shader_id().to_string());
        let code = self.resources.shaders.get_or_insert_with(key, || {
            node.kind().shader_code(&ShaderRequest::new(job.shader_id()))
        });
        if let Err(e) = self.renderer.blit(&code, job, dest, true) {
            warn!(node = %node.id(), shader = job.shader_id(), "Shader failed: {}", e);
            self.clear(dest);
        }
    }

    fn process_color_transform(&mut self, node: &Node, job: &ColorTransformJob, dest: &TexturePtr) {
        if self.dry_run || self.is_cancelled() {
            return;
        }
        let Some(src) = job.input_texture().to_texture().filter(|t| t.native_handle().is_some()) else {
            self.clear(dest);
            return;
        };
        if let Err(e) = self.renderer.blit_color_managed(
            job.processor(),
            &src,
            dest,
            job.matrix(),
            job.input_premultiplied(),
        ) {
            warn!(node = %node.id(), "Color transform failed: {}", e);
            self.clear(dest);
        }
    }

    fn process_frame_generation(&mut self, node: &Node, job: &GenerateJob, dest: &TexturePtr) {
        if self.dry_run || self.is_cancelled() {
            return;
        }
        let mut frame = self.resources.frames.allocate_frame(dest.params());
        node.kind().generate_frame(node, job, &mut frame);
        if let Err(e) = self.renderer.upload_to_texture(dest, &frame) {
            warn!(node = %node.id(), "Failed to upload generated frame: {}", e);
        }
        self.resources.frames.recycle_frame(frame);
    }

    fn process_video_footage(&mut self, job: &FootageJob, time: RationalTime, dest: &TexturePtr) {
        let Some(decoder) = self.decoder_for(job) else {
            self.clear(dest);
            return;
        };
        if self.dry_run {
            return;
        }
        let params = RetrieveVideoParams::new(time, *dest.params());
        let retrieved = decoder.lock().retrieve_video(&params, Some(self.cancel.as_ref()));
        match retrieved {
            Ok(frame) => {
                let p = dest.params().scaled();
                let frame = if frame.format() != p.format || frame.channel_count() != p.channel_count {
                    frame.convert_to(p.format, p.channel_count)
                } else {
                    frame
                };
                if let Err(e) = self.renderer.upload_to_texture(dest, &frame) {
                    warn!("Failed to upload footage: {}", e);
                }
            }
            Err(state) => {
                warn!(filename = job.filename.as_str(), %time, "Footage retrieval failed: {}", state);
                self.clear(dest);
            }
        }
    }

    fn process_audio_footage(&mut self, job: &FootageJob, range: TimeRange, dest: &mut SampleBuffer) {
        let Some(decoder) = self.decoder_for(job) else {
            return;
        };
        if self.dry_run {
            return;
        }
        let params = dest.audio_params().copied().unwrap_or(job.audio_params);
        let retrieved = decoder.lock().retrieve_audio(range, &params, Some(self.cancel.as_ref()));
        match retrieved {
            Ok(mut buf) => {
                buf.set_sample_count(dest.sample_count());
                *dest = buf;
            }
            Err(state) => {
                warn!(filename = job.filename.as_str(), "Audio retrieval failed: {}", state);
            }
        }
    }

    fn process_video_cache_job(&mut self, job: &CacheJob) -> Option<TexturePtr> {
        if self.dry_run {
            return None;
        }
        match FrameHashCache::load_cache_frame_from(job.filename()) {
            Ok(frame) => self.texture_from_frame(&frame),
            Err(e) => {
                debug!("Cache frame {} unavailable: {}", job.filename().display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SharedProject;
    use crate::software::SoftwareBackend;
    use cinegraph_core::{PixelFormat, TimeRange};
    use cinegraph_node::nodes::media_input::{FILENAME_INPUT, LENGTH_INPUT};
    use cinegraph_node::nodes::viewer::{TEXTURE_INPUT, SAMPLES_INPUT};
    use cinegraph_node::nodes::volume::{SAMPLES_INPUT as VOLUME_SAMPLES, VOLUME_INPUT};
    use cinegraph_node::nodes::{MediaInput, SolidGenerator, ViewerOutput, VolumeNode};
    use cinegraph_node::shader::inputs::COLOR as COLOR_INPUT;
    use cinegraph_node::{NodeId, NodeInput, NodeValueData, Project};
    use parking_lot::RwLock;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        project: SharedProject,
        renderer: Renderer,
        resources: RenderResources,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let project = Arc::new(RwLock::new(Project::new(dir.path())));
        let renderer = Renderer::new(Box::new(SoftwareBackend::new()), Duration::from_secs(60));
        renderer.init().unwrap();
        let resources = RenderResources::new(
            Arc::new(DecoderRegistry::with_builtins()),
            FrameManager::new(Duration::from_secs(60)),
        );
        Fixture {
            _dir: dir,
            project,
            renderer,
            resources,
        }
    }

    fn params() -> VideoParams {
        VideoParams::new(8, 6, RationalTime::new(1, 25), PixelFormat::F32, 4)
    }

    fn solid_into_viewer(p: &mut Project, color: Color) -> (NodeId, NodeId) {
        let solid = p.add_node(Box::new(SolidGenerator));
        p.set_standard_value(&NodeInput::whole(solid, COLOR_INPUT), &NodeValueData::Color(color));
        let viewer = p.add_node(Box::new(ViewerOutput));
        p.connect_edge(solid, NodeInput::whole(viewer, TEXTURE_INPUT)).unwrap();
        (solid, viewer)
    }

    fn run(f: &Fixture, request: RenderRequest) -> Option<TicketResult> {
        let ticket = RenderTicket::new(request);
        ticket.start();
        RenderProcessor::process(&ticket, &f.renderer, &f.resources);
        assert!(!ticket.is_running());
        ticket.get()
    }

    #[test]
    fn test_solid_renders_through_viewer() {
        let f = fixture();
        let (_, viewer) = solid_into_viewer(&mut f.project.write(), Color::RED);
        let req = VideoRequest::new(Arc::clone(&f.project), viewer, RationalTime::ZERO, params());
        let result = run(&f, RenderRequest::Video(req)).unwrap();
        let frame = result.frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        for y in 0..6 {
            for x in 0..8 {
                assert_eq!(frame.get_pixel(x, y), Color::RED);
            }
        }
    }

    #[test]
    fn test_unconnected_viewer_renders_blank() {
        let f = fixture();
        let viewer = f.project.write().add_node(Box::new(ViewerOutput));
        let req = VideoRequest::new(Arc::clone(&f.project), viewer, RationalTime::ZERO, params());
        let result = run(&f, RenderRequest::Video(req)).unwrap();
        assert_eq!(result.frame().unwrap().get_pixel(3, 3), Color::TRANSPARENT);
    }

    #[test]
    fn test_missing_node_has_no_result() {
        let f = fixture();
        let req = VideoRequest::new(Arc::clone(&f.project), NodeId(999), RationalTime::ZERO, params());
        assert!(run(&f, RenderRequest::Video(req)).is_none());
    }

    #[test]
    fn test_forced_size_and_format() {
        let f = fixture();
        let (_, viewer) = solid_into_viewer(&mut f.project.write(), Color::GREEN);
        let mut req = VideoRequest::new(Arc::clone(&f.project), viewer, RationalTime::ZERO, params());
        req.force_size = Some((4, 3));
        req.force_format = Some(PixelFormat::U8);
        let result = run(&f, RenderRequest::Video(req)).unwrap();
        let frame = result.frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 3));
        assert_eq!(frame.format(), PixelFormat::U8);
        assert_eq!(frame.get_pixel(1, 1), Color::GREEN);
    }

    #[test]
    fn test_cache_saved_and_reused() {
        let f = fixture();
        let (solid, viewer) = solid_into_viewer(&mut f.project.write(), Color::BLUE);
        let time = RationalTime::new(2, 25);
        let caches = Arc::clone(f.project.read().node(viewer).unwrap().caches());
        caches.video.set_timebase(params().timebase);
        let mut req = VideoRequest::new(Arc::clone(&f.project), viewer, time, params());
        req.cache = Some(CacheTarget::Video);
        run(&f, RenderRequest::Video(req.clone())).unwrap();

        caches.video.validate_time(time);

        // Changing the graph must not matter when the cache is used.
        f.project
            .write()
            .set_standard_value(&NodeInput::whole(solid, COLOR_INPUT), &NodeValueData::Color(Color::RED));
        let mut cached = req;
        cached.cache = None;
        cached.use_cache = true;
        let result = run(&f, RenderRequest::Video(cached)).unwrap();
        assert_eq!(result.frame().unwrap().get_pixel(0, 0), Color::BLUE);
    }

    #[test]
    fn test_footage_through_pattern_decoder() {
        let f = fixture();
        let viewer = {
            let mut p = f.project.write();
            let media = p.add_node(Box::new(MediaInput));
            p.set_standard_value(
                &NodeInput::whole(media, FILENAME_INPUT),
                &NodeValueData::Text("pattern:5".into()),
            );
            let viewer = p.add_node(Box::new(ViewerOutput));
            p.connect_edge(media, NodeInput::whole(viewer, TEXTURE_INPUT)).unwrap();
            viewer
        };
        let req = VideoRequest::new(Arc::clone(&f.project), viewer, RationalTime::ZERO, params());
        let result = run(&f, RenderRequest::Video(req)).unwrap();
        assert_eq!(result.frame().unwrap().get_pixel(0, 0), Color::WHITE);
        assert_eq!(f.resources.decoders.len(), 1);
    }

    #[test]
    fn test_dry_run_opens_decoders_only() {
        let f = fixture();
        let media = {
            let mut p = f.project.write();
            let media = p.add_node(Box::new(MediaInput));
            p.set_standard_value(
                &NodeInput::whole(media, FILENAME_INPUT),
                &NodeValueData::Text("clip".into()),
            );
            media
        };
        let req = VideoRequest::new(Arc::clone(&f.project), media, RationalTime::ZERO, params());
        assert!(run(&f, RenderRequest::DryRun(req)).is_none());
        assert_eq!(f.resources.decoders.len(), 1);
        assert_eq!(f.renderer.texture_count(), 0);
    }

    #[test]
    fn test_audio_volume_applied() {
        let f = fixture();
        let viewer = {
            let mut p = f.project.write();
            let media = p.add_node(Box::new(MediaInput));
            p.set_standard_value(
                &NodeInput::whole(media, FILENAME_INPUT),
                &NodeValueData::Text("tone".into()),
            );
            p.set_standard_value(
                &NodeInput::whole(media, LENGTH_INPUT),
                &NodeValueData::Rational(RationalTime::from_integer(10)),
            );
            let volume = p.add_node(Box::new(VolumeNode));
            p.connect_edge(media, NodeInput::whole(volume, VOLUME_SAMPLES)).unwrap();
            p.set_standard_value(&NodeInput::whole(volume, VOLUME_INPUT), &NodeValueData::Float(0.5));
            let viewer = p.add_node(Box::new(ViewerOutput));
            p.connect_edge(volume, NodeInput::whole(viewer, SAMPLES_INPUT)).unwrap();
            viewer
        };
        let ap = AudioParams::default();
        let range = TimeRange::new(RationalTime::ZERO, RationalTime::new(1, 10));
        let mut req = AudioRequest::new(Arc::clone(&f.project), viewer, range, ap);
        req.generate_waveform = true;
        let result = run(&f, RenderRequest::Audio(req)).unwrap();
        let TicketResult::Samples { buffer, waveform } = result else {
            panic!("expected samples");
        };
        assert_eq!(buffer.sample_count(), ap.sample_rate as usize / 10);
        let peak = buffer.channel(0).iter().fold(0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.1 && peak <= 0.125 + 1e-6, "peak {peak}");
        assert!(waveform.is_some());
    }

    #[test]
    fn test_cancelled_ticket_finishes_without_result() {
        let f = fixture();
        let (_, viewer) = solid_into_viewer(&mut f.project.write(), Color::RED);
        let req = VideoRequest::new(Arc::clone(&f.project), viewer, RationalTime::ZERO, params());
        let ticket = RenderTicket::new(RenderRequest::Video(req));
        ticket.start();
        ticket.cancel();
        RenderProcessor::process(&ticket, &f.renderer, &f.resources);
        assert!(!ticket.is_running());
        assert!(!ticket.has_result());
    }
}

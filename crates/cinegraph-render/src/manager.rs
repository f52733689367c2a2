//! The render context: worker threads, shared caches and garbage collection.
//!
//! Work is split across dedicated threads so a long export frame never
//! blocks audio or waveform generation:
//! - one video thread
//! - one audio thread
//! - one dry-run thread that only opens decoders
//! - N waveform threads, assigned round-robin
//!
//! Each thread owns its own [`Renderer`] and pulls tickets off its own queue.
//! A GC thread periodically closes idle decoders.

use cinegraph_cache::DiskCacheFolder;
use cinegraph_core::EngineConfig;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::backend::BackendFactory;
use crate::decoder::DecoderRegistry;
use crate::error::{RenderError, Result};
use crate::frame_manager::FrameManager;
use crate::processor::{RenderProcessor, RenderResources};
use crate::renderer::Renderer;
use crate::request::{AudioRequest, RenderRequest, VideoRequest};
use crate::software::SoftwareBackend;
use crate::ticket::{RenderTicket, RenderTicketPtr};

// ── Render thread ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct ThreadQueue {
    tickets: VecDeque<RenderTicketPtr>,
    quit: bool,
}

#[derive(Debug, Default)]
struct ThreadShared {
    queue: Mutex<ThreadQueue>,
    wake: Condvar,
}

/// A named worker thread with its own ticket queue and renderer.
#[derive(Debug)]
pub struct RenderThread {
    name: String,
    shared: Arc<ThreadShared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RenderThread {
    fn spawn(name: String, renderer: Renderer, resources: Arc<RenderResources>) -> Result<Self> {
        let shared = Arc::new(ThreadShared::default());
        let handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || Self::run(&shared, &renderer, &resources))
                .map_err(|e| RenderError::Thread(format!("failed to spawn {}: {}", name, e)))?
        };
        Ok(Self {
            name,
            shared,
            handle: Some(handle),
        })
    }

    fn run(shared: &ThreadShared, renderer: &Renderer, resources: &RenderResources) {
        trace!(renderer = %renderer.backend_name(), "Render thread started");
        loop {
            let ticket = {
                let mut queue = shared.queue.lock();
                while queue.tickets.is_empty() && !queue.quit {
                    shared.wake.wait(&mut queue);
                }
                if queue.quit {
                    break;
                }
                queue.tickets.pop_front()
            };
            if let Some(ticket) = ticket {
                RenderProcessor::process(&ticket, renderer, resources);
            }
        }

        let leftover: Vec<_> = shared.queue.lock().tickets.drain(..).collect();
        for ticket in leftover {
            ticket.cancel();
            ticket.finish();
        }
        trace!("Render thread stopped");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_ticket(&self, ticket: RenderTicketPtr) {
        self.shared.queue.lock().tickets.push_back(ticket);
        self.shared.wake.notify_one();
    }

    /// Take a queued ticket back out. False if it is not queued here.
    pub fn remove_ticket(&self, ticket: &RenderTicket) -> bool {
        let mut queue = self.shared.queue.lock();
        let before = queue.tickets.len();
        queue.tickets.retain(|t| t.id() != ticket.id());
        before != queue.tickets.len()
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.lock().tickets.len()
    }

    fn quit(&mut self) {
        self.shared.queue.lock().quit = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(thread = self.name.as_str(), "Render thread panicked");
            }
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.quit();
    }
}

// ── Manager ─────────────────────────────────────────────────────

/// Process-wide render context. Construct once at startup and pass it by
/// reference; dropping it stops every thread.
pub struct RenderManager {
    config: EngineConfig,
    resources: Arc<RenderResources>,
    disk: Arc<DiskCacheFolder>,
    video: RenderThread,
    audio: RenderThread,
    dry_run: RenderThread,
    waveform: Vec<RenderThread>,
    next_waveform: AtomicUsize,
    aggressive_gc: Arc<AtomicBool>,
    gc_shutdown: Option<Sender<()>>,
    gc: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for RenderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderManager")
            .field("waveform_threads", &self.waveform.len())
            .field("decoders", &self.resources.decoders.len())
            .field("aggressive_gc", &self.is_aggressive_gc())
            .finish()
    }
}

impl RenderManager {
    /// Start every render thread with a backend from `factory`.
    pub fn new(config: EngineConfig, factory: BackendFactory) -> Result<Self> {
        Self::with_registry(config, factory, DecoderRegistry::with_builtins())
    }

    pub fn with_software_backend(config: EngineConfig) -> Result<Self> {
        Self::new(config, Arc::new(|| Box::new(SoftwareBackend::new())))
    }

    pub fn with_registry(
        config: EngineConfig,
        factory: BackendFactory,
        registry: DecoderRegistry,
    ) -> Result<Self> {
        let resources = Arc::new(RenderResources::new(
            Arc::new(registry),
            FrameManager::new(config.frame_pool_lifetime()),
        ));

        let disk = Arc::new(DiskCacheFolder::new(
            config.disk_cache_dir.clone(),
            config.disk_cache_limit,
        ));
        if let Err(e) = disk.scan() {
            warn!("Failed to index disk cache {}: {}", config.disk_cache_dir.display(), e);
        }

        let spawn = |name: String| -> Result<RenderThread> {
            let renderer = Renderer::new(factory(), config.texture_max_life());
            renderer.init()?;
            RenderThread::spawn(name, renderer, Arc::clone(&resources))
        };

        let video = spawn("cinegraph-video".into())?;
        let audio = spawn("cinegraph-audio".into())?;
        let dry_run = spawn("cinegraph-dry-run".into())?;
        let waveform = (0..config.waveform_threads.max(1))
            .map(|i| spawn(format!("cinegraph-waveform-{}", i)))
            .collect::<Result<Vec<_>>>()?;

        let aggressive_gc = Arc::new(AtomicBool::new(false));
        let (gc_shutdown, gc_rx) = bounded::<()>(1);
        let gc = {
            let resources = Arc::clone(&resources);
            let aggressive = Arc::clone(&aggressive_gc);
            let config = config.clone();
            let interval = Duration::from_millis(config.decoder_gc_interval_ms.max(1));
            thread::Builder::new()
                .name("cinegraph-render-gc".into())
                .spawn(move || loop {
                    match gc_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let max = config.decoder_max_inactivity(aggressive.load(Ordering::Relaxed));
                            let closed = resources.decoders.clear_old(max);
                            if closed > 0 {
                                debug!(closed, "Closed idle decoders");
                            }
                        }
                        _ => break,
                    }
                })
                .map_err(|e| RenderError::Thread(format!("failed to spawn GC thread: {}", e)))?
        };

        info!(
            waveform_threads = waveform.len(),
            "Render manager started"
        );
        Ok(Self {
            config,
            resources,
            disk,
            video,
            audio,
            dry_run,
            waveform,
            next_waveform: AtomicUsize::new(0),
            aggressive_gc,
            gc_shutdown: Some(gc_shutdown),
            gc: Some(gc),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resources(&self) -> &Arc<RenderResources> {
        &self.resources
    }

    /// Quota bookkeeping for files under the configured cache directory.
    pub fn disk_cache(&self) -> &Arc<DiskCacheFolder> {
        &self.disk
    }

    fn enqueue(thread: &RenderThread, request: RenderRequest) -> RenderTicketPtr {
        let ticket = RenderTicket::new(request);
        ticket.start();
        trace!(ticket = ticket.id().0, thread = thread.name(), "Queued ticket");
        thread.add_ticket(Arc::clone(&ticket));
        ticket
    }

    /// Queue a video frame on the video thread.
    pub fn render_frame(&self, request: VideoRequest) -> RenderTicketPtr {
        Self::enqueue(&self.video, RenderRequest::Video(request))
    }

    /// Queue audio. Requests that also build a waveform go to the waveform
    /// threads, the rest to the audio thread.
    pub fn render_audio(&self, request: AudioRequest) -> RenderTicketPtr {
        if request.generate_waveform {
            let i = self.next_waveform.fetch_add(1, Ordering::Relaxed) % self.waveform.len();
            Self::enqueue(&self.waveform[i], RenderRequest::Audio(request))
        } else {
            Self::enqueue(&self.audio, RenderRequest::Audio(request))
        }
    }

    /// Traverse `request` on the dry-run thread to open its decoders early.
    pub fn dry_run(&self, request: VideoRequest) -> RenderTicketPtr {
        Self::enqueue(&self.dry_run, RenderRequest::DryRun(request))
    }

    /// Cancel a ticket. A still-queued ticket is dequeued and finished here;
    /// a running one finishes on its thread. Returns whether it was dequeued.
    pub fn remove_ticket(&self, ticket: &RenderTicketPtr) -> bool {
        ticket.cancel();
        let removed = self.threads().any(|t| t.remove_ticket(ticket));
        if removed {
            ticket.finish();
        }
        removed
    }

    fn threads(&self) -> impl Iterator<Item = &RenderThread> {
        [&self.video, &self.audio, &self.dry_run]
            .into_iter()
            .chain(self.waveform.iter())
    }

    /// Close decoders sooner, e.g. while memory is tight.
    pub fn set_aggressive_gc(&self, e: bool) {
        self.aggressive_gc.store(e, Ordering::Relaxed);
    }

    pub fn is_aggressive_gc(&self) -> bool {
        self.aggressive_gc.load(Ordering::Relaxed)
    }

    /// Tickets waiting across every queue.
    pub fn queued(&self) -> usize {
        self.threads().map(RenderThread::queued).sum()
    }
}

impl Drop for RenderManager {
    fn drop(&mut self) {
        drop(self.gc_shutdown.take());
        if let Some(handle) = self.gc.take() {
            if handle.join().is_err() {
                warn!("Render GC thread panicked");
            }
        }
        for thread in self.waveform.iter_mut() {
            thread.quit();
        }
        self.dry_run.quit();
        self.audio.quit();
        self.video.quit();
        self.resources.decoders.clear();
        info!("Render manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SharedProject;
    use crate::ticket::RenderTicketWatcher;
    use cinegraph_core::{AudioParams, Color, PixelFormat, RationalTime, TimeRange, VideoParams};
    use cinegraph_node::nodes::media_input::FILENAME_INPUT;
    use cinegraph_node::nodes::viewer::{SAMPLES_INPUT, TEXTURE_INPUT};
    use cinegraph_node::nodes::{MediaInput, SolidGenerator, ViewerOutput};
    use cinegraph_node::shader::inputs::COLOR;
    use cinegraph_node::{NodeId, NodeInput, NodeValueData, Project};
    use parking_lot::RwLock;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> EngineConfig {
        EngineConfig {
            disk_cache_dir: dir.path().to_path_buf(),
            waveform_threads: 2,
            decoder_gc_interval_ms: 10,
            ..EngineConfig::default()
        }
    }

    fn params() -> VideoParams {
        VideoParams::new(4, 4, RationalTime::new(1, 24), PixelFormat::F32, 4)
    }

    fn red_viewer(dir: &TempDir) -> (SharedProject, NodeId) {
        let mut p = Project::new(dir.path());
        let solid = p.add_node(Box::new(SolidGenerator));
        p.set_standard_value(&NodeInput::whole(solid, COLOR), &NodeValueData::Color(Color::RED));
        let viewer = p.add_node(Box::new(ViewerOutput));
        p.connect_edge(solid, NodeInput::whole(viewer, TEXTURE_INPUT)).unwrap();
        (Arc::new(RwLock::new(p)), viewer)
    }

    #[test]
    fn test_render_frame_on_video_thread() {
        let dir = TempDir::new().unwrap();
        let manager = RenderManager::with_software_backend(config(&dir)).unwrap();
        let (project, viewer) = red_viewer(&dir);

        let ticket = manager.render_frame(VideoRequest::new(project, viewer, RationalTime::ZERO, params()));
        let mut watcher = RenderTicketWatcher::new();
        watcher.set_ticket(Arc::clone(&ticket));
        let finished = watcher.wait_finished(Duration::from_secs(10)).expect("finished");
        let frame = finished.get().and_then(|r| r.frame().cloned()).unwrap();
        assert_eq!(frame.get_pixel(2, 2), Color::RED);
    }

    #[test]
    fn test_waveform_audio_and_dry_run() {
        let dir = TempDir::new().unwrap();
        let manager = RenderManager::with_software_backend(config(&dir)).unwrap();
        let mut p = Project::new(dir.path());
        let media = p.add_node(Box::new(MediaInput));
        p.set_standard_value(&NodeInput::whole(media, FILENAME_INPUT), &NodeValueData::Text("tone".into()));
        let viewer = p.add_node(Box::new(ViewerOutput));
        p.connect_edge(media, NodeInput::whole(viewer, SAMPLES_INPUT)).unwrap();
        let project = Arc::new(RwLock::new(p));

        let mut req = AudioRequest::new(
            Arc::clone(&project),
            viewer,
            TimeRange::new(RationalTime::ZERO, RationalTime::new(1, 2)),
            AudioParams::default(),
        );
        req.generate_waveform = true;
        let tickets: Vec<_> = (0..3).map(|_| manager.render_audio(req.clone())).collect();
        for t in &tickets {
            match t.get() {
                Some(crate::ticket::TicketResult::Samples { buffer, waveform }) => {
                    assert_eq!(buffer.sample_count(), 24000);
                    assert!(waveform.is_some());
                }
                other => panic!("unexpected result {:?}", other.is_some()),
            }
        }

        let dry = manager.dry_run(VideoRequest::new(project, media, RationalTime::ZERO, params()));
        dry.wait_for_finished();
        assert!(!dry.has_result());
        assert_eq!(manager.resources().decoders.len(), 1);
    }

    #[test]
    fn test_remove_queued_ticket_finishes_it() {
        let dir = TempDir::new().unwrap();
        let manager = RenderManager::with_software_backend(config(&dir)).unwrap();
        let (project, viewer) = red_viewer(&dir);

        // Hold the project so the video thread blocks on the first ticket.
        let guard = project.write();
        let first = manager.render_frame(VideoRequest::new(Arc::clone(&project), viewer, RationalTime::ZERO, params()));
        let second = manager.render_frame(VideoRequest::new(Arc::clone(&project), viewer, RationalTime::ZERO, params()));
        thread::sleep(Duration::from_millis(50));
        assert!(manager.remove_ticket(&second));
        assert!(!second.is_running());
        assert!(!second.has_result());
        drop(guard);

        assert!(first.get().is_some());
        assert!(!manager.remove_ticket(&first));
    }

    #[test]
    fn test_idle_decoders_collected() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.decoder_max_inactivity_ms = 60_000;
        cfg.decoder_max_inactivity_aggressive_ms = 0;
        let manager = RenderManager::with_software_backend(cfg).unwrap();
        let registry = DecoderRegistry::with_builtins();
        manager
            .resources()
            .decoders
            .resolve(&registry, "pattern", &crate::decoder::CodecStream::new("a", 0))
            .unwrap();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(manager.resources().decoders.len(), 1);

        manager.set_aggressive_gc(true);
        let start = std::time::Instant::now();
        while !manager.resources().decoders.is_empty() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(manager.resources().decoders.is_empty());
    }

    #[test]
    fn test_drop_finishes_queued_tickets() {
        let dir = TempDir::new().unwrap();
        let (project, viewer) = red_viewer(&dir);
        let tickets = {
            let manager = RenderManager::with_software_backend(config(&dir)).unwrap();
            (0..4)
                .map(|_| manager.render_frame(VideoRequest::new(Arc::clone(&project), viewer, RationalTime::ZERO, params())))
                .collect::<Vec<_>>()
        };
        for t in tickets {
            assert!(!t.is_running());
        }
    }
}

//! Background cache filling around the playhead.
//!
//! [`PreviewAutoCacher`] watches one viewer node. Whenever part of the range
//! around the playhead (or a forced range) is missing from the viewer's
//! caches it queues renders of the render-side project copy, then writes the
//! results back once they arrive. The host drives it by calling
//! [`PreviewAutoCacher::process_events`] regularly, e.g. once per UI tick.

use cinegraph_cache::AudioWaveform;
use cinegraph_core::{
    ColorProcessorPtr, JobTime, RationalTime, TimeRange, TimeRangeList, TimeRangeListFrameIterator,
};
use cinegraph_node::nodes::ViewerOutput;
use cinegraph_node::{GraphEvent, NodeCaches, NodeId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::copier::ProjectCopier;
use crate::job_tracker::RenderJobTracker;
use crate::manager::RenderManager;
use crate::request::{AudioRequest, CacheTarget, ReturnType, SharedProject, VideoRequest};
use crate::ticket::{RenderTicketPtr, TicketId, TicketResult};

#[derive(Debug)]
struct VideoTask {
    ticket: RenderTicketPtr,
    time: RationalTime,
    target: CacheTarget,
}

#[derive(Debug)]
struct AudioTask {
    ticket: RenderTicketPtr,
    range: TimeRange,
}

pub struct PreviewAutoCacher {
    manager: Arc<RenderManager>,
    project: Option<SharedProject>,
    copier: Option<ProjectCopier>,
    events: Option<Receiver<GraphEvent>>,
    viewer: Option<NodeId>,
    caches: Option<Arc<NodeCaches>>,

    playhead: RationalTime,
    custom_range: Option<TimeRange>,
    pause_renders: bool,
    pause_thumbnails: bool,
    ignore_cache_requests: bool,
    display_color_processor: Option<ColorProcessorPtr>,

    video_tracker: RenderJobTracker,
    audio_tracker: RenderJobTracker,
    running_video: Vec<VideoTask>,
    running_audio: Vec<AudioTask>,
    single_frame: Option<RenderTicketPtr>,

    finished_tx: Sender<TicketId>,
    finished_rx: Receiver<TicketId>,
}

impl std::fmt::Debug for PreviewAutoCacher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewAutoCacher")
            .field("viewer", &self.viewer)
            .field("playhead", &self.playhead)
            .field("custom_range", &self.custom_range)
            .field("running_video", &self.running_video.len())
            .field("running_audio", &self.running_audio.len())
            .finish()
    }
}

impl PreviewAutoCacher {
    pub fn new(manager: Arc<RenderManager>) -> Self {
        let (finished_tx, finished_rx) = unbounded();
        Self {
            manager,
            project: None,
            copier: None,
            events: None,
            viewer: None,
            caches: None,
            playhead: RationalTime::ZERO,
            custom_range: None,
            pause_renders: false,
            pause_thumbnails: false,
            ignore_cache_requests: false,
            display_color_processor: None,
            video_tracker: RenderJobTracker::new(),
            audio_tracker: RenderJobTracker::new(),
            running_video: Vec::new(),
            running_audio: Vec::new(),
            single_frame: None,
            finished_tx,
            finished_rx,
        }
    }

    // ── Setup ───────────────────────────────────────────────────

    /// Switch to another project, dropping all work for the previous one.
    pub fn set_project(&mut self, project: Option<SharedProject>) {
        self.cancel_all(true);
        self.set_viewer(None);
        match &project {
            Some(p) => {
                let original = p.read();
                self.copier = Some(ProjectCopier::new(&original));
                self.events = Some(original.subscribe());
            }
            None => {
                self.copier = None;
                self.events = None;
            }
        }
        self.project = project;
    }

    /// Cache for `viewer`, or stop caching.
    pub fn set_viewer(&mut self, viewer: Option<NodeId>) {
        if viewer == self.viewer {
            return;
        }
        self.cancel_all(false);
        self.video_tracker.clear();
        self.audio_tracker.clear();
        self.caches = match (viewer, &self.project) {
            (Some(id), Some(p)) => p.read().node(id).map(|n| Arc::clone(n.caches())),
            _ => None,
        };
        if viewer.is_some() && self.caches.is_none() {
            warn!(?viewer, "Viewer is not in the project");
        }
        self.viewer = viewer;
    }

    pub fn viewer(&self) -> Option<NodeId> {
        self.viewer
    }

    pub fn set_playhead(&mut self, playhead: RationalTime) {
        self.playhead = playhead;
    }

    /// Range cached around the playhead.
    pub fn cache_range(&self) -> TimeRange {
        let config = self.manager.config();
        TimeRange::new(
            self.playhead - RationalTime::from_f64(config.cache_behind_secs),
            self.playhead + RationalTime::from_f64(config.cache_ahead_secs),
        )
    }

    /// Cache `range` regardless of the playhead, or go back to following it.
    pub fn force_cache_range(&mut self, range: Option<TimeRange>) {
        self.custom_range = range;
    }

    pub fn is_rendering_custom_range(&self) -> bool {
        self.custom_range.is_some()
    }

    pub fn set_renders_paused(&mut self, e: bool) {
        self.pause_renders = e;
        if e {
            self.cancel_video_tasks(false);
        }
    }

    pub fn set_thumbnails_paused(&mut self, e: bool) {
        self.pause_thumbnails = e;
    }

    /// Ignore ranges explicitly requested on the viewer's cache.
    pub fn set_ignore_cache_requests(&mut self, e: bool) {
        self.ignore_cache_requests = e;
    }

    /// Applied to single frames shown to the user.
    pub fn set_display_color_processor(&mut self, processor: Option<ColorProcessorPtr>) {
        self.display_color_processor = processor;
    }

    pub fn running_video_tasks(&self) -> usize {
        self.running_video.len()
    }

    pub fn running_audio_tasks(&self) -> usize {
        self.running_audio.len()
    }

    // ── Pump ────────────────────────────────────────────────────

    /// Handle graph edits and finished renders, then queue more work.
    ///
    /// Returns how many cache entries were written.
    pub fn process_events(&mut self) -> usize {
        let Some(project) = self.project.clone() else {
            return 0;
        };

        let mut invalidated = Vec::new();
        if let Some(events) = &self.events {
            for event in events.try_iter() {
                if let GraphEvent::NodeInvalidated { node, range } = event {
                    if Some(node) == self.viewer {
                        invalidated.push(range);
                    }
                }
            }
        }
        for range in invalidated {
            self.invalidated(range);
        }

        let synced = match self.copier.as_mut() {
            Some(copier) => copier.process_update_queue(&project.read()),
            None => false,
        };

        let written = self.collect_finished();
        if synced && !self.pause_renders {
            self.try_render();
        }
        written
    }

    fn invalidated(&mut self, range: TimeRange) {
        trace!(%range, "Viewer invalidated");
        let job_time = JobTime::now();
        self.video_tracker.insert(range, job_time);
        self.audio_tracker.insert(range, job_time);

        let manager = &self.manager;
        self.running_video.retain(|task| {
            let stale = range.contains(task.time);
            if stale {
                manager.remove_ticket(&task.ticket);
            }
            !stale
        });
        self.running_audio.retain(|task| {
            let stale = task.range.overlaps_with(&range, false, false);
            if stale {
                manager.remove_ticket(&task.ticket);
            }
            !stale
        });
    }

    fn collect_finished(&mut self) -> usize {
        let ids: Vec<TicketId> = self.finished_rx.try_iter().collect();
        let mut written = 0;
        for id in ids {
            if let Some(i) = self.running_video.iter().position(|t| t.ticket.id() == id) {
                let task = self.running_video.swap_remove(i);
                written += usize::from(self.video_rendered(&task));
            } else if let Some(i) = self.running_audio.iter().position(|t| t.ticket.id() == id) {
                let task = self.running_audio.swap_remove(i);
                written += usize::from(self.audio_rendered(&task));
            }
        }
        written
    }

    fn video_rendered(&self, task: &VideoTask) -> bool {
        let Some(caches) = &self.caches else {
            return false;
        };
        let Some(TicketResult::Frame(frame)) = task.ticket.get() else {
            return false;
        };
        if !self.video_tracker.is_current(task.time, task.ticket.job_time()) {
            trace!(time = %task.time, "Dropping outdated frame");
            return false;
        }
        let cache = match task.target {
            CacheTarget::Video => &caches.video,
            CacheTarget::Thumbnail => &caches.thumbnail,
        };
        match cache.save_cache_frame(task.time, &frame) {
            Ok(path) => {
                cache.validate_time(task.time);
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                for evicted in self.manager.disk_cache().register(path, size) {
                    caches.video.file_deleted(&evicted);
                    caches.thumbnail.file_deleted(&evicted);
                }
                true
            }
            Err(e) => {
                warn!("Failed to cache frame at {}: {}", task.time, e);
                false
            }
        }
    }

    fn audio_rendered(&self, task: &AudioTask) -> bool {
        let Some(caches) = &self.caches else {
            return false;
        };
        let Some(TicketResult::Samples { buffer, waveform }) = task.ticket.get() else {
            return false;
        };
        if !self
            .audio_tracker
            .is_range_current(task.range, task.ticket.job_time())
        {
            trace!(range = %task.range, "Dropping outdated audio");
            return false;
        }
        if let Err(e) = caches.audio.write_part(task.range, &buffer) {
            warn!("Failed to cache audio for {}: {}", task.range, e);
            return false;
        }
        let waveform = waveform.unwrap_or_else(|| AudioWaveform::from_samples(task.range, &buffer));
        caches.waveform.write(waveform);
        true
    }

    // ── Queueing ────────────────────────────────────────────────

    fn try_render(&mut self) {
        let (Some(viewer), Some(caches), Some(copier)) = (self.viewer, self.caches.clone(), &self.copier) else {
            return;
        };
        let copy = Arc::clone(copier.copy());
        let (video_params, audio_params, video_range, audio_range) = {
            let p = copy.read();
            let Some(node) = p.node(viewer) else {
                return;
            };
            (
                ViewerOutput::video_params(node),
                ViewerOutput::audio_params(node),
                node.video_cache_range(),
                node.audio_cache_range(),
            )
        };

        let mut wanted = TimeRangeList::new();
        wanted.insert(self.custom_range.unwrap_or_else(|| self.cache_range()));
        if !self.ignore_cache_requests {
            wanted.insert_list(&caches.video.playback().requested_ranges());
        }

        let max = self.manager.config().max_in_flight_renders.max(1);
        let video_gaps = Self::gaps(&wanted, video_range, |r| caches.video.playback().invalidated_ranges(r));
        let timebase = caches.video.timebase();
        for time in TimeRangeListFrameIterator::new(video_gaps, timebase) {
            if self.running_video.len() >= max {
                break;
            }
            if self.is_video_running(time, CacheTarget::Video) {
                continue;
            }
            self.stamp_video(TimeRange::new(time, time + timebase));
            let req = VideoRequest::new(Arc::clone(&copy), viewer, time, video_params);
            self.submit_video(req, time, CacheTarget::Video);
        }

        if !self.pause_thumbnails {
            let thumb_gaps =
                Self::gaps(&wanted, video_range, |r| caches.thumbnail.playback().invalidated_ranges(r));
            let thumb_tb = caches.thumbnail.timebase();
            let height = self.manager.config().thumbnail_height.max(1);
            let width = (u64::from(video_params.width) * u64::from(height)
                / u64::from(video_params.height.max(1)))
            .max(1) as u32;
            for time in TimeRangeListFrameIterator::new(thumb_gaps, thumb_tb) {
                if self.running_video.len() >= max {
                    break;
                }
                if self.is_video_running(time, CacheTarget::Thumbnail) {
                    continue;
                }
                self.stamp_video(TimeRange::new(time, time + thumb_tb));
                let mut req = VideoRequest::new(Arc::clone(&copy), viewer, time, video_params);
                req.force_size = Some((width, height));
                self.submit_video(req, time, CacheTarget::Thumbnail);
            }
        }

        let segment = RationalTime::from_integer(self.manager.config().audio_segment_secs.max(1));
        let audio_gaps = Self::gaps(&wanted, audio_range, |r| caches.audio.playback().invalidated_ranges(r));
        for gap in &audio_gaps {
            for chunk in gap.split(segment) {
                if self.running_audio.len() >= max {
                    return;
                }
                if self
                    .running_audio
                    .iter()
                    .any(|t| t.range.overlaps_with(&chunk, false, false))
                {
                    continue;
                }
                let untracked = self.audio_tracker.untracked(chunk);
                if !untracked.is_empty() {
                    self.audio_tracker.insert_list(&untracked, JobTime::now());
                }
                let mut req = AudioRequest::new(Arc::clone(&copy), viewer, chunk, audio_params);
                req.generate_waveform = true;
                let ticket = self.manager.render_audio(req);
                ticket.watch(self.finished_tx.clone());
                self.running_audio.push(AudioTask { ticket, range: chunk });
            }
        }
    }

    /// Unvalidated parts of `wanted` inside `bounds`.
    fn gaps(
        wanted: &TimeRangeList,
        bounds: TimeRange,
        invalidated: impl Fn(TimeRange) -> TimeRangeList,
    ) -> TimeRangeList {
        let mut gaps = TimeRangeList::new();
        for r in wanted {
            if let Some(r) = r.intersected(&bounds).filter(|r| !r.is_empty()) {
                gaps.insert_list(&invalidated(r));
            }
        }
        gaps
    }

    fn is_video_running(&self, time: RationalTime, target: CacheTarget) -> bool {
        self.running_video
            .iter()
            .any(|t| t.time == time && t.target == target)
    }

    fn stamp_video(&mut self, range: TimeRange) {
        if self.video_tracker.job_time(range.in_point()).is_none() {
            self.video_tracker.insert(range, JobTime::now());
        }
    }

    fn submit_video(&mut self, req: VideoRequest, time: RationalTime, target: CacheTarget) {
        let ticket = self.manager.render_frame(req);
        ticket.watch(self.finished_tx.clone());
        self.running_video.push(VideoTask { ticket, time, target });
    }

    // ── Direct requests ─────────────────────────────────────────

    /// Bring the copy up to date, waiting for renders to release it if needed.
    fn sync_copy(&mut self) -> bool {
        let Some(project) = self.project.clone() else {
            return false;
        };
        let Some(copier) = self.copier.as_mut() else {
            return false;
        };
        if copier.process_update_queue(&project.read()) {
            return true;
        }
        debug!("Waiting for renders to release the project copy");
        self.cancel_all(true);
        self.clear_single_frame_renders();
        match self.copier.as_mut() {
            Some(copier) => copier.process_update_queue(&project.read()),
            None => false,
        }
    }

    /// Render one frame of `node` for display, replacing any earlier request.
    pub fn get_single_frame(&mut self, node: NodeId, time: RationalTime, dry: bool) -> Option<RenderTicketPtr> {
        if let Some(previous) = self.single_frame.take() {
            self.manager.remove_ticket(&previous);
        }
        if !self.sync_copy() {
            warn!("Project copy out of date, rendering anyway");
        }
        let copy = Arc::clone(self.copier.as_ref()?.copy());
        let params = {
            let p = copy.read();
            let context = self.viewer.and_then(|v| p.node(v)).or_else(|| p.node(node))?;
            ViewerOutput::video_params(context)
        };

        let mut req = VideoRequest::new(copy, node, time, params);
        req.use_cache = true;
        req.return_type = ReturnType::Frame;
        req.force_color_output = self.display_color_processor.clone();
        let ticket = if dry {
            self.manager.dry_run(req)
        } else {
            self.manager.render_frame(req)
        };
        self.single_frame = Some(Arc::clone(&ticket));
        Some(ticket)
    }

    /// Render the viewer's audio over `range` without touching its caches.
    pub fn get_range_of_audio(&mut self, range: TimeRange) -> Option<RenderTicketPtr> {
        let viewer = self.viewer?;
        if !self.sync_copy() {
            warn!("Project copy out of date, rendering anyway");
        }
        let copy = Arc::clone(self.copier.as_ref()?.copy());
        let params = ViewerOutput::audio_params(copy.read().node(viewer)?);
        Some(self.manager.render_audio(AudioRequest::new(copy, viewer, range, params)))
    }

    pub fn clear_single_frame_renders(&mut self) {
        if let Some(ticket) = self.single_frame.take() {
            self.manager.remove_ticket(&ticket);
        }
    }

    pub fn clear_single_frame_renders_that_arent_running(&mut self) {
        if self.single_frame.as_ref().is_some_and(|t| !t.is_running()) {
            self.single_frame = None;
        }
    }

    // ── Cancellation ────────────────────────────────────────────

    /// Cancel every video render. Cancelled renders produce no result.
    pub fn cancel_video_tasks(&mut self, wait: bool) {
        let tasks = std::mem::take(&mut self.running_video);
        Self::cancel_tickets(&self.manager, tasks.iter().map(|t| &t.ticket), wait);
    }

    pub fn cancel_audio_tasks(&mut self, wait: bool) {
        let tasks = std::mem::take(&mut self.running_audio);
        Self::cancel_tickets(&self.manager, tasks.iter().map(|t| &t.ticket), wait);
    }

    fn cancel_all(&mut self, wait: bool) {
        self.cancel_video_tasks(wait);
        self.cancel_audio_tasks(wait);
    }

    fn cancel_tickets<'a>(
        manager: &RenderManager,
        tickets: impl Iterator<Item = &'a RenderTicketPtr> + Clone,
        wait: bool,
    ) {
        for t in tickets.clone() {
            manager.remove_ticket(t);
        }
        if wait {
            for t in tickets {
                t.wait_for_finished();
            }
        }
    }
}

impl Drop for PreviewAutoCacher {
    fn drop(&mut self) {
        self.clear_single_frame_renders();
        self.cancel_all(true);
        info!("Auto-cacher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_core::{AudioParams, Color, EngineConfig, PixelFormat, VideoParams};
    use cinegraph_node::nodes::media_input::{FILENAME_INPUT, LENGTH_INPUT as MEDIA_LENGTH};
    use cinegraph_node::nodes::viewer::{
        AUDIO_PARAMS_INPUT, LENGTH_INPUT, SAMPLES_INPUT, TEXTURE_INPUT, VIDEO_PARAMS_INPUT,
    };
    use cinegraph_node::nodes::{MediaInput, SolidGenerator};
    use cinegraph_node::shader::inputs::COLOR;
    use cinegraph_node::{NodeInput, NodeValueData, Project};
    use parking_lot::RwLock;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        project: SharedProject,
        solid: NodeId,
        media: NodeId,
        viewer: NodeId,
        cacher: PreviewAutoCacher,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            disk_cache_dir: dir.path().to_path_buf(),
            waveform_threads: 1,
            max_in_flight_renders: 8,
            ..EngineConfig::default()
        };
        let manager = Arc::new(RenderManager::with_software_backend(config).unwrap());

        let mut p = Project::new(dir.path());
        let solid = p.add_node(Box::new(SolidGenerator));
        p.set_standard_value(&NodeInput::whole(solid, COLOR), &NodeValueData::Color(Color::RED));
        let media = p.add_node(Box::new(MediaInput));
        p.set_standard_value(&NodeInput::whole(media, FILENAME_INPUT), &NodeValueData::Text("tone".into()));
        p.set_standard_value(
            &NodeInput::whole(media, MEDIA_LENGTH),
            &NodeValueData::Rational(RationalTime::from_integer(10)),
        );
        let viewer = p.add_node(Box::new(ViewerOutput));
        p.connect_edge(solid, NodeInput::whole(viewer, TEXTURE_INPUT)).unwrap();
        p.connect_edge(media, NodeInput::whole(viewer, SAMPLES_INPUT)).unwrap();
        let vp = VideoParams::new(8, 4, RationalTime::new(1, 10), PixelFormat::F32, 4);
        p.set_standard_value(&NodeInput::whole(viewer, VIDEO_PARAMS_INPUT), &NodeValueData::VideoParams(vp));
        p.set_standard_value(
            &NodeInput::whole(viewer, AUDIO_PARAMS_INPUT),
            &NodeValueData::AudioParams(AudioParams::default()),
        );
        p.set_standard_value(
            &NodeInput::whole(viewer, LENGTH_INPUT),
            &NodeValueData::Rational(RationalTime::new(1, 2)),
        );

        let project = Arc::new(RwLock::new(p));
        let mut cacher = PreviewAutoCacher::new(manager);
        cacher.set_project(Some(Arc::clone(&project)));
        cacher.set_viewer(Some(viewer));
        Fixture {
            _dir: dir,
            project,
            solid,
            media,
            viewer,
            cacher,
        }
    }

    fn full_range() -> TimeRange {
        TimeRange::new(RationalTime::ZERO, RationalTime::new(1, 2))
    }

    fn pump_until(cacher: &mut PreviewAutoCacher, done: impl Fn() -> bool) {
        let start = Instant::now();
        while !done() {
            assert!(start.elapsed() < Duration::from_secs(20), "cache never filled");
            cacher.process_events();
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn caches(f: &Fixture) -> Arc<NodeCaches> {
        Arc::clone(f.project.read().node(f.viewer).unwrap().caches())
    }

    #[test]
    fn test_fills_video_thumbnail_and_audio() {
        let mut f = fixture();
        let c = caches(&f);
        pump_until(&mut f.cacher, || {
            !c.video.playback().has_invalidated_ranges(full_range())
                && !c.thumbnail.playback().has_invalidated_ranges(full_range())
                && !c.audio.playback().has_invalidated_ranges(full_range())
        });

        let frame = c.video.load_cache_frame(RationalTime::new(3, 10)).unwrap();
        assert_eq!(frame.get_pixel(7, 3), Color::RED);
        let thumb = c.thumbnail.load_cache_frame(RationalTime::ZERO).unwrap();
        assert_eq!(thumb.height(), EngineConfig::default().thumbnail_height);
        assert!(f.cacher.manager.disk_cache().len() >= 10);

        let audio = c.audio.read(full_range());
        assert!(audio.channel(0).iter().any(|s| s.abs() > 0.1));
        assert!(!c.waveform.summary_for(full_range()).is_empty());
    }

    #[test]
    fn test_edit_rerenders_invalidated_frames() {
        let mut f = fixture();
        let c = caches(&f);
        pump_until(&mut f.cacher, || !c.video.playback().has_invalidated_ranges(full_range()));

        f.project.write().set_standard_value(
            &NodeInput::whole(f.solid, COLOR),
            &NodeValueData::Color(Color::BLUE),
        );
        assert!(c.video.playback().has_invalidated_ranges(full_range()));

        pump_until(&mut f.cacher, || !c.video.playback().has_invalidated_ranges(full_range()));
        let frame = c.video.load_cache_frame(RationalTime::ZERO).unwrap();
        assert_eq!(frame.get_pixel(0, 0), Color::BLUE);
    }

    fn in_flight_audio(f: &PreviewAutoCacher) -> (RenderTicketPtr, TimeRange) {
        let task = f.running_audio.first().expect("an audio chunk in flight");
        (Arc::clone(&task.ticket), task.range)
    }

    #[test]
    fn test_edit_during_audio_render_discards_whole_chunk() {
        let mut f = fixture();
        f.cacher.set_thumbnails_paused(true);
        f.cacher.process_events();
        let (ticket, chunk) = in_flight_audio(&f.cacher);
        assert_eq!(chunk, full_range());
        assert!(ticket.get().is_some());

        let head = TimeRange::new(RationalTime::ZERO, RationalTime::new(1, 4));
        let tail = TimeRange::new(RationalTime::new(1, 4), RationalTime::new(1, 2));
        f.project.read().invalidate_cache(f.media, tail, FILENAME_INPUT, -1);
        f.cacher.process_events();

        let c = caches(&f);
        assert!(c.audio.playback().has_invalidated_ranges(head));
        assert!(c.audio.playback().has_invalidated_ranges(tail));

        pump_until(&mut f.cacher, || !c.audio.playback().has_invalidated_ranges(full_range()));
        assert!(c.audio.read(tail).channel(0).iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn test_newer_stamp_on_chunk_tail_rejects_audio() {
        let mut f = fixture();
        f.cacher.set_thumbnails_paused(true);
        f.cacher.process_events();
        let (ticket, _) = in_flight_audio(&f.cacher);
        ticket.get();

        // Restamp without a graph event, as if the edit raced the render.
        let tail = TimeRange::new(RationalTime::new(1, 4), RationalTime::new(1, 2));
        f.cacher.audio_tracker.insert(tail, JobTime::now());
        f.cacher.process_events();

        let c = caches(&f);
        assert!(c.audio.playback().validated_ranges().is_empty());
        pump_until(&mut f.cacher, || !c.audio.playback().has_invalidated_ranges(full_range()));
    }

    #[test]
    fn test_edit_during_thumbnail_render_is_not_cached() {
        let mut f = fixture();
        f.cacher.process_events();
        let task = f
            .cacher
            .running_video
            .iter()
            .find(|t| t.target == CacheTarget::Thumbnail)
            .expect("a thumbnail in flight");
        let (ticket, time) = (Arc::clone(&task.ticket), task.time);
        assert!(ticket.get().is_some());

        let range = TimeRange::new(time, time + RationalTime::new(1, 10));
        f.project.read().invalidate_cache(f.solid, range, COLOR, -1);
        f.cacher.process_events();

        let c = caches(&f);
        assert!(!c.thumbnail.is_frame_cached(time));
        pump_until(&mut f.cacher, || c.thumbnail.is_frame_cached(time));
    }

    #[test]
    fn test_paused_renders_queue_nothing() {
        let mut f = fixture();
        f.cacher.set_renders_paused(true);
        f.cacher.set_thumbnails_paused(true);
        for _ in 0..5 {
            f.cacher.process_events();
        }
        assert_eq!(f.cacher.running_video_tasks(), 0);
        assert_eq!(f.cacher.running_audio_tasks(), 0);
        assert!(caches(&f).video.playback().validated_ranges().is_empty());
    }

    #[test]
    fn test_forced_range_limits_work() {
        let mut f = fixture();
        f.cacher.set_thumbnails_paused(true);
        let forced = TimeRange::new(RationalTime::new(2, 10), RationalTime::new(3, 10));
        f.cacher.force_cache_range(Some(forced));
        assert!(f.cacher.is_rendering_custom_range());
        let c = caches(&f);
        pump_until(&mut f.cacher, || c.video.is_frame_cached(RationalTime::new(2, 10)));
        assert!(!c.video.is_frame_cached(RationalTime::ZERO));
    }

    #[test]
    fn test_single_frame_sees_latest_edit() {
        let mut f = fixture();
        f.cacher.set_renders_paused(true);
        f.project.write().set_standard_value(
            &NodeInput::whole(f.solid, COLOR),
            &NodeValueData::Color(Color::GREEN),
        );
        let ticket = f.cacher.get_single_frame(f.viewer, RationalTime::ZERO, false).unwrap();
        let frame = ticket.get().and_then(|r| r.frame().cloned()).unwrap();
        assert_eq!(frame.get_pixel(1, 1), Color::GREEN);

        f.cacher.clear_single_frame_renders_that_arent_running();
        let audio = f.cacher.get_range_of_audio(full_range()).unwrap();
        assert!(audio.get().and_then(|r| r.samples().cloned()).is_some());
    }

    #[test]
    fn test_cancel_with_wait_stops_everything() {
        let mut f = fixture();
        f.cacher.process_events();
        f.cacher.cancel_video_tasks(true);
        f.cacher.cancel_audio_tasks(true);
        assert_eq!(f.cacher.running_video_tasks(), 0);
        assert_eq!(f.cacher.running_audio_tasks(), 0);
    }
}

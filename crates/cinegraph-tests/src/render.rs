//! Integration tests for rendering a project through the manager and the auto-cacher.

use cinegraph_core::{Color, EngineConfig, PixelFormat, RationalTime, TimeRange, VideoParams};
use cinegraph_node::nodes::viewer::{LENGTH_INPUT, TEXTURE_INPUT, VIDEO_PARAMS_INPUT};
use cinegraph_node::nodes::{SolidGenerator, ViewerOutput};
use cinegraph_node::shader::inputs::COLOR;
use cinegraph_node::{NodeId, NodeInput, NodeValueData, Project};
use cinegraph_render::{
    PreviewAutoCacher, RenderManager, RenderRequest, RenderTicket, RenderTicketWatcher,
    SharedProject, TicketResult, VideoRequest,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Scene {
    dir: TempDir,
    project: SharedProject,
    solid: NodeId,
    viewer: NodeId,
}

fn red_scene(params: VideoParams, length: RationalTime) -> Scene {
    let dir = TempDir::new().unwrap();
    let mut p = Project::new(dir.path());
    let solid = p.add_node(Box::new(SolidGenerator));
    p.set_standard_value(&NodeInput::whole(solid, COLOR), &NodeValueData::Color(Color::RED));
    let viewer = p.add_node(Box::new(ViewerOutput));
    p.connect_edge(solid, NodeInput::whole(viewer, TEXTURE_INPUT)).unwrap();
    p.set_standard_value(
        &NodeInput::whole(viewer, VIDEO_PARAMS_INPUT),
        &NodeValueData::VideoParams(params),
    );
    p.set_standard_value(&NodeInput::whole(viewer, LENGTH_INPUT), &NodeValueData::Rational(length));
    Scene {
        dir,
        project: Arc::new(RwLock::new(p)),
        solid,
        viewer,
    }
}

fn manager(scene: &Scene) -> Arc<RenderManager> {
    let config = EngineConfig {
        disk_cache_dir: scene.dir.path().to_path_buf(),
        waveform_threads: 1,
        ..EngineConfig::default()
    };
    Arc::new(RenderManager::with_software_backend(config).unwrap())
}

fn viewer_params(scene: &Scene) -> VideoParams {
    ViewerOutput::video_params(scene.project.read().node(scene.viewer).unwrap())
}

#[test]
fn solid_into_viewer_renders_every_pixel_red() {
    for format in [PixelFormat::U8, PixelFormat::F16, PixelFormat::F32] {
        let params = VideoParams::new(16, 9, RationalTime::new(1, 24), format, 4);
        let scene = red_scene(params, RationalTime::from_integer(1));
        let manager = manager(&scene);

        let ticket = manager.render_frame(VideoRequest::new(
            Arc::clone(&scene.project),
            scene.viewer,
            RationalTime::ZERO,
            viewer_params(&scene),
        ));
        let Some(TicketResult::Frame(frame)) = ticket.get() else {
            panic!("no frame for {:?}", format);
        };
        assert_eq!((frame.width(), frame.height()), (16, 9));
        assert_eq!(frame.format(), format);
        for y in 0..9 {
            for x in 0..16 {
                assert_eq!(frame.get_pixel(x, y), Color::RED, "{:?} at {},{}", format, x, y);
            }
        }
    }
}

#[test]
fn watcher_attached_after_finish_still_fires() {
    let scene = red_scene(
        VideoParams::new(4, 4, RationalTime::new(1, 24), PixelFormat::F32, 4),
        RationalTime::from_integer(1),
    );
    let req = VideoRequest::new(
        Arc::clone(&scene.project),
        scene.viewer,
        RationalTime::ZERO,
        viewer_params(&scene),
    );
    let ticket = RenderTicket::new(RenderRequest::Video(req));
    ticket.start();
    ticket.finish();

    let mut watcher = RenderTicketWatcher::new();
    watcher.set_ticket(Arc::clone(&ticket));
    let finished = watcher.try_finished().expect("finish notification");
    assert!(Arc::ptr_eq(&finished, &ticket));
    assert!(!finished.has_result());
}

#[test]
fn autocacher_fills_viewer_cache_and_follows_edits() {
    let scene = red_scene(
        VideoParams::new(8, 8, RationalTime::new(1, 4), PixelFormat::F32, 4),
        RationalTime::from_integer(2),
    );
    let manager = manager(&scene);
    let caches = Arc::clone(scene.project.read().node(scene.viewer).unwrap().caches());
    let whole = TimeRange::new(RationalTime::ZERO, RationalTime::from_integer(2));

    let mut cacher = PreviewAutoCacher::new(Arc::clone(&manager));
    cacher.set_project(Some(Arc::clone(&scene.project)));
    cacher.set_viewer(Some(scene.viewer));
    cacher.set_thumbnails_paused(true);

    let pump = |cacher: &mut PreviewAutoCacher| {
        let start = Instant::now();
        while caches.video.playback().has_invalidated_ranges(whole) {
            assert!(start.elapsed() < Duration::from_secs(30), "cache never filled");
            cacher.process_events();
            std::thread::sleep(Duration::from_millis(5));
        }
    };

    pump(&mut cacher);
    let last = RationalTime::new(7, 4);
    assert_eq!(caches.video.load_cache_frame(last).unwrap().get_pixel(0, 0), Color::RED);

    scene.project.write().set_standard_value(
        &NodeInput::whole(scene.solid, COLOR),
        &NodeValueData::Color(Color::WHITE),
    );
    pump(&mut cacher);
    for quarter in 0..8 {
        let frame = caches.video.load_cache_frame(RationalTime::new(quarter, 4)).unwrap();
        assert_eq!(frame.get_pixel(4, 4), Color::WHITE);
    }
}

#[test]
fn removing_source_renders_blank() {
    let scene = red_scene(
        VideoParams::new(4, 4, RationalTime::new(1, 24), PixelFormat::F32, 4),
        RationalTime::from_integer(1),
    );
    let manager = manager(&scene);
    let mut cacher = PreviewAutoCacher::new(Arc::clone(&manager));
    cacher.set_project(Some(Arc::clone(&scene.project)));
    cacher.set_viewer(Some(scene.viewer));
    cacher.set_renders_paused(true);

    scene.project.write().remove_node(scene.solid).unwrap();
    let ticket = cacher
        .get_single_frame(scene.viewer, RationalTime::ZERO, false)
        .unwrap();
    let frame = ticket.get().and_then(|r| r.frame().cloned()).unwrap();
    assert_eq!(frame.get_pixel(2, 2), Color::TRANSPARENT);
}

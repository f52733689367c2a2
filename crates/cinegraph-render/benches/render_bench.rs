//! Benchmarks for single-frame rendering on the software backend.
//!
//! Run with: cargo bench -p cinegraph-render

use cinegraph_core::{Color, PixelFormat, RationalTime, VideoParams};
use cinegraph_node::nodes::viewer::TEXTURE_INPUT;
use cinegraph_node::nodes::{SolidGenerator, ViewerOutput};
use cinegraph_node::shader::inputs::COLOR;
use cinegraph_node::{NodeInput, NodeValueData, Project};
use cinegraph_render::{
    DecoderRegistry, FrameManager, RenderProcessor, RenderRequest, RenderResources, RenderTicket,
    Renderer, SoftwareBackend, VideoRequest,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

fn bench_solid_frame(c: &mut Criterion) {
    let dir = std::env::temp_dir().join("cinegraph-bench");
    let mut project = Project::new(&dir);
    let solid = project.add_node(Box::new(SolidGenerator));
    project.set_standard_value(&NodeInput::whole(solid, COLOR), &NodeValueData::Color(Color::RED));
    let viewer = project.add_node(Box::new(ViewerOutput));
    project
        .connect_edge(solid, NodeInput::whole(viewer, TEXTURE_INPUT))
        .expect("connect");
    let project = Arc::new(RwLock::new(project));

    let renderer = Renderer::new(Box::new(SoftwareBackend::new()), Duration::from_secs(60));
    renderer.init().expect("init");
    let resources = RenderResources::new(
        Arc::new(DecoderRegistry::with_builtins()),
        FrameManager::new(Duration::from_secs(60)),
    );

    for (name, width, height) in [("solid_frame_320x180", 320, 180), ("solid_frame_1920x1080", 1920, 1080)] {
        let params = VideoParams::new(width, height, RationalTime::new(1, 30), PixelFormat::F32, 4);
        c.bench_function(name, |bencher| {
            bencher.iter(|| {
                let req = VideoRequest::new(Arc::clone(&project), viewer, RationalTime::ZERO, params);
                let ticket = RenderTicket::new(RenderRequest::Video(req));
                ticket.start();
                RenderProcessor::process(&ticket, &renderer, &resources);
                black_box(ticket.get())
            });
        });
    }
}

criterion_group!(benches, bench_solid_frame);
criterion_main!(benches);

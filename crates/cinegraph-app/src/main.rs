//! CineGraph - headless render engine driver
//!
//! Builds a small graph, renders a preview frame through the render manager
//! and fills the viewer's disk cache in the background.
//!
//! Usage: cinegraph [--config PATH] [--cache-dir DIR] [--seconds N]

use anyhow::{bail, Context, Result};
use cinegraph_core::{
    AudioParams, Color, CoreParams, PixelFormat, RationalTime, RunMode, TimeRange, VideoParams,
};
use cinegraph_node::nodes::{media_input, viewer, volume};
use cinegraph_node::shader::inputs::COLOR;
use cinegraph_node::{NodeFactory, NodeId, NodeInput, NodeValueData, Project};
use cinegraph_render::{PreviewAutoCacher, RenderManager, SharedProject, TicketResult, VideoRequest};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

struct Args {
    params: CoreParams,
    cache_dir: Option<PathBuf>,
    seconds: i64,
}

fn parse_args() -> Result<Args> {
    let mut params = CoreParams::new();
    params.set_run_mode(RunMode::Headless);
    let mut cache_dir = None;
    let mut seconds = 2;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => params.set_config_path(args.next().context("--config needs a path")?),
            "--cache-dir" => cache_dir = Some(PathBuf::from(args.next().context("--cache-dir needs a path")?)),
            "--seconds" => {
                seconds = args
                    .next()
                    .context("--seconds needs a value")?
                    .parse()
                    .context("--seconds must be an integer")?;
            }
            other if params.startup_project().is_none() && !other.starts_with('-') => {
                params.set_startup_project(other);
            }
            other => bail!("unknown argument: {}", other),
        }
    }
    if seconds <= 0 {
        bail!("--seconds must be positive");
    }
    Ok(Args {
        params,
        cache_dir,
        seconds,
    })
}

struct DemoGraph {
    project: SharedProject,
    viewer: NodeId,
}

/// Solid color into the viewer's picture, a test tone at half volume into its sound.
fn build_graph(cache_dir: PathBuf, length: RationalTime) -> Result<DemoGraph> {
    let factory = NodeFactory::with_builtins();
    let create = |id: &str| factory.create(id).with_context(|| format!("no node type {}", id));

    let mut p = Project::new(cache_dir);
    let solid = p.add_node(create("org.cinegraph.solid")?);
    let media = p.add_node(create("org.cinegraph.media_input")?);
    let gain = p.add_node(create("org.cinegraph.volume")?);
    let viewer = p.add_node(create("org.cinegraph.viewer")?);

    p.set_standard_value(&NodeInput::whole(solid, COLOR), &NodeValueData::Color(Color::RED));
    p.set_standard_value(
        &NodeInput::whole(media, media_input::FILENAME_INPUT),
        &NodeValueData::Text("tone".into()),
    );
    p.set_standard_value(&NodeInput::whole(media, media_input::LENGTH_INPUT), &NodeValueData::Rational(length));
    p.set_standard_value(&NodeInput::whole(gain, volume::VOLUME_INPUT), &NodeValueData::Float(0.5));

    p.connect_edge(solid, NodeInput::whole(viewer, viewer::TEXTURE_INPUT))?;
    p.connect_edge(media, NodeInput::whole(gain, volume::SAMPLES_INPUT))?;
    p.connect_edge(gain, NodeInput::whole(viewer, viewer::SAMPLES_INPUT))?;

    let video = VideoParams::new(320, 180, RationalTime::new(1, 30), PixelFormat::F16, 4);
    p.set_standard_value(&NodeInput::whole(viewer, viewer::VIDEO_PARAMS_INPUT), &NodeValueData::VideoParams(video));
    p.set_standard_value(
        &NodeInput::whole(viewer, viewer::AUDIO_PARAMS_INPUT),
        &NodeValueData::AudioParams(AudioParams::default()),
    );
    p.set_standard_value(&NodeInput::whole(viewer, viewer::LENGTH_INPUT), &NodeValueData::Rational(length));

    info!(nodes = p.len(), "Built graph");
    Ok(DemoGraph {
        project: Arc::new(RwLock::new(p)),
        viewer,
    })
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args()?;
    let mut config = args.params.load_config().context("failed to load engine config")?;
    if let Some(dir) = args.cache_dir {
        config.disk_cache_dir = dir;
    }
    if let Some(project) = args.params.startup_project() {
        warn!("Ignoring project {}: loading projects is not supported", project.display());
    }
    std::fs::create_dir_all(&config.disk_cache_dir)
        .with_context(|| format!("failed to create {}", config.disk_cache_dir.display()))?;
    info!("CineGraph starting, cache at {}", config.disk_cache_dir.display());

    let length = RationalTime::from_integer(args.seconds);
    let graph = build_graph(config.disk_cache_dir.clone(), length)?;
    let manager = Arc::new(RenderManager::with_software_backend(config)?);

    // One frame straight through the manager.
    let params = {
        let p = graph.project.read();
        let node = p.node(graph.viewer).context("viewer vanished")?;
        cinegraph_node::nodes::ViewerOutput::video_params(node)
    };
    let started = Instant::now();
    let ticket = manager.render_frame(VideoRequest::new(
        Arc::clone(&graph.project),
        graph.viewer,
        RationalTime::ZERO,
        params,
    ));
    match ticket.get() {
        Some(TicketResult::Frame(frame)) => info!(
            "Rendered {}x{} preview in {:?}, center pixel {:?}",
            frame.width(),
            frame.height(),
            started.elapsed(),
            frame.get_pixel(frame.width() / 2, frame.height() / 2)
        ),
        _ => warn!("Preview frame produced no result"),
    }

    // Fill the caches for the whole sequence.
    let mut cacher = PreviewAutoCacher::new(Arc::clone(&manager));
    cacher.set_project(Some(Arc::clone(&graph.project)));
    cacher.set_viewer(Some(graph.viewer));
    cacher.set_display_color_processor(Some(graph.project.read().color_manager().display_processor()));
    let whole = TimeRange::new(RationalTime::ZERO, length);
    cacher.force_cache_range(Some(whole));

    let caches = {
        let p = graph.project.read();
        Arc::clone(p.node(graph.viewer).context("viewer vanished")?.caches())
    };
    let started = Instant::now();
    let mut written = 0;
    while caches.video.playback().has_invalidated_ranges(whole)
        || caches.audio.playback().has_invalidated_ranges(whole)
    {
        if started.elapsed() > Duration::from_secs(120) {
            bail!("timed out filling the cache");
        }
        written += cacher.process_events();
        std::thread::sleep(Duration::from_millis(2));
    }
    info!("Cached {} entries in {:?}", written, started.elapsed());

    for cache in [caches.video.playback(), caches.thumbnail.playback(), caches.audio.playback()] {
        if let Err(e) = cache.save_state() {
            warn!("Failed to save cache state: {}", e);
        }
    }
    info!(
        files = manager.disk_cache().len(),
        bytes = manager.disk_cache().usage(),
        "Disk cache usage"
    );

    drop(cacher);
    info!("CineGraph shutting down");
    Ok(())
}

//! CineGraph Render - turning the node graph into frames and samples
//!
//! Provides:
//! - `RenderBackend` with a CPU implementation (`SoftwareBackend`)
//! - `Renderer` texture pooling and color-managed blits
//! - Decoders, decoder and shader caches, and a CPU frame pool
//! - `RenderTicket`s executed by `RenderProcessor` on `RenderManager` threads
//! - `ProjectCopier` and `PreviewAutoCacher` for background cache filling

pub mod autocacher;
pub mod backend;
pub mod copier;
pub mod decoder;
pub mod error;
pub mod frame_manager;
pub mod job_tracker;
pub mod manager;
pub mod processor;
pub mod render_cache;
pub mod renderer;
pub mod request;
pub mod software;
pub mod ticket;

pub use autocacher::PreviewAutoCacher;
pub use backend::{BackendFactory, RenderBackend, ShaderHandle};
pub use copier::ProjectCopier;
pub use decoder::{
    CodecStream, Decoder, DecoderConstructor, DecoderRegistry, FootageDescription, PatternDecoder,
    RetrieveState, RetrieveVideoParams,
};
pub use error::{RenderError, Result};
pub use frame_manager::FrameManager;
pub use job_tracker::RenderJobTracker;
pub use manager::{RenderManager, RenderThread};
pub use processor::{RenderProcessor, RenderResources};
pub use render_cache::{DecoderCache, DecoderEntry, DecoderKey, DecoderPtr, RenderCache, ShaderCache};
pub use renderer::Renderer;
pub use request::{
    AudioRequest, CacheTarget, RenderMode, RenderRequest, ReturnType, SharedProject, VideoRequest,
};
pub use software::SoftwareBackend;
pub use ticket::{RenderTicket, RenderTicketPtr, RenderTicketWatcher, TicketId, TicketResult};

//! Texture handles and deferred pixel sources.
//!
//! A texture flowing through the graph is either backed by a render backend
//! allocation, a placeholder with no pixels, or a job that describes how to
//! produce the pixels later.

use cinegraph_core::VideoParams;
use crossbeam_channel::Sender;
use std::sync::Arc;

use crate::job::VideoJob;

/// Backend-specific texture identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// A live backend allocation.
///
/// Dropping the last reference sends the handle back to whoever allocated it
/// so the storage can be reused.
#[derive(Debug)]
pub struct NativeTexture {
    handle: TextureHandle,
    release: Option<Sender<TextureHandle>>,
}

impl NativeTexture {
    pub fn new(handle: TextureHandle, release: Option<Sender<TextureHandle>>) -> Self {
        Self { handle, release }
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }
}

impl Drop for NativeTexture {
    fn drop(&mut self) {
        if let Some(tx) = self.release.take() {
            // The allocator may already be gone during shutdown.
            let _ = tx.send(self.handle);
        }
    }
}

/// Where a texture's pixels come from.
#[derive(Debug)]
pub enum PixelSource {
    Native(NativeTexture),
    /// Placeholder produced when no backend is attached.
    Dummy,
    Job(Box<VideoJob>),
}

/// A texture with its raster description.
#[derive(Debug)]
pub struct Texture {
    params: VideoParams,
    source: PixelSource,
}

pub type TexturePtr = Arc<Texture>;

impl Texture {
    pub fn native(params: VideoParams, native: NativeTexture) -> TexturePtr {
        Arc::new(Self {
            params,
            source: PixelSource::Native(native),
        })
    }

    pub fn dummy(params: VideoParams) -> TexturePtr {
        Arc::new(Self {
            params,
            source: PixelSource::Dummy,
        })
    }

    /// A texture whose pixels are produced by resolving `job`.
    pub fn job(params: VideoParams, job: impl Into<VideoJob>) -> TexturePtr {
        Arc::new(Self {
            params,
            source: PixelSource::Job(Box::new(job.into())),
        })
    }

    pub fn params(&self) -> &VideoParams {
        &self.params
    }

    pub fn width(&self) -> u32 {
        self.params.effective_width()
    }

    pub fn height(&self) -> u32 {
        self.params.effective_height()
    }

    pub fn source(&self) -> &PixelSource {
        &self.source
    }

    pub fn is_job(&self) -> bool {
        matches!(self.source, PixelSource::Job(_))
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self.source, PixelSource::Dummy)
    }

    pub fn as_job(&self) -> Option<&VideoJob> {
        match &self.source {
            PixelSource::Job(j) => Some(j),
            _ => None,
        }
    }

    pub fn native_handle(&self) -> Option<TextureHandle> {
        match &self.source {
            PixelSource::Native(n) => Some(n.handle()),
            _ => None,
        }
    }
}

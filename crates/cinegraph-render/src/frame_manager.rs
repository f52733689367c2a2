//! Pool of CPU pixel buffers.
//!
//! Frames are allocated constantly during rendering and downloads. Released
//! buffers are kept per byte size and handed out again; a background thread
//! frees buffers that stayed unused for longer than the pool lifetime.

use cinegraph_core::{Frame, VideoParams};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

#[derive(Debug, Default)]
struct Pool {
    free: HashMap<usize, Vec<(Vec<u8>, Instant)>>,
}

impl Pool {
    fn clear_older_than(&mut self, lifetime: Duration) -> usize {
        let mut freed = 0;
        self.free.retain(|_, buffers| {
            let before = buffers.len();
            buffers.retain(|(_, released)| released.elapsed() < lifetime);
            freed += before - buffers.len();
            !buffers.is_empty()
        });
        freed
    }
}

pub struct FrameManager {
    pool: Arc<Mutex<Pool>>,
    lifetime: Duration,
    shutdown: Option<Sender<()>>,
    sweeper: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for FrameManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameManager")
            .field("lifetime", &self.lifetime)
            .field("pooled", &self.pooled_count())
            .finish()
    }
}

impl FrameManager {
    /// Start a manager whose sweep runs every `lifetime`.
    pub fn new(lifetime: Duration) -> Self {
        let pool = Arc::new(Mutex::new(Pool::default()));
        let (shutdown, shutdown_rx) = bounded::<()>(1);

        let sweeper = {
            let pool = Arc::clone(&pool);
            let interval = lifetime.max(Duration::from_millis(1));
            thread::Builder::new()
                .name("cinegraph-frame-gc".into())
                .spawn(move || loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let freed = pool.lock().clear_older_than(lifetime);
                            if freed > 0 {
                                trace!(freed, "Freed pooled frame buffers");
                            }
                        }
                        _ => break,
                    }
                })
        };
        let sweeper = match sweeper {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to spawn frame pool sweeper: {}", e);
                None
            }
        };

        Self {
            pool,
            lifetime,
            shutdown: Some(shutdown),
            sweeper,
        }
    }

    /// A zeroed buffer of `size` bytes, reused when one is pooled.
    pub fn allocate(&self, size: usize) -> Vec<u8> {
        let reused = self
            .pool
            .lock()
            .free
            .get_mut(&size)
            .and_then(|buffers| buffers.pop());
        match reused {
            Some((mut buf, _)) => {
                buf.fill(0);
                buf
            }
            None => vec![0u8; size],
        }
    }

    pub fn deallocate(&self, buffer: Vec<u8>) {
        if buffer.is_empty() {
            return;
        }
        self.pool
            .lock()
            .free
            .entry(buffer.len())
            .or_default()
            .push((buffer, Instant::now()));
    }

    /// A blank frame backed by a pooled buffer.
    pub fn allocate_frame(&self, params: &VideoParams) -> Frame {
        let scaled = params.scaled();
        let line_size = scaled.line_size_for(scaled.width);
        let data = self.allocate(line_size * scaled.height as usize);
        Frame::from_buffer(scaled, line_size, data).unwrap_or_else(|| Frame::new(*params))
    }

    pub fn recycle_frame(&self, frame: Frame) {
        self.deallocate(frame.into_data());
    }

    /// Free pooled buffers older than the lifetime right away.
    pub fn clear_old(&self) -> usize {
        self.pool.lock().clear_older_than(self.lifetime)
    }

    pub fn pooled_count(&self) -> usize {
        self.pool.lock().free.values().map(Vec::len).sum()
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }
}

impl Drop for FrameManager {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.sweeper.take() {
            if handle.join().is_err() {
                warn!("Frame pool sweeper panicked");
            }
        }
        debug!(pooled = self.pooled_count(), "Frame manager stopped");
    }
}

//! Disk quota bookkeeping for cache folders.
//!
//! Files written by the frame and audio caches are registered here. When the
//! folder exceeds its byte limit the least recently touched files are deleted
//! and their paths handed back so the owning caches can invalidate.

use cinegraph_core::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
struct Entry {
    size: u64,
    access: u64,
}

#[derive(Debug, Default)]
struct DiskState {
    entries: HashMap<PathBuf, Entry>,
    total: u64,
    counter: u64,
}

/// A cache root with a byte limit and LRU eviction.
#[derive(Debug)]
pub struct DiskCacheFolder {
    root: PathBuf,
    limit: Mutex<u64>,
    state: Mutex<DiskState>,
}

impl DiskCacheFolder {
    pub fn new(root: impl Into<PathBuf>, limit: u64) -> Self {
        Self {
            root: root.into(),
            limit: Mutex::new(limit),
            state: Mutex::new(DiskState::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limit(&self) -> u64 {
        *self.limit.lock()
    }

    /// Lower or raise the limit, evicting immediately if now over.
    pub fn set_limit(&self, limit: u64) -> Vec<PathBuf> {
        *self.limit.lock() = limit;
        self.evict()
    }

    /// Bytes currently tracked.
    pub fn usage(&self) -> u64 {
        self.state.lock().total
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index every file already under the root. Existing files start out
    /// oldest so they are the first to go.
    pub fn scan(&self) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut found = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let meta = entry.metadata()?;
                if meta.is_dir() {
                    stack.push(entry.path());
                } else {
                    found.push((entry.path(), meta.len()));
                }
            }
        }

        let count = found.len();
        let mut state = self.state.lock();
        for (path, size) in found {
            if let Some(old) = state.entries.insert(path, Entry { size, access: 0 }) {
                state.total -= old.size;
            }
            state.total += size;
        }
        info!(
            "Disk cache {} indexed {} files ({} bytes)",
            self.root.display(),
            count,
            state.total
        );
        Ok(count)
    }

    /// Record a freshly written file. Returns paths deleted to stay under the limit.
    pub fn register(&self, path: impl Into<PathBuf>, size: u64) -> Vec<PathBuf> {
        let path = path.into();
        {
            let mut state = self.state.lock();
            state.counter += 1;
            let access = state.counter;
            if let Some(old) = state.entries.insert(path, Entry { size, access }) {
                state.total -= old.size;
            }
            state.total += size;
        }
        self.evict()
    }

    /// Mark a file as recently used.
    pub fn touch(&self, path: &Path) {
        let mut state = self.state.lock();
        state.counter += 1;
        let access = state.counter;
        if let Some(e) = state.entries.get_mut(path) {
            e.access = access;
        }
    }

    /// Forget a file without deleting it.
    pub fn remove(&self, path: &Path) {
        let mut state = self.state.lock();
        if let Some(old) = state.entries.remove(path) {
            state.total -= old.size;
        }
    }

    /// Delete every tracked file.
    pub fn clear(&self) -> Vec<PathBuf> {
        let drained: Vec<PathBuf> = {
            let mut state = self.state.lock();
            state.total = 0;
            state.entries.drain().map(|(p, _)| p).collect()
        };
        for path in &drained {
            delete_file(path);
        }
        drained
    }

    fn evict(&self) -> Vec<PathBuf> {
        let limit = self.limit();
        let victims = {
            let mut state = self.state.lock();
            if state.total <= limit {
                return Vec::new();
            }
            let mut order: Vec<(PathBuf, Entry)> =
                state.entries.iter().map(|(p, e)| (p.clone(), *e)).collect();
            order.sort_by_key(|(_, e)| e.access);

            let mut victims = Vec::new();
            for (path, entry) in order {
                if state.total <= limit {
                    break;
                }
                state.entries.remove(&path);
                state.total -= entry.size;
                victims.push(path);
            }
            victims
        };

        for path in &victims {
            delete_file(path);
        }
        debug!("Disk cache evicted {} files", victims.len());
        victims
    }
}

fn delete_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to delete cache file {}: {}", path.display(), e);
        }
    }
}

//! Range-validated playback cache base.
//!
//! A [`PlaybackCache`] is identified by a UUID and remembers which spans of
//! time have been rendered and written to disk. Concrete caches wrap it and
//! decide how the data itself is stored.

use cinegraph_core::{remove_range, RangeItem, RationalTime, Result, TimeRange, TimeRangeList};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Notifications emitted by a playback cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Invalidated { cache: Uuid, range: TimeRange },
    Validated { cache: Uuid, range: TimeRange },
    Requested { cache: Uuid, range: TimeRange },
    CancelAll { cache: Uuid },
}

/// A span whose content lives under another cache's UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passthrough {
    pub range: TimeRange,
    pub uuid: Uuid,
}

impl RangeItem for Passthrough {
    fn range(&self) -> TimeRange {
        self.range
    }

    fn set_in(&mut self, time: RationalTime) {
        self.range.set_in(time);
    }

    fn set_out(&mut self, time: RationalTime) {
        self.range.set_out(time);
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PlaybackState {
    validated: TimeRangeList,
    #[serde(skip)]
    requested: TimeRangeList,
    passthroughs: Vec<Passthrough>,
}

/// Shared bookkeeping for every disk-backed cache.
#[derive(Debug)]
pub struct PlaybackCache {
    uuid: RwLock<Uuid>,
    dir: RwLock<PathBuf>,
    saving_enabled: RwLock<bool>,
    state: Mutex<PlaybackState>,
    listeners: Mutex<Vec<Sender<CacheEvent>>>,
}

impl PlaybackCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            uuid: RwLock::new(Uuid::new_v4()),
            dir: RwLock::new(dir.into()),
            saving_enabled: RwLock::new(true),
            state: Mutex::new(PlaybackState::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn uuid(&self) -> Uuid {
        *self.uuid.read()
    }

    /// Re-key the cache. Validation state is dropped since it belonged to the old key.
    pub fn set_uuid(&self, uuid: Uuid) {
        *self.uuid.write() = uuid;
        self.state.lock().validated.clear();
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.read().clone()
    }

    pub fn set_cache_dir(&self, dir: impl Into<PathBuf>) {
        *self.dir.write() = dir.into();
    }

    /// Directory holding this cache's files.
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir().join(self.uuid().to_string())
    }

    pub fn is_saving_enabled(&self) -> bool {
        *self.saving_enabled.read()
    }

    pub fn set_saving_enabled(&self, enabled: bool) {
        *self.saving_enabled.write() = enabled;
    }

    /// Receive every future event of this cache.
    pub fn subscribe(&self) -> Receiver<CacheEvent> {
        let (tx, rx) = unbounded();
        self.listeners.lock().push(tx);
        rx
    }

    fn emit(&self, event: CacheEvent) {
        self.listeners.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn validated_ranges(&self) -> TimeRangeList {
        self.state.lock().validated.clone()
    }

    pub fn requested_ranges(&self) -> TimeRangeList {
        self.state.lock().requested.clone()
    }

    /// The parts of `intersecting` that have not been validated.
    pub fn invalidated_ranges(&self, intersecting: TimeRange) -> TimeRangeList {
        let state = self.state.lock();
        let mut invalidated = TimeRangeList::new();
        invalidated.insert(intersecting);
        for r in &state.validated {
            invalidated.remove(*r);
        }
        invalidated
    }

    pub fn has_invalidated_ranges(&self, intersecting: TimeRange) -> bool {
        !self.invalidated_ranges(intersecting).is_empty()
    }

    pub fn is_validated(&self, range: &TimeRange) -> bool {
        self.state.lock().validated.contains(range)
    }

    /// Mark a range as needing a re-render.
    pub fn invalidate(&self, range: TimeRange) {
        if range.is_empty() {
            warn!("Tried to invalidate zero-length range on cache {}", self.uuid());
            return;
        }
        {
            let mut state = self.state.lock();
            state.validated.remove(range);
            // Passthroughs may overlap, so each is trimmed separately.
            let passthroughs = std::mem::take(&mut state.passthroughs);
            for p in passthroughs {
                let mut kept = vec![p];
                remove_range(&mut kept, range);
                state.passthroughs.extend(kept);
            }
        }
        debug!("Cache {} invalidated {}", self.uuid(), range);
        self.emit(CacheEvent::Invalidated {
            cache: self.uuid(),
            range,
        });
    }

    pub fn invalidate_all(&self) {
        self.invalidate(TimeRange::ALL);
    }

    /// Mark a range as rendered and stored.
    pub fn validate(&self, range: TimeRange) {
        if range.is_empty() {
            return;
        }
        self.state.lock().validated.insert(range);
        self.emit(CacheEvent::Validated {
            cache: self.uuid(),
            range,
        });
    }

    /// Ask listeners to render a range.
    pub fn request(&self, range: TimeRange) {
        self.state.lock().requested.insert(range);
        self.emit(CacheEvent::Requested {
            cache: self.uuid(),
            range,
        });
    }

    pub fn clear_request(&self, range: TimeRange) {
        self.state.lock().requested.remove(range);
    }

    /// Tell listeners to abandon every in-flight render for this cache.
    pub fn cancel_all(&self) {
        self.emit(CacheEvent::CancelAll { cache: self.uuid() });
    }

    /// Reuse another cache's validated content for the given span.
    pub fn set_passthrough(&self, other: &PlaybackCache, range: TimeRange) {
        let other_uuid = other.uuid();
        let covered = other.validated_ranges().intersection(&range);
        let mut state = self.state.lock();
        for r in &covered {
            state.passthroughs.push(Passthrough {
                range: *r,
                uuid: other_uuid,
            });
            state.validated.insert(*r);
        }
    }

    /// UUID whose files hold the content at `time`.
    pub fn uuid_for_time(&self, time: RationalTime) -> Uuid {
        let state = self.state.lock();
        state
            .passthroughs
            .iter()
            .rev()
            .find(|p| p.range.contains(time))
            .map(|p| p.uuid)
            .unwrap_or_else(|| self.uuid())
    }

    fn state_path(&self) -> PathBuf {
        self.cache_path().join("state.json")
    }

    /// Persist validated ranges next to the cache files.
    pub fn save_state(&self) -> Result<()> {
        if !self.is_saving_enabled() {
            return Ok(());
        }
        let path = self.state_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string(&*self.state.lock())?;
        std::fs::write(&path, text)?;
        debug!("Saved cache state to {}", path.display());
        Ok(())
    }

    /// Restore validated ranges written by [`save_state`](Self::save_state).
    ///
    /// A missing state file leaves the cache empty and is not an error.
    pub fn load_state(&self) -> Result<()> {
        let path = self.state_path();
        if !Path::new(&path).exists() {
            return Ok(());
        }
        let text = std::fs::read_to_string(&path)?;
        let loaded: PlaybackState = serde_json::from_str(&text)?;
        let mut state = self.state.lock();
        state.validated = loaded.validated;
        state.passthroughs = loaded.passthroughs;
        Ok(())
    }
}

//! Locked caches shared between render threads.
//!
//! Every access holds the cache lock for the whole lookup-or-create, so two
//! threads can never open the same decoder twice.

use cinegraph_node::ShaderCode;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

use crate::decoder::{CodecStream, Decoder, DecoderRegistry};
use crate::error::{RenderError, Result};

/// A hash map with an attached mutex.
#[derive(Debug)]
pub struct RenderCache<K, V> {
    map: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for RenderCache<K, V> {
    fn default() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V> RenderCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the lock for a compound operation.
    pub fn lock(&self) -> MutexGuard<'_, HashMap<K, V>> {
        self.map.lock()
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.map.lock().insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.map.lock().remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    pub fn clear(&self) {
        self.map.lock().clear();
    }
}

impl<K: Eq + Hash, V: Clone> RenderCache<K, V> {
    pub fn get(&self, key: &K) -> Option<V> {
        self.map.lock().get(key).cloned()
    }

    /// Return the cached value, creating it under the lock on a miss.
    pub fn get_or_insert_with(&self, key: K, create: impl FnOnce() -> V) -> V {
        self.map.lock().entry(key).or_insert_with(create).clone()
    }
}

// ── Decoders ────────────────────────────────────────────────────

pub type DecoderPtr = Arc<Mutex<Box<dyn Decoder>>>;

pub struct DecoderEntry {
    pub decoder: DecoderPtr,
    /// File modification time when the decoder was opened.
    pub modified: Option<SystemTime>,
    pub last_used: Instant,
}

impl std::fmt::Debug for DecoderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderEntry")
            .field("modified", &self.modified)
            .field("last_used", &self.last_used)
            .finish()
    }
}

pub type DecoderKey = (String, CodecStream);

/// Open decoders keyed by decoder id and stream.
#[derive(Debug, Default)]
pub struct DecoderCache {
    cache: RenderCache<DecoderKey, DecoderEntry>,
}

fn modified_time(filename: &str) -> Option<SystemTime> {
    fs::metadata(filename).and_then(|m| m.modified()).ok()
}

impl DecoderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// An open decoder for `stream`, reopened if the file changed on disk.
    pub fn resolve(
        &self,
        registry: &DecoderRegistry,
        decoder_id: &str,
        stream: &CodecStream,
    ) -> Result<DecoderPtr> {
        let key = (decoder_id.to_string(), stream.clone());
        let modified = modified_time(&stream.filename);
        let mut map = self.cache.lock();

        if let Some(entry) = map.get_mut(&key) {
            if entry.modified == modified {
                entry.last_used = Instant::now();
                return Ok(Arc::clone(&entry.decoder));
            }
            debug!(%stream, "File changed on disk, reopening decoder");
            map.remove(&key);
        }

        let mut decoder = registry
            .create(decoder_id)
            .ok_or_else(|| RenderError::Decoder(format!("no decoder '{}'", decoder_id)))?;
        decoder.open(stream)?;
        let decoder: DecoderPtr = Arc::new(Mutex::new(decoder));
        map.insert(
            key,
            DecoderEntry {
                decoder: Arc::clone(&decoder),
                modified,
                last_used: Instant::now(),
            },
        );
        Ok(decoder)
    }

    /// Close decoders idle longer than `max_inactivity`.
    pub fn clear_old(&self, max_inactivity: Duration) -> usize {
        let mut map = self.cache.lock();
        let before = map.len();
        map.retain(|(id, stream), entry| {
            let keep = entry.last_used.elapsed() < max_inactivity;
            if !keep {
                match entry.decoder.try_lock() {
                    Some(mut d) => d.close(),
                    None => warn!(decoder = id.as_str(), %stream, "Evicting a decoder in use"),
                }
            }
            keep
        });
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

// ── Shaders ─────────────────────────────────────────────────────

/// Shader code per `(node type, shader id)`, so a node kind generates each
/// shader once.
pub type ShaderCache = RenderCache<(String, String), ShaderCode>;

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_node::BuiltinShader;
    use std::thread;

    #[test]
    fn test_decoder_reused_for_same_stream() {
        let registry = DecoderRegistry::with_builtins();
        let cache = DecoderCache::new();
        let s = CodecStream::new("pattern:2", 0);
        let a = cache.resolve(&registry, "pattern", &s).unwrap();
        let b = cache.resolve(&registry, "pattern", &s).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.lock().is_open());

        cache.resolve(&registry, "pattern", &CodecStream::new("pattern:2", 1)).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_unknown_decoder_is_an_error() {
        let cache = DecoderCache::new();
        let r = cache.resolve(&DecoderRegistry::new(), "pattern", &CodecStream::new("x", 0));
        assert!(matches!(r, Err(RenderError::Decoder(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_old_closes_idle_decoders() {
        let registry = DecoderRegistry::with_builtins();
        let cache = DecoderCache::new();
        let d = cache.resolve(&registry, "pattern", &CodecStream::new("a", 0)).unwrap();
        assert_eq!(cache.clear_old(Duration::from_secs(60)), 0);
        assert_eq!(cache.clear_old(Duration::ZERO), 1);
        assert!(!d.lock().is_open());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_resolve_opens_once() {
        let registry = Arc::new(DecoderRegistry::with_builtins());
        let cache = Arc::new(DecoderCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    cache
                        .resolve(&registry, "pattern", &CodecStream::new("shared", 0))
                        .unwrap()
                })
            })
            .collect();
        let decoders: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(decoders.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_shader_cache_creates_once() {
        let cache = ShaderCache::new();
        let key = ("org.cinegraph.merge".to_string(), "builtin:alpha_over".to_string());
        let mut calls = 0;
        for _ in 0..3 {
            cache.get_or_insert_with(key.clone(), || {
                calls += 1;
                ShaderCode::builtin(BuiltinShader::AlphaOver)
            });
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.get(&key), Some(ShaderCode::builtin(BuiltinShader::AlphaOver)));
    }
}

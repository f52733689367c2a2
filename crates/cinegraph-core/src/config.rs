//! Engine configuration.
//!
//! Loaded from a JSON file; every field has a default so partial files work.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::Result;

/// Tunables for the render threads, caches and garbage collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory for disk caches.
    pub disk_cache_dir: PathBuf,
    /// Byte limit for the disk cache folder; 0 means unlimited.
    pub disk_cache_limit: u64,
    /// Seconds cached ahead of the playhead.
    pub cache_ahead_secs: f64,
    /// Seconds cached behind the playhead.
    pub cache_behind_secs: f64,
    /// Number of waveform render threads.
    pub waveform_threads: usize,
    /// Idle time before a decoder is closed.
    pub decoder_max_inactivity_ms: u64,
    /// Idle time before a decoder is closed under aggressive GC.
    pub decoder_max_inactivity_aggressive_ms: u64,
    /// Interval between decoder sweeps.
    pub decoder_gc_interval_ms: u64,
    /// Idle time before a cached backend texture is destroyed.
    pub texture_max_life_ms: u64,
    /// Idle time before a pooled CPU frame buffer is freed.
    pub frame_pool_lifetime_ms: u64,
    /// Length of one audio cache segment in seconds.
    pub audio_segment_secs: i64,
    /// Thumbnail render height in pixels.
    pub thumbnail_height: u32,
    /// Upper bound on concurrently queued video cache renders.
    pub max_in_flight_renders: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            disk_cache_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("cinegraph"),
            disk_cache_limit: 20 * 1024 * 1024 * 1024,
            cache_ahead_secs: 60.0,
            cache_behind_secs: 20.0,
            waveform_threads: num_cpus::get().max(1),
            decoder_max_inactivity_ms: 5000,
            decoder_max_inactivity_aggressive_ms: 1000,
            decoder_gc_interval_ms: 1000,
            texture_max_life_ms: 5000,
            frame_pool_lifetime_ms: 5000,
            audio_segment_secs: 10,
            thumbnail_height: 120,
            max_in_flight_renders: 4,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn decoder_max_inactivity(&self, aggressive: bool) -> Duration {
        Duration::from_millis(if aggressive {
            self.decoder_max_inactivity_aggressive_ms
        } else {
            self.decoder_max_inactivity_ms
        })
    }

    pub fn texture_max_life(&self) -> Duration {
        Duration::from_millis(self.texture_max_life_ms)
    }

    pub fn frame_pool_lifetime(&self) -> Duration {
        Duration::from_millis(self.frame_pool_lifetime_ms)
    }
}

/// How the host process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunMode {
    #[default]
    Interactive,
    Headless,
}

/// Start-up parameters handed to the engine context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreParams {
    run_mode: RunMode,
    startup_project: Option<PathBuf>,
    crash_on_startup: bool,
    config_path: Option<PathBuf>,
}

impl CoreParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn set_run_mode(&mut self, mode: RunMode) {
        self.run_mode = mode;
    }

    pub fn startup_project(&self) -> Option<&Path> {
        self.startup_project.as_deref()
    }

    pub fn set_startup_project(&mut self, path: impl Into<PathBuf>) {
        self.startup_project = Some(path.into());
    }

    pub fn crash_on_startup(&self) -> bool {
        self.crash_on_startup
    }

    pub fn set_crash_on_startup(&mut self, e: bool) {
        self.crash_on_startup = e;
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn set_config_path(&mut self, path: impl Into<PathBuf>) {
        self.config_path = Some(path.into());
    }

    /// Load the configured engine config, falling back to defaults.
    pub fn load_config(&self) -> Result<EngineConfig> {
        match &self.config_path {
            Some(path) => EngineConfig::load(path),
            None => Ok(EngineConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"waveform_threads": 3}"#).unwrap();
        assert_eq!(config.waveform_threads, 3);
        assert_eq!(config.decoder_max_inactivity_ms, 5000);
        assert_eq!(config.decoder_max_inactivity(true), Duration::from_millis(1000));
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let mut config = EngineConfig::default();
        config.thumbnail_height = 90;
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_crash_on_startup_assigns_value() {
        let mut params = CoreParams::new();
        params.set_crash_on_startup(true);
        assert!(params.crash_on_startup());
        params.set_crash_on_startup(false);
        assert!(!params.crash_on_startup());
    }
}

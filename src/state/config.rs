/// Cache configuration
///
/// This struct stores every tunable of the thumbnail cache.
/// It is serialized to JSON and read from the user's config directory,
/// so a missing or partial file always falls back to sane defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::scan::RAW_EXTENSIONS;

/// Application directory name under the platform cache/config dirs
const APP_DIR: &str = "raw-browser";

/// All tunables of the thumbnail cache
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    // ========== Persistence ==========

    /// Root of the sharded thumbnail files (`xx/<key>.jpg`)
    pub thumb_dir: PathBuf,

    /// SQLite database holding thumbnail, file and directory metadata
    pub database_path: PathBuf,

    /// Run the orphan sweep once at startup
    pub sweep_on_startup: bool,

    // ========== Thumbnails ==========

    /// Longest edge of a generated thumbnail in pixels
    pub max_pixel_size: u32,

    /// JPEG quality for persisted thumbnails (1-100)
    pub jpeg_quality: u8,

    /// Lowercase file extensions the browser lists
    pub extensions: Vec<String>,

    // ========== Loader ==========

    /// Fetches allowed to decode or read at the same time
    pub max_concurrent_loads: usize,

    /// Smallest resident budget
    pub base_budget: usize,

    /// Resident budget never grows past this
    pub budget_ceiling: usize,

    /// Minimum headroom added on top of the largest requested range
    pub min_slack: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let root = cache_root();
        let mut extensions: Vec<String> = ["jpg", "jpeg", "png", "tif", "tiff", "webp", "bmp", "gif"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        extensions.extend(RAW_EXTENSIONS.iter().map(|s| s.to_string()));

        Self {
            thumb_dir: root.join("thumbnails"),
            database_path: root.join("metadata.sqlite"),
            sweep_on_startup: true,
            max_pixel_size: 256,
            jpeg_quality: 85,
            extensions,
            max_concurrent_loads: 8,
            base_budget: 300,
            budget_ceiling: 1800,
            min_slack: 32,
        }
    }
}

impl CacheConfig {
    /// Defaults rooted at an explicit directory instead of the user cache dir
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            thumb_dir: root.join("thumbnails"),
            database_path: root.join("metadata.sqlite"),
            ..Self::default()
        }
    }

    /// Load `<config_dir>/raw-browser/cache.json`, or defaults when absent
    ///
    /// A malformed file is logged and ignored.
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(json) => match Self::from_json(&json) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded cache configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid cache configuration, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Convert to JSON string for storage
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Self>(json).map(Self::sanitized)
    }

    /// Pull hand-edited values back into their working ranges
    fn sanitized(mut self) -> Self {
        if self.max_pixel_size == 0 {
            warn!("max_pixel_size of 0 would fail every thumbnail, using 1");
            self.max_pixel_size = 1;
        }
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        self.max_concurrent_loads = self.max_concurrent_loads.max(1);
        self
    }

    /// Resident budget for a demand of `needed` entries
    ///
    /// `clamp(needed + max(min_slack, needed / 8), base_budget, budget_ceiling)`
    pub fn budget_for(&self, needed: usize) -> usize {
        let slack = self.min_slack.max(needed / 8);
        (needed + slack).clamp(self.base_budget, self.budget_ceiling.max(self.base_budget))
    }

    /// Whether a file extension is one the browser lists
    pub fn accepts_extension(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.extensions.iter().any(|e| *e == ext)
    }
}

/// Get the cache root (~/.cache/raw-browser on Linux)
fn cache_root() -> PathBuf {
    let mut path = dirs::cache_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir);

    path.push(APP_DIR);
    path
}

fn config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push(APP_DIR);
    path.push("cache.json");
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_concurrent_loads, 8);
        assert_eq!(config.base_budget, 300);
        assert_eq!(config.budget_ceiling, 1800);
        assert!(config.thumb_dir.ends_with("thumbnails"));
        assert!(config.accepts_extension("NEF"));
        assert!(config.accepts_extension("jpg"));
        assert!(!config.accepts_extension("txt"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CacheConfig::from_json(r#"{ "max_pixel_size": 512 }"#).unwrap();
        assert_eq!(config.max_pixel_size, 512);
        assert_eq!(config.max_concurrent_loads, 8);

        let json = config.to_json().unwrap();
        assert_eq!(CacheConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let config = CacheConfig::from_json(
            r#"{ "max_pixel_size": 0, "jpeg_quality": 0, "max_concurrent_loads": 0 }"#,
        )
        .unwrap();
        assert_eq!(config.max_pixel_size, 1);
        assert_eq!(config.jpeg_quality, 1);
        assert_eq!(config.max_concurrent_loads, 1);
    }

    #[test]
    fn test_budget_for() {
        let config = CacheConfig::default();

        // Small viewports stay at the base budget
        assert_eq!(config.budget_for(0), 300);
        assert_eq!(config.budget_for(100), 300);

        // 400 + max(32, 50)
        assert_eq!(config.budget_for(400), 450);

        // 1000 + 125
        assert_eq!(config.budget_for(1000), 1125);

        // Capped at the ceiling
        assert_eq!(config.budget_for(5000), 1800);
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Constrained profile: no guessed preloads, and only the requested page of
    /// a multi-page post is preloaded.
    pub mobile: bool,
    pub preload: PreloadConfig,
    pub cache: CacheConfig,
    pub slideshow_seconds: u64,
    pub log_level: String,
    pub api_base_url: String,
    /// Where to start when no URL is given on the command line.
    pub initial_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// How many wanted preloads are considered at once.
    pub concurrent_preloads: usize,
    /// How many completed URLs are remembered and not preloaded again.
    pub recent_capacity: usize,
    /// Preload animation archives. Disable where full-body fetches interfere
    /// with streaming reads of the same file.
    pub preload_archives: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_memory_pages: usize,
    pub max_disk_cache_mb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mobile: false,
            preload: PreloadConfig::default(),
            cache: CacheConfig::default(),
            slideshow_seconds: 5,
            log_level: "info".to_string(),
            api_base_url: "https://api.mangadex.org".to_string(),
            initial_url: "/".to_string(),
        }
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            concurrent_preloads: 5,
            recent_capacity: 1000,
            preload_archives: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 50,
            max_disk_cache_mb: 500,
        }
    }
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vview-tui")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

impl Config {
    /// Load the config file, falling back on defaults if it's missing or broken.
    pub fn load() -> Self {
        let path = config_path();
        if !path.exists() {
            return Config::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Using default settings: {}", e);
                Config::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_error)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(io_error)
    }
}

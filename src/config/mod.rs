// Configuration management for HarmoniQ
// Handles loading/saving settings, with sensible defaults when config is missing

use dirs::{config_dir, data_dir};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "harmoniq";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find a config directory")]
    NoConfigDir,
    #[error("config io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub music_directories: Vec<PathBuf>,
    pub lyrics_dir: PathBuf,
    pub art: ArtConfig,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtConfig {
    /// Ceiling for decoded covers held in memory.
    pub capacity_bytes: usize,
    /// Concurrent decode workers.
    pub workers: usize,
    /// Longer side of a cached cover; bigger images are downscaled. 0 disables.
    pub max_edge: u32,
    /// Where `album:<id>` covers live, as `<id>.jpg` / `<id>.png`.
    pub album_art_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub cleanup_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            music_directories: vec![
                dirs::audio_dir().unwrap_or_else(|| PathBuf::from("~/Music")),
            ],
            lyrics_dir: data_dir.join("lyrics"),
            art: ArtConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Default for ArtConfig {
    fn default() -> Self {
        Self {
            // an eighth of a 256 MiB budget
            capacity_bytes: 256 * 1024 * 1024 / 8,
            workers: 2,
            max_edge: 512,
            album_art_dir: None,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 60,
        }
    }
}

impl MemoryConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Config {
    /// Load from the user config dir, writing defaults on first run.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(io_err)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.art.capacity_bytes == 0 {
            return Err(ConfigError::Invalid("art.capacity_bytes must be positive".to_string()));
        }
        if self.art.workers == 0 {
            return Err(ConfigError::Invalid("art.workers must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = config_dir().ok_or(ConfigError::NoConfigDir)?.join(APP_DIR);
        Ok(config_dir.join("config.toml"))
    }
}

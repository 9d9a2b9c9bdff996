//! Player configuration
//!
//! Loaded from a TOML file. Every field has a default, so a partial file (or
//! none at all) yields a usable configuration.

use crate::format::GpuFormat;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Playback and decoding settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// Playback speed factor (1.0 = normal, 0.0 = frozen)
    pub speed: f64,
    /// Wrap to the start when playback reaches the end
    pub looping: bool,
    /// Start playing as soon as a stream is opened
    pub autoplay: bool,
    /// Decode the tiles of multi-tile frames on the rayon pool
    pub parallel_tiles: bool,
    /// Capacity of the event queue handed to the host
    pub event_queue_depth: usize,
    /// Texture format support of the target platform
    pub platform: PlatformConfig,
    /// Logging configuration
    pub log: LogConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            looping: true,
            autoplay: false,
            parallel_tiles: true,
            event_queue_depth: 64,
            platform: PlatformConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("Loaded player config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Write this configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// Texture format support reported by (or configured for) the platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlatformConfig {
    /// Formats the GPU can sample. RGBA8 is always assumed available.
    pub supported_formats: Vec<GpuFormat>,
    /// Device model string (e.g. "iPad11,3"), used to detect legacy GPUs
    pub device_model: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            supported_formats: vec![
                GpuFormat::Bc1,
                GpuFormat::Bc3,
                GpuFormat::Bc4,
                GpuFormat::Bc7,
                GpuFormat::Rgba8,
            ],
            device_model: None,
        }
    }
}

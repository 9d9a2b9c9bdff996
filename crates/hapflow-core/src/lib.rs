//! HapFlow Core - Shared Domain Types
//!
//! This crate contains the types shared by the decoder, the render sink and the
//! command line player:
//! - Codec and GPU texture format identifiers
//! - Player configuration (TOML)
//! - Logging configuration
//! - Playback events reported to the host

#![warn(missing_docs)]

pub mod config;
pub mod diagnostics;
pub mod format;
pub mod logging;

// Configuration
pub use config::{ConfigError, PlatformConfig, PlayerConfig};

// Events
pub use diagnostics::{EventSeverity, PlayerEvent};

// Formats
pub use format::{CodecType, GpuFormat};

// Logging
pub use logging::LogConfig;

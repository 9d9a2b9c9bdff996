//! Diagnostics - Playback Events
//!
//! Non-fatal conditions (a frame that failed to decode, a degraded texture
//! format) never interrupt playback. They are logged and also queued as
//! [`PlayerEvent`]s so the host can surface them.

use crate::format::{CodecType, GpuFormat};
use std::fmt;

/// Severity level of a playback event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    /// Playback continues but something went wrong
    Warning,
    /// Informational message
    Info,
}

/// Event reported by the playback scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// A stream was opened and is ready
    Opened {
        /// Frame width in pixels
        width: u32,
        /// Frame height in pixels
        height: u32,
        /// Number of frames
        frame_count: usize,
        /// Stream duration in seconds
        duration: f64,
        /// Codec variant
        codec: CodecType,
        /// Texture format frames are published in
        format: GpuFormat,
    },
    /// A new frame was decoded and published
    FrameDecoded {
        /// Frame index
        index: usize,
    },
    /// A frame failed to decode; the previous frame stays published
    DecodeFailed {
        /// Frame index
        index: usize,
        /// Error description
        message: String,
    },
    /// The preferred texture format is unavailable and another one is used
    FormatFallback {
        /// Format the codec maps to natively
        preferred: GpuFormat,
        /// Format actually selected
        selected: GpuFormat,
        /// Why the preferred format was rejected
        reason: String,
    },
    /// Non-looping playback reached the end and paused
    PlaybackFinished,
    /// The stream was closed
    Closed,
}

impl PlayerEvent {
    /// Severity of this event
    pub fn severity(&self) -> EventSeverity {
        match self {
            Self::DecodeFailed { .. } => EventSeverity::Warning,
            _ => EventSeverity::Info,
        }
    }
}

impl fmt::Display for PlayerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened {
                width,
                height,
                frame_count,
                duration,
                codec,
                format,
            } => write!(
                f,
                "Opened {} stream {}x{}, {} frames, {:.2}s, uploading as {}",
                codec, width, height, frame_count, duration, format
            ),
            Self::FrameDecoded { index } => write!(f, "Decoded frame {}", index),
            Self::DecodeFailed { index, message } => {
                write!(f, "Frame {} failed to decode: {}", index, message)
            }
            Self::FormatFallback {
                preferred,
                selected,
                reason,
            } => write!(
                f,
                "Using {} instead of {} ({})",
                selected, preferred, reason
            ),
            Self::PlaybackFinished => write!(f, "Playback finished"),
            Self::Closed => write!(f, "Stream closed"),
        }
    }
}

//! Error types for stream opening and frame decoding

use thiserror::Error;

/// Media errors
#[derive(Error, Debug)]
pub enum MediaError {
    /// Reading from the byte source failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No stream is open
    #[error("No stream is open")]
    NotOpen,

    /// A stream is open but no frame has been decoded yet
    #[error("No frame decoded yet")]
    NotReady,

    /// The container or its frame table is invalid
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// A section or chunk carries a compressor or format byte we do not know
    #[error("Unknown tile format: {0:#04x}")]
    UnknownTileFormat(u8),

    /// Decompression failed or produced the wrong number of bytes
    #[error("Corrupt stream: {0}")]
    CorruptStream(String),

    /// A declared byte range extends past the end of the frame
    #[error("Truncated frame: needed {needed} bytes, {available} available")]
    TruncatedFrame {
        /// Bytes the declared ranges require
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// The stream is not a HAP variant this player decodes
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Frame index outside the frame table
    #[error("Frame {index} out of range (stream has {count} frames)")]
    FrameOutOfRange {
        /// Requested index
        index: usize,
        /// Number of frames in the stream
        count: usize,
    },
}

impl MediaError {
    /// Create a malformed container error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedContainer(msg.into())
    }

    /// Create a corrupt stream error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptStream(msg.into())
    }

    /// Create a truncated frame error
    pub fn truncated(needed: usize, available: usize) -> Self {
        Self::TruncatedFrame { needed, available }
    }

    /// Returns true for per-frame decode errors, after which playback goes on
    /// with the last good frame. Anything else is fatal to the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CorruptStream(_)
                | Self::TruncatedFrame { .. }
                | Self::UnknownTileFormat(_)
                | Self::Io(_)
        )
    }
}

/// Result type for media operations
pub type Result<T> = std::result::Result<T, MediaError>;

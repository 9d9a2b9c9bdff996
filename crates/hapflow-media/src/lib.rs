//! HapFlow Media - HAP Decoding and Playback
//!
//! This crate turns HAP movies into GPU-ready texture buffers:
//! - Snappy block decompression (`block`)
//! - HAP frame sections and chunked frames (`hap_decoder`)
//! - Codec classification and texture format selection (`probe`)
//! - QuickTime sample tables (`container`) and the frame index built on them
//! - Playback clock and single-frame decode scheduling (`player`)
//! - CPU fallback conversion to RGBA8 (`convert`)

pub mod block;
pub mod container;
pub mod convert;
pub mod error;
pub mod frame_index;
pub mod hap_decoder;
pub mod player;
pub mod probe;
pub mod source;

pub use error::{MediaError, Result};
pub use frame_index::{FrameDescriptor, FrameIndex, Rational, StreamMetadata};
pub use hap_decoder::{DecodedFrame, TextureFormatTag, TileDecoder};
pub use player::{
    is_hap_path, FrameSink, FrameSlot, PlaybackScheduler, PlaybackState, PlaybackStats,
    TextureFrame,
};
pub use probe::{
    classify, select_texture_format, FormatPolicy, FormatRule, FormatSelection,
    PlatformCapabilities, Requirement, Transcode,
};
pub use source::{ByteSource, FileSource, MemorySource};

//! Codec and texture format identifiers
//!
//! HAP frames carry DXT/BCn payloads that the GPU samples directly. These
//! types name the codec variant of a stream and the texture format the host
//! uploads it as.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel dimension of a block-compressed texture block
pub const BLOCK_DIMENSION: u32 = 4;

/// HAP codec variant of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CodecType {
    /// Not a HAP variant this player can decode
    #[default]
    Unsupported,
    /// HAP: DXT1/BC1, RGB only
    Hap,
    /// HAP Alpha: DXT5/BC3, RGBA
    HapAlpha,
    /// HAP Q: scaled YCoCg stored in DXT5/BC3
    HapQ,
}

impl CodecType {
    /// Returns true if this codec carries an alpha channel
    pub fn has_alpha(&self) -> bool {
        matches!(self, Self::HapAlpha)
    }

    /// Returns true if sampled texels need the YCoCg to RGB transform
    pub fn needs_ycocg_conversion(&self) -> bool {
        matches!(self, Self::HapQ)
    }

    /// Name of the blit shader that presents this codec on screen
    pub fn blit_shader(&self) -> &'static str {
        match self {
            Self::HapQ => "hap_q",
            _ => "hap",
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "Unsupported"),
            Self::Hap => write!(f, "HAP"),
            Self::HapAlpha => write!(f, "HAP Alpha"),
            Self::HapQ => write!(f, "HAP Q"),
        }
    }
}

/// GPU texture format a decoded frame is uploaded as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuFormat {
    /// BC1/DXT1 - RGB, 4 bits per texel
    Bc1,
    /// BC3/DXT5 - RGBA, 8 bits per texel
    Bc3,
    /// BC4 - single channel, 4 bits per texel
    Bc4,
    /// BC7 - high quality RGBA, 8 bits per texel
    Bc7,
    /// Uncompressed RGBA, 8 bits per channel
    Rgba8,
}

impl GpuFormat {
    /// All formats, compressed first
    pub const ALL: [GpuFormat; 5] = [
        GpuFormat::Bc1,
        GpuFormat::Bc3,
        GpuFormat::Bc4,
        GpuFormat::Bc7,
        GpuFormat::Rgba8,
    ];

    /// Returns true for 4x4 block-compressed formats
    pub fn is_block_compressed(&self) -> bool {
        !matches!(self, Self::Rgba8)
    }

    /// Bits per texel
    pub fn bits_per_texel(&self) -> u32 {
        match self {
            Self::Bc1 | Self::Bc4 => 4,
            Self::Bc3 | Self::Bc7 => 8,
            Self::Rgba8 => 32,
        }
    }

    /// Bytes per 4x4 block, or per pixel for uncompressed formats
    pub fn block_size(&self) -> u32 {
        match self {
            Self::Bc1 | Self::Bc4 => 8,
            Self::Bc3 | Self::Bc7 => 16,
            Self::Rgba8 => 4,
        }
    }

    /// Bytes in one row of blocks (or pixels) for a texture of the given width
    pub fn bytes_per_row(&self, width: u32) -> u32 {
        if self.is_block_compressed() {
            width.div_ceil(BLOCK_DIMENSION) * self.block_size()
        } else {
            width * self.block_size()
        }
    }

    /// Number of block rows (or pixel rows) for a texture of the given height
    pub fn rows(&self, height: u32) -> u32 {
        if self.is_block_compressed() {
            height.div_ceil(BLOCK_DIMENSION)
        } else {
            height
        }
    }

    /// Size in bytes of a full texture with the given dimensions
    pub fn texture_size(&self, width: u32, height: u32) -> usize {
        self.bytes_per_row(width) as usize * self.rows(height) as usize
    }
}

impl fmt::Display for GpuFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bc1 => write!(f, "BC1"),
            Self::Bc3 => write!(f, "BC3"),
            Self::Bc4 => write!(f, "BC4"),
            Self::Bc7 => write!(f, "BC7"),
            Self::Rgba8 => write!(f, "RGBA8"),
        }
    }
}

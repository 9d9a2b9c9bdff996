//! HAP Frame Decoder
//!
//! HAP stores every frame as a DXT/BCn texture, optionally Snappy compressed,
//! so decoding only has to undo the second-stage compression. The result is
//! uploaded to the GPU as is.
//!
//! A frame is one section: a 4-byte header (24-bit little-endian length plus a
//! type byte, or a zero length followed by a 32-bit length) and a body. The
//! high nibble of the type byte names the compressor, the low nibble the
//! texture format:
//!
//! - `0xA_`: body is the raw texture
//! - `0xB_`: body is one Snappy block
//! - `0xC_`: body is a decode-instructions section followed by chunk data.
//!   Chunks are compressed independently and decode in parallel.

use crate::block;
use crate::error::{MediaError, Result};
use hapflow_core::{CodecType, GpuFormat};
use rayon::prelude::*;
use tracing::debug;

const COMPRESSOR_NONE: u8 = 0xA0;
const COMPRESSOR_SNAPPY: u8 = 0xB0;
const COMPRESSOR_COMPLEX: u8 = 0xC0;

/// Top-level type for frames holding more than one texture (HAP Q Alpha)
const SECTION_MULTIPLE_IMAGES: u8 = 0x0D;
const SECTION_DECODE_INSTRUCTIONS: u8 = 0x01;
const SECTION_CHUNK_COMPRESSORS: u8 = 0x02;
const SECTION_CHUNK_SIZES: u8 = 0x03;
const SECTION_CHUNK_OFFSETS: u8 = 0x04;

const CHUNK_RAW: u8 = 0x0A;
const CHUNK_SNAPPY: u8 = 0x0B;

/// Texture format stored in a frame (low nibble of the section type)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormatTag {
    /// DXT1 RGB (HAP)
    Dxt1 = 0x0B,
    /// DXT5 RGBA (HAP Alpha)
    Dxt5 = 0x0E,
    /// Scaled YCoCg in DXT5 (HAP Q)
    YCoCgDxt5 = 0x0F,
    /// BC7 RGBA
    Bc7 = 0x0C,
    /// BC4 single channel
    Bc4 = 0x01,
}

impl TextureFormatTag {
    /// Look up the tag for a type byte's low nibble
    pub fn from_type_byte(section_type: u8) -> Option<Self> {
        match section_type & 0x0F {
            0x0B => Some(Self::Dxt1),
            0x0E => Some(Self::Dxt5),
            0x0F => Some(Self::YCoCgDxt5),
            0x0C => Some(Self::Bc7),
            0x01 => Some(Self::Bc4),
            _ => None,
        }
    }

    /// GPU format the texture bytes are laid out in
    pub fn gpu_format(&self) -> GpuFormat {
        match self {
            Self::Dxt1 => GpuFormat::Bc1,
            Self::Dxt5 | Self::YCoCgDxt5 => GpuFormat::Bc3,
            Self::Bc7 => GpuFormat::Bc7,
            Self::Bc4 => GpuFormat::Bc4,
        }
    }

    /// Codec variant this tag belongs to
    pub fn codec(&self) -> CodecType {
        crate::probe::classify(*self as u8)
    }
}

/// Header of one section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Section type byte
    pub section_type: u8,
    /// Offset of the body from the start of the header
    pub header_len: usize,
    /// Body length in bytes
    pub body_len: usize,
}

/// Read the section header at the start of `data`, checking that the body fits
pub fn read_section_header(data: &[u8]) -> Result<SectionHeader> {
    if data.len() < 4 {
        return Err(MediaError::truncated(4, data.len()));
    }

    let short_len = u32::from_le_bytes([data[0], data[1], data[2], 0]) as usize;
    let section_type = data[3];

    let (header_len, body_len) = if short_len == 0 {
        if data.len() < 8 {
            return Err(MediaError::truncated(8, data.len()));
        }
        let long_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        (8, long_len)
    } else {
        (4, short_len)
    };

    let needed = header_len + body_len;
    if needed > data.len() {
        return Err(MediaError::truncated(needed, data.len()));
    }

    Ok(SectionHeader {
        section_type,
        header_len,
        body_len,
    })
}

/// Second-stage compression of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkCompressor {
    /// Stored verbatim
    Raw,
    /// One Snappy block
    Snappy,
}

/// Location of one independently compressed chunk within a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSection {
    /// Second-stage compression
    pub compressor: ChunkCompressor,
    /// Offset of the compressed bytes from the start of the frame
    pub offset: usize,
    /// Compressed length
    pub compressed_len: usize,
    /// Length after decompression
    pub raw_len: usize,
}

/// Parsed frame structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    /// Texture format of the decoded bytes
    pub format: TextureFormatTag,
    /// Chunks in output order
    pub tiles: Vec<TileSection>,
}

impl FrameLayout {
    /// Total size of the decoded texture
    pub fn raw_len(&self) -> usize {
        self.tiles
            .iter()
            .fold(0usize, |total, tile| total.saturating_add(tile.raw_len))
    }
}

/// Parse a frame's headers and chunk table without decompressing anything
pub fn parse_frame(frame: &[u8]) -> Result<FrameLayout> {
    let header = read_section_header(frame)?;
    let section_type = header.section_type;

    if section_type == SECTION_MULTIPLE_IMAGES {
        return Err(MediaError::UnsupportedCodec(
            "multi-texture frames (HAP Q Alpha)".to_string(),
        ));
    }

    let format = TextureFormatTag::from_type_byte(section_type)
        .ok_or(MediaError::UnknownTileFormat(section_type))?;

    let body_start = header.header_len;
    let body_end = body_start + header.body_len;

    let tiles = match section_type & 0xF0 {
        COMPRESSOR_NONE => vec![TileSection {
            compressor: ChunkCompressor::Raw,
            offset: body_start,
            compressed_len: header.body_len,
            raw_len: header.body_len,
        }],
        COMPRESSOR_SNAPPY => vec![TileSection {
            compressor: ChunkCompressor::Snappy,
            offset: body_start,
            compressed_len: header.body_len,
            raw_len: block::decompressed_len(&frame[body_start..body_end])?,
        }],
        COMPRESSOR_COMPLEX => parse_chunks(frame, body_start, body_end)?,
        _ => return Err(MediaError::UnknownTileFormat(section_type)),
    };

    Ok(FrameLayout { format, tiles })
}

fn parse_chunks(frame: &[u8], body_start: usize, body_end: usize) -> Result<Vec<TileSection>> {
    let instructions = read_section_header(&frame[body_start..body_end])?;
    if instructions.section_type != SECTION_DECODE_INSTRUCTIONS {
        return Err(MediaError::UnknownTileFormat(instructions.section_type));
    }

    let mut compressors: Option<&[u8]> = None;
    let mut sizes: Option<Vec<usize>> = None;
    let mut offsets: Option<Vec<usize>> = None;

    let mut pos = body_start + instructions.header_len;
    let instructions_end = pos + instructions.body_len;
    while pos < instructions_end {
        let sub = read_section_header(&frame[pos..instructions_end])?;
        let body = &frame[pos + sub.header_len..pos + sub.header_len + sub.body_len];
        match sub.section_type {
            SECTION_CHUNK_COMPRESSORS => compressors = Some(body),
            SECTION_CHUNK_SIZES => sizes = Some(read_u32_table(body)?),
            SECTION_CHUNK_OFFSETS => offsets = Some(read_u32_table(body)?),
            other => return Err(MediaError::UnknownTileFormat(other)),
        }
        pos += sub.header_len + sub.body_len;
    }

    let compressors =
        compressors.ok_or_else(|| MediaError::corrupt("chunked frame has no compressor table"))?;
    let sizes = sizes.ok_or_else(|| MediaError::corrupt("chunked frame has no size table"))?;
    if compressors.len() != sizes.len() || compressors.is_empty() {
        return Err(MediaError::corrupt(format!(
            "{} chunk compressors for {} chunk sizes",
            compressors.len(),
            sizes.len()
        )));
    }
    if let Some(offsets) = &offsets {
        if offsets.len() != sizes.len() {
            return Err(MediaError::corrupt(format!(
                "{} chunk offsets for {} chunks",
                offsets.len(),
                sizes.len()
            )));
        }
    }

    let data_start = instructions_end;
    let mut next = 0usize;
    let mut tiles = Vec::with_capacity(sizes.len());
    for (i, (&marker, &size)) in compressors.iter().zip(&sizes).enumerate() {
        let relative = offsets.as_ref().map_or(next, |offsets| offsets[i]);
        let offset = data_start + relative;
        let end = offset + size;
        if end > body_end {
            return Err(MediaError::truncated(end, body_end));
        }
        next = relative + size;

        let (compressor, raw_len) = match marker {
            CHUNK_RAW => (ChunkCompressor::Raw, size),
            CHUNK_SNAPPY => (
                ChunkCompressor::Snappy,
                block::decompressed_len(&frame[offset..end])?,
            ),
            other => return Err(MediaError::UnknownTileFormat(other)),
        };

        tiles.push(TileSection {
            compressor,
            offset,
            compressed_len: size,
            raw_len,
        });
    }

    Ok(tiles)
}

fn read_u32_table(body: &[u8]) -> Result<Vec<usize>> {
    if body.len() % 4 != 0 {
        return Err(MediaError::corrupt(format!(
            "chunk table of {} bytes is not a multiple of 4",
            body.len()
        )));
    }
    Ok(body
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .collect())
}

fn decode_tile(frame: &[u8], tile: &TileSection, out: &mut [u8]) -> Result<()> {
    let input = &frame[tile.offset..tile.offset + tile.compressed_len];
    match tile.compressor {
        ChunkCompressor::Raw => out.copy_from_slice(input),
        ChunkCompressor::Snappy => block::decompress_to(input, out)?,
    }
    Ok(())
}

/// Decoded texture bytes of one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Texture format
    pub format: TextureFormatTag,
    /// GPU-ready compressed texture
    pub data: Vec<u8>,
}

/// Decodes frames into linear texture buffers
#[derive(Debug, Clone, Copy)]
pub struct TileDecoder {
    parallel: bool,
}

impl Default for TileDecoder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TileDecoder {
    /// Create a decoder; `parallel` spreads multi-chunk frames over rayon
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    /// Decode a `width`x`height` frame into a new buffer
    pub fn decode_frame(&self, frame: &[u8], width: u32, height: u32) -> Result<DecodedFrame> {
        let mut data = Vec::new();
        let format = self.decode_frame_into(frame, width, height, &mut data)?;
        Ok(DecodedFrame { format, data })
    }

    /// Decode a `width`x`height` frame into `out`, reusing its allocation.
    ///
    /// The decoded length declared by the frame must match the texture size
    /// for its format, otherwise `CorruptStream` is returned before `out` is
    /// touched.
    pub fn decode_frame_into(
        &self,
        frame: &[u8],
        width: u32,
        height: u32,
        out: &mut Vec<u8>,
    ) -> Result<TextureFormatTag> {
        let layout = parse_frame(frame)?;
        let format = layout.format.gpu_format();
        let expected = format.texture_size(width, height);
        let declared = layout.raw_len();
        if declared != expected {
            return Err(MediaError::corrupt(format!(
                "frame declares {} bytes, {}x{} {} needs {}",
                declared, width, height, format, expected
            )));
        }

        out.clear();
        out.resize(declared, 0);

        let mut slices = Vec::with_capacity(layout.tiles.len());
        let mut rest = out.as_mut_slice();
        for tile in &layout.tiles {
            let (head, tail) = rest.split_at_mut(tile.raw_len);
            slices.push(head);
            rest = tail;
        }

        if self.parallel && layout.tiles.len() > 1 {
            slices
                .into_par_iter()
                .zip(layout.tiles.par_iter())
                .try_for_each(|(slice, tile)| decode_tile(frame, tile, slice))?;
        } else {
            for (slice, tile) in slices.into_iter().zip(&layout.tiles) {
                decode_tile(frame, tile, slice)?;
            }
        }

        debug!(
            "Decoded {:?} frame: {} chunk(s), {} bytes",
            layout.format,
            layout.tiles.len(),
            out.len()
        );
        Ok(layout.format)
    }
}

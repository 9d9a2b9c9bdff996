//! CPU conversion of decoded HAP textures
//!
//! Used when the GPU cannot sample the native BCn format, and for still
//! frame export. BC1 can be rewritten block for block as BC3; everything
//! else is expanded to RGBA8 one block row per task.

use crate::error::{MediaError, Result};
use crate::probe::Transcode;
use hapflow_core::format::BLOCK_DIMENSION;
use rayon::prelude::*;

type Texels = [[u8; 4]; 16];
type BlockDecoder = fn(&[u8]) -> Texels;

/// Offset HAP Q applies to the stored Co and Cg channels (128/255)
const CHROMA_OFFSET: f32 = 128.0 / 255.0;

/// Convert a decoded texture into a new RGBA8 buffer
pub fn to_rgba(transcode: Transcode, data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    transcode_into(transcode, data, width, height, &mut out)?;
    Ok(out)
}

/// Apply `transcode` to a decoded texture, writing into `out`.
///
/// `Passthrough` copies the bytes unchanged. Any other transcode expects
/// exactly `ceil(w/4) * ceil(h/4)` blocks and produces `w * h * 4` bytes.
pub fn transcode_into(
    transcode: Transcode,
    data: &[u8],
    width: u32,
    height: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    let (block_bytes, decode): (usize, BlockDecoder) = match transcode {
        Transcode::Passthrough => {
            out.clear();
            out.extend_from_slice(data);
            return Ok(());
        }
        Transcode::Bc1ToBc3 => return expand_bc1_to_bc3(data, width, height, out),
        Transcode::Bc1ToRgba => (8, decode_bc1_block as BlockDecoder),
        Transcode::Bc3ToRgba => (16, decode_bc3_block as BlockDecoder),
        Transcode::YCoCgToRgba => (16, decode_ycocg_block as BlockDecoder),
    };

    let blocks_wide = width.div_ceil(BLOCK_DIMENSION) as usize;
    let blocks_high = height.div_ceil(BLOCK_DIMENSION) as usize;
    let expected = blocks_wide * blocks_high * block_bytes;
    if data.len() != expected {
        return Err(MediaError::corrupt(format!(
            "{}x{} texture needs {} bytes, got {}",
            width,
            height,
            expected,
            data.len()
        )));
    }

    let row_pitch = width as usize * 4;
    out.clear();
    out.resize(row_pitch * height as usize, 0);
    if out.is_empty() {
        return Ok(());
    }

    out.par_chunks_mut(row_pitch * BLOCK_DIMENSION as usize)
        .zip(data.par_chunks(blocks_wide * block_bytes))
        .for_each(|(pixels, blocks)| {
            for (bx, block) in blocks.chunks_exact(block_bytes).enumerate() {
                write_block(pixels, row_pitch, bx * 4, &decode(block));
            }
        });
    Ok(())
}

fn expand_bc1_to_bc3(data: &[u8], width: u32, height: u32, out: &mut Vec<u8>) -> Result<()> {
    let blocks_wide = width.div_ceil(BLOCK_DIMENSION) as usize;
    let blocks = blocks_wide * height.div_ceil(BLOCK_DIMENSION) as usize;
    if data.len() != blocks * 8 {
        return Err(MediaError::corrupt(format!(
            "{}x{} BC1 texture needs {} bytes, got {}",
            width,
            height,
            blocks * 8,
            data.len()
        )));
    }

    out.clear();
    out.resize(blocks * 16, 0);
    out.par_chunks_mut(16)
        .zip(data.par_chunks(8))
        .for_each(|(dst, src)| bc1_block_as_bc3(src, dst));
    Ok(())
}

/// Rewrite one BC1 block as BC3.
///
/// Four-colour blocks are copied unchanged behind an opaque alpha block.
/// BC3 always decodes its colour block in four-colour mode, so in
/// three-colour blocks the midpoint moves to the one-third colour and the
/// transparent index keeps alpha 0 over `color0`.
fn bc1_block_as_bc3(src: &[u8], dst: &mut [u8]) {
    let color0 = u16::from_le_bytes([src[0], src[1]]);
    let color1 = u16::from_le_bytes([src[2], src[3]]);
    let indices = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);

    // a0 == a1 selects the six-value palette: index 0 is 255, index 6 is 0
    dst[0] = 255;
    dst[1] = 255;
    dst[8..12].copy_from_slice(&src[..4]);

    if color0 > color1 {
        dst[2..8].fill(0);
        dst[12..16].copy_from_slice(&src[4..8]);
        return;
    }

    let mut alpha_bits = 0u64;
    let mut color_bits = 0u32;
    for i in 0..16 {
        let index = (indices >> (2 * i)) & 0b11;
        if index == 3 {
            alpha_bits |= 6u64 << (3 * i);
        } else {
            color_bits |= index << (2 * i);
        }
    }
    dst[2..8].copy_from_slice(&alpha_bits.to_le_bytes()[..6]);
    dst[12..16].copy_from_slice(&color_bits.to_le_bytes());
}

/// Copy a block's texels into a band of up to four pixel rows, clipping at the
/// right and bottom edges
fn write_block(pixels: &mut [u8], row_pitch: usize, x0: usize, texels: &Texels) {
    let rows = pixels.len() / row_pitch;
    let columns = row_pitch / 4;
    for (i, texel) in texels.iter().enumerate() {
        let (x, y) = (x0 + i % 4, i / 4);
        if x < columns && y < rows {
            let at = y * row_pitch + x * 4;
            pixels[at..at + 4].copy_from_slice(texel);
        }
    }
}

fn rgb565(c: u16) -> [u8; 3] {
    let r = ((c >> 11) & 0x1f) as u8;
    let g = ((c >> 5) & 0x3f) as u8;
    let b = (c & 0x1f) as u8;
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
}

fn lerp(a: u8, b: u8, num: u32, den: u32) -> u8 {
    ((a as u32 * (den - num) + b as u32 * num) / den) as u8
}

fn lerp_rgb(a: [u8; 3], b: [u8; 3], num: u32, den: u32) -> [u8; 4] {
    [
        lerp(a[0], b[0], num, den),
        lerp(a[1], b[1], num, den),
        lerp(a[2], b[2], num, den),
        255,
    ]
}

fn color_palette(block: &[u8], opaque: bool) -> [[u8; 4]; 4] {
    let color0 = u16::from_le_bytes([block[0], block[1]]);
    let color1 = u16::from_le_bytes([block[2], block[3]]);
    let (c0, c1) = (rgb565(color0), rgb565(color1));

    let mut palette = [[0u8; 4]; 4];
    palette[0] = [c0[0], c0[1], c0[2], 255];
    palette[1] = [c1[0], c1[1], c1[2], 255];
    if opaque || color0 > color1 {
        palette[2] = lerp_rgb(c0, c1, 1, 3);
        palette[3] = lerp_rgb(c0, c1, 2, 3);
    } else {
        // Three colours plus transparent black
        palette[2] = lerp_rgb(c0, c1, 1, 2);
    }
    palette
}

fn color_texels(block: &[u8], opaque: bool) -> Texels {
    let palette = color_palette(block, opaque);
    let indices = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
    std::array::from_fn(|i| palette[((indices >> (2 * i)) & 0b11) as usize])
}

fn alpha_palette(a0: u8, a1: u8) -> [u8; 8] {
    let mut palette = [a0, a1, 0, 0, 0, 0, 0, 255];
    if a0 > a1 {
        for i in 1..7 {
            palette[i + 1] = lerp(a0, a1, i as u32, 7);
        }
    } else {
        for i in 1..5 {
            palette[i + 1] = lerp(a0, a1, i as u32, 5);
        }
    }
    palette
}

fn decode_bc1_block(block: &[u8]) -> Texels {
    color_texels(block, false)
}

fn decode_bc3_block(block: &[u8]) -> Texels {
    let palette = alpha_palette(block[0], block[1]);
    let indices = block[2..8]
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);

    let mut texels = color_texels(&block[8..16], true);
    for (i, texel) in texels.iter_mut().enumerate() {
        texel[3] = palette[((indices >> (3 * i)) & 0b111) as usize];
    }
    texels
}

fn decode_ycocg_block(block: &[u8]) -> Texels {
    decode_bc3_block(block).map(ycocg_to_rgb)
}

/// Scaled YCoCg (Co in R, Cg in G, scale in B, Y in A) to opaque RGB
fn ycocg_to_rgb(texel: [u8; 4]) -> [u8; 4] {
    let [r, g, b, a] = texel.map(|c| c as f32 / 255.0);
    let scale = b * (255.0 / 8.0) + 1.0;
    let co = (r - CHROMA_OFFSET) / scale;
    let cg = (g - CHROMA_OFFSET) / scale;
    let y = a;

    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    [to_u8(y + co - cg), to_u8(y + cg), to_u8(y - co - cg), 255]
}

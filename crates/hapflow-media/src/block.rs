//! Snappy raw block decompression
//!
//! HAP compresses each texture section (or chunk) as one Snappy block: a
//! varint holding the uncompressed length, then a stream of literal and
//! back-reference tokens. The caller always knows the raw size in advance, so
//! decoding writes straight into a caller-provided buffer that must come out
//! exactly full.

use crate::error::{MediaError, Result};

const TAG_LITERAL: u8 = 0b00;
const TAG_COPY_1: u8 = 0b01;
const TAG_COPY_2: u8 = 0b10;

/// Longest varint preamble (a u32)
const MAX_VARINT_LEN: usize = 5;

/// Read the uncompressed length stored in a block's preamble
pub fn decompressed_len(input: &[u8]) -> Result<usize> {
    read_varint(input).map(|(len, _)| len)
}

/// Decompress a block whose raw size is known
pub fn decompress(input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut output = vec![0u8; expected_len];
    decompress_to(input, &mut output)?;
    Ok(output)
}

/// Decompress a block into `output`, which must be exactly the raw size.
///
/// Fails with [`MediaError::CorruptStream`] if the preamble disagrees with
/// `output.len()`, a back-reference points before the start of the output, the
/// tokens run out early, or they would write past the end.
pub fn decompress_to(input: &[u8], output: &mut [u8]) -> Result<()> {
    let (declared, mut ip) = read_varint(input)?;
    if declared != output.len() {
        return Err(MediaError::corrupt(format!(
            "block declares {} bytes, expected {}",
            declared,
            output.len()
        )));
    }

    let mut op = 0usize;
    while ip < input.len() {
        let tag = input[ip];
        ip += 1;

        match tag & 0b11 {
            TAG_LITERAL => {
                let mut len = (tag >> 2) as usize;
                if len >= 60 {
                    let extra = len - 59;
                    let bytes = take(input, ip, extra)?;
                    ip += extra;
                    len = read_le(bytes);
                }
                len = len
                    .checked_add(1)
                    .ok_or_else(|| MediaError::corrupt("literal length overflow"))?;

                let literal = take(input, ip, len)?;
                ip += len;
                let dest = output_range(output.len(), op, len)?;
                output[dest].copy_from_slice(literal);
                op += len;
            }
            kind => {
                let (len, offset) = match kind {
                    TAG_COPY_1 => {
                        let low = take(input, ip, 1)?[0] as usize;
                        ip += 1;
                        let len = 4 + ((tag >> 2) & 0b111) as usize;
                        (len, ((tag as usize >> 5) << 8) | low)
                    }
                    TAG_COPY_2 => {
                        let bytes = take(input, ip, 2)?;
                        ip += 2;
                        (1 + (tag >> 2) as usize, read_le(bytes))
                    }
                    _ => {
                        let bytes = take(input, ip, 4)?;
                        ip += 4;
                        (1 + (tag >> 2) as usize, read_le(bytes))
                    }
                };

                if offset == 0 || offset > op {
                    return Err(MediaError::corrupt(format!(
                        "back-reference offset {} with {} bytes produced",
                        offset, op
                    )));
                }
                output_range(output.len(), op, len)?;

                let src = op - offset;
                if offset >= len {
                    output.copy_within(src..src + len, op);
                } else {
                    // Overlapping run: each byte may read one written by this copy
                    for i in 0..len {
                        output[op + i] = output[src + i];
                    }
                }
                op += len;
            }
        }
    }

    if op != output.len() {
        return Err(MediaError::corrupt(format!(
            "block ended after {} of {} bytes",
            op,
            output.len()
        )));
    }
    Ok(())
}

fn read_varint(input: &[u8]) -> Result<(usize, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in input.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            if value > u64::from(u32::MAX) {
                return Err(MediaError::corrupt("length preamble overflows u32"));
            }
            return Ok((value as usize, i + 1));
        }
    }
    Err(MediaError::corrupt("unterminated length preamble"))
}

fn take(input: &[u8], at: usize, len: usize) -> Result<&[u8]> {
    at.checked_add(len)
        .and_then(|end| input.get(at..end))
        .ok_or_else(|| {
            MediaError::corrupt(format!(
                "token needs {} bytes at {}, input has {}",
                len,
                at,
                input.len()
            ))
        })
}

fn output_range(capacity: usize, at: usize, len: usize) -> Result<std::ops::Range<usize>> {
    match at.checked_add(len) {
        Some(end) if end <= capacity => Ok(at..end),
        _ => Err(MediaError::corrupt(format!(
            "token writes past end of {} byte output",
            capacity
        ))),
    }
}

fn read_le(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rev()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_only() {
        let input = [5, (4 << 2) | TAG_LITERAL, b'h', b'e', b'l', b'l', b'o'];
        assert_eq!(decompress(&input, 5).unwrap(), b"hello");
        assert_eq!(decompressed_len(&input).unwrap(), 5);
    }

    #[test]
    fn test_overlapping_copy_repeats_pattern() {
        // "abc" then copy 9 bytes from 3 back
        let input = [12, (2 << 2) | TAG_LITERAL, b'a', b'b', b'c', (5 << 2) | TAG_COPY_1, 3];
        assert_eq!(decompress(&input, 12).unwrap(), b"abcabcabcabc");
    }

    #[test]
    fn test_run_length_copy() {
        // One literal byte then a 2-byte-offset copy of 7 with offset 1
        let input = [8, TAG_LITERAL, b'z', (6 << 2) | TAG_COPY_2, 1, 0];
        assert_eq!(decompress(&input, 8).unwrap(), b"zzzzzzzz");
    }

    #[test]
    fn test_long_literal_with_extra_length_byte() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut input = vec![100, (60 << 2) | TAG_LITERAL, 99];
        input.extend_from_slice(&data);
        assert_eq!(decompress(&input, 100).unwrap(), data);
    }

    #[test]
    fn test_four_byte_offset_copy() {
        let input = [6, (2 << 2) | TAG_LITERAL, 1, 2, 3, (2 << 2) | 0b11, 3, 0, 0, 0];
        assert_eq!(decompress(&input, 6).unwrap(), [1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_offset_beyond_output_is_corrupt() {
        let input = [8, TAG_LITERAL, b'x', (6 << 2) | TAG_COPY_2, 9, 0];
        assert!(matches!(
            decompress(&input, 8),
            Err(MediaError::CorruptStream(_))
        ));
    }

    #[test]
    fn test_zero_offset_is_corrupt() {
        let input = [8, TAG_LITERAL, b'x', (6 << 2) | TAG_COPY_2, 0, 0];
        assert!(matches!(
            decompress(&input, 8),
            Err(MediaError::CorruptStream(_))
        ));
    }

    #[test]
    fn test_preamble_mismatch_is_corrupt() {
        let input = [5, (4 << 2) | TAG_LITERAL, b'h', b'e', b'l', b'l', b'o'];
        assert!(matches!(
            decompress(&input, 6),
            Err(MediaError::CorruptStream(_))
        ));
    }

    #[test]
    fn test_exhausted_input_is_corrupt() {
        // Literal claims 5 bytes, only 3 present
        let input = [5, (4 << 2) | TAG_LITERAL, b'h', b'e', b'l'];
        assert!(matches!(
            decompress(&input, 5),
            Err(MediaError::CorruptStream(_))
        ));

        // Tokens stop short of the declared length
        let input = [5, (2 << 2) | TAG_LITERAL, b'a', b'b', b'c'];
        assert!(matches!(
            decompress(&input, 5),
            Err(MediaError::CorruptStream(_))
        ));
    }

    #[test]
    fn test_overrun_is_corrupt() {
        let input = [2, (2 << 2) | TAG_LITERAL, b'a', b'b', b'c'];
        assert!(matches!(
            decompress(&input, 2),
            Err(MediaError::CorruptStream(_))
        ));
    }

    #[test]
    fn test_unterminated_preamble() {
        assert!(decompressed_len(&[0x80, 0x80]).is_err());
        assert!(decompressed_len(&[]).is_err());
        assert!(decompressed_len(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }

    #[test]
    fn test_matches_reference_encoder() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8 ^ (i / 64) as u8).collect();
        let compressed = snap::raw::Encoder::new().compress_vec(&data).unwrap();
        assert_eq!(decompress(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_empty_block() {
        assert_eq!(decompress(&[0], 0).unwrap(), Vec::<u8>::new());
    }
}

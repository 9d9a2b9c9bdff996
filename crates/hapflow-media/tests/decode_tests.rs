//! Integration tests for Snappy blocks and HAP frame decoding

mod common;

use common::*;
use hapflow_core::{CodecType, GpuFormat};
use hapflow_media::convert::to_rgba;
use hapflow_media::{block, MediaError, TextureFormatTag, TileDecoder, Transcode};
use proptest::prelude::*;

/// Bytes with long runs and repeats, the shape DXT textures compress into
fn repetitive_bytes() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec((any::<u8>(), 1usize..300), 0..40)
        .prop_map(|runs| {
            runs.into_iter()
                .flat_map(|(byte, len)| std::iter::repeat(byte).take(len))
                .collect()
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_snappy_matches_reference_encoder(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let compressed = snappy(&data);
        prop_assert_eq!(block::decompressed_len(&compressed).unwrap(), data.len());
        prop_assert_eq!(block::decompress(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn prop_snappy_runs(data in repetitive_bytes()) {
        let compressed = snappy(&data);
        prop_assert_eq!(block::decompress(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn prop_damaged_blocks_never_panic(
        data in repetitive_bytes(),
        position in any::<prop::sample::Index>(),
        value in any::<u8>(),
    ) {
        let mut compressed = snappy(&data);
        let at = position.index(compressed.len());
        compressed[at] = value;

        let mut out = vec![0u8; data.len()];
        match block::decompress_to(&compressed, &mut out) {
            Ok(()) => {}
            Err(e) => prop_assert!(e.is_recoverable(), "unexpected error {:?}", e),
        }
    }

    #[test]
    fn prop_chunked_frames_concatenate(
        chunks in prop::collection::vec(repetitive_bytes(), 1..6),
        compress in any::<bool>(),
    ) {
        // Whole BC1 blocks, laid out as one row of blocks
        let chunks: Vec<Vec<u8>> = chunks
            .into_iter()
            .map(|mut chunk| {
                chunk.truncate(chunk.len() / 8 * 8);
                chunk
            })
            .collect();
        let frame = chunked_frame(HAP_COMPLEX_DXT1, &chunks, compress);
        let expected = chunks.concat();
        let width = (expected.len() / 8 * 4) as u32;

        let parallel = TileDecoder::new(true).decode_frame(&frame, width, 4).unwrap();
        let serial = TileDecoder::new(false).decode_frame(&frame, width, 4).unwrap();
        prop_assert_eq!(parallel.format, TextureFormatTag::Dxt1);
        prop_assert_eq!(&parallel.data, &expected);
        prop_assert_eq!(serial.data, expected);
    }
}

#[test]
fn test_back_reference_before_start_is_corrupt() {
    // 8 bytes: literal "ab", then a copy of 6 from offset 3
    let block = [8, 0b0000_0100, b'a', b'b', 0b0000_1001, 3];
    let mut out = [0u8; 8];
    assert!(matches!(
        block::decompress_to(&block, &mut out),
        Err(MediaError::CorruptStream(_))
    ));
}

#[test]
fn test_overlapping_back_reference_repeats_pattern() {
    // Literal "xy", then copy 6 bytes from offset 2
    let block = [8, 0b0000_0100, b'x', b'y', 0b0000_1001, 2];
    assert_eq!(block::decompress(&block, 8).unwrap(), b"xyxyxyxy");
}

#[test]
fn test_section_size_mismatch_is_corrupt() {
    let texture = block_texture(8, 8, solid_bc1_block, |_, _| RED);
    let mut compressed = snappy(&texture);
    // Claim one byte more than the stream produces
    compressed[0] += 1;
    let frame = hap_section(HAP_SNAPPY_DXT1, &compressed);
    assert!(matches!(
        TileDecoder::default().decode_frame(&frame, 8, 8),
        Err(MediaError::CorruptStream(_))
    ));
}

#[test]
fn test_raw_and_snappy_frames_decode_alike() {
    let texture = block_texture(16, 16, solid_bc1_block, |x, _| if x < 8 { RED } else { BLUE });
    let raw = hap_section(HAP_RAW_DXT1, &texture);
    let compressed = hap_section(HAP_SNAPPY_DXT1, &snappy(&texture));

    let decoder = TileDecoder::default();
    assert_eq!(decoder.decode_frame(&raw, 16, 16).unwrap().data, texture);
    assert_eq!(decoder.decode_frame(&compressed, 16, 16).unwrap().data, texture);
}

#[test]
fn test_extended_section_header() {
    // Too long for the 24-bit length field
    let texture = vec![0u8; (1 << 24) + 8];
    let frame = hap_section(HAP_RAW_DXT1, &texture);
    assert_eq!(&frame[..4], &[0, 0, 0, HAP_RAW_DXT1]);

    // One row of 2^21 + 1 blocks
    let width = ((texture.len() / 8) * 4) as u32;
    let decoded = TileDecoder::default().decode_frame(&frame, width, 4).unwrap();
    assert_eq!(decoded.data.len(), texture.len());
}

#[test]
fn test_truncated_frame() {
    let texture = block_texture(8, 8, solid_bc1_block, |_, _| GREEN);
    let frame = hap_section(HAP_RAW_DXT1, &texture);
    let result = TileDecoder::default().decode_frame(&frame[..frame.len() - 3], 8, 8);
    assert!(matches!(result, Err(MediaError::TruncatedFrame { .. })));
}

#[test]
fn test_unknown_texture_format() {
    let frame = hap_section(0xBD, &snappy(&[0u8; 8]));
    assert!(matches!(
        TileDecoder::default().decode_frame(&frame, 4, 4),
        Err(MediaError::UnknownTileFormat(0xBD))
    ));
}

#[test]
fn test_chunked_hap_q_frame_converts_to_rgb() {
    let texture = block_texture(16, 8, solid_ycocg_block, |_, y| if y < 4 { GREEN } else { BLUE });
    let (top, bottom) = texture.split_at(texture.len() / 2);
    let frame = chunked_frame(HAP_COMPLEX_YCOCG, &[top.to_vec(), bottom.to_vec()], true);

    let decoded = TileDecoder::default().decode_frame(&frame, 16, 8).unwrap();
    assert_eq!(decoded.format, TextureFormatTag::YCoCgDxt5);
    assert_eq!(decoded.format.codec(), CodecType::HapQ);
    assert_eq!(decoded.format.gpu_format(), GpuFormat::Bc3);

    let rgba = to_rgba(Transcode::YCoCgToRgba, &decoded.data, 16, 8).unwrap();
    let [r, g, b] = pixel(&rgba, 16, 5, 1);
    assert!(g > 0.9 && r < 0.1 && b < 0.1, "top {:?}", [r, g, b]);
    let [r, g, b] = pixel(&rgba, 16, 5, 6);
    assert!(b > 0.9 && r < 0.1 && g < 0.1, "bottom {:?}", [r, g, b]);
}

#[test]
fn test_oversized_preamble_is_rejected_without_decoding() {
    // Varint preamble of 1 GiB in front of an empty token stream
    let frame = hap_section(HAP_SNAPPY_DXT1, &[0x80, 0x80, 0x80, 0x80, 0x04]);
    let mut out = Vec::new();
    let result = TileDecoder::default().decode_frame_into(&frame, 1920, 1080, &mut out);
    assert!(matches!(result, Err(MediaError::CorruptStream(_))));
    assert_eq!(out.capacity(), 0);
}

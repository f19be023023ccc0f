use std::io::{Read, Write};

use xzcodec::{Lzma2Reader, Lzma2Writer, LzmaOptions};

mod common;

fn compress(data: &[u8], options: &LzmaOptions) -> Vec<u8> {
    let mut writer = Lzma2Writer::new(Vec::new(), options).unwrap();
    writer.write_all(data).unwrap();
    writer.finish().unwrap()
}

fn decompress(compressed: &[u8], dict_size: u32) -> Vec<u8> {
    let mut reader = Lzma2Reader::new(compressed, dict_size, None);
    let mut decompressed = Vec::new();
    reader.read_to_end(&mut decompressed).unwrap();
    decompressed
}

fn round_trip(data: &[u8], preset: u32) {
    let options = LzmaOptions::with_preset(preset);
    let compressed = compress(data, &options);
    let decompressed = decompress(&compressed, options.dict_size);
    assert!(decompressed == data);
}

#[test]
fn round_trip_text_all_presets() {
    let data = common::text_corpus(41, 256 * 1024);
    for preset in 0..=9 {
        round_trip(&data, preset);
    }
}

#[test]
fn round_trip_runs_all_presets() {
    let data = common::runs_corpus(128 * 1024);
    for preset in 0..=9 {
        round_trip(&data, preset);
    }
}

#[test]
fn incompressible_data_falls_back_to_stored_chunks() {
    let data = common::random_bytes(43, 200 * 1024);
    let options = LzmaOptions::with_preset(6);

    let compressed = compress(&data, &options);
    // Stored chunks cost three header bytes per 64 KiB, so the expansion
    // stays tiny.
    assert!(compressed.len() < data.len() + 64);
    assert!(decompress(&compressed, options.dict_size) == data);
}

#[test]
fn multi_chunk_streams_round_trip() {
    // Larger than one LZMA2 chunk's uncompressed limit (2 MiB).
    let data = common::text_corpus(47, 5 * 1024 * 1024);
    let options = LzmaOptions::with_preset(4);

    let compressed = compress(&data, &options);
    assert!(decompress(&compressed, options.dict_size) == data);
}

#[test]
fn empty_stream_is_a_single_end_marker() {
    let options = LzmaOptions::with_preset(6);
    let compressed = compress(b"", &options);
    assert_eq!(compressed, vec![0x00]);
    assert_eq!(decompress(&compressed, options.dict_size), b"");
}

#[test]
fn first_chunk_resets_everything_and_sizes_are_exact() {
    // 512 bytes: two rounds of 0x00..=0xFF.
    let data: Vec<u8> = (0..512usize).map(|i| (i % 256) as u8).collect();
    let mut options = LzmaOptions::with_preset(6);
    options.dict_size = 1 << 16;

    let compressed = compress(&data, &options);

    // Single LZMA chunk: control byte picks reset of state, properties
    // and dictionary, and carries the high bits of uncompressedSize-1.
    let control = compressed[0];
    assert!(control >= 0xE0);
    assert_eq!((control & 0x1F) as usize, (data.len() - 1) >> 16);

    let uncompressed_size =
        1 + u16::from_be_bytes([compressed[1], compressed[2]]) as usize;
    assert_eq!(uncompressed_size, data.len());

    // The declared compressed size covers the chunk body exactly; after
    // the body only the end marker remains.
    let compressed_size = 1 + u16::from_be_bytes([compressed[3], compressed[4]]) as usize;
    assert_eq!(compressed.len(), 6 + compressed_size + 1);
    assert_eq!(*compressed.last().unwrap(), 0x00);

    assert_eq!(decompress(&compressed, options.dict_size), data);
}

#[test]
fn flush_cuts_a_chunk_and_decoding_continues_across_it() {
    let first = common::text_corpus(53, 40 * 1024);
    let second = common::text_corpus(59, 40 * 1024);
    let options = LzmaOptions::with_preset(6);

    let mut writer = Lzma2Writer::new(Vec::new(), &options).unwrap();
    writer.write_all(&first).unwrap();
    writer.flush().unwrap();
    writer.write_all(&second).unwrap();
    let compressed = writer.finish().unwrap();

    let mut expected = first;
    expected.extend_from_slice(&second);
    assert!(decompress(&compressed, options.dict_size) == expected);
}

#[test]
fn preset_dict_round_trips() {
    let preset_dict = common::text_corpus(61, 8 * 1024);
    let data = common::text_corpus(61, 16 * 1024);

    let mut options = LzmaOptions::with_preset(6);
    options.preset_dict = Some(preset_dict.clone());

    let compressed = compress(&data, &options);

    let mut reader = Lzma2Reader::new(compressed.as_slice(), options.dict_size, Some(&preset_dict));
    let mut decompressed = Vec::new();
    reader.read_to_end(&mut decompressed).unwrap();
    assert!(decompressed == data);
}

#[test]
fn invalid_control_byte_is_rejected() {
    for control in [0x03u8, 0x40, 0x7F] {
        let stream = [control, 0x00, 0x00];
        let mut reader = Lzma2Reader::new(stream.as_slice(), 1 << 16, None);
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }
}

#[test]
fn chunk_without_dict_reset_first_is_rejected() {
    // Control 0x02 (uncompressed, no dictionary reset) cannot open a
    // stream.
    let stream = [0x02u8, 0x00, 0x00, b'a', 0x00];
    let mut reader = Lzma2Reader::new(stream.as_slice(), 1 << 16, None);
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).is_err());
}

#[test]
fn errors_are_sticky() {
    let stream = [0x7Fu8, 0x00];
    let mut reader = Lzma2Reader::new(stream.as_slice(), 1 << 16, None);
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).is_err());
    let mut buf = [0u8; 8];
    assert!(reader.read(&mut buf).is_err());
}

#[test]
fn memory_usage_scales_with_dict_size() {
    let small = xzcodec::lzma2_get_memory_usage(1 << 16);
    let large = xzcodec::lzma2_get_memory_usage(1 << 24);
    assert!(small < large);
}

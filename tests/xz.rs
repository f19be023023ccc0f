use std::{
    io::{Read, Write},
    num::NonZeroU64,
};

use xzcodec::{AutoReader, CheckType, LzmaOptions, LzmaWriter, XzOptions, XzReader, XzWriter};

mod common;

fn compress(data: &[u8], options: XzOptions) -> Vec<u8> {
    let mut writer = XzWriter::new(Vec::new(), options).unwrap();
    writer.write_all(data).unwrap();
    writer.finish().unwrap()
}

fn decompress(compressed: &[u8]) -> Vec<u8> {
    let mut reader = XzReader::new(compressed, true);
    let mut decompressed = Vec::new();
    reader.read_to_end(&mut decompressed).unwrap();
    decompressed
}

fn round_trip(data: &[u8], options: XzOptions) {
    let compressed = compress(data, options);
    assert!(decompress(&compressed) == data);
}

#[test]
fn round_trip_all_presets() {
    let data = common::text_corpus(71, 256 * 1024);
    for preset in 0..=9 {
        round_trip(&data, XzOptions::with_preset(preset));
    }
}

#[test]
fn round_trip_all_check_types() {
    let data = common::text_corpus(73, 64 * 1024);
    for check_type in [
        CheckType::None,
        CheckType::Crc32,
        CheckType::Crc64,
        CheckType::Sha256,
    ] {
        let mut options = XzOptions::with_preset(6);
        options.set_check_type(check_type);
        round_trip(&data, options);
    }
}

#[test]
fn round_trip_incompressible_data() {
    let data = common::random_bytes(79, 128 * 1024);
    round_trip(&data, XzOptions::with_preset(6));
}

#[test]
fn empty_stream_has_the_reference_layout() {
    let mut options = XzOptions::with_preset(6);
    options.set_check_type(CheckType::Crc32);
    let compressed = compress(b"", options);

    // Stream header: magic, flags {0x00, CRC32}, CRC32 of the flags.
    assert_eq!(
        &compressed[..12],
        &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, 0x00, 0x01, 0x69, 0x22, 0xDE, 0x36]
    );
    // Empty index plus footer; the stream closes with the footer magic.
    assert_eq!(compressed.len(), 32);
    assert_eq!(&compressed[30..], b"YZ");

    assert_eq!(decompress(&compressed), b"");
}

#[test]
fn multi_block_streams_round_trip() {
    let data = common::text_corpus(83, 600 * 1024);

    let mut options = XzOptions::with_preset(6);
    options.lzma.dict_size = 1 << 16;
    options.set_block_size(NonZeroU64::new(128 * 1024));

    let compressed = compress(&data, options);
    assert!(decompress(&compressed) == data);
}

#[test]
fn concatenated_streams_decode_back_to_back() {
    let first = common::text_corpus(89, 32 * 1024);
    let second = common::text_corpus(97, 32 * 1024);

    let mut concatenated = compress(&first, XzOptions::with_preset(6));
    // Stream padding between streams is any multiple of four zeros.
    concatenated.extend_from_slice(&[0u8; 8]);
    concatenated.extend_from_slice(&compress(&second, XzOptions::with_preset(6)));

    let mut expected = first.clone();
    expected.extend_from_slice(&second);
    assert!(decompress(&concatenated) == expected);

    // Without multi-stream support only the first stream is read.
    let mut reader = XzReader::new(concatenated.as_slice(), false);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert!(out == first);
}

#[test]
fn flipped_footer_byte_is_a_structural_error() {
    let data = common::text_corpus(101, 16 * 1024);
    let mut compressed = compress(&data, XzOptions::with_preset(6));

    let last = compressed.len() - 1;
    compressed[last] ^= 0xFF;

    let mut reader = XzReader::new(compressed.as_slice(), true);
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).is_err());
}

#[test]
fn any_corrupted_byte_is_detected() {
    let data = common::text_corpus(103, 512);
    let mut options = XzOptions::with_preset(6);
    options.set_check_type(CheckType::Crc32);
    let compressed = compress(&data, options);

    for i in 0..compressed.len() {
        let mut corrupted = compressed.clone();
        corrupted[i] ^= 0xFF;

        let mut reader = XzReader::new(corrupted.as_slice(), true);
        let mut out = Vec::new();
        assert!(
            reader.read_to_end(&mut out).is_err(),
            "corruption at byte {i} went undetected"
        );
    }
}

#[test]
fn dictionary_limit_rejects_large_blocks_up_front() {
    let data = common::text_corpus(107, 16 * 1024);
    let compressed = compress(&data, XzOptions::with_preset(6));

    // Preset 6 declares an 8 MiB dictionary; cap at 64 KiB.
    let mut reader = XzReader::new_dict_limit(compressed.as_slice(), true, 1 << 16);
    let mut out = Vec::new();
    let error = reader.read_to_end(&mut out).unwrap_err();
    assert_eq!(error.kind(), std::io::ErrorKind::InvalidInput);
    assert!(out.is_empty());
}

#[test]
fn garbage_input_is_not_an_xz_stream() {
    let mut reader = XzReader::new(&b"this is not xz data at all!!"[..], true);
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).is_err());
}

#[test]
fn truncated_stream_reports_an_error() {
    let data = common::text_corpus(109, 64 * 1024);
    let compressed = compress(&data, XzOptions::with_preset(6));

    for keep in [13, compressed.len() / 2, compressed.len() - 4] {
        let mut reader = XzReader::new(&compressed[..keep], true);
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }
}

#[test]
fn auto_reader_sniffs_xz_and_lzma() {
    let data = common::text_corpus(113, 32 * 1024);

    let xz = compress(&data, XzOptions::with_preset(6));
    let mut reader = AutoReader::new(xz.as_slice(), xzcodec::DICT_SIZE_MAX).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert!(out == data);

    let options = LzmaOptions::with_preset(6);
    let mut writer = LzmaWriter::new(Vec::new(), &options, Some(data.len() as u64)).unwrap();
    writer.write_all(&data).unwrap();
    let lzma = writer.finish().unwrap();

    let mut reader = AutoReader::new(lzma.as_slice(), xzcodec::DICT_SIZE_MAX).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert!(out == data);
}

#[test]
fn errors_are_sticky() {
    let data = common::text_corpus(127, 8 * 1024);
    let mut compressed = compress(&data, XzOptions::with_preset(6));
    let last = compressed.len() - 1;
    compressed[last] ^= 0x01;

    let mut reader = XzReader::new(compressed.as_slice(), true);
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).is_err());
    let mut buf = [0u8; 16];
    assert!(reader.read(&mut buf).is_err());
}

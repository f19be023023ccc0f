//! Cross-compatibility against liblzma (the xz-utils implementation).

use std::io::{Read, Write};

use liblzma::{
    bufread::{XzDecoder, XzEncoder},
    stream::{Check, LzmaOptions as RefLzmaOptions, Stream},
};
use xzcodec::{CheckType, LzmaOptions, LzmaReader, LzmaWriter, XzOptions, XzReader, XzWriter};

mod common;

#[test]
fn reference_decodes_our_xz_streams() {
    let data = common::text_corpus(131, 256 * 1024);

    for preset in [0, 3, 6, 9] {
        for check_type in [CheckType::Crc32, CheckType::Crc64, CheckType::Sha256] {
            let mut options = XzOptions::with_preset(preset);
            options.set_check_type(check_type);

            let mut writer = XzWriter::new(Vec::new(), options).unwrap();
            writer.write_all(&data).unwrap();
            let compressed = writer.finish().unwrap();

            let mut decoder = XzDecoder::new(compressed.as_slice());
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed).unwrap();
            assert!(decompressed == data, "preset {preset} failed");
        }
    }
}

#[test]
fn reference_decodes_our_empty_xz_stream() {
    let writer = XzWriter::new(Vec::new(), XzOptions::with_preset(6)).unwrap();
    let compressed = writer.finish().unwrap();

    let mut decoder = XzDecoder::new(compressed.as_slice());
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).unwrap();
    assert!(decompressed.is_empty());
}

#[test]
fn reference_decodes_our_multi_block_streams() {
    let data = common::text_corpus(137, 512 * 1024);

    let mut options = XzOptions::with_preset(6);
    options.set_block_size(std::num::NonZeroU64::new(128 * 1024));
    options.lzma.dict_size = 1 << 16;

    let mut writer = XzWriter::new(Vec::new(), options).unwrap();
    writer.write_all(&data).unwrap();
    let compressed = writer.finish().unwrap();

    let mut decoder = XzDecoder::new(compressed.as_slice());
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).unwrap();
    assert!(decompressed == data);
}

#[test]
fn we_decode_reference_xz_streams() {
    let data = common::text_corpus(139, 256 * 1024);

    for preset in 0..=9 {
        let stream = Stream::new_easy_encoder(preset, Check::Crc64).unwrap();
        let mut encoder = XzEncoder::new_stream(data.as_slice(), stream);
        let mut compressed = Vec::new();
        encoder.read_to_end(&mut compressed).unwrap();

        let mut reader = XzReader::new(compressed.as_slice(), true);
        let mut decompressed = Vec::new();
        reader.read_to_end(&mut decompressed).unwrap();
        assert!(decompressed == data, "preset {preset} failed");
    }
}

#[test]
fn we_decode_reference_xz_streams_with_random_payload() {
    let data = common::random_bytes(149, 128 * 1024);

    let stream = Stream::new_easy_encoder(6, Check::Crc32).unwrap();
    let mut encoder = XzEncoder::new_stream(data.as_slice(), stream);
    let mut compressed = Vec::new();
    encoder.read_to_end(&mut compressed).unwrap();

    let mut reader = XzReader::new(compressed.as_slice(), true);
    let mut decompressed = Vec::new();
    reader.read_to_end(&mut decompressed).unwrap();
    assert!(decompressed == data);
}

#[test]
fn reference_decodes_our_classic_lzma_streams() {
    let data = common::text_corpus(151, 128 * 1024);
    let options = LzmaOptions::with_preset(6);

    // Unknown size with an end marker, the alone-format default.
    let mut writer = LzmaWriter::new(Vec::new(), &options, None).unwrap();
    writer.write_all(&data).unwrap();
    let compressed = writer.finish().unwrap();

    let stream = Stream::new_lzma_decoder(u64::MAX).unwrap();
    let mut decoder = XzDecoder::new_stream(compressed.as_slice(), stream);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).unwrap();
    assert!(decompressed == data);
}

#[test]
fn we_decode_reference_classic_lzma_streams() {
    let data = common::text_corpus(157, 128 * 1024);

    let ref_options = RefLzmaOptions::new_preset(6).unwrap();
    let stream = Stream::new_lzma_encoder(&ref_options).unwrap();
    let mut encoder = XzEncoder::new_stream(data.as_slice(), stream);
    let mut compressed = Vec::new();
    encoder.read_to_end(&mut compressed).unwrap();

    let mut reader = LzmaReader::new(compressed.as_slice()).unwrap();
    let mut decompressed = Vec::new();
    reader.read_to_end(&mut decompressed).unwrap();
    assert!(decompressed == data);
}

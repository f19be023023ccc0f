use std::{
    hint::black_box,
    io::{Read, Write},
};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use xzcodec::{Lzma2Reader, Lzma2Writer, LzmaOptions};

/// Compressible English-like corpus, deterministic across runs.
fn corpus(len: usize) -> Vec<u8> {
    const PHRASES: &[&str] = &[
        "the quick brown fox jumps over the lazy dog",
        "pack my box with five dozen liquor jugs",
        "sphinx of black quartz judge my vow",
    ];

    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let mut out = Vec::with_capacity(len + 64);
    while out.len() < len {
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        out.extend_from_slice(PHRASES[(state % PHRASES.len() as u64) as usize].as_bytes());
        out.push(b' ');
    }
    out.truncate(len);
    out
}

fn bench_encoder(c: &mut Criterion) {
    let data = corpus(1 << 20);

    let mut group = c.benchmark_group("lzma2_encoder");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for preset in [0u32, 3, 6, 9] {
        group.bench_with_input(BenchmarkId::new("corpus", preset), &preset, |b, &preset| {
            let options = LzmaOptions::with_preset(preset);

            b.iter(|| {
                let mut writer = Lzma2Writer::new(Vec::new(), &options).unwrap();
                writer.write_all(black_box(&data)).unwrap();
                black_box(writer.finish().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_decoder(c: &mut Criterion) {
    let data = corpus(1 << 20);

    let mut group = c.benchmark_group("lzma2_decoder");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for preset in [0u32, 3, 6, 9] {
        let options = LzmaOptions::with_preset(preset);
        let mut writer = Lzma2Writer::new(Vec::new(), &options).unwrap();
        writer.write_all(&data).unwrap();
        let compressed = writer.finish().unwrap();

        group.bench_with_input(
            BenchmarkId::new("corpus", preset),
            &(compressed, options.dict_size),
            |b, (compressed, dict_size)| {
                b.iter(|| {
                    let mut reader =
                        Lzma2Reader::new(black_box(compressed.as_slice()), *dict_size, None);
                    let mut decompressed = Vec::new();
                    reader.read_to_end(&mut decompressed).unwrap();
                    black_box(decompressed)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_encoder, bench_decoder);
criterion_main!(benches);

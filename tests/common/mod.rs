//! Deterministic corpora for the round-trip tests. Generated instead of
//! checked in so the repository stays free of multi-megabyte fixtures.
#![allow(dead_code)]

/// Xorshift64* generator; identical sequences on every platform.
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

/// Pseudo-random bytes; effectively incompressible.
pub fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = Rng::new(seed);
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        out.extend_from_slice(&rng.next_u64().to_le_bytes());
    }
    out.truncate(len);
    out
}

/// English-like filler with plenty of repeated phrases; compresses well
/// and exercises literals, matches and rep matches.
pub fn text_corpus(seed: u64, len: usize) -> Vec<u8> {
    const PHRASES: &[&str] = &[
        "the quick brown fox jumps over the lazy dog",
        "pack my box with five dozen liquor jugs",
        "sphinx of black quartz judge my vow",
        "how vexingly quick daft zebras jump",
        "the five boxing wizards jump quickly",
    ];

    let mut rng = Rng::new(seed);
    let mut out = Vec::with_capacity(len + 64);
    while out.len() < len {
        let phrase = PHRASES[(rng.next_u64() % PHRASES.len() as u64) as usize];
        out.extend_from_slice(phrase.as_bytes());
        out.push(if rng.next_u64() % 7 == 0 { b'\n' } else { b' ' });
    }
    out.truncate(len);
    out
}

/// Long runs and short cycles; stresses rep0 and overlapping copies.
pub fn runs_corpus(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut value = 0u8;
    while out.len() < len {
        let run = 1 + (out.len() * 7 + 3) % 300;
        for _ in 0..run.min(len - out.len()) {
            out.push(value);
        }
        value = value.wrapping_add(37);
    }
    out
}

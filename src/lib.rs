//! LZMA, LZMA2 and XZ compression and decompression in pure Rust.
//!
//! The crate exposes one reader/writer pair per container:
//!
//! * [`LzmaReader`] / [`LzmaWriter`] for the classic `.lzma` format,
//! * [`Lzma2Reader`] / [`Lzma2Writer`] for raw LZMA2 chunk streams,
//! * [`XzReader`] / [`XzWriter`] for `.xz` streams,
//! * [`AutoReader`] to sniff between `.xz` and classic `.lzma`.
//!
//! All readers implement [`std::io::Read`], all writers implement
//! [`std::io::Write`] plus a `finish` method that flushes the trailing
//! stream structure and returns the inner writer.

mod auto;
mod coder;
mod decoder;
mod enc;
mod lz;
mod lzma2_reader;
mod lzma_reader;
mod range_dec;
mod xz;

pub use auto::AutoReader;
pub use enc::{Lzma2Writer, LzmaWriter};
pub use lzma2_reader::{get_memory_usage as lzma2_get_memory_usage, Lzma2Reader};
pub use lzma_reader::{get_memory_usage, get_memory_usage_by_props, LzmaReader};
pub use xz::{CheckType, XzOptions, XzReader, XzWriter};

use std::io::{Error, ErrorKind, Read, Write};

pub(crate) const BIT_MODEL_TOTAL_BITS: u32 = 11;
pub(crate) const BIT_MODEL_TOTAL: u32 = 1 << BIT_MODEL_TOTAL_BITS;
pub(crate) const PROB_INIT: u16 = (BIT_MODEL_TOTAL / 2) as u16;
pub(crate) const MOVE_BITS: u32 = 5;
pub(crate) const SHIFT_BITS: u32 = 8;
pub(crate) const TOP_MASK: u32 = 0xFF00_0000;

/// Smallest dictionary capacity the encoder will actually use.
pub const DICT_SIZE_MIN: u32 = 4096;

/// Largest dictionary capacity accepted by readers and writers (768 MiB).
pub const DICT_SIZE_MAX: u32 = 768 << 20;

pub(crate) fn error_invalid_input(msg: &'static str) -> Error {
    Error::new(ErrorKind::InvalidInput, msg)
}

pub(crate) fn error_invalid_data(msg: &'static str) -> Error {
    Error::new(ErrorKind::InvalidData, msg)
}

pub(crate) fn error_unsupported(msg: &'static str) -> Error {
    Error::new(ErrorKind::Unsupported, msg)
}

pub(crate) fn error_out_of_memory(msg: &'static str) -> Error {
    Error::new(ErrorKind::OutOfMemory, msg)
}

/// `std::io::Error` is not `Clone`, so sticky reader errors are re-reported
/// as a fresh error with the same kind and message.
pub(crate) fn copy_error(error: &Error) -> Error {
    Error::new(error.kind(), error.to_string())
}

pub(crate) trait ByteReader: Read {
    fn read_u8(&mut self) -> std::io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16_be(&mut self) -> std::io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_u32_be(&mut self) -> std::io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_u32_le(&mut self) -> std::io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&mut self) -> std::io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl<R: Read + ?Sized> ByteReader for R {}

pub(crate) trait ByteWriter: Write {
    fn write_u8(&mut self, value: u8) -> std::io::Result<()> {
        self.write_all(&[value])
    }

    fn write_u16_be(&mut self, value: u16) -> std::io::Result<()> {
        self.write_all(&value.to_be_bytes())
    }

    fn write_u32_le(&mut self, value: u32) -> std::io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_u64_le(&mut self, value: u64) -> std::io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }
}

impl<W: Write + ?Sized> ByteWriter for W {}

/// Encoder settings shared by the LZMA, LZMA2 and XZ writers.
#[derive(Debug, Clone)]
pub struct LzmaOptions {
    /// Dictionary size in bytes.
    pub dict_size: u32,
    /// Number of literal context bits (0-8).
    pub lc: u32,
    /// Number of literal position bits (0-4).
    pub lp: u32,
    /// Number of position bits (0-4).
    pub pb: u32,
    /// Match length at which the match finder stops searching.
    pub nice_len: u32,
    /// Hash chain depth limit, 0 selects a default based on `nice_len`.
    pub depth_limit: i32,
    /// Preset dictionary data.
    pub preset_dict: Option<Vec<u8>>,
}

impl Default for LzmaOptions {
    fn default() -> Self {
        Self::with_preset(6)
    }
}

impl LzmaOptions {
    pub const LC_DEFAULT: u32 = 3;
    pub const LP_DEFAULT: u32 = 0;
    pub const PB_DEFAULT: u32 = 2;
    pub const NICE_LEN_MIN: u32 = 8;
    pub const NICE_LEN_MAX: u32 = 273;
    pub const DICT_SIZE_DEFAULT: u32 = 8 << 20;

    const PRESET_TO_DICT_SIZE: &'static [u32] = &[
        1 << 18,
        1 << 20,
        1 << 21,
        1 << 22,
        1 << 22,
        1 << 23,
        1 << 23,
        1 << 24,
        1 << 25,
        1 << 26,
    ];

    const PRESET_TO_DEPTH_LIMIT: &'static [i32] = &[4, 8, 24, 48];

    /// Creates options from a preset in `0..=9`.
    #[inline]
    pub fn with_preset(preset: u32) -> Self {
        let mut options = Self {
            dict_size: Self::DICT_SIZE_DEFAULT,
            lc: Self::LC_DEFAULT,
            lp: Self::LP_DEFAULT,
            pb: Self::PB_DEFAULT,
            nice_len: Self::NICE_LEN_MAX,
            depth_limit: 0,
            preset_dict: None,
        };
        options.set_preset(preset);
        options
    }

    /// Applies a preset in `0..=9` on top of the current options.
    pub fn set_preset(&mut self, preset: u32) {
        let preset = preset.min(9);

        self.lc = Self::LC_DEFAULT;
        self.lp = Self::LP_DEFAULT;
        self.pb = Self::PB_DEFAULT;
        self.dict_size = Self::PRESET_TO_DICT_SIZE[preset as usize];

        if preset <= 3 {
            self.nice_len = if preset <= 1 { 128 } else { Self::NICE_LEN_MAX };
            self.depth_limit = Self::PRESET_TO_DEPTH_LIMIT[preset as usize];
        } else {
            self.nice_len = Self::NICE_LEN_MAX;
            self.depth_limit = 0;
        }
    }

    /// Packs lc/lp/pb into the properties byte of the wire formats.
    #[inline(always)]
    pub fn props(&self) -> u8 {
        ((self.pb * 5 + self.lp) * 9 + self.lc) as u8
    }

    pub(crate) fn validate(&self) -> std::io::Result<()> {
        if self.lc > 8 || self.lp > 4 || self.pb > 4 {
            return Err(error_invalid_input("invalid lc, lp or pb"));
        }
        if self.dict_size > DICT_SIZE_MAX {
            return Err(error_invalid_input("dictionary size too large"));
        }
        if self.nice_len < Self::NICE_LEN_MIN || self.nice_len > Self::NICE_LEN_MAX {
            return Err(error_invalid_input("invalid nice_len"));
        }
        Ok(())
    }
}

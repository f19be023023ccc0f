//! XZ container: stream header/footer, block headers, index and the
//! block integrity checks.

mod reader;
mod writer;

pub use reader::XzReader;
use sha2::Digest;
pub use writer::{XzOptions, XzWriter};

use crate::{error_invalid_data, error_invalid_input, error_unsupported, ByteReader};

pub(crate) const CRC32: crc::Crc<u32, crc::Table<16>> =
    crc::Crc::<u32, crc::Table<16>>::new(&crc::CRC_32_ISO_HDLC);
pub(crate) const CRC64: crc::Crc<u64, crc::Table<16>> =
    crc::Crc::<u64, crc::Table<16>>::new(&crc::CRC_64_XZ);

/// XZ stream magic bytes: 0xFD, '7', 'z', 'X', 'Z', 0x00.
pub(crate) const XZ_MAGIC: [u8; 6] = [0xFD, b'7', b'z', b'X', b'Z', 0x00];

/// XZ stream footer magic bytes.
pub(crate) const XZ_FOOTER_MAGIC: [u8; 2] = [b'Y', b'Z'];

/// Filter ID of LZMA2, the only filter this crate implements.
pub(crate) const FILTER_ID_LZMA2: u64 = 0x21;

/// Block checksum kinds selectable in the stream header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckType {
    /// No checksum.
    None = 0x00,
    /// CRC32.
    Crc32 = 0x01,
    /// CRC64.
    Crc64 = 0x04,
    /// SHA-256.
    Sha256 = 0x0A,
}

impl CheckType {
    pub(crate) fn from_byte(byte: u8) -> std::io::Result<Self> {
        match byte {
            0x00 => Ok(CheckType::None),
            0x01 => Ok(CheckType::Crc32),
            0x04 => Ok(CheckType::Crc64),
            0x0A => Ok(CheckType::Sha256),
            _ => Err(error_unsupported("unsupported XZ check type")),
        }
    }

    pub(crate) fn size(self) -> usize {
        match self {
            CheckType::None => 0,
            CheckType::Crc32 => 4,
            CheckType::Crc64 => 8,
            CheckType::Sha256 => 32,
        }
    }
}

/// One index entry per block: size on the wire without padding, and the
/// block's plaintext size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexRecord {
    unpadded_size: u64,
    uncompressed_size: u64,
}

/// Encodes an XZ variable-length integer; returns the encoded size.
pub(crate) fn encode_multibyte_integer(mut value: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    if value > u64::MAX / 2 {
        return Err(error_invalid_data("multibyte integer out of range"));
    }

    let mut i = 0;
    while value >= 0x80 && i < buf.len() {
        buf[i] = value as u8 | 0x80;
        value >>= 7;
        i += 1;
    }
    if i < buf.len() {
        buf[i] = value as u8;
        i += 1;
    }
    Ok(i)
}

/// Bytes an XZ variable-length integer occupies when encoded.
pub(crate) fn count_multibyte_integer_size(mut value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    let mut count = 0;
    while value > 0 {
        count += 1;
        value >>= 7;
    }
    count
}

/// Parses an XZ variable-length integer out of a slice; returns the
/// value and how many bytes it consumed.
pub(crate) fn parse_multibyte_integer(data: &[u8]) -> std::io::Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if shift >= 63 {
            return Err(error_invalid_data("multibyte integer too large"));
        }
        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(error_invalid_data("incomplete multibyte integer"))
}

/// Streaming variant feeding every consumed byte into a CRC32 digest
/// (index parsing checksums the bytes while it reads them).
pub(crate) fn read_multibyte_integer<R: ByteReader>(
    reader: &mut R,
    digest: &mut crc::Digest<'static, u32, crc::Table<16>>,
) -> std::io::Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;

    for i in 0..9 {
        let byte = reader.read_u8()?;
        digest.update(&[byte]);
        if shift >= 63 {
            return Err(error_invalid_data("multibyte integer too large"));
        }
        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(error_invalid_data("multibyte integer too long"))
}

/// Decodes the LZMA2 filter's one-byte dictionary size property using
/// the mantissa-exponent rule.
pub(crate) fn decode_dict_size_prop(prop: u8) -> std::io::Result<u32> {
    if prop > 40 {
        return Err(error_invalid_data("invalid LZMA2 dictionary size property"));
    }
    if prop == 40 {
        return Ok(u32::MAX);
    }
    Ok((2 | (prop as u32 & 1)) << (prop / 2 + 11))
}

/// Picks the smallest property byte whose dictionary size covers
/// `dict_size`.
pub(crate) fn encode_dict_size_prop(dict_size: u32) -> std::io::Result<u8> {
    if dict_size < 4096 {
        return Err(error_invalid_input("LZMA2 dictionary size too small"));
    }
    if dict_size == u32::MAX {
        return Ok(40);
    }

    for prop in 0u8..40 {
        let base = 2 | (prop as u32 & 1);
        if base << (prop / 2 + 11) >= dict_size {
            return Ok(prop);
        }
    }

    Err(error_invalid_input("LZMA2 dictionary size too large"))
}

/// Integrity hash over a block's plaintext, one variant per check kind.
pub(crate) enum ChecksumCalculator {
    None,
    Crc32(crc::Digest<'static, u32, crc::Table<16>>),
    Crc64(crc::Digest<'static, u64, crc::Table<16>>),
    Sha256(Box<sha2::Sha256>),
}

impl ChecksumCalculator {
    pub(crate) fn new(check_type: CheckType) -> Self {
        match check_type {
            CheckType::None => Self::None,
            CheckType::Crc32 => Self::Crc32(CRC32.digest()),
            CheckType::Crc64 => Self::Crc64(CRC64.digest()),
            CheckType::Sha256 => Self::Sha256(Box::new(sha2::Sha256::new())),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            ChecksumCalculator::None => {}
            ChecksumCalculator::Crc32(crc) => crc.update(data),
            ChecksumCalculator::Crc64(crc) => crc.update(data),
            ChecksumCalculator::Sha256(sha) => sha.update(data),
        }
    }

    /// The check bytes exactly as they appear on the wire.
    pub(crate) fn finalize(self) -> Vec<u8> {
        match self {
            ChecksumCalculator::None => Vec::new(),
            ChecksumCalculator::Crc32(crc) => crc.finalize().to_le_bytes().to_vec(),
            ChecksumCalculator::Crc64(crc) => crc.finalize().to_le_bytes().to_vec(),
            ChecksumCalculator::Sha256(sha) => sha.finalize().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multibyte_integers_round_trip() {
        let values = [0u64, 127, 128, 16383, 16384, 2097151, 2097152, u64::MAX / 2];

        for &value in &values {
            let mut buf = [0u8; 9];
            let encoded_size = encode_multibyte_integer(value, &mut buf).unwrap();
            assert_eq!(encoded_size, count_multibyte_integer_size(value));

            let (decoded, parsed_size) = parse_multibyte_integer(&buf[..encoded_size]).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(parsed_size, encoded_size);
        }

        let mut buf = [0u8; 9];
        assert!(encode_multibyte_integer(u64::MAX, &mut buf).is_err());
    }

    #[test]
    fn dict_size_prop_follows_the_mantissa_exponent_rule() {
        assert_eq!(decode_dict_size_prop(0).unwrap(), 4096);
        assert_eq!(decode_dict_size_prop(1).unwrap(), 6144);
        assert_eq!(decode_dict_size_prop(2).unwrap(), 8192);
        assert_eq!(decode_dict_size_prop(35).unwrap(), 768 << 20);
        assert_eq!(decode_dict_size_prop(40).unwrap(), u32::MAX);
        assert!(decode_dict_size_prop(41).is_err());

        for dict_size in [4096u32, 1 << 16, 1 << 20, (1 << 23) + 1, 768 << 20] {
            let prop = encode_dict_size_prop(dict_size).unwrap();
            assert!(decode_dict_size_prop(prop).unwrap() >= dict_size);
        }
    }

    #[test]
    fn crc32_of_known_vector() {
        let mut calc = ChecksumCalculator::new(CheckType::Crc32);
        calc.update(b"123456789");
        assert_eq!(calc.finalize(), vec![0x26, 0x39, 0xF4, 0xCB]);
    }

    #[test]
    fn crc64_of_known_vector() {
        let mut calc = ChecksumCalculator::new(CheckType::Crc64);
        calc.update(b"123456789");
        assert_eq!(calc.finalize(), vec![250, 57, 25, 223, 187, 201, 93, 153]);
    }

    #[test]
    fn sha256_of_known_vector() {
        let mut calc = ChecksumCalculator::new(CheckType::Sha256);
        calc.update(b"123456789");
        assert_eq!(
            calc.finalize(),
            vec![
                21, 226, 176, 211, 195, 56, 145, 235, 176, 241, 239, 96, 158, 196, 25, 66, 12,
                32, 227, 32, 206, 148, 198, 95, 188, 140, 51, 18, 68, 142, 178, 37,
            ]
        );
    }
}

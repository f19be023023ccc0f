use std::io::{Error, Read};

use super::{
    decode_dict_size_prop, parse_multibyte_integer, read_multibyte_integer, CheckType,
    ChecksumCalculator, IndexRecord, CRC32, FILTER_ID_LZMA2, XZ_FOOTER_MAGIC, XZ_MAGIC,
};
use crate::{
    copy_error, error_invalid_data, error_invalid_input, error_unsupported, ByteReader,
    Lzma2Reader, DICT_SIZE_MAX,
};

/// Counts the compressed bytes consumed so the reader can verify block
/// sizes and padding alignment against the index.
struct CountReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }
}

impl<R: Read> Read for CountReader<R> {
    #[inline(always)]
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

struct BlockHeader {
    header_size: u64,
    compressed_size: Option<u64>,
    uncompressed_size: Option<u64>,
    dict_size: u32,
}

enum ReaderState<R: Read> {
    /// Between structural units; owns the raw reader.
    Between(CountReader<R>),
    /// Inside a block's filter payload.
    InBlock {
        lzma2: Box<Lzma2Reader<CountReader<R>>>,
        header_size: u64,
        compressed_start: u64,
        declared_compressed: Option<u64>,
        declared_uncompressed: Option<u64>,
        produced: u64,
        check: ChecksumCalculator,
    },
    Finished,
    /// Transient placeholder while ownership moves between states.
    Poisoned,
}

/// An `.xz` decompressor.
///
/// Every structural record is verified: stream header and footer CRCs,
/// block header CRCs and reserved bits, declared block sizes, padding
/// zeros, the per-block integrity check and the index. With
/// `allow_multiple_streams` further concatenated streams (separated by
/// stream padding) are decoded back to back.
///
/// # Examples
/// ```
/// use std::io::{Read, Write};
///
/// use xzcodec::{XzOptions, XzReader, XzWriter};
///
/// let mut writer = XzWriter::new(Vec::new(), XzOptions::default()).unwrap();
/// writer.write_all(b"Hello, world!").unwrap();
/// let compressed = writer.finish().unwrap();
///
/// let mut reader = XzReader::new(compressed.as_slice(), false);
/// let mut decompressed = Vec::new();
/// reader.read_to_end(&mut decompressed).unwrap();
/// assert_eq!(&decompressed, b"Hello, world!");
/// ```
pub struct XzReader<R: Read> {
    state: ReaderState<R>,
    allow_multiple_streams: bool,
    max_dict_size: u32,
    header_read: bool,
    check_type: CheckType,
    records: Vec<IndexRecord>,
    error: Option<Error>,
}

impl<R: Read> XzReader<R> {
    /// Creates an `.xz` reader without a dictionary limit.
    pub fn new(inner: R, allow_multiple_streams: bool) -> Self {
        Self::new_dict_limit(inner, allow_multiple_streams, DICT_SIZE_MAX)
    }

    /// Creates an `.xz` reader honoring at most `max_dict_size` bytes of
    /// dictionary. A block declaring more fails before any of its
    /// plaintext is produced.
    pub fn new_dict_limit(inner: R, allow_multiple_streams: bool, max_dict_size: u32) -> Self {
        Self {
            state: ReaderState::Between(CountReader::new(inner)),
            allow_multiple_streams,
            max_dict_size,
            header_read: false,
            check_type: CheckType::None,
            records: Vec::new(),
            error: None,
        }
    }

    fn parse_stream_header(reader: &mut CountReader<R>) -> std::io::Result<CheckType> {
        let mut header = [0u8; 12];
        reader.read_exact(&mut header)?;
        Self::parse_stream_header_bytes(&header)
    }

    fn parse_stream_header_bytes(header: &[u8; 12]) -> std::io::Result<CheckType> {
        if header[..6] != XZ_MAGIC {
            return Err(error_invalid_data("not an XZ stream"));
        }

        let flags = [header[6], header[7]];
        if flags[0] != 0 {
            return Err(error_unsupported("unsupported stream flags"));
        }
        let check_type = CheckType::from_byte(flags[1])?;

        let crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if CRC32.checksum(&flags) != crc {
            return Err(error_invalid_data("stream header CRC mismatch"));
        }

        Ok(check_type)
    }

    /// Parses a block header whose size byte was already consumed.
    fn parse_block_header(
        reader: &mut CountReader<R>,
        size_byte: u8,
        max_dict_size: u32,
    ) -> std::io::Result<BlockHeader> {
        let header_size = (size_byte as usize + 1) * 4;
        let mut rest = vec![0u8; header_size - 1];
        reader.read_exact(&mut rest)?;

        let (content, crc_bytes) = rest.split_at(rest.len() - 4);
        let expected_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let mut digest = CRC32.digest();
        digest.update(&[size_byte]);
        digest.update(content);
        if digest.finalize() != expected_crc {
            return Err(error_invalid_data("block header CRC mismatch"));
        }

        let flags = content[0];
        if flags & 0x3C != 0 {
            return Err(error_unsupported("reserved block header flags set"));
        }
        let num_filters = (flags & 0x03) as usize + 1;

        let mut cursor = &content[1..];
        let take_varint = |cursor: &mut &[u8]| -> std::io::Result<u64> {
            let (value, size) = parse_multibyte_integer(cursor)?;
            *cursor = &cursor[size..];
            Ok(value)
        };

        let compressed_size = if flags & 0x40 != 0 {
            Some(take_varint(&mut cursor)?)
        } else {
            None
        };
        let uncompressed_size = if flags & 0x80 != 0 {
            Some(take_varint(&mut cursor)?)
        } else {
            None
        };

        let mut dict_size = None;
        for filter_index in 0..num_filters {
            let filter_id = take_varint(&mut cursor)?;
            let props_len = take_varint(&mut cursor)? as usize;
            if props_len > cursor.len() {
                return Err(error_invalid_data("filter properties exceed the header"));
            }
            let props = &cursor[..props_len];
            cursor = &cursor[props_len..];

            if filter_id != FILTER_ID_LZMA2 {
                return Err(error_unsupported("unsupported filter in block header"));
            }
            // LZMA2 must terminate the filter chain.
            if filter_index != num_filters - 1 {
                return Err(error_invalid_data("LZMA2 filter must be the last filter"));
            }
            if props_len != 1 {
                return Err(error_invalid_data("invalid LZMA2 filter properties"));
            }
            dict_size = Some(decode_dict_size_prop(props[0])?);
        }

        if cursor.iter().any(|&byte| byte != 0) {
            return Err(error_invalid_data("block header padding is not zero"));
        }

        let dict_size = dict_size.ok_or_else(|| error_invalid_data("missing LZMA2 filter"))?;
        if dict_size > max_dict_size {
            return Err(error_invalid_input(
                "block declares a larger dictionary than allowed",
            ));
        }

        Ok(BlockHeader {
            header_size: header_size as u64,
            compressed_size,
            uncompressed_size,
            dict_size,
        })
    }

    /// Verifies the index against the records collected from the blocks
    /// and returns the total index size on the wire.
    fn parse_index(&self, reader: &mut CountReader<R>) -> std::io::Result<u64> {
        let mut digest = CRC32.digest();
        digest.update(&[0x00]);
        let mut index_size = 1u64;

        let (record_count, n) = read_multibyte_integer(reader, &mut digest)?;
        index_size += n as u64;
        if record_count != self.records.len() as u64 {
            return Err(error_invalid_data("index record count mismatch"));
        }

        for record in &self.records {
            let (unpadded_size, n1) = read_multibyte_integer(reader, &mut digest)?;
            let (uncompressed_size, n2) = read_multibyte_integer(reader, &mut digest)?;
            index_size += (n1 + n2) as u64;

            if unpadded_size != record.unpadded_size
                || uncompressed_size != record.uncompressed_size
            {
                return Err(error_invalid_data("index does not match the blocks"));
            }
        }

        let padding = ((4 - (index_size & 3)) & 3) as usize;
        for _ in 0..padding {
            let byte = reader.read_u8()?;
            if byte != 0 {
                return Err(error_invalid_data("index padding is not zero"));
            }
            digest.update(&[0]);
        }
        index_size += padding as u64;

        let expected_crc = reader.read_u32_le()?;
        if digest.finalize() != expected_crc {
            return Err(error_invalid_data("index CRC mismatch"));
        }
        index_size += 4;

        Ok(index_size)
    }

    fn parse_stream_footer(
        &self,
        reader: &mut CountReader<R>,
        index_size: u64,
    ) -> std::io::Result<()> {
        let mut footer = [0u8; 12];
        reader.read_exact(&mut footer)?;

        if footer[10..12] != XZ_FOOTER_MAGIC {
            return Err(error_invalid_data("stream footer magic mismatch"));
        }

        let expected_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        if CRC32.checksum(&footer[4..10]) != expected_crc {
            return Err(error_invalid_data("stream footer CRC mismatch"));
        }

        let backward_size = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]);
        if (backward_size as u64 + 1) * 4 != index_size {
            return Err(error_invalid_data("stream footer backward size mismatch"));
        }

        let flags = [footer[8], footer[9]];
        if flags[0] != 0 || CheckType::from_byte(flags[1])? != self.check_type {
            return Err(error_invalid_data(
                "stream footer flags do not match the header",
            ));
        }

        Ok(())
    }

    /// After a footer: skip stream padding and look for a concatenated
    /// stream. Returns `true` when another stream header was consumed.
    fn parse_next_stream(&mut self, reader: &mut CountReader<R>) -> std::io::Result<bool> {
        loop {
            let mut word = [0u8; 4];
            let mut filled = 0;
            while filled < word.len() {
                let n = reader.read(&mut word[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }

            if filled == 0 {
                return Ok(false);
            }
            if filled < word.len() {
                return Err(error_invalid_data("stream padding is not 4-byte aligned"));
            }

            if word == [0, 0, 0, 0] {
                continue;
            }

            let mut header = [0u8; 12];
            header[..4].copy_from_slice(&word);
            reader.read_exact(&mut header[4..])?;
            self.check_type = Self::parse_stream_header_bytes(&header)?;
            self.records.clear();
            return Ok(true);
        }
    }

    /// Block padding and integrity check after the filter payload.
    fn finish_block(
        &mut self,
        reader: &mut CountReader<R>,
        compressed_size: u64,
        produced: u64,
        header_size: u64,
        declared_compressed: Option<u64>,
        declared_uncompressed: Option<u64>,
        check: ChecksumCalculator,
    ) -> std::io::Result<()> {
        if let Some(declared) = declared_compressed {
            if declared != compressed_size {
                return Err(error_invalid_data("block compressed size mismatch"));
            }
        }
        if let Some(declared) = declared_uncompressed {
            if declared != produced {
                return Err(error_invalid_data("block uncompressed size mismatch"));
            }
        }

        let padding = ((4 - (compressed_size & 3)) & 3) as usize;
        for _ in 0..padding {
            if reader.read_u8()? != 0 {
                return Err(error_invalid_data("block padding is not zero"));
            }
        }

        let check_size = self.check_type.size();
        let mut expected = [0u8; 32];
        reader.read_exact(&mut expected[..check_size])?;
        if check.finalize() != expected[..check_size] {
            return Err(error_invalid_data("block integrity check mismatch"));
        }

        self.records.push(IndexRecord {
            unpadded_size: header_size + compressed_size + check_size as u64,
            uncompressed_size: produced,
        });

        Ok(())
    }

    fn read_decode(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            match std::mem::replace(&mut self.state, ReaderState::Poisoned) {
                ReaderState::Finished => {
                    self.state = ReaderState::Finished;
                    return Ok(0);
                }

                ReaderState::InBlock {
                    mut lzma2,
                    header_size,
                    compressed_start,
                    declared_compressed,
                    declared_uncompressed,
                    mut produced,
                    mut check,
                } => {
                    let n = match lzma2.read(buf) {
                        Ok(n) => n,
                        Err(error) => return Err(error),
                    };

                    if n > 0 {
                        check.update(&buf[..n]);
                        produced += n as u64;
                        if let Some(declared) = declared_uncompressed {
                            if produced > declared {
                                return Err(error_invalid_data(
                                    "block produces more data than declared",
                                ));
                            }
                        }
                        self.state = ReaderState::InBlock {
                            lzma2,
                            header_size,
                            compressed_start,
                            declared_compressed,
                            declared_uncompressed,
                            produced,
                            check,
                        };
                        return Ok(n);
                    }

                    let mut reader = lzma2.into_inner();
                    let compressed_size = reader.count - compressed_start;
                    self.finish_block(
                        &mut reader,
                        compressed_size,
                        produced,
                        header_size,
                        declared_compressed,
                        declared_uncompressed,
                        check,
                    )?;
                    self.state = ReaderState::Between(reader);
                }

                ReaderState::Between(mut reader) => {
                    if !self.header_read {
                        self.check_type = Self::parse_stream_header(&mut reader)?;
                        self.header_read = true;
                    }

                    let size_byte = reader.read_u8()?;
                    if size_byte == 0x00 {
                        // Index indicator: verify index and footer, then
                        // look for a concatenated stream.
                        let index_size = self.parse_index(&mut reader)?;
                        self.parse_stream_footer(&mut reader, index_size)?;

                        if self.allow_multiple_streams && self.parse_next_stream(&mut reader)? {
                            self.state = ReaderState::Between(reader);
                            continue;
                        }

                        self.state = ReaderState::Finished;
                        return Ok(0);
                    }

                    let header =
                        Self::parse_block_header(&mut reader, size_byte, self.max_dict_size)?;
                    let compressed_start = reader.count;
                    let check = ChecksumCalculator::new(self.check_type);
                    let lzma2 = Box::new(Lzma2Reader::new(reader, header.dict_size, None));

                    self.state = ReaderState::InBlock {
                        lzma2,
                        header_size: header.header_size,
                        compressed_start,
                        declared_compressed: header.compressed_size,
                        declared_uncompressed: header.uncompressed_size,
                        produced: 0,
                        check,
                    };
                }

                ReaderState::Poisoned => {
                    return Err(error_invalid_data("reader in a poisoned state"));
                }
            }
        }
    }
}

impl<R: Read> Read for XzReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Some(error) = &self.error {
            return Err(copy_error(error));
        }
        match self.read_decode(buf) {
            Ok(n) => Ok(n),
            Err(error) => {
                self.error = Some(copy_error(&error));
                Err(error)
            }
        }
    }
}

use std::{io::Write, num::NonZeroU64};

use super::{
    encode_dict_size_prop, encode_multibyte_integer, CheckType, ChecksumCalculator, IndexRecord,
    CRC32, FILTER_ID_LZMA2, XZ_FOOTER_MAGIC, XZ_MAGIC,
};
use crate::{error_invalid_data, ByteWriter, Lzma2Writer, LzmaOptions};

/// Configuration for XZ compression.
#[derive(Debug, Clone)]
pub struct XzOptions {
    /// LZMA compression options.
    pub lzma: LzmaOptions,
    /// Integrity check written after every block.
    pub check_type: CheckType,
    /// Maximum uncompressed size per block (`None` = a single block).
    /// Clamped up to the dictionary size so blocks don't waste memory.
    pub block_size: Option<NonZeroU64>,
}

impl Default for XzOptions {
    fn default() -> Self {
        Self::with_preset(6)
    }
}

impl XzOptions {
    /// Creates options from an LZMA preset in `0..=9`.
    pub fn with_preset(preset: u32) -> Self {
        Self {
            lzma: LzmaOptions::with_preset(preset),
            check_type: CheckType::Crc64,
            block_size: None,
        }
    }

    /// Sets the integrity check kind (default is CRC64).
    pub fn set_check_type(&mut self, check_type: CheckType) {
        self.check_type = check_type;
    }

    /// Sets the maximum uncompressed block size (`None` means a single
    /// block, which is the default).
    pub fn set_block_size(&mut self, block_size: Option<NonZeroU64>) {
        self.block_size = block_size;
    }
}

struct CountWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountWriter<W> {
    #[inline(always)]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

enum WriterState<W: Write> {
    Idle(CountWriter<W>),
    InBlock(Box<Lzma2Writer<CountWriter<W>>>),
    Poisoned,
}

/// An `.xz` compressor.
///
/// Emits the stream header lazily, one block per `block_size` bytes of
/// input (or a single block), and closes with the index and footer on
/// [`XzWriter::finish`].
pub struct XzWriter<W: Write> {
    state: WriterState<W>,
    options: XzOptions,
    records: Vec<IndexRecord>,
    block_uncompressed: u64,
    block_header_size: u64,
    block_start: u64,
    check: ChecksumCalculator,
    header_written: bool,
}

impl<W: Write> XzWriter<W> {
    pub fn new(inner: W, mut options: XzOptions) -> std::io::Result<Self> {
        options.lzma.validate()?;
        // The dictionary size must be representable in the filter
        // properties; this also catches dictionaries under 4 KiB.
        encode_dict_size_prop(options.lzma.dict_size)?;

        if let Some(block_size) = options.block_size.as_mut() {
            *block_size = NonZeroU64::new(block_size.get().max(options.lzma.dict_size as u64))
                .expect("block size is never zero");
        }

        let check = ChecksumCalculator::new(options.check_type);

        Ok(Self {
            state: WriterState::Idle(CountWriter { inner, count: 0 }),
            options,
            records: Vec::new(),
            block_uncompressed: 0,
            block_header_size: 0,
            block_start: 0,
            check,
            header_written: false,
        })
    }

    fn write_stream_header(writer: &mut CountWriter<W>, check_type: CheckType) -> std::io::Result<()> {
        writer.write_all(&XZ_MAGIC)?;
        let stream_flags = [0u8, check_type as u8];
        writer.write_all(&stream_flags)?;
        writer.write_u32_le(CRC32.checksum(&stream_flags))?;
        Ok(())
    }

    /// Writes a block header carrying only the LZMA2 filter record; the
    /// sizes live in the index, as xz itself does when streaming.
    fn write_block_header(&self, writer: &mut CountWriter<W>) -> std::io::Result<u64> {
        let mut header_data = Vec::with_capacity(8);
        // One filter, no compressed/uncompressed size fields.
        header_data.push(0u8);

        let mut varint_buf = [0u8; 9];
        let size = encode_multibyte_integer(FILTER_ID_LZMA2, &mut varint_buf)?;
        header_data.extend_from_slice(&varint_buf[..size]);
        let size = encode_multibyte_integer(1, &mut varint_buf)?;
        header_data.extend_from_slice(&varint_buf[..size]);
        header_data.push(encode_dict_size_prop(self.options.lzma.dict_size)?);

        // Size byte + data + padding + CRC32, rounded up to 4 bytes.
        let header_size = (1 + header_data.len() + 4).div_ceil(4) * 4;
        let padding = header_size - 1 - header_data.len() - 4;
        let size_byte = (header_size / 4 - 1) as u8;

        writer.write_u8(size_byte)?;
        writer.write_all(&header_data)?;
        writer.write_all(&[0u8; 3][..padding])?;

        let mut digest = CRC32.digest();
        digest.update(&[size_byte]);
        digest.update(&header_data);
        digest.update(&[0u8; 3][..padding]);
        writer.write_u32_le(digest.finalize())?;

        Ok(header_size as u64)
    }

    fn start_block(&mut self, mut writer: CountWriter<W>) -> std::io::Result<()> {
        if !self.header_written {
            Self::write_stream_header(&mut writer, self.options.check_type)?;
            self.header_written = true;
        }

        self.block_header_size = self.write_block_header(&mut writer)?;
        self.block_start = writer.count;
        self.block_uncompressed = 0;

        let lzma2 = Lzma2Writer::new(writer, &self.options.lzma)?;
        self.state = WriterState::InBlock(Box::new(lzma2));
        Ok(())
    }

    fn finish_block(&mut self, lzma2: Box<Lzma2Writer<CountWriter<W>>>) -> std::io::Result<()> {
        let mut writer = lzma2.finish()?;
        let compressed_size = writer.count - self.block_start;

        let padding = ((4 - (compressed_size & 3)) & 3) as usize;
        writer.write_all(&[0u8; 3][..padding])?;

        let check = std::mem::replace(
            &mut self.check,
            ChecksumCalculator::new(self.options.check_type),
        );
        let check_bytes = check.finalize();
        writer.write_all(&check_bytes)?;

        self.records.push(IndexRecord {
            unpadded_size: self.block_header_size + compressed_size + check_bytes.len() as u64,
            uncompressed_size: self.block_uncompressed,
        });

        self.block_uncompressed = 0;
        self.state = WriterState::Idle(writer);
        Ok(())
    }

    fn write_index(&self, writer: &mut CountWriter<W>) -> std::io::Result<()> {
        let mut index_data = Vec::new();
        let mut varint_buf = [0u8; 9];

        let size = encode_multibyte_integer(self.records.len() as u64, &mut varint_buf)?;
        index_data.extend_from_slice(&varint_buf[..size]);

        for record in &self.records {
            let size = encode_multibyte_integer(record.unpadded_size, &mut varint_buf)?;
            index_data.extend_from_slice(&varint_buf[..size]);
            let size = encode_multibyte_integer(record.uncompressed_size, &mut varint_buf)?;
            index_data.extend_from_slice(&varint_buf[..size]);
        }

        writer.write_u8(0x00)?;
        writer.write_all(&index_data)?;

        let padding = (4 - ((1 + index_data.len()) & 3)) & 3;
        writer.write_all(&[0u8; 3][..padding])?;

        let mut digest = CRC32.digest();
        digest.update(&[0x00]);
        digest.update(&index_data);
        digest.update(&[0u8; 3][..padding]);
        writer.write_u32_le(digest.finalize())?;

        Ok(())
    }

    fn index_size(&self) -> u64 {
        let mut size = 1u64;
        size += super::count_multibyte_integer_size(self.records.len() as u64) as u64;
        for record in &self.records {
            size += super::count_multibyte_integer_size(record.unpadded_size) as u64;
            size += super::count_multibyte_integer_size(record.uncompressed_size) as u64;
        }
        size += (4 - (size & 3)) & 3;
        size + 4
    }

    fn write_stream_footer(&self, writer: &mut CountWriter<W>) -> std::io::Result<()> {
        let backward_size = (self.index_size() / 4 - 1) as u32;
        let stream_flags = [0u8, self.options.check_type as u8];

        let mut digest = CRC32.digest();
        digest.update(&backward_size.to_le_bytes());
        digest.update(&stream_flags);

        writer.write_u32_le(digest.finalize())?;
        writer.write_u32_le(backward_size)?;
        writer.write_all(&stream_flags)?;
        writer.write_all(&XZ_FOOTER_MAGIC)?;
        Ok(())
    }

    /// Closes the current block, writes the index and footer and
    /// returns the inner writer.
    pub fn finish(mut self) -> std::io::Result<W> {
        let mut writer = match std::mem::replace(&mut self.state, WriterState::Poisoned) {
            WriterState::InBlock(lzma2) => {
                self.finish_block(lzma2)?;
                match std::mem::replace(&mut self.state, WriterState::Poisoned) {
                    WriterState::Idle(writer) => writer,
                    _ => return Err(error_invalid_data("writer in a poisoned state")),
                }
            }
            WriterState::Idle(writer) => writer,
            WriterState::Poisoned => {
                return Err(error_invalid_data("writer in a poisoned state"))
            }
        };

        if !self.header_written {
            Self::write_stream_header(&mut writer, self.options.check_type)?;
            self.header_written = true;
        }

        self.write_index(&mut writer)?;
        self.write_stream_footer(&mut writer)?;
        writer.flush()?;

        Ok(writer.inner)
    }
}

impl<W: Write> Write for XzWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut remaining = buf;

        while !remaining.is_empty() {
            match std::mem::replace(&mut self.state, WriterState::Poisoned) {
                WriterState::Idle(writer) => {
                    self.start_block(writer)?;
                }
                WriterState::InBlock(mut lzma2) => {
                    let mut len = remaining.len();
                    if let Some(block_size) = self.options.block_size {
                        let left = block_size.get() - self.block_uncompressed;
                        len = len.min(left as usize);
                    }

                    let written = lzma2.write(&remaining[..len])?;
                    self.check.update(&remaining[..written]);
                    self.block_uncompressed += written as u64;
                    remaining = &remaining[written..];

                    let block_full = self
                        .options
                        .block_size
                        .is_some_and(|size| self.block_uncompressed >= size.get());
                    if block_full {
                        self.finish_block(lzma2)?;
                    } else {
                        self.state = WriterState::InBlock(lzma2);
                    }
                }
                WriterState::Poisoned => {
                    return Err(error_invalid_data("writer in a poisoned state"));
                }
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.state {
            WriterState::Idle(writer) => writer.flush(),
            WriterState::InBlock(lzma2) => lzma2.flush(),
            WriterState::Poisoned => Err(error_invalid_data("writer in a poisoned state")),
        }
    }
}

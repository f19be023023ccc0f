use std::io::Read;

use crate::{
    decoder::LzmaDecoder,
    error_invalid_data, error_invalid_input, error_out_of_memory,
    lz::{get_dict_size, LzDecoder},
    range_dec::RangeDecoder,
    ByteReader, DICT_SIZE_MAX,
};

/// Calculates the memory usage in KiB required for LZMA decompression
/// from the header properties byte.
pub fn get_memory_usage_by_props(dict_size: u32, props_byte: u8) -> std::io::Result<u32> {
    if props_byte > (4 * 5 + 4) * 9 + 8 {
        return Err(error_invalid_input("invalid properties byte"));
    }
    let props = props_byte % (9 * 5);
    let lp = props / 9;
    let lc = props - lp * 9;
    get_memory_usage(dict_size, lc as u32, lp as u32)
}

/// Calculates the memory usage in KiB required for LZMA decompression.
pub fn get_memory_usage(dict_size: u32, lc: u32, lp: u32) -> std::io::Result<u32> {
    if lc > 8 || lp > 4 {
        return Err(error_invalid_input("invalid lc or lp"));
    }
    Ok(10 + get_dict_size(dict_size)? / 1024 + ((2 * 0x300) << (lc + lp)) / 1024)
}

/// A classic `.lzma` decompressor.
///
/// The stream ends either after the uncompressed size declared in the
/// header or at the end-of-stream marker; when both are present they
/// must agree.
///
/// # Examples
/// ```
/// use std::io::{Read, Write};
///
/// use xzcodec::{LzmaOptions, LzmaReader, LzmaWriter};
///
/// let mut writer = LzmaWriter::new(Vec::new(), &LzmaOptions::default(), None).unwrap();
/// writer.write_all(b"Hello, world!").unwrap();
/// let compressed = writer.finish().unwrap();
///
/// let mut reader = LzmaReader::new(compressed.as_slice()).unwrap();
/// let mut decompressed = Vec::new();
/// reader.read_to_end(&mut decompressed).unwrap();
/// assert_eq!(&decompressed, b"Hello, world!");
/// ```
pub struct LzmaReader<R> {
    lz: LzDecoder,
    rc: RangeDecoder<R>,
    lzma: LzmaDecoder,
    end_reached: bool,
    relaxed_end_cond: bool,
    remaining_size: u64,
}

impl<R: Read> LzmaReader<R> {
    /// Creates a `.lzma` file format decompressor without any limits.
    pub fn new(reader: R) -> std::io::Result<Self> {
        Self::new_dict_limit(reader, DICT_SIZE_MAX, None)
    }

    /// Creates a `.lzma` file format decompressor honoring at most
    /// `max_dict_size` bytes of dictionary. A stream declaring a larger
    /// dictionary fails before any plaintext is produced.
    pub fn new_dict_limit(
        mut reader: R,
        max_dict_size: u32,
        preset_dict: Option<&[u8]>,
    ) -> std::io::Result<Self> {
        let props = reader.read_u8()?;
        let dict_size = reader.read_u32_le()?;
        let uncomp_size = reader.read_u64_le()?;

        if dict_size > max_dict_size {
            return Err(error_invalid_input(
                "stream declares a larger dictionary than allowed",
            ));
        }

        Self::construct_props(reader, uncomp_size, props, dict_size, preset_dict)
    }

    /// Creates a `.lzma` file format decompressor with a memory usage
    /// limit in KiB. `u32::MAX` means no limit.
    pub fn new_mem_limit(
        mut reader: R,
        mem_limit_kb: u32,
        preset_dict: Option<&[u8]>,
    ) -> std::io::Result<Self> {
        let props = reader.read_u8()?;
        let dict_size = reader.read_u32_le()?;
        let uncomp_size = reader.read_u64_le()?;

        let needed_kb = get_memory_usage_by_props(dict_size, props)?;
        if mem_limit_kb < needed_kb {
            return Err(error_out_of_memory("memory usage limit exceeded"));
        }

        Self::construct_props(reader, uncomp_size, props, dict_size, preset_dict)
    }

    /// Creates a decompressor for raw LZMA data without the 13-byte
    /// header. Properties and sizes come from out of band.
    pub fn new_raw(
        reader: R,
        uncomp_size: u64,
        lc: u32,
        lp: u32,
        pb: u32,
        dict_size: u32,
        preset_dict: Option<&[u8]>,
    ) -> std::io::Result<Self> {
        Self::construct(reader, uncomp_size, lc, lp, pb, dict_size, preset_dict)
    }

    fn construct_props(
        reader: R,
        uncomp_size: u64,
        mut props: u8,
        dict_size: u32,
        preset_dict: Option<&[u8]>,
    ) -> std::io::Result<Self> {
        if props > (4 * 5 + 4) * 9 + 8 {
            return Err(error_invalid_input("invalid properties byte"));
        }
        let pb = props / (9 * 5);
        props -= pb * 9 * 5;
        let lp = props / 9;
        let lc = props - lp * 9;

        Self::construct(
            reader,
            uncomp_size,
            lc as u32,
            lp as u32,
            pb as u32,
            dict_size,
            preset_dict,
        )
    }

    fn construct(
        reader: R,
        uncomp_size: u64,
        lc: u32,
        lp: u32,
        pb: u32,
        dict_size: u32,
        preset_dict: Option<&[u8]>,
    ) -> std::io::Result<Self> {
        if lc > 8 || lp > 4 || pb > 4 {
            return Err(error_invalid_input("invalid lc, lp or pb"));
        }
        if dict_size > DICT_SIZE_MAX {
            return Err(error_invalid_input("dictionary size too large"));
        }

        // No point holding a window larger than the data it will see.
        let mut dict_size = dict_size;
        if uncomp_size <= u64::MAX / 2 && dict_size as u64 > uncomp_size {
            dict_size = uncomp_size as u32;
        }

        let rc = RangeDecoder::new_stream(reader)?;
        let lz = LzDecoder::new(get_dict_size(dict_size)? as usize, preset_dict);
        let lzma = LzmaDecoder::new(lc, lp, pb);

        Ok(Self {
            lz,
            rc,
            lzma,
            end_reached: false,
            relaxed_end_cond: true,
            remaining_size: uncomp_size,
        })
    }

    /// Unwraps the reader, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.rc.into_inner()
    }

    fn read_decode(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() || self.end_reached {
            return Ok(0);
        }

        let mut size = 0usize;
        let mut len = buf.len() as u64;
        let mut off = 0usize;

        while len > 0 {
            let mut copy_size_max = len;
            if self.remaining_size <= u64::MAX / 2 && self.remaining_size < len {
                copy_size_max = self.remaining_size;
            }
            self.lz.set_limit(copy_size_max as usize);

            self.lzma.decode(&mut self.lz, &mut self.rc)?;
            if self.lzma.end_marker_detected() {
                self.end_reached = true;
            }

            let copied = self.lz.flush(buf, off)?;
            off += copied;
            len -= copied as u64;
            size += copied;

            if self.remaining_size <= u64::MAX / 2 {
                self.remaining_size -= copied as u64;
                if self.remaining_size == 0 {
                    self.end_reached = true;
                }
            }

            if self.end_reached {
                if self.lzma.end_marker_detected()
                    && self.remaining_size != u64::MAX
                    && self.remaining_size != 0
                {
                    return Err(error_invalid_data(
                        "end marker before the declared uncompressed size",
                    ));
                }
                if self.lz.has_pending()
                    || (!self.relaxed_end_cond && !self.rc.is_stream_finished())
                {
                    return Err(error_invalid_data("stream ended mid-operation"));
                }
                return Ok(size);
            }
        }
        Ok(size)
    }
}

impl<R: Read> Read for LzmaReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read_decode(buf)
    }
}

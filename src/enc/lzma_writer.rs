use std::io::Write;

use super::{encoder::LzmaEncoder, range_enc::RangeEncoder};
use crate::{error_invalid_data, error_invalid_input, error_unsupported, ByteWriter, LzmaOptions};

/// A classic `.lzma` compressor.
///
/// With a header the stream starts with the properties byte, the
/// dictionary capacity and the uncompressed size (all-ones when
/// unknown); an unknown size forces the end-of-stream marker.
///
/// # Examples
/// ```
/// use std::io::Write;
///
/// use xzcodec::{LzmaOptions, LzmaWriter};
///
/// let mut writer = LzmaWriter::new(Vec::new(), &LzmaOptions::default(), None).unwrap();
/// writer.write_all(b"Hello, world!").unwrap();
/// let compressed = writer.finish().unwrap();
/// assert_eq!(compressed[0], 0x5D);
/// ```
pub struct LzmaWriter<W: Write> {
    rc: RangeEncoder<W>,
    lzma: LzmaEncoder,
    use_end_marker: bool,
    expected_size: Option<u64>,
    current_size: u64,
}

impl<W: Write> LzmaWriter<W> {
    /// Creates a `.lzma` file format compressor writing the 13-byte
    /// header. `input_size` of `None` declares an unknown size and makes
    /// [`LzmaWriter::finish`] emit the end-of-stream marker.
    pub fn new(
        mut inner: W,
        options: &LzmaOptions,
        input_size: Option<u64>,
    ) -> std::io::Result<Self> {
        options.validate()?;
        if options.preset_dict.is_some() {
            return Err(error_invalid_input(
                "preset dictionary is only supported for headerless streams",
            ));
        }

        inner.write_u8(options.props())?;
        inner.write_u32_le(options.dict_size)?;
        inner.write_u64_le(input_size.unwrap_or(u64::MAX))?;

        Self::construct(inner, options, input_size, input_size.is_none())
    }

    /// Creates a raw LZMA compressor without any header. The decoder
    /// side needs the properties and dictionary size out of band.
    pub fn new_no_header(
        inner: W,
        options: &LzmaOptions,
        use_end_marker: bool,
    ) -> std::io::Result<Self> {
        options.validate()?;
        Self::construct(inner, options, None, use_end_marker)
    }

    fn construct(
        inner: W,
        options: &LzmaOptions,
        expected_size: Option<u64>,
        use_end_marker: bool,
    ) -> std::io::Result<Self> {
        let mut lzma = LzmaEncoder::new(
            options.lc,
            options.lp,
            options.pb,
            options.dict_size,
            options.nice_len,
            options.depth_limit,
            0,
        );

        if let Some(preset_dict) = &options.preset_dict {
            lzma.lz.set_preset_dict(options.dict_size, preset_dict);
        }

        Ok(Self {
            rc: RangeEncoder::new(inner),
            lzma,
            use_end_marker,
            expected_size,
            current_size: 0,
        })
    }

    /// Finishes the stream (end-of-stream marker if requested, range
    /// coder flush) and returns the inner writer.
    pub fn finish(mut self) -> std::io::Result<W> {
        self.lzma.lz.set_finishing();
        self.lzma.encode_for_lzma1(&mut self.rc)?;

        if let Some(expected_size) = self.expected_size {
            if expected_size != self.current_size {
                return Err(error_invalid_data(
                    "fewer bytes written than declared in the header",
                ));
            }
        }

        if self.use_end_marker {
            self.lzma.encode_eos_marker(&mut self.rc)?;
        }
        self.rc.finish()?;

        Ok(self.rc.into_inner())
    }
}

impl<W: Write> Write for LzmaWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(expected_size) = self.expected_size {
            if expected_size - self.current_size < buf.len() as u64 {
                return Err(error_invalid_data(
                    "more bytes written than declared in the header",
                ));
            }
        }
        self.current_size += buf.len() as u64;

        let mut len = buf.len();
        let mut off = 0;
        while len > 0 {
            let used = self.lzma.lz.fill_window(&buf[off..off + len]);
            off += used;
            len -= used;
            self.lzma.encode_for_lzma1(&mut self.rc)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // The range coder cannot be flushed mid-stream without ending it.
        Err(error_unsupported("LzmaWriter does not support flushing"))
    }
}

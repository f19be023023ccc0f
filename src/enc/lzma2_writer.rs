use std::io::Write;

use super::{
    encoder::LzmaEncoder,
    range_enc::{RangeEncoder, RangeEncoderBuffer},
};
use crate::{error_invalid_input, LzmaOptions};

pub(crate) const COMPRESSED_SIZE_MAX: u32 = 64 << 10;

/// Extra window space before the dictionary so an uncompressed-chunk
/// fallback can always re-read the chunk's bytes from the window.
pub(crate) fn get_extra_size_before(dict_size: u32) -> u32 {
    COMPRESSED_SIZE_MAX.saturating_sub(dict_size)
}

/// A raw LZMA2 compressor emitting the control-byte chunk protocol.
///
/// The first chunk resets dictionary, properties and state; chunks that
/// would expand are stored uncompressed. The stream ends with a single
/// 0x00 byte.
///
/// # Examples
/// ```
/// use std::io::Write;
///
/// use xzcodec::{Lzma2Writer, LzmaOptions};
///
/// let mut writer = Lzma2Writer::new(Vec::new(), &LzmaOptions::default()).unwrap();
/// writer.write_all(b"Hello, world!").unwrap();
/// let compressed = writer.finish().unwrap();
/// assert_eq!(*compressed.last().unwrap(), 0x00);
/// ```
pub struct Lzma2Writer<W: Write> {
    inner: W,
    rc: RangeEncoder<RangeEncoderBuffer>,
    lzma: LzmaEncoder,
    props: u8,
    dict_reset_needed: bool,
    state_reset_needed: bool,
    props_needed: bool,
    pending_size: u32,
}

impl<W: Write> Lzma2Writer<W> {
    pub fn new(inner: W, options: &LzmaOptions) -> std::io::Result<Self> {
        options.validate()?;
        if options.lc + options.lp > 4 {
            return Err(error_invalid_input("lc + lp must not exceed 4 in LZMA2"));
        }

        let mut lzma = LzmaEncoder::new(
            options.lc,
            options.lp,
            options.pb,
            options.dict_size,
            options.nice_len,
            options.depth_limit,
            get_extra_size_before(options.dict_size),
        );

        let mut dict_reset_needed = true;
        if let Some(preset_dict) = &options.preset_dict {
            lzma.lz.set_preset_dict(options.dict_size, preset_dict);
            dict_reset_needed = false;
        }

        Ok(Self {
            inner,
            rc: RangeEncoder::new_buffer(COMPRESSED_SIZE_MAX as usize),
            lzma,
            props: options.props(),
            dict_reset_needed,
            state_reset_needed: true,
            props_needed: true,
            pending_size: 0,
        })
    }

    fn write_lzma(&mut self, uncompressed_size: u32, compressed_size: u32) -> std::io::Result<()> {
        let mut control: u32 = if self.props_needed {
            if self.dict_reset_needed {
                0x80 + (3 << 5)
            } else {
                0x80 + (2 << 5)
            }
        } else if self.state_reset_needed {
            0x80 + (1 << 5)
        } else {
            0x80
        };
        control |= (uncompressed_size - 1) >> 16;

        let mut chunk_header = [0u8; 6];
        chunk_header[0] = control as u8;
        chunk_header[1] = ((uncompressed_size - 1) >> 8) as u8;
        chunk_header[2] = (uncompressed_size - 1) as u8;
        chunk_header[3] = ((compressed_size - 1) >> 8) as u8;
        chunk_header[4] = (compressed_size - 1) as u8;

        if self.props_needed {
            chunk_header[5] = self.props;
            self.inner.write_all(&chunk_header)?;
        } else {
            self.inner.write_all(&chunk_header[..5])?;
        }
        self.rc.write_to(&mut self.inner)?;

        self.props_needed = false;
        self.state_reset_needed = false;
        self.dict_reset_needed = false;
        Ok(())
    }

    fn write_uncompressed(&mut self, mut uncompressed_size: u32) -> std::io::Result<()> {
        while uncompressed_size > 0 {
            let chunk_size = uncompressed_size.min(COMPRESSED_SIZE_MAX);
            let chunk_header = [
                if self.dict_reset_needed { 0x01 } else { 0x02 },
                ((chunk_size - 1) >> 8) as u8,
                (chunk_size - 1) as u8,
            ];
            self.inner.write_all(&chunk_header)?;
            self.lzma.lz.copy_uncompressed(
                &mut self.inner,
                uncompressed_size as i32,
                chunk_size as usize,
            )?;
            uncompressed_size -= chunk_size;
            self.dict_reset_needed = false;
        }
        self.state_reset_needed = true;
        Ok(())
    }

    fn write_chunk(&mut self) -> std::io::Result<()> {
        let compressed_size = self.rc.finish_buffer()? as u32;
        let mut uncompressed_size = self.lzma.uncompressed_size();
        debug_assert!(compressed_size > 0);
        debug_assert!(uncompressed_size > 0);

        if compressed_size + 2 < uncompressed_size {
            self.write_lzma(uncompressed_size, compressed_size)?;
        } else {
            // Storing beats the coder; drop the chunk's state and copy
            // the bytes straight out of the window.
            self.lzma.reset();
            uncompressed_size = self.lzma.uncompressed_size();
            debug_assert!(uncompressed_size > 0);
            self.write_uncompressed(uncompressed_size)?;
        }

        self.pending_size -= uncompressed_size;
        self.lzma.reset_uncompressed_size();
        self.rc.reset_buffer();
        Ok(())
    }

    /// Terminates the LZMA2 stream and returns the inner writer.
    pub fn finish(mut self) -> std::io::Result<W> {
        self.lzma.lz.set_finishing();

        while self.pending_size > 0 {
            self.lzma.encode_for_lzma2(&mut self.rc)?;
            self.write_chunk()?;
        }

        self.inner.write_all(&[0x00])?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for Lzma2Writer<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut len = buf.len();
        let mut off = 0;
        while len > 0 {
            let used = self.lzma.lz.fill_window(&buf[off..off + len]);
            off += used;
            len -= used;
            self.pending_size += used as u32;
            if self.lzma.encode_for_lzma2(&mut self.rc)? {
                self.write_chunk()?;
            }
        }
        Ok(off)
    }

    /// Emits chunks for everything written so far. The last byte of the
    /// input seen so far stays buffered until more data or `finish`.
    fn flush(&mut self) -> std::io::Result<()> {
        self.lzma.lz.set_flushing();

        while self.pending_size > 0 {
            if !self.lzma.encode_for_lzma2(&mut self.rc)? && self.lzma.uncompressed_size() == 0 {
                break;
            }
            self.write_chunk()?;
        }

        self.inner.flush()
    }
}

use std::io::{Error, Read};

use crate::{
    copy_error,
    decoder::LzmaDecoder,
    error_invalid_data,
    lz::LzDecoder,
    range_dec::{RangeDecoder, RangeDecoderBuffer},
    ByteReader,
};

pub(crate) const COMPRESSED_SIZE_MAX: u32 = 1 << 16;

/// Calculates the memory usage in KiB required for LZMA2 decompression.
#[inline]
pub fn get_memory_usage(dict_size: u32) -> u32 {
    40 + COMPRESSED_SIZE_MAX / 1024 + get_dict_size(dict_size) / 1024
}

#[inline]
fn get_dict_size(dict_size: u32) -> u32 {
    (dict_size + 15) & !15
}

/// A raw LZMA2 decompressor.
///
/// Each control byte selects the end marker, an uncompressed chunk
/// (with or without dictionary reset) or an LZMA chunk whose reset
/// level can drop the coder state, the properties and the dictionary.
///
/// # Examples
/// ```
/// use std::io::Read;
///
/// use xzcodec::Lzma2Reader;
///
/// let compressed: Vec<u8> = vec![
///     1, 0, 12, 72, 101, 108, 108, 111, 44, 32, 119, 111, 114, 108, 100, 33, 0,
/// ];
/// let mut reader = Lzma2Reader::new(compressed.as_slice(), 1 << 16, None);
/// let mut decompressed = Vec::new();
/// reader.read_to_end(&mut decompressed).unwrap();
/// assert_eq!(&decompressed[..], b"Hello, world!");
/// ```
pub struct Lzma2Reader<R> {
    inner: R,
    lz: LzDecoder,
    rc: RangeDecoder<RangeDecoderBuffer>,
    lzma: Option<LzmaDecoder>,
    uncompressed_size: usize,
    is_lzma_chunk: bool,
    need_dict_reset: bool,
    need_props: bool,
    end_reached: bool,
    error: Option<Error>,
}

impl<R> Lzma2Reader<R> {
    /// Unwraps the reader, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Lzma2Reader<R> {
    /// Creates a new LZMA2 reader decompressing from `inner` with the
    /// given dictionary size in bytes.
    pub fn new(inner: R, dict_size: u32, preset_dict: Option<&[u8]>) -> Self {
        let has_preset = preset_dict.map(|dict| !dict.is_empty()).unwrap_or(false);
        Self {
            inner,
            lz: LzDecoder::new(get_dict_size(dict_size) as usize, preset_dict),
            rc: RangeDecoder::new_buffer(COMPRESSED_SIZE_MAX as usize),
            lzma: None,
            uncompressed_size: 0,
            is_lzma_chunk: false,
            need_dict_reset: !has_preset,
            need_props: true,
            end_reached: false,
            error: None,
        }
    }

    // Control byte layout:
    //   0x00        end of stream
    //   0x01        uncompressed chunk, resets the dictionary
    //   0x02        uncompressed chunk, keeps the dictionary
    //   0x03..0x7F  invalid
    //   0x80..0xFF  LZMA chunk; bits 5-6 select the reset level
    //               (none / state / state+props / state+props+dict) and
    //               bits 0-4 carry the high bits of uncompressedSize-1.
    fn decode_chunk_header(&mut self) -> std::io::Result<()> {
        let control = self.inner.read_u8()?;

        if control == 0x00 {
            self.end_reached = true;
            return Ok(());
        }

        if control >= 0xE0 || control == 0x01 {
            self.need_props = true;
            self.need_dict_reset = false;
            self.lz.reset();
        } else if self.need_dict_reset {
            return Err(error_invalid_data(
                "first chunk must reset the dictionary",
            ));
        }

        if control >= 0x80 {
            self.is_lzma_chunk = true;
            self.uncompressed_size = ((control & 0x1F) as usize) << 16;
            self.uncompressed_size += self.inner.read_u16_be()? as usize + 1;
            let compressed_size = self.inner.read_u16_be()? as usize + 1;

            if control >= 0xC0 {
                // Properties reset re-creates the decoder, which resets
                // the state as a side effect.
                self.need_props = false;
                self.decode_props()?;
            } else if self.need_props {
                return Err(error_invalid_data("chunk depends on unseen properties"));
            } else if control >= 0xA0 {
                if let Some(lzma) = self.lzma.as_mut() {
                    lzma.reset();
                }
            }

            self.rc.prepare(&mut self.inner, compressed_size)?;
        } else if control > 0x02 {
            return Err(error_invalid_data("invalid LZMA2 control byte"));
        } else {
            self.is_lzma_chunk = false;
            self.uncompressed_size = self.inner.read_u16_be()? as usize + 1;
        }

        Ok(())
    }

    fn decode_props(&mut self) -> std::io::Result<()> {
        let props = self.inner.read_u8()?;
        if props > (4 * 5 + 4) * 9 + 8 {
            return Err(error_invalid_data("invalid properties byte"));
        }
        let pb = props / (9 * 5);
        let props = props - pb * 9 * 5;
        let lp = props / 9;
        let lc = props - lp * 9;
        if lc + lp > 4 {
            return Err(error_invalid_data("lc + lp must not exceed 4 in LZMA2"));
        }
        self.lzma = Some(LzmaDecoder::new(lc as u32, lp as u32, pb as u32));
        Ok(())
    }

    fn read_decode(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(error) = &self.error {
            return Err(copy_error(error));
        }
        if self.end_reached {
            return Ok(0);
        }

        let mut size = 0;
        let mut len = buf.len();
        let mut off = 0;

        while len > 0 {
            if self.uncompressed_size == 0 {
                self.decode_chunk_header()?;
                if self.end_reached {
                    return Ok(size);
                }
            }

            let copy_size_max = self.uncompressed_size.min(len);
            if self.is_lzma_chunk {
                self.lz.set_limit(copy_size_max);
                match self.lzma.as_mut() {
                    Some(lzma) => {
                        lzma.decode(&mut self.lz, &mut self.rc)?;
                        if lzma.end_marker_detected() {
                            return Err(error_invalid_data("end marker inside an LZMA2 chunk"));
                        }
                    }
                    None => return Err(error_invalid_data("chunk depends on unseen properties")),
                }
            } else {
                self.lz.copy_uncompressed(&mut self.inner, copy_size_max)?;
            }

            let copied = self.lz.flush(buf, off)?;
            off += copied;
            len -= copied;
            size += copied;
            self.uncompressed_size -= copied;

            if self.uncompressed_size == 0
                && ((self.is_lzma_chunk && !self.rc.is_finished()) || self.lz.has_pending())
            {
                return Err(error_invalid_data(
                    "chunk did not consume its compressed data exactly",
                ));
            }
        }
        Ok(size)
    }
}

impl<R: Read> Read for Lzma2Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.read_decode(buf) {
            Ok(size) => Ok(size),
            Err(error) => {
                self.error = Some(copy_error(&error));
                Err(error)
            }
        }
    }
}

use std::io::Read;

use crate::{
    error_invalid_data, ByteReader, BIT_MODEL_TOTAL, BIT_MODEL_TOTAL_BITS, MOVE_BITS, SHIFT_BITS,
};

/// Range decoder over an arbitrary byte source.
///
/// The stream flavor pulls bytes lazily from the underlying reader; the
/// [`RangeDecoderBuffer`] flavor decodes out of a chunk that was read up
/// front, which is what LZMA2 needs to enforce exact compressed sizes.
pub(crate) struct RangeDecoder<R> {
    inner: R,
    range: u32,
    code: u32,
}

impl<R> RangeDecoder<R> {
    pub(crate) fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: ByteReader> RangeDecoder<R> {
    /// Primes the decoder by reading five bytes. The first byte of a valid
    /// stream is always zero.
    pub(crate) fn new_stream(mut inner: R) -> std::io::Result<Self> {
        if inner.read_u8()? != 0x00 {
            return Err(error_invalid_data("first range coder byte is not zero"));
        }
        let code = inner.read_u32_be()?;
        Ok(Self {
            inner,
            code,
            range: 0xFFFF_FFFF,
        })
    }

    /// True once the decoder has consumed the stream exactly.
    pub(crate) fn is_stream_finished(&self) -> bool {
        self.code == 0
    }

    pub(crate) fn normalize(&mut self) -> std::io::Result<()> {
        if self.range < 0x0100_0000 {
            let byte = self.inner.read_u8()? as u32;
            self.code = (self.code << SHIFT_BITS) | byte;
            self.range <<= SHIFT_BITS;
        }
        Ok(())
    }

    pub(crate) fn decode_bit(&mut self, prob: &mut u16) -> std::io::Result<u32> {
        self.normalize()?;
        let bound = (self.range >> BIT_MODEL_TOTAL_BITS) * (*prob as u32);

        if self.code < bound {
            self.range = bound;
            *prob += ((BIT_MODEL_TOTAL - *prob as u32) >> MOVE_BITS) as u16;
            Ok(0)
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> MOVE_BITS;
            Ok(1)
        }
    }

    /// Decodes `k` bits MSB-first from a probability tree of `2^k` entries.
    pub(crate) fn decode_bit_tree(&mut self, probs: &mut [u16]) -> std::io::Result<u32> {
        let mut symbol = 1usize;
        loop {
            let bit = self.decode_bit(&mut probs[symbol])?;
            symbol = (symbol << 1) | bit as usize;
            if symbol >= probs.len() {
                break;
            }
        }
        Ok((symbol - probs.len()) as u32)
    }

    /// Decodes LSB-first, used for the aligned distance bits and the low
    /// position-model bits.
    pub(crate) fn decode_reverse_bit_tree(&mut self, probs: &mut [u16]) -> std::io::Result<u32> {
        let mut symbol = 1usize;
        let mut result = 0u32;
        let mut shift = 0;
        loop {
            let bit = self.decode_bit(&mut probs[symbol])?;
            symbol = (symbol << 1) | bit as usize;
            result |= bit << shift;
            shift += 1;
            if symbol >= probs.len() {
                break;
            }
        }
        Ok(result)
    }

    pub(crate) fn decode_direct_bits(&mut self, count: u32) -> std::io::Result<u32> {
        let mut result = 0u32;
        for _ in 0..count {
            self.normalize()?;
            self.range >>= 1;
            let t = self.code.wrapping_sub(self.range) >> 31;
            self.code -= self.range & t.wrapping_sub(1);
            result = (result << 1) | 1u32.wrapping_sub(t);
        }
        Ok(result)
    }
}

impl RangeDecoder<RangeDecoderBuffer> {
    pub(crate) fn new_buffer(len: usize) -> Self {
        Self {
            inner: RangeDecoderBuffer::new(len - 5),
            code: 0,
            range: 0,
        }
    }

    /// Loads one LZMA2 chunk of `len` compressed bytes (including the five
    /// range coder init bytes) into the buffer.
    pub(crate) fn prepare<R: Read>(&mut self, mut reader: R, len: usize) -> std::io::Result<()> {
        if len < 5 {
            return Err(error_invalid_data("compressed chunk shorter than 5 bytes"));
        }

        if reader.read_u8()? != 0x00 {
            return Err(error_invalid_data("first range coder byte is not zero"));
        }
        self.code = reader.read_u32_be()?;
        self.range = 0xFFFF_FFFF;

        let len = len - 5;
        if len > self.inner.buf.len() {
            return Err(error_invalid_data("compressed chunk larger than the buffer"));
        }
        let pos = self.inner.buf.len() - len;
        self.inner.pos = pos;
        reader.read_exact(&mut self.inner.buf[pos..])
    }

    #[inline]
    pub(crate) fn is_finished(&self) -> bool {
        self.inner.pos == self.inner.buf.len() && self.code == 0
    }
}

pub(crate) struct RangeDecoderBuffer {
    buf: Vec<u8>,
    pos: usize,
}

impl RangeDecoderBuffer {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            buf: vec![0; len],
            pos: len,
        }
    }
}

impl Read for RangeDecoderBuffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let len = buf.len().min(self.buf.len() - self.pos);
        buf[..len].copy_from_slice(&self.buf[self.pos..self.pos + len]);
        self.pos += len;
        Ok(len)
    }
}

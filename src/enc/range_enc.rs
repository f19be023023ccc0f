use std::io::Write;

use crate::{BIT_MODEL_TOTAL, BIT_MODEL_TOTAL_BITS, MOVE_BITS, SHIFT_BITS, TOP_MASK};

/// Range encoder emitting whole bytes, with carry propagation absorbed
/// by a single cache byte and a run counter of pending 0xFF bytes.
///
/// The generic flavor writes straight to a sink (classic LZMA); the
/// [`RangeEncoderBuffer`] flavor collects one LZMA2 chunk so the chunk
/// header can state the compressed size before the payload is emitted.
pub(crate) struct RangeEncoder<W> {
    low: u64,
    range: u32,
    cache_size: u32,
    cache: u8,
    inner: W,
}

impl<W: Write> RangeEncoder<W> {
    pub(crate) fn new(inner: W) -> Self {
        let mut encoder = Self {
            low: 0,
            range: 0,
            cache_size: 0,
            cache: 0,
            inner,
        };
        encoder.reset();
        encoder
    }

    pub(crate) fn into_inner(self) -> W {
        self.inner
    }

    pub(crate) fn reset(&mut self) {
        self.low = 0;
        self.range = 0xFFFF_FFFF;
        self.cache = 0;
        self.cache_size = 1;
    }

    pub(crate) fn finish(&mut self) -> std::io::Result<()> {
        for _ in 0..5 {
            self.shift_low()?;
        }
        Ok(())
    }

    fn shift_low(&mut self) -> std::io::Result<()> {
        let low_hi = (self.low >> 32) as u32;
        if low_hi != 0 || self.low < 0xFF00_0000 {
            let mut out = self.cache;
            loop {
                self.inner.write_all(&[out.wrapping_add(low_hi as u8)])?;
                out = 0xFF;
                self.cache_size -= 1;
                if self.cache_size == 0 {
                    break;
                }
            }
            self.cache = (self.low >> 24) as u8;
        }
        self.cache_size += 1;
        self.low = (self.low & 0x00FF_FFFF) << 8;
        Ok(())
    }

    pub(crate) fn encode_bit(
        &mut self,
        probs: &mut [u16],
        index: usize,
        bit: u32,
    ) -> std::io::Result<()> {
        let prob = &mut probs[index];
        let bound = (self.range >> BIT_MODEL_TOTAL_BITS) * (*prob as u32);

        if bit == 0 {
            self.range = bound;
            *prob += ((BIT_MODEL_TOTAL - *prob as u32) >> MOVE_BITS) as u16;
        } else {
            self.low += bound as u64;
            self.range -= bound;
            *prob -= *prob >> MOVE_BITS;
        }

        if self.range & TOP_MASK == 0 {
            self.range <<= SHIFT_BITS;
            self.shift_low()?;
        }
        Ok(())
    }

    pub(crate) fn encode_bit_tree(&mut self, probs: &mut [u16], symbol: u32) -> std::io::Result<()> {
        let mut index = 1usize;
        let mut mask = probs.len() as u32;

        loop {
            mask >>= 1;
            let bit = symbol & mask;
            self.encode_bit(probs, index, bit)?;
            index <<= 1;
            if bit != 0 {
                index |= 1;
            }
            if mask == 1 {
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn encode_reverse_bit_tree(
        &mut self,
        probs: &mut [u16],
        symbol: u32,
    ) -> std::io::Result<()> {
        let mut index = 1usize;
        let mut symbol = symbol | probs.len() as u32;

        loop {
            let bit = symbol & 1;
            symbol >>= 1;
            self.encode_bit(probs, index, bit)?;
            index = (index << 1) | bit as usize;
            if symbol == 1 {
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn encode_direct_bits(&mut self, value: u32, mut count: u32) -> std::io::Result<()> {
        loop {
            self.range >>= 1;
            count -= 1;
            let mask = 0u32.wrapping_sub((value >> count) & 1);
            self.low += (self.range & mask) as u64;

            if self.range & TOP_MASK == 0 {
                self.range <<= SHIFT_BITS;
                self.shift_low()?;
            }
            if count == 0 {
                break;
            }
        }
        Ok(())
    }
}

impl RangeEncoder<RangeEncoderBuffer> {
    pub(crate) fn new_buffer(buf_size: usize) -> Self {
        Self::new(RangeEncoderBuffer::new(buf_size))
    }

    pub(crate) fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        self.inner.write_to(out)
    }

    /// Flushes the coder and returns the chunk's compressed size.
    pub(crate) fn finish_buffer(&mut self) -> std::io::Result<usize> {
        self.finish()?;
        Ok(self.inner.pos)
    }

    pub(crate) fn reset_buffer(&mut self) {
        self.reset();
        self.inner.pos = 0;
    }

    /// Bytes this chunk would occupy if flushed right now.
    #[inline]
    pub(crate) fn pending_size(&self) -> u32 {
        self.inner.pos as u32 + self.cache_size + 5 - 1
    }
}

pub(crate) struct RangeEncoderBuffer {
    buf: Vec<u8>,
    pos: usize,
}

impl RangeEncoderBuffer {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            buf: vec![0; size],
            pos: 0,
        }
    }

    pub(crate) fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&self.buf[..self.pos])
    }
}

impl Write for RangeEncoderBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let size = buf.len().min(self.buf.len() - self.pos);
        if size == 0 {
            return Ok(0);
        }
        self.buf[self.pos..self.pos + size].copy_from_slice(&buf[..size]);
        self.pos += size;
        Ok(size)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{range_dec::RangeDecoder, PROB_INIT};

    #[test]
    fn bits_round_trip_through_the_range_coder() {
        let pattern = [1u32, 0, 0, 1, 1, 1, 0, 1, 0, 0, 1, 0, 1, 1, 0, 0];

        let mut compressed = Vec::new();
        {
            let mut rc = RangeEncoder::new(&mut compressed);
            let mut probs = [PROB_INIT; 2];
            for (i, &bit) in pattern.iter().cycle().take(500).enumerate() {
                rc.encode_bit(&mut probs, i % 2, bit).unwrap();
            }
            rc.encode_direct_bits(0x2AAAA, 18).unwrap();
            rc.finish().unwrap();
        }

        let mut rc = RangeDecoder::new_stream(compressed.as_slice()).unwrap();
        let mut probs = [PROB_INIT; 2];
        for (i, &bit) in pattern.iter().cycle().take(500).enumerate() {
            assert_eq!(rc.decode_bit(&mut probs[i % 2]).unwrap(), bit);
        }
        assert_eq!(rc.decode_direct_bits(18).unwrap(), 0x2AAAA);
    }

    #[test]
    fn trees_round_trip_through_the_range_coder() {
        let symbols = [0u32, 7, 3, 5, 1, 6, 2, 4, 7, 0];

        let mut compressed = Vec::new();
        {
            let mut rc = RangeEncoder::new(&mut compressed);
            let mut tree = [PROB_INIT; 8];
            let mut reverse = [PROB_INIT; 8];
            for &symbol in &symbols {
                rc.encode_bit_tree(&mut tree, symbol).unwrap();
                rc.encode_reverse_bit_tree(&mut reverse, symbol).unwrap();
            }
            rc.finish().unwrap();
        }

        let mut rc = RangeDecoder::new_stream(compressed.as_slice()).unwrap();
        let mut tree = [PROB_INIT; 8];
        let mut reverse = [PROB_INIT; 8];
        for &symbol in &symbols {
            assert_eq!(rc.decode_bit_tree(&mut tree).unwrap(), symbol);
            assert_eq!(rc.decode_reverse_bit_tree(&mut reverse).unwrap(), symbol);
        }
    }
}

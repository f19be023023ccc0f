use std::io::Read;

use crate::{error_invalid_data, error_out_of_memory};

/// The decoder-side sliding window: a single ring-buffer allocation that
/// match operations copy out of and decoded bytes are appended to.
///
/// `pos` is the write head, `start` the read cursor of the pending flush,
/// `full` how much history is valid. A copy that hits the per-call output
/// limit is parked in `pending_len`/`pending_dist` and resumed by
/// [`LzDecoder::copy_pending`] on the next call.
#[derive(Default)]
pub(crate) struct LzDecoder {
    buf: Vec<u8>,
    buf_size: usize,
    start: usize,
    pos: usize,
    full: usize,
    limit: usize,
    pending_len: usize,
    pending_dist: usize,
}

impl LzDecoder {
    pub(crate) fn new(dict_size: usize, preset_dict: Option<&[u8]>) -> Self {
        let mut buf = vec![0; dict_size];
        let mut pos = 0;
        let mut full = 0;
        let mut start = 0;
        if let Some(preset) = preset_dict {
            pos = preset.len().min(dict_size);
            full = pos;
            start = pos;
            let skip = preset.len() - pos;
            buf[..pos].copy_from_slice(&preset[skip..]);
        }
        Self {
            buf,
            buf_size: dict_size,
            pos,
            full,
            start,
            ..Default::default()
        }
    }

    pub(crate) fn reset(&mut self) {
        self.start = 0;
        self.pos = 0;
        self.full = 0;
        self.limit = 0;
        self.buf[self.buf_size - 1] = 0;
    }

    /// Caps how many bytes the next decode pass may produce.
    pub(crate) fn set_limit(&mut self, out_max: usize) {
        self.limit = (out_max + self.pos).min(self.buf_size);
    }

    pub(crate) fn has_space(&self) -> bool {
        self.pos < self.limit
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending_len > 0
    }

    pub(crate) fn head(&self) -> usize {
        self.pos
    }

    /// The byte `dist` positions behind the head. Positions before the
    /// start of the stream read as zero.
    pub(crate) fn byte_at(&self, dist: usize) -> u8 {
        let offset = if dist >= self.pos {
            self.buf_size
                .saturating_add(self.pos)
                .saturating_sub(dist)
                .saturating_sub(1)
        } else {
            self.pos - dist - 1
        };

        self.buf.get(offset).copied().unwrap_or(0)
    }

    pub(crate) fn put_byte(&mut self, byte: u8) {
        self.buf[self.pos] = byte;
        self.pos += 1;
        if self.full < self.pos {
            self.full = self.pos;
        }
    }

    /// Copies `len` bytes from `dist + 1` positions back. Overlapping
    /// copies replicate bytes produced earlier in the same call.
    pub(crate) fn copy_match(&mut self, dist: usize, len: usize) -> std::io::Result<()> {
        if dist >= self.full {
            return Err(error_invalid_data("match distance beyond dictionary"));
        }

        let mut left = usize::min(self.limit - self.pos, len);
        self.pending_len = len - left;
        self.pending_dist = dist;

        let back = if self.pos < dist + 1 {
            // The source wraps around the end of the ring. Only possible
            // once the dictionary is full.
            debug_assert_eq!(self.full, self.buf_size);
            let back = self.buf_size + self.pos - dist - 1;

            let copy_size = usize::min(self.buf_size - back, left);
            self.buf.copy_within(back..back + copy_size, self.pos);
            self.pos += copy_size;
            left -= copy_size;

            if left == 0 {
                if self.full < self.pos {
                    self.full = self.pos;
                }
                return Ok(());
            }

            0
        } else {
            self.pos - dist - 1
        };

        debug_assert!(back < self.pos);
        debug_assert!(left > 0);

        if dist >= left {
            let (history, rest) = self.buf.split_at_mut(self.pos);
            rest[..left].copy_from_slice(&history[back..back + left]);
            self.pos += left;
        } else {
            // Overlapping run; replicate in distance-sized strides.
            loop {
                let copy_size = left.min(self.pos - back);
                self.buf.copy_within(back..back + copy_size, self.pos);
                self.pos += copy_size;
                left -= copy_size;
                if left == 0 {
                    break;
                }
            }
        }

        if self.full < self.pos {
            self.full = self.pos;
        }
        Ok(())
    }

    /// Resumes a match copy that was cut short by the output limit.
    pub(crate) fn copy_pending(&mut self) -> std::io::Result<()> {
        if self.pending_len > 0 {
            let len = self.pending_len;
            self.pending_len = 0;
            self.copy_match(self.pending_dist, len)?;
        }
        Ok(())
    }

    /// Fills the window directly from the reader (LZMA2 uncompressed
    /// chunks). Returns how many bytes were copied in.
    pub(crate) fn copy_uncompressed<R: Read>(
        &mut self,
        mut source: R,
        len: usize,
    ) -> std::io::Result<usize> {
        let copy_size = (self.buf_size - self.pos).min(len);
        source.read_exact(&mut self.buf[self.pos..self.pos + copy_size])?;
        self.pos += copy_size;
        if self.full < self.pos {
            self.full = self.pos;
        }
        Ok(copy_size)
    }

    /// Moves everything decoded since the last flush into `out` starting
    /// at `out_off` and advances the read cursor.
    pub(crate) fn flush(&mut self, out: &mut [u8], out_off: usize) -> std::io::Result<usize> {
        let copy_size = self.pos - self.start;

        if self.pos == self.buf_size {
            self.pos = 0;
        }

        let src = self
            .buf
            .get(self.start..self.start + copy_size)
            .ok_or_else(|| error_invalid_data("window read cursor out of range"))?;
        let dst = out
            .get_mut(out_off..out_off + copy_size)
            .ok_or_else(|| error_invalid_data("flush destination too small"))?;
        dst.copy_from_slice(src);

        self.start = self.pos;
        Ok(copy_size)
    }
}

/// Dictionary sizes get rounded up so the window allocation stays
/// 16-byte aligned.
pub(crate) fn get_dict_size(dict_size: u32) -> std::io::Result<u32> {
    if dict_size > crate::DICT_SIZE_MAX {
        return Err(error_out_of_memory("dictionary size too large"));
    }
    let dict_size = dict_size.max(crate::DICT_SIZE_MIN);
    Ok((dict_size + 15) & !15)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder_with(bytes: &[u8]) -> LzDecoder {
        let mut dict = LzDecoder::new(1 << 12, None);
        dict.set_limit(1 << 12);
        for &byte in bytes {
            dict.put_byte(byte);
        }
        dict
    }

    #[test]
    fn byte_at_reads_history_and_zero_fills() {
        let dict = decoder_with(b"abc");
        assert_eq!(dict.byte_at(0), b'c');
        assert_eq!(dict.byte_at(1), b'b');
        assert_eq!(dict.byte_at(2), b'a');
        // Before the start of the stream everything reads as zero.
        assert_eq!(dict.byte_at(3), 0);
        assert_eq!(dict.byte_at(100), 0);
    }

    #[test]
    fn copy_match_dist_zero_is_run_length() {
        let mut dict = decoder_with(b"xy");
        dict.copy_match(0, 20).unwrap();

        let mut out = vec![0u8; 22];
        let n = dict.flush(&mut out, 0).unwrap();
        assert_eq!(n, 22);
        assert_eq!(&out[..2], b"xy");
        assert!(out[2..].iter().all(|&byte| byte == b'y'));
    }

    #[test]
    fn copy_match_overlap_replicates_pattern() {
        let mut dict = decoder_with(b"ab");
        dict.copy_match(1, 6).unwrap();

        let mut out = vec![0u8; 8];
        dict.flush(&mut out, 0).unwrap();
        assert_eq!(&out, b"abababab");
    }

    #[test]
    fn copy_match_rejects_distance_beyond_history() {
        let mut dict = decoder_with(b"ab");
        assert!(dict.copy_match(2, 3).is_err());
    }

    #[test]
    fn limited_copy_parks_the_remainder() {
        let mut dict = LzDecoder::new(1 << 12, None);
        dict.set_limit(4);
        for &byte in b"ab" {
            dict.put_byte(byte);
        }
        dict.copy_match(1, 6).unwrap();
        assert!(dict.has_pending());

        let mut out = vec![0u8; 4];
        assert_eq!(dict.flush(&mut out, 0).unwrap(), 4);

        dict.set_limit(4);
        dict.copy_pending().unwrap();
        assert!(!dict.has_pending());
        let mut rest = vec![0u8; 4];
        assert_eq!(dict.flush(&mut rest, 0).unwrap(), 4);

        let mut all = out;
        all.extend_from_slice(&rest);
        assert_eq!(&all, b"abababab");
    }

    #[test]
    fn preset_dict_provides_history() {
        let mut dict = LzDecoder::new(1 << 12, Some(b"hello "));
        dict.set_limit(5);
        dict.copy_match(5, 5).unwrap();
        let mut out = vec![0u8; 5];
        dict.flush(&mut out, 0).unwrap();
        assert_eq!(&out, b"hello");
    }
}

use std::io::Read;

use crate::{xz::XZ_MAGIC, LzmaReader, XzReader};

/// A decompressor that sniffs the container format: input starting with
/// the 6-byte xz magic is read as `.xz`, anything else as classic
/// `.lzma`.
pub struct AutoReader<R: Read> {
    inner: Format<R>,
}

enum Format<R: Read> {
    Xz(XzReader<PrefixedReader<R>>),
    Lzma(Box<LzmaReader<PrefixedReader<R>>>),
}

impl<R: Read> AutoReader<R> {
    /// Sniffs the format and creates the matching reader. Streams
    /// declaring a dictionary larger than `max_dict_size` are rejected
    /// before any plaintext is produced.
    pub fn new(mut inner: R, max_dict_size: u32) -> std::io::Result<Self> {
        let mut prefix = [0u8; 6];
        let mut filled = 0;
        while filled < prefix.len() {
            let n = inner.read(&mut prefix[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let replay = PrefixedReader {
            prefix,
            len: filled,
            pos: 0,
            inner,
        };

        let inner = if filled == prefix.len() && prefix == XZ_MAGIC {
            Format::Xz(XzReader::new_dict_limit(replay, true, max_dict_size))
        } else {
            Format::Lzma(Box::new(LzmaReader::new_dict_limit(
                replay,
                max_dict_size,
                None,
            )?))
        };

        Ok(Self { inner })
    }
}

impl<R: Read> Read for AutoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            Format::Xz(reader) => reader.read(buf),
            Format::Lzma(reader) => reader.read(buf),
        }
    }
}

/// Replays the sniffed magic bytes ahead of the remaining input.
struct PrefixedReader<R> {
    prefix: [u8; 6],
    len: usize,
    pos: usize,
    inner: R,
}

impl<R: Read> Read for PrefixedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos < self.len {
            let n = (self.len - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.prefix[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

use std::io::Write;

use super::hc4::HashChain4;

/// Window moves keep the buffer start 16-byte aligned.
const MOVE_ALIGN_MASK: i32 = !15;

pub(crate) trait MatchFind {
    fn find_matches(&mut self, window: &mut LzWindow, matches: &mut Matches);
    fn skip(&mut self, window: &mut LzWindow, len: usize);
}

/// Candidate (distance, length) pairs reported by the match finder for
/// the current head. Distances are stored as `distance - 1`.
pub(crate) struct Matches {
    pub(crate) len: Vec<u32>,
    pub(crate) dist: Vec<i32>,
    pub(crate) count: u32,
}

impl Matches {
    pub(crate) fn new(count_max: usize) -> Self {
        Self {
            len: vec![0; count_max],
            dist: vec![0; count_max],
            count: 0,
        }
    }
}

/// The encoder-side sliding window plus its match finder.
///
/// Input lands in `buf` via [`LzEncoder::fill_window`]; the match finder
/// walks `read_pos` forward and indexes every position, holding back up
/// to `keep_size_after` bytes so match candidates can always be extended
/// without bounds checks. Bytes the finder could not index yet are
/// counted in `pending_size` and replayed once more input (or the
/// flush/finish signal) arrives.
pub(crate) struct LzEncoder {
    pub(crate) window: LzWindow,
    pub(crate) matches: Matches,
    match_finder: HashChain4,
}

pub(crate) struct LzWindow {
    keep_size_before: u32,
    keep_size_after: u32,
    match_len_max: u32,
    pub(crate) nice_len: u32,
    pub(crate) buf: Vec<u8>,
    buf_size: i32,
    pub(crate) read_pos: i32,
    read_limit: i32,
    finishing: bool,
    write_pos: i32,
    pending_size: u32,
}

impl LzEncoder {
    pub(crate) fn new(
        dict_size: u32,
        extra_size_before: u32,
        extra_size_after: u32,
        nice_len: u32,
        match_len_max: u32,
        depth_limit: i32,
    ) -> Self {
        let buf_size = get_buf_size(
            dict_size,
            extra_size_before,
            extra_size_after,
            match_len_max,
        );

        Self {
            window: LzWindow {
                keep_size_before: extra_size_before + dict_size,
                keep_size_after: extra_size_after + match_len_max,
                match_len_max,
                nice_len,
                buf: vec![0; buf_size as usize],
                buf_size: buf_size as i32,
                read_pos: -1,
                read_limit: -1,
                finishing: false,
                write_pos: 0,
                pending_size: 0,
            },
            matches: Matches::new(nice_len as usize - 1),
            match_finder: HashChain4::new(dict_size, nice_len, depth_limit),
        }
    }

    /// Rebases match finder positions after the absolute position counter
    /// gets close to overflowing.
    pub(crate) fn normalize(positions: &mut [i32], norm_offset: i32) {
        for pos in positions {
            *pos = pos.saturating_sub(norm_offset).max(0);
        }
    }

    pub(crate) fn find_matches(&mut self) {
        self.match_finder
            .find_matches(&mut self.window, &mut self.matches);
        debug_assert!(self.window.verify_matches(&self.matches));
    }

    pub(crate) fn skip(&mut self, len: usize) {
        self.match_finder.skip(&mut self.window, len);
    }

    pub(crate) fn set_preset_dict(&mut self, dict_size: u32, preset_dict: &[u8]) {
        debug_assert!(!self.window.is_started());
        debug_assert_eq!(self.window.write_pos, 0);
        let copy_size = preset_dict.len().min(dict_size as usize);
        let offset = preset_dict.len() - copy_size;
        self.window.buf[..copy_size].copy_from_slice(&preset_dict[offset..]);
        self.window.write_pos += copy_size as i32;
        self.match_finder.skip(&mut self.window, copy_size);
    }

    pub(crate) fn fill_window(&mut self, input: &[u8]) -> usize {
        let window = &mut self.window;
        debug_assert!(!window.finishing);

        if window.read_pos >= window.buf_size - window.keep_size_after as i32 {
            window.move_window();
        }

        let len = (input.len() as i32).min(window.buf_size - window.write_pos) as usize;
        let start = window.write_pos as usize;
        window.buf[start..start + len].copy_from_slice(&input[..len]);
        window.write_pos += len as i32;

        if window.write_pos >= window.keep_size_after as i32 {
            window.read_limit = window.write_pos - window.keep_size_after as i32;
        }

        self.process_pending_bytes();
        len
    }

    fn process_pending_bytes(&mut self) {
        let window = &mut self.window;
        if window.pending_size > 0 && window.read_pos < window.read_limit {
            window.read_pos -= window.pending_size as i32;
            let old_pending = window.pending_size;
            window.pending_size = 0;
            self.match_finder.skip(window, old_pending as usize);
            debug_assert!(self.window.pending_size < old_pending);
        }
    }

    pub(crate) fn set_flushing(&mut self) {
        self.window.read_limit = self.window.write_pos - 1;
        self.process_pending_bytes();
    }

    pub(crate) fn set_finishing(&mut self) {
        self.window.read_limit = self.window.write_pos - 1;
        self.window.finishing = true;
        self.process_pending_bytes();
    }
}

impl std::ops::Deref for LzEncoder {
    type Target = LzWindow;

    fn deref(&self) -> &Self::Target {
        &self.window
    }
}

impl LzWindow {
    pub(crate) fn is_started(&self) -> bool {
        self.read_pos != -1
    }

    pub(crate) fn read_buffer(&self) -> &[u8] {
        &self.buf[self.read_pos as usize..]
    }

    fn move_window(&mut self) {
        let move_offset = (self.read_pos + 1 - self.keep_size_before as i32) & MOVE_ALIGN_MASK;
        let move_size = self.write_pos - move_offset;
        debug_assert!(move_offset >= 0);
        debug_assert!(move_size >= 0);

        self.buf
            .copy_within(move_offset as usize..(move_offset + move_size) as usize, 0);

        self.read_pos -= move_offset;
        self.read_limit -= move_offset;
        self.write_pos -= move_offset;
    }

    /// Whether another operation can be read at `read_pos - already_read_len`.
    pub(crate) fn has_enough_data(&self, already_read_len: i32) -> bool {
        self.read_pos - already_read_len < self.read_limit
    }

    /// Streams window bytes out unmodified; `backward` counts from one
    /// past the read head (LZMA2 uncompressed chunks).
    pub(crate) fn copy_uncompressed<W: Write>(
        &self,
        out: &mut W,
        backward: i32,
        len: usize,
    ) -> std::io::Result<()> {
        let start = (self.read_pos + 1 - backward) as usize;
        out.write_all(&self.buf[start..start + len])
    }

    #[inline(always)]
    pub(crate) fn get_avail(&self) -> i32 {
        debug_assert!(self.is_started());
        self.write_pos - self.read_pos
    }

    #[inline(always)]
    pub(crate) fn get_pos(&self) -> i32 {
        self.read_pos
    }

    #[inline(always)]
    pub(crate) fn get_byte(&self, forward: i32, backward: i32) -> u8 {
        self.buf[(self.read_pos + forward - backward) as usize]
    }

    #[inline(always)]
    pub(crate) fn get_byte_backward(&self, backward: i32) -> u8 {
        self.buf[(self.read_pos - backward) as usize]
    }

    #[inline(always)]
    pub(crate) fn get_current_byte(&self) -> u8 {
        self.buf[self.read_pos as usize]
    }

    /// Length of the match at distance `dist + 1` from the read head,
    /// bounded by `len_limit`.
    pub(crate) fn get_match_len(&self, dist: i32, len_limit: i32) -> usize {
        extend_match(&self.buf, self.read_pos, 0, dist + 1, len_limit) as usize
    }

    fn verify_matches(&self, matches: &Matches) -> bool {
        let len_limit = self.get_avail().min(self.match_len_max as i32);
        for i in 0..matches.count as usize {
            if self.get_match_len(matches.dist[i], len_limit) != matches.len[i] as usize {
                return false;
            }
        }
        true
    }

    /// Advances the read head for the match finder. Returns 0 when the
    /// position cannot be indexed yet; the byte still gets encoded and the
    /// finder revisits the position via the pending counter.
    pub(crate) fn move_pos(
        &mut self,
        required_for_flushing: i32,
        required_for_finishing: i32,
    ) -> i32 {
        debug_assert!(required_for_flushing >= required_for_finishing);
        self.read_pos += 1;
        let mut avail = self.write_pos - self.read_pos;
        if avail < required_for_flushing && (avail < required_for_finishing || !self.finishing) {
            self.pending_size += 1;
            avail = 0;
        }
        avail
    }
}

/// Extends a match byte by byte up to `limit`.
pub(crate) fn extend_match(
    buf: &[u8],
    read_pos: i32,
    current_len: i32,
    match_dist: i32,
    limit: i32,
) -> i32 {
    let extension_limit = (limit - current_len) as usize;
    if extension_limit == 0 {
        return current_len;
    }

    let start = (read_pos + current_len) as usize;
    let ahead = &buf[start..start + extension_limit];
    let behind = &buf[start - match_dist as usize..][..extension_limit];

    let extended = ahead
        .iter()
        .zip(behind)
        .take_while(|(a, b)| a == b)
        .count();

    current_len + extended as i32
}

fn get_buf_size(
    dict_size: u32,
    extra_size_before: u32,
    extra_size_after: u32,
    match_len_max: u32,
) -> u32 {
    let keep_size_before = extra_size_before + dict_size;
    let keep_size_after = extra_size_after + match_len_max;
    let reserve_size = (dict_size / 2 + (256 << 10)).min(512 << 20);
    keep_size_before + keep_size_after + reserve_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_match_stops_at_first_difference() {
        let buf = b"abcabcabx_______";
        assert_eq!(extend_match(buf, 3, 0, 3, 6), 5);
        assert_eq!(extend_match(buf, 3, 2, 3, 6), 5);
    }

    #[test]
    fn window_reports_matches_for_repetitive_input() {
        let mut encoder = LzEncoder::new(1 << 16, 0, 0, 32, 273, 16);
        encoder.fill_window(b"abcdabcdabcdabcdabcdabcdabcdabcd");
        encoder.set_finishing();

        // Move onto the second "abcd" repetition and ask for matches.
        encoder.skip(4);
        encoder.find_matches();

        let matches = &encoder.matches;
        assert!(matches.count > 0);
        let best = (matches.count - 1) as usize;
        assert_eq!(matches.dist[best], 3);
        assert!(matches.len[best] >= 4);
    }
}

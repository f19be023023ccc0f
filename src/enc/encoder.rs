use std::io::Write;

use super::range_enc::{RangeEncoder, RangeEncoderBuffer};
use crate::{
    coder::{
        dist_state, LengthCoder, LzmaCoder, ALIGN_BITS, ALIGN_MASK, DIST_MODEL_END,
        DIST_MODEL_START, EOS_DIST, MATCH_LEN_MAX, MATCH_LEN_MIN, REPS,
    },
    lz::{LzEncoder, LzWindow},
    PROB_INIT,
};

/// Chunk limits for LZMA2: a chunk never states more than this much
/// uncompressed data and its compressed payload must leave room for the
/// worst-case flush.
pub(crate) const LZMA2_UNCOMPRESSED_LIMIT: u32 = (2 << 20) - MATCH_LEN_MAX as u32;
pub(crate) const LZMA2_COMPRESSED_LIMIT: u32 = (64 << 10) - 26;

const EXTRA_SIZE_BEFORE: u32 = 1;
const EXTRA_SIZE_AFTER: u32 = (MATCH_LEN_MAX - 1) as u32;

const OP_LITERAL: i32 = -1;

#[inline(always)]
pub(crate) fn get_dist_slot(dist: u32) -> u32 {
    if dist <= DIST_MODEL_START as u32 {
        return dist;
    }
    let n = 31 - dist.leading_zeros();
    (n << 1) | ((dist >> (n - 1)) & 1)
}

/// A small distance beats a marginally longer match when it is at least
/// 128 times closer.
#[inline(always)]
fn change_pair(small_dist: u32, big_dist: u32) -> bool {
    small_dist < (big_dist >> 7)
}

/// Encoder for the LZMA operation alphabet with a greedy selection
/// policy: prefer rep matches at comparable length, otherwise take the
/// longest match, defer to a literal when the next position promises a
/// clearly better match.
pub(crate) struct LzmaEncoder {
    pub(crate) coder: LzmaCoder,
    pub(crate) lz: LzEncoder,
    literal: LiteralEncoder,
    match_len: LengthCoder,
    rep_len: LengthCoder,
    nice_len: i32,
    /// Operation picked by `next_op`: `OP_LITERAL`, a rep index in 0..4,
    /// or distance + 4 for a simple match.
    back: i32,
    /// How far the match finder has read past the next byte to encode.
    read_ahead: i32,
    uncompressed_size: u32,
}

impl LzmaEncoder {
    pub(crate) fn new(
        lc: u32,
        lp: u32,
        pb: u32,
        dict_size: u32,
        nice_len: u32,
        depth_limit: i32,
        extra_size_before: u32,
    ) -> Self {
        let lz = LzEncoder::new(
            dict_size,
            extra_size_before.max(EXTRA_SIZE_BEFORE),
            EXTRA_SIZE_AFTER,
            nice_len,
            MATCH_LEN_MAX as u32,
            depth_limit,
        );

        Self {
            coder: LzmaCoder::new(pb),
            lz,
            literal: LiteralEncoder::new(lc, lp),
            match_len: LengthCoder::new(),
            rep_len: LengthCoder::new(),
            nice_len: nice_len as i32,
            back: 0,
            read_ahead: -1,
            uncompressed_size: 0,
        }
    }

    /// Zeroes probabilities, state and the distance cache. Bytes the
    /// match finder read ahead are handed back to the chunk accounting.
    pub(crate) fn reset(&mut self) {
        self.coder.reset();
        self.literal.reset();
        self.match_len.reset();
        self.rep_len.reset();
        self.uncompressed_size += (self.read_ahead + 1) as u32;
        self.read_ahead = -1;
    }

    #[inline]
    pub(crate) fn uncompressed_size(&self) -> u32 {
        self.uncompressed_size
    }

    pub(crate) fn reset_uncompressed_size(&mut self) {
        self.uncompressed_size = 0;
    }

    fn get_matches(&mut self) {
        self.read_ahead += 1;
        self.lz.find_matches();
    }

    fn skip_ahead(&mut self, len: usize) {
        self.read_ahead += len as i32;
        self.lz.skip(len);
    }

    /// Encodes everything the window will give out. Used by the classic
    /// LZMA writer where no chunk limits apply.
    pub(crate) fn encode_for_lzma1<W: Write>(
        &mut self,
        rc: &mut RangeEncoder<W>,
    ) -> std::io::Result<()> {
        if !self.lz.is_started() && !self.encode_init(rc)? {
            return Ok(());
        }
        while self.encode_symbol(rc)? {}
        Ok(())
    }

    /// Encodes until the LZMA2 chunk limits are reached. Returns `true`
    /// when a chunk is full and must be written out, `false` when the
    /// window ran out of data first.
    pub(crate) fn encode_for_lzma2(
        &mut self,
        rc: &mut RangeEncoder<RangeEncoderBuffer>,
    ) -> std::io::Result<bool> {
        if !self.lz.is_started() && !self.encode_init(rc)? {
            return Ok(false);
        }
        while self.uncompressed_size <= LZMA2_UNCOMPRESSED_LIMIT
            && rc.pending_size() <= LZMA2_COMPRESSED_LIMIT
        {
            if !self.encode_symbol(rc)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The first operation of a stream without a preset dictionary is
    /// always a literal with an all-zero context.
    fn encode_init<W: Write>(&mut self, rc: &mut RangeEncoder<W>) -> std::io::Result<bool> {
        debug_assert_eq!(self.read_ahead, -1);
        if !self.lz.has_enough_data(0) {
            return Ok(false);
        }

        self.skip_ahead(1);
        let state = self.coder.state.get();
        rc.encode_bit(&mut self.coder.is_match[state], 0, 0)?;
        self.literal
            .encode_init(&mut self.coder, &self.lz.window, self.read_ahead, rc)?;
        self.read_ahead -= 1;
        debug_assert_eq!(self.read_ahead, -1);

        self.uncompressed_size += 1;
        Ok(true)
    }

    fn encode_symbol<W: Write>(&mut self, rc: &mut RangeEncoder<W>) -> std::io::Result<bool> {
        if !self.lz.has_enough_data(self.read_ahead + 1) {
            return Ok(false);
        }

        let len = self.next_op();
        debug_assert!(self.read_ahead >= 0);
        let pos_state = (self.lz.get_pos() - self.read_ahead) as u32 & self.coder.pos_mask;
        let state = self.coder.state.get();

        if self.back == OP_LITERAL {
            debug_assert_eq!(len, 1);
            rc.encode_bit(&mut self.coder.is_match[state], pos_state as usize, 0)?;
            self.literal
                .encode(&mut self.coder, &self.lz.window, self.read_ahead, rc)?;
        } else {
            rc.encode_bit(&mut self.coder.is_match[state], pos_state as usize, 1)?;
            if self.back < REPS as i32 {
                rc.encode_bit(&mut self.coder.is_rep, state, 1)?;
                self.encode_rep_match(self.back as usize, len, pos_state, rc)?;
            } else {
                rc.encode_bit(&mut self.coder.is_rep, state, 0)?;
                self.encode_match((self.back - REPS as i32) as u32, len, pos_state, rc)?;
            }
        }

        self.read_ahead -= len as i32;
        self.uncompressed_size += len;
        Ok(true)
    }

    /// Greedy operation selection for the byte at the read head. Sets
    /// `back` and returns the operation length.
    fn next_op(&mut self) -> u32 {
        if self.read_ahead == -1 {
            self.get_matches();
        }
        debug_assert_eq!(self.read_ahead, 0);

        self.back = OP_LITERAL;

        let avail = self.lz.get_avail().min(MATCH_LEN_MAX as i32);
        if avail < MATCH_LEN_MIN as i32 {
            return 1;
        }

        // Rep matches are cheap to encode, so a long enough one wins
        // outright and the best one is remembered for the cost checks.
        let mut best_rep_len = 0;
        let mut best_rep_index = 0;
        for rep in 0..REPS {
            let len = self.lz.get_match_len(self.coder.reps[rep] as i32, avail) as i32;
            if len < MATCH_LEN_MIN as i32 {
                continue;
            }

            if len >= self.nice_len {
                self.back = rep as i32;
                self.skip_ahead(len as usize - 1);
                return len as u32;
            }

            if len > best_rep_len {
                best_rep_index = rep;
                best_rep_len = len;
            }
        }

        let mut main_len = 0;
        let mut main_dist = 0;
        if self.lz.matches.count > 0 {
            {
                let matches = &mut self.lz.matches;
                main_len = matches.len[matches.count as usize - 1] as i32;
                main_dist = matches.dist[matches.count as usize - 1];
            }

            if main_len >= self.nice_len {
                self.back = main_dist + REPS as i32;
                self.skip_ahead(main_len as usize - 1);
                return main_len as u32;
            }

            // Trade one byte of length for a much smaller distance.
            {
                let matches = &mut self.lz.matches;
                while matches.count > 1
                    && main_len == matches.len[matches.count as usize - 2] as i32 + 1
                {
                    if !change_pair(matches.dist[matches.count as usize - 2] as u32, main_dist as u32)
                    {
                        break;
                    }
                    matches.count -= 1;
                    main_len = matches.len[matches.count as usize - 1] as i32;
                    main_dist = matches.dist[matches.count as usize - 1];
                }
            }

            if main_len == MATCH_LEN_MIN as i32 && main_dist >= 0x80 {
                main_len = 1;
            }
        }

        if best_rep_len >= MATCH_LEN_MIN as i32 {
            if best_rep_len + 1 >= main_len
                || (best_rep_len + 2 >= main_len && main_dist >= (1 << 9))
                || (best_rep_len + 3 >= main_len && main_dist >= (1 << 15))
            {
                self.back = best_rep_index as i32;
                self.skip_ahead(best_rep_len as usize - 1);
                return best_rep_len as u32;
            }
        }

        if main_len < MATCH_LEN_MIN as i32 || avail <= MATCH_LEN_MIN as i32 {
            return 1;
        }

        // Peek at the next position: if it promises a clearly better
        // match, emit a literal now and take that match next time.
        self.get_matches();
        if self.lz.matches.count > 0 {
            let matches = &self.lz.matches;
            let new_len = matches.len[matches.count as usize - 1] as i32;
            let new_dist = matches.dist[matches.count as usize - 1];

            if (new_len >= main_len && new_dist < main_dist)
                || (new_len == main_len + 1 && !change_pair(main_dist as u32, new_dist as u32))
                || new_len > main_len + 1
                || (new_len + 1 >= main_len
                    && main_len >= MATCH_LEN_MIN as i32 + 1
                    && change_pair(new_dist as u32, main_dist as u32))
            {
                return 1;
            }
        }

        let limit = (main_len - 1).max(MATCH_LEN_MIN as i32);
        for rep in 0..REPS {
            if self.lz.get_match_len(self.coder.reps[rep] as i32, limit) == limit as usize {
                return 1;
            }
        }

        self.back = main_dist + REPS as i32;
        self.skip_ahead(main_len as usize - 2);
        main_len as u32
    }

    fn encode_match<W: Write>(
        &mut self,
        dist: u32,
        len: u32,
        pos_state: u32,
        rc: &mut RangeEncoder<W>,
    ) -> std::io::Result<()> {
        self.coder.state.update_match();
        self.match_len.encode(len, pos_state, rc)?;

        let dist_slot = get_dist_slot(dist);
        rc.encode_bit_tree(&mut self.coder.dist_slots[dist_state(len)], dist_slot)?;

        if dist_slot >= DIST_MODEL_START as u32 {
            let footer_bits = (dist_slot >> 1) - 1;
            let base = (2 | (dist_slot & 1)) << footer_bits;
            let dist_reduced = dist - base;

            if dist_slot < DIST_MODEL_END as u32 {
                rc.encode_reverse_bit_tree(
                    self.coder.dist_special_probs(dist_slot),
                    dist_reduced,
                )?;
            } else {
                rc.encode_direct_bits(dist_reduced >> ALIGN_BITS, footer_bits - ALIGN_BITS as u32)?;
                rc.encode_reverse_bit_tree(&mut self.coder.dist_align, dist_reduced & ALIGN_MASK)?;
            }
        }

        self.coder.reps[3] = self.coder.reps[2];
        self.coder.reps[2] = self.coder.reps[1];
        self.coder.reps[1] = self.coder.reps[0];
        self.coder.reps[0] = dist;
        Ok(())
    }

    fn encode_rep_match<W: Write>(
        &mut self,
        rep: usize,
        len: u32,
        pos_state: u32,
        rc: &mut RangeEncoder<W>,
    ) -> std::io::Result<()> {
        let state = self.coder.state.get();

        if rep == 0 {
            rc.encode_bit(&mut self.coder.is_rep0, state, 0)?;
            rc.encode_bit(
                &mut self.coder.is_rep0_long[state],
                pos_state as usize,
                if len == 1 { 0 } else { 1 },
            )?;
        } else {
            let dist = self.coder.reps[rep];
            rc.encode_bit(&mut self.coder.is_rep0, state, 1)?;

            if rep == 1 {
                rc.encode_bit(&mut self.coder.is_rep1, state, 0)?;
            } else {
                rc.encode_bit(&mut self.coder.is_rep1, state, 1)?;
                rc.encode_bit(&mut self.coder.is_rep2, state, rep as u32 - 2)?;

                if rep == 3 {
                    self.coder.reps[3] = self.coder.reps[2];
                }
                self.coder.reps[2] = self.coder.reps[1];
            }
            self.coder.reps[1] = self.coder.reps[0];
            self.coder.reps[0] = dist;
        }

        if len == 1 {
            self.coder.state.update_short_rep();
        } else {
            self.rep_len.encode(len, pos_state, rc)?;
            self.coder.state.update_long_rep();
        }
        Ok(())
    }

    /// The end-of-stream marker: a match with the maximum distance and
    /// the minimum length.
    pub(crate) fn encode_eos_marker<W: Write>(
        &mut self,
        rc: &mut RangeEncoder<W>,
    ) -> std::io::Result<()> {
        let pos_state = (self.lz.get_pos() - self.read_ahead) as u32 & self.coder.pos_mask;
        let state = self.coder.state.get();
        rc.encode_bit(&mut self.coder.is_match[state], pos_state as usize, 1)?;
        rc.encode_bit(&mut self.coder.is_rep, state, 0)?;
        self.encode_match(EOS_DIST, MATCH_LEN_MIN as u32, pos_state, rc)
    }
}

/// Literal encoder mirroring the decoder's context layout.
struct LiteralEncoder {
    lc: u32,
    literal_pos_mask: u32,
    probs: Vec<[u16; 0x300]>,
}

impl LiteralEncoder {
    fn new(lc: u32, lp: u32) -> Self {
        Self {
            lc,
            literal_pos_mask: (1 << lp) - 1,
            probs: vec![[PROB_INIT; 0x300]; 1 << (lc + lp)],
        }
    }

    fn reset(&mut self) {
        for probs in self.probs.iter_mut() {
            probs.fill(PROB_INIT);
        }
    }

    #[inline(always)]
    fn subcoder_index(&self, prev_byte: u32, pos: u32) -> usize {
        (((pos & self.literal_pos_mask) << self.lc) + (prev_byte >> (8 - self.lc))) as usize
    }

    /// The stream's first literal has no previous byte; it always uses
    /// subcoder zero.
    fn encode_init<W: Write>(
        &mut self,
        coder: &mut LzmaCoder,
        window: &LzWindow,
        read_ahead: i32,
        rc: &mut RangeEncoder<W>,
    ) -> std::io::Result<()> {
        debug_assert!(read_ahead >= 0);
        Self::encode_plain(
            &mut self.probs[0],
            window.get_byte_backward(read_ahead) as u32,
            rc,
        )?;
        coder.state.update_literal();
        Ok(())
    }

    fn encode<W: Write>(
        &mut self,
        coder: &mut LzmaCoder,
        window: &LzWindow,
        read_ahead: i32,
        rc: &mut RangeEncoder<W>,
    ) -> std::io::Result<()> {
        debug_assert!(read_ahead >= 0);
        let prev_byte = window.get_byte_backward(1 + read_ahead) as u32;
        let pos = (window.get_pos() - read_ahead) as u32;
        let index = self.subcoder_index(prev_byte, pos);
        let symbol = window.get_byte_backward(read_ahead) as u32;

        if coder.state.is_literal() {
            Self::encode_plain(&mut self.probs[index], symbol, rc)?;
        } else {
            let match_byte =
                window.get_byte_backward(coder.reps[0] as i32 + 1 + read_ahead) as u32;
            Self::encode_matched(&mut self.probs[index], symbol, match_byte, rc)?;
        }

        coder.state.update_literal();
        Ok(())
    }

    fn encode_plain<W: Write>(
        probs: &mut [u16; 0x300],
        symbol: u32,
        rc: &mut RangeEncoder<W>,
    ) -> std::io::Result<()> {
        let mut symbol = symbol | 0x100;
        loop {
            let index = symbol >> 8;
            let bit = (symbol >> 7) & 1;
            rc.encode_bit(probs, index as usize, bit)?;
            symbol <<= 1;
            if symbol >= 0x10000 {
                break;
            }
        }
        Ok(())
    }

    fn encode_matched<W: Write>(
        probs: &mut [u16; 0x300],
        symbol: u32,
        match_byte: u32,
        rc: &mut RangeEncoder<W>,
    ) -> std::io::Result<()> {
        let mut match_byte = match_byte;
        let mut offset = 0x100u32;
        let mut symbol = symbol | 0x100;
        loop {
            match_byte <<= 1;
            let match_bit = match_byte & offset;
            let index = offset + match_bit + (symbol >> 8);
            let bit = (symbol >> 7) & 1;
            rc.encode_bit(probs, index as usize, bit)?;
            symbol <<= 1;
            offset &= !(match_byte ^ symbol);
            if symbol >= 0x10000 {
                break;
            }
        }
        Ok(())
    }
}

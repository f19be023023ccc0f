use crate::{
    coder::{
        dist_state, LengthCoder, LzmaCoder, ALIGN_BITS, DIST_MODEL_END, DIST_MODEL_START,
        EOS_DIST,
    },
    lz::LzDecoder,
    range_dec::RangeDecoder,
    ByteReader, PROB_INIT,
};

/// Decoder for the LZMA operation alphabet: literals, simple matches,
/// short reps and rep0..rep3, driven by a range decoder and writing into
/// the dictionary window.
pub(crate) struct LzmaDecoder {
    coder: LzmaCoder,
    literal: LiteralDecoder,
    match_len: LengthCoder,
    rep_len: LengthCoder,
    end_reached: bool,
}

impl LzmaDecoder {
    pub(crate) fn new(lc: u32, lp: u32, pb: u32) -> Self {
        Self {
            coder: LzmaCoder::new(pb),
            literal: LiteralDecoder::new(lc, lp),
            match_len: LengthCoder::new(),
            rep_len: LengthCoder::new(),
            end_reached: false,
        }
    }

    /// Zeroes the probability tables, the state and the distance cache
    /// (LZMA2 state reset).
    pub(crate) fn reset(&mut self) {
        self.coder.reset();
        self.literal.reset();
        self.match_len.reset();
        self.rep_len.reset();
        self.end_reached = false;
    }

    pub(crate) fn end_marker_detected(&self) -> bool {
        self.end_reached
    }

    /// Decodes operations until the window's output limit is reached or
    /// the end-of-stream marker shows up.
    pub(crate) fn decode<R: ByteReader>(
        &mut self,
        lz: &mut LzDecoder,
        rc: &mut RangeDecoder<R>,
    ) -> std::io::Result<()> {
        lz.copy_pending()?;

        while lz.has_space() && !self.end_reached {
            let pos_state = lz.head() as u32 & self.coder.pos_mask;
            let state = self.coder.state.get();

            if rc.decode_bit(&mut self.coder.is_match[state][pos_state as usize])? == 0 {
                self.literal.decode(&mut self.coder, lz, rc)?;
            } else {
                let len = if rc.decode_bit(&mut self.coder.is_rep[state])? == 0 {
                    self.decode_match(pos_state, rc)?
                } else {
                    self.decode_rep_match(pos_state, rc)?
                };

                if self.end_reached {
                    break;
                }

                lz.copy_match(self.coder.reps[0] as usize, len as usize)?;
            }
        }

        rc.normalize()
    }

    fn decode_match<R: ByteReader>(
        &mut self,
        pos_state: u32,
        rc: &mut RangeDecoder<R>,
    ) -> std::io::Result<u32> {
        self.coder.state.update_match();
        self.coder.reps[3] = self.coder.reps[2];
        self.coder.reps[2] = self.coder.reps[1];
        self.coder.reps[1] = self.coder.reps[0];

        let len = self.match_len.decode(pos_state, rc)?;
        let dist_slot = rc.decode_bit_tree(&mut self.coder.dist_slots[dist_state(len)])?;

        if (dist_slot as usize) < DIST_MODEL_START {
            self.coder.reps[0] = dist_slot;
        } else {
            let footer_bits = (dist_slot >> 1) - 1;
            let mut dist = (2 | (dist_slot & 1)) << footer_bits;
            if (dist_slot as usize) < DIST_MODEL_END {
                dist |= rc.decode_reverse_bit_tree(self.coder.dist_special_probs(dist_slot))?;
            } else {
                dist |= rc.decode_direct_bits(footer_bits - ALIGN_BITS as u32)? << ALIGN_BITS;
                dist |= rc.decode_reverse_bit_tree(&mut self.coder.dist_align)?;
            }
            self.coder.reps[0] = dist;
        }

        if self.coder.reps[0] == EOS_DIST {
            self.end_reached = true;
        }

        Ok(len)
    }

    fn decode_rep_match<R: ByteReader>(
        &mut self,
        pos_state: u32,
        rc: &mut RangeDecoder<R>,
    ) -> std::io::Result<u32> {
        let state = self.coder.state.get();

        if rc.decode_bit(&mut self.coder.is_rep0[state])? == 0 {
            if rc.decode_bit(&mut self.coder.is_rep0_long[state][pos_state as usize])? == 0 {
                self.coder.state.update_short_rep();
                return Ok(1);
            }
        } else {
            let dist;
            if rc.decode_bit(&mut self.coder.is_rep1[state])? == 0 {
                dist = self.coder.reps[1];
            } else {
                if rc.decode_bit(&mut self.coder.is_rep2[state])? == 0 {
                    dist = self.coder.reps[2];
                } else {
                    dist = self.coder.reps[3];
                    self.coder.reps[3] = self.coder.reps[2];
                }
                self.coder.reps[2] = self.coder.reps[1];
            }
            self.coder.reps[1] = self.coder.reps[0];
            self.coder.reps[0] = dist;
        }

        self.coder.state.update_long_rep();
        self.rep_len.decode(pos_state, rc)
    }
}

/// Literal decoder: one 0x300-entry probability table per literal
/// context, indexed from the low LP bits of the position and the top LC
/// bits of the previous byte.
struct LiteralDecoder {
    lc: u32,
    literal_pos_mask: u32,
    probs: Vec<[u16; 0x300]>,
}

impl LiteralDecoder {
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

    fn decode<R: ByteReader>(
        &mut self,
        coder: &mut LzmaCoder,
        lz: &mut LzDecoder,
        rc: &mut RangeDecoder<R>,
    ) -> std::io::Result<()> {
        let index = self.subcoder_index(lz.byte_at(0) as u32, lz.head() as u32);
        let probs = &mut self.probs[index];

        let symbol = if coder.state.is_literal() {
            let mut symbol = 1usize;
            while symbol < 0x100 {
                symbol = (symbol << 1) | rc.decode_bit(&mut probs[symbol])? as usize;
            }
            symbol
        } else {
            // After a match the literal is additionally conditioned on the
            // byte the match distance points at, bit by bit until the
            // decoded prefix diverges from it.
            let mut symbol = 1usize;
            let mut match_byte = lz.byte_at(coder.reps[0] as usize) as u32;
            let mut offset = 0x100u32;
            while symbol < 0x100 {
                match_byte <<= 1;
                let match_bit = match_byte & offset;
                let bit = rc.decode_bit(&mut probs[(offset + match_bit) as usize + symbol])?;
                symbol = (symbol << 1) | bit as usize;
                offset &= bit.wrapping_neg() ^ !match_bit;
            }
            symbol
        };

        lz.put_byte(symbol as u8);
        coder.state.update_literal();
        Ok(())
    }
}

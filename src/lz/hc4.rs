use super::{
    hash234::Hash234,
    lz_encoder::{extend_match, LzEncoder, LzWindow, MatchFind, Matches},
};

/// Hash chain match finder keyed on 4-byte prefixes.
///
/// Every indexed position is linked into a cyclic chain of earlier
/// positions with the same 4-byte hash; candidates from the 2- and
/// 3-byte head tables cover the short close matches the chain skips.
pub(crate) struct HashChain4 {
    hash: Hash234,
    chain: Vec<i32>,
    depth_limit: i32,
    cyclic_size: i32,
    cyclic_pos: i32,
    lz_pos: i32,
}

impl HashChain4 {
    pub(crate) fn new(dict_size: u32, nice_len: u32, depth_limit: i32) -> Self {
        Self {
            hash: Hash234::new(dict_size),
            chain: vec![0; dict_size as usize + 1],
            depth_limit: if depth_limit > 0 {
                depth_limit
            } else {
                4 + nice_len as i32 / 4
            },
            cyclic_size: dict_size as i32 + 1,
            cyclic_pos: -1,
            lz_pos: dict_size as i32 + 1,
        }
    }

    fn move_pos(&mut self, window: &mut LzWindow) -> i32 {
        let avail = window.move_pos(4, 4);
        if avail != 0 {
            self.lz_pos += 1;
            if self.lz_pos == i32::MAX {
                let norm_offset = i32::MAX - self.cyclic_size;
                self.hash.normalize(norm_offset);
                LzEncoder::normalize(&mut self.chain, norm_offset);
                self.lz_pos -= norm_offset;
            }

            self.cyclic_pos += 1;
            if self.cyclic_pos == self.cyclic_size {
                self.cyclic_pos = 0;
            }
        }
        avail
    }
}

impl MatchFind for HashChain4 {
    fn find_matches(&mut self, window: &mut LzWindow, matches: &mut Matches) {
        matches.count = 0;

        let mut match_len_limit = crate::coder::MATCH_LEN_MAX as i32;
        let mut nice_len_limit = window.nice_len as i32;
        let avail = self.move_pos(window);

        if avail < match_len_limit {
            if avail == 0 {
                return;
            }
            match_len_limit = avail;
            if nice_len_limit > avail {
                nice_len_limit = avail;
            }
        }

        self.hash.calc_hashes(window.read_buffer());
        let mut delta2 = self.lz_pos - self.hash.get_hash2_pos();
        let delta3 = self.lz_pos - self.hash.get_hash3_pos();
        let mut current_match = self.hash.get_hash4_pos();
        self.hash.update_tables(self.lz_pos);
        self.chain[self.cyclic_pos as usize] = current_match;

        let mut len_best = 0;

        // Length-2 candidate from the 2-byte head table.
        if delta2 < self.cyclic_size
            && window.get_byte(0, delta2) == window.get_current_byte()
        {
            len_best = 2;
            matches.len[0] = 2;
            matches.dist[0] = delta2 - 1;
            matches.count = 1;
        }

        // Length-3 candidate from the 3-byte head table.
        if delta2 != delta3
            && delta3 < self.cyclic_size
            && window.get_byte(0, delta3) == window.get_current_byte()
        {
            len_best = 3;
            matches.dist[matches.count as usize] = delta3 - 1;
            matches.count += 1;
            delta2 = delta3;
        }

        if matches.count > 0 {
            len_best = extend_match(
                &window.buf,
                window.read_pos,
                len_best,
                delta2,
                match_len_limit,
            );
            matches.len[matches.count as usize - 1] = len_best as u32;

            if len_best >= nice_len_limit {
                return;
            }
        }

        if len_best < 3 {
            len_best = 3;
        }

        let mut depth = self.depth_limit;
        loop {
            let delta = self.lz_pos - current_match;
            if depth == 0 || delta >= self.cyclic_size {
                return;
            }
            depth -= 1;

            let chain_index = self.cyclic_pos - delta
                + if delta > self.cyclic_pos {
                    self.cyclic_size
                } else {
                    0
                };
            current_match = self.chain[chain_index as usize];

            // Two cheap byte probes before the full extension.
            if window.get_byte(len_best, delta) == window.get_byte(len_best, 0)
                && window.get_byte(0, delta) == window.get_current_byte()
            {
                let len = extend_match(&window.buf, window.read_pos, 1, delta, match_len_limit);

                if len > len_best {
                    len_best = len;
                    matches.len[matches.count as usize] = len as u32;
                    matches.dist[matches.count as usize] = delta - 1;
                    matches.count += 1;

                    if len >= nice_len_limit {
                        return;
                    }
                }
            }
        }
    }

    fn skip(&mut self, window: &mut LzWindow, mut len: usize) {
        while len > 0 {
            len -= 1;
            if self.move_pos(window) != 0 {
                self.hash.calc_hashes(window.read_buffer());
                self.chain[self.cyclic_pos as usize] = self.hash.get_hash4_pos();
                self.hash.update_tables(self.lz_pos);
            }
        }
    }
}

//! Select over a unary-coded monotone sequence.
//!
//! `n` sorted values in `[0, m]` are written as a bit vector of `n + m` bits
//! where value `v_i` becomes a one at position `v_i + i`. `query(i)` returns
//! that position; a sampled table (one entry per 128 ones) bounds the byte
//! scan to a short window.

use crate::codec::{PackExt, PackedCursor, ReadExt};
use crate::error::MphError;
use crate::util::{LeWords, Words};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::Read;

const STEP_SELECT_TABLE: u32 = 128;
const NBITS_STEP_SELECT_TABLE: u32 = 7;
const MASK_STEP_SELECT_TABLE: u32 = 0x7f;

/// `SELECT_LOOKUP[byte][j]` = position of the j-th set bit of `byte`.
static SELECT_LOOKUP: [[u8; 8]; 256] = build_select_lookup();

const fn build_select_lookup() -> [[u8; 8]; 256] {
    let mut t = [[0u8; 8]; 256];
    let mut b = 0;
    while b < 256 {
        let mut j = 0;
        let mut bit = 0;
        while bit < 8 {
            if (b >> bit) & 1 == 1 {
                t[b][j] = bit as u8;
                j += 1;
            }
            bit += 1;
        }
        b += 1;
    }
    t
}

#[inline]
fn vec_words(n: u32, m: u32) -> usize {
    ((n as u64 + m as u64 + 31) >> 5) as usize
}

#[inline]
fn table_words(n: u32) -> usize {
    ((n >> NBITS_STEP_SELECT_TABLE) + 1) as usize
}

/// Finds the `one_idx`-th one (0-based) scanning whole bytes from `byte_idx`.
#[inline]
fn scan<B: Words + ?Sized>(bits: &B, mut byte_idx: usize, one_idx: u32) -> u32 {
    let mut part_sum = 0u32;
    let mut old_part_sum;
    loop {
        old_part_sum = part_sum;
        part_sum += bits.byte(byte_idx).count_ones();
        byte_idx += 1;
        if part_sum > one_idx {
            break;
        }
    }
    let last = byte_idx - 1;
    SELECT_LOOKUP[bits.byte(last) as usize][(one_idx - old_part_sum) as usize] as u32
        + ((last as u32) << 3)
}

#[inline]
fn query_words<B: Words + ?Sized, T: Words + ?Sized>(bits: &B, table: &T, one_idx: u32) -> u32 {
    let bit_idx = table.word((one_idx >> NBITS_STEP_SELECT_TABLE) as usize);
    let byte_idx = (bit_idx >> 3) as usize;
    let low = bits.byte(byte_idx) & ((1u32 << (bit_idx & 7)) - 1) as u8;
    scan(bits, byte_idx, (one_idx & MASK_STEP_SELECT_TABLE) + low.count_ones())
}

#[inline]
fn next_query_words<B: Words + ?Sized>(bits: &B, bit_idx: u32) -> u32 {
    let byte_idx = (bit_idx >> 3) as usize;
    let low = bits.byte(byte_idx) & ((1u32 << (bit_idx & 7)) - 1) as u8;
    scan(bits, byte_idx, low.count_ones() + 1)
}

#[inline]
fn bit_words<B: Words + ?Sized>(bits: &B, idx: u32) -> bool {
    (bits.word((idx >> 5) as usize) >> (idx & 31)) & 1 == 1
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    n: u32,
    m: u32,
    bits: Vec<u32>,
    table: Vec<u32>,
}

impl Select {
    /// `vals` must be sorted ascending with every value in `[0, m]`.
    pub fn new(vals: &[u32], m: u32) -> Self {
        let n = vals.len() as u32;
        let mut bits = vec![0u32; vec_words(n, m)];
        for (i, &v) in vals.iter().enumerate() {
            debug_assert!(v <= m && (i == 0 || vals[i - 1] <= v));
            let pos = v as usize + i;
            bits[pos >> 5] |= 1 << (pos & 31);
        }
        let mut sel = Self {
            n,
            m,
            bits,
            table: vec![0u32; table_words(n)],
        };
        sel.generate_table();
        sel
    }

    fn generate_table(&mut self) {
        let bits = self.bits.as_slice();
        let mut one_idx = 0u32;
        let mut byte_idx = 0usize;
        let mut part_sum = 0u32;
        let mut entry = 0usize;
        while one_idx < self.n {
            let mut old_part_sum;
            loop {
                old_part_sum = part_sum;
                part_sum += bits.byte(byte_idx).count_ones();
                byte_idx += 1;
                if part_sum > one_idx {
                    break;
                }
            }
            let last = byte_idx - 1;
            self.table[entry] = SELECT_LOOKUP[bits.byte(last) as usize]
                [(one_idx - old_part_sum) as usize] as u32
                + ((last as u32) << 3);
            one_idx += STEP_SELECT_TABLE;
            entry += 1;
        }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.n
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Bit position of the `one_idx`-th one; `one_idx < len()`.
    #[inline]
    pub fn query(&self, one_idx: u32) -> u32 {
        query_words(self.bits.as_slice(), self.table.as_slice(), one_idx)
    }

    /// Position of the first one after `bit_idx`, which must itself be a one.
    #[inline]
    pub fn next_query(&self, bit_idx: u32) -> u32 {
        next_query_words(self.bits.as_slice(), bit_idx)
    }

    #[inline]
    pub(crate) fn bit(&self, idx: u32) -> bool {
        bit_words(self.bits.as_slice(), idx)
    }

    pub fn packed_size(&self) -> usize {
        8 + 4 * (self.bits.len() + self.table.len())
    }

    /// `n`, `m`, bit vector words, sample table words.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.put_u32(self.n);
        out.put_u32(self.m);
        out.put_u32s(&self.bits);
        out.put_u32s(&self.table);
    }

    pub(crate) fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        let n = r.read_u32()?;
        let m = r.read_u32()?;
        let bits = r.read_u32s(vec_words(n, m))?;
        let table = r.read_u32s(table_words(n))?;
        Ok(Self { n, m, bits, table })
    }
}

/// Select operations shared by the owned and packed forms.
pub(crate) trait SelectQuery {
    fn query(&self, one_idx: u32) -> u32;
    fn next_query(&self, bit_idx: u32) -> u32;
    fn bit(&self, idx: u32) -> bool;
}

impl SelectQuery for Select {
    #[inline]
    fn query(&self, one_idx: u32) -> u32 {
        Select::query(self, one_idx)
    }
    #[inline]
    fn next_query(&self, bit_idx: u32) -> u32 {
        Select::next_query(self, bit_idx)
    }
    #[inline]
    fn bit(&self, idx: u32) -> bool {
        Select::bit(self, idx)
    }
}

/// Borrowed view of a packed [`Select`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct SelectRef<'a> {
    bits: LeWords<'a>,
    table: LeWords<'a>,
}

impl<'a> SelectRef<'a> {
    /// Parses the view at the cursor and advances past it.
    pub fn read(cur: &mut PackedCursor<'a>) -> Self {
        let n = cur.u32();
        let m = cur.u32();
        let bits = LeWords(cur.bytes(vec_words(n, m) * 4));
        let table = LeWords(cur.bytes(table_words(n) * 4));
        Self { bits, table }
    }
}

impl SelectQuery for SelectRef<'_> {
    #[inline]
    fn query(&self, one_idx: u32) -> u32 {
        query_words(&self.bits, &self.table, one_idx)
    }
    #[inline]
    fn next_query(&self, bit_idx: u32) -> u32 {
        next_query_words(&self.bits, bit_idx)
    }
    #[inline]
    fn bit(&self, idx: u32) -> bool {
        bit_words(&self.bits, idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sorted_vals(n: usize, m: u32, seed: u64) -> Vec<u32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut v: Vec<u32> = (0..n).map(|_| rng.gen_range(0..=m)).collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn test_lookup_table() {
        assert_eq!(SELECT_LOOKUP[0b1010_0100][0], 2);
        assert_eq!(SELECT_LOOKUP[0b1010_0100][1], 5);
        assert_eq!(SELECT_LOOKUP[0b1010_0100][2], 7);
        assert_eq!(SELECT_LOOKUP[0xff][7], 7);
    }

    #[test]
    fn test_query_matches_positions() {
        for (n, m) in [(1, 0), (5, 3), (300, 50), (1000, 100_000), (2000, 2000)] {
            let vals = sorted_vals(n, m, n as u64);
            let sel = Select::new(&vals, m);
            for (i, &v) in vals.iter().enumerate() {
                let pos = sel.query(i as u32);
                assert_eq!(pos, v + i as u32, "n={n} m={m} i={i}");
                assert!(sel.bit(pos));
                if i + 1 < vals.len() {
                    assert_eq!(sel.next_query(pos), vals[i + 1] + i as u32 + 1);
                }
            }
        }
    }

    #[test]
    fn test_packed_view_and_reload() {
        let vals = sorted_vals(700, 900, 3);
        let sel = Select::new(&vals, 900);
        let mut buf = Vec::new();
        sel.pack(&mut buf);
        assert_eq!(buf.len(), sel.packed_size());

        let view = SelectRef::read(&mut PackedCursor::new(&buf));
        let loaded = Select::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(loaded, sel);
        for i in 0..vals.len() as u32 {
            assert_eq!(view.query(i), sel.query(i));
        }
        assert_eq!(view.next_query(sel.query(10)), sel.query(11));
    }

    #[test]
    fn test_empty() {
        let sel = Select::new(&[], 10);
        assert!(sel.is_empty());
        assert_eq!(sel.packed_size(), 8 + 4 * 2);
    }
}

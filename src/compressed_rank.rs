//! Rank over a sorted set of integers: `query(x)` = number of members `< x`.
//!
//! Members are split into high bits (`x >> rem_r`, unary via [`Select`]) and
//! low bits (fixed-width table), Elias-Fano style.

use crate::codec::{PackExt, PackedCursor, ReadExt};
use crate::error::MphError;
use crate::select::{Select, SelectQuery, SelectRef};
use crate::util::{LeWords, Words, bits_table_size, get_bits_value, i_log2, set_bits_value};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::Read;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedRank {
    n: u32,
    max_val: u32,
    rem_r: u32,
    sel: Select,
    vals_rems: Vec<u32>,
}

impl CompressedRank {
    /// `vals` must be sorted ascending.
    pub fn new(vals: &[u32]) -> Self {
        let n = vals.len() as u32;
        let max_val = vals.last().copied().unwrap_or(0);
        let rem_r = if n == 0 { 1 } else { i_log2(max_val / n).max(1) };
        let rems_mask = (1u32 << rem_r) - 1;

        let mut vals_rems = vec![0u32; bits_table_size(n, rem_r) as usize];
        for (i, &v) in vals.iter().enumerate() {
            set_bits_value(&mut vals_rems, i as u32, v & rems_mask, rem_r);
        }

        // select_vec[i - 1]: index of the first member whose high part is >= i
        let high_max = max_val >> rem_r;
        let mut select_vec = Vec::with_capacity(high_max as usize);
        let mut j = 0usize;
        for i in 1..=high_max {
            while vals[j] >> rem_r < i {
                j += 1;
            }
            select_vec.push(j as u32);
        }
        let sel = Select::new(&select_vec, n);

        Self {
            n,
            max_val,
            rem_r,
            sel,
            vals_rems,
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

    /// Number of members strictly below `idx`.
    #[inline]
    pub fn query(&self, idx: u32) -> u32 {
        rank_parts(
            self.n,
            self.max_val,
            self.rem_r,
            &self.sel,
            self.vals_rems.as_slice(),
            idx,
        )
    }

    pub fn packed_size(&self) -> usize {
        16 + self.sel.packed_size() + 4 * self.vals_rems.len()
    }

    /// `n`, `max_val`, `rem_r`, select size, select, low bits.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.put_u32(self.n);
        out.put_u32(self.max_val);
        out.put_u32(self.rem_r);
        out.put_u32(self.sel.packed_size() as u32);
        self.sel.pack(out);
        out.put_u32s(&self.vals_rems);
    }

    pub(crate) fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        let n = r.read_u32()?;
        let max_val = r.read_u32()?;
        let rem_r = r.read_u32()?;
        if rem_r == 0 || rem_r > 31 {
            return Err(MphError::Corrupt(format!("compressed rank rem_r {rem_r}")));
        }
        let sel_size = r.read_u32()? as usize;
        let sel = Select::read_from(&mut r.read_bytes(sel_size)?.as_slice())?;
        let vals_rems = r.read_u32s(bits_table_size(n, rem_r) as usize)?;
        Ok(Self {
            n,
            max_val,
            rem_r,
            sel,
            vals_rems,
        })
    }
}

fn rank_parts<S, W>(n: u32, max_val: u32, rem_r: u32, sel: &S, rems: &W, idx: u32) -> u32
where
    S: SelectQuery,
    W: Words + ?Sized,
{
    if n == 0 {
        return 0;
    }
    if idx > max_val {
        return n;
    }
    let rems_mask = (1u32 << rem_r) - 1;
    let quot = idx >> rem_r;
    let rem = idx & rems_mask;

    let (mut sel_res, mut rank) = if quot == 0 {
        (0, 0)
    } else {
        let s = sel.query(quot - 1) + 1;
        (s, s - quot)
    };
    loop {
        if sel.bit(sel_res) || get_bits_value(rems, rank, rem_r) >= rem {
            break;
        }
        sel_res += 1;
        rank += 1;
    }
    rank
}

/// Borrowed view of a packed [`CompressedRank`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompressedRankRef<'a> {
    n: u32,
    max_val: u32,
    rem_r: u32,
    sel: SelectRef<'a>,
    vals_rems: LeWords<'a>,
}

impl<'a> CompressedRankRef<'a> {
    pub fn read(cur: &mut PackedCursor<'a>) -> Self {
        let n = cur.u32();
        let max_val = cur.u32();
        let rem_r = cur.u32();
        let sel_size = cur.u32() as usize;
        let sel = SelectRef::read(&mut PackedCursor::new(cur.bytes(sel_size)));
        let vals_rems = LeWords(cur.bytes(bits_table_size(n, rem_r) as usize * 4));
        Self {
            n,
            max_val,
            rem_r,
            sel,
            vals_rems,
        }
    }

    #[inline]
    pub fn query(&self, idx: u32) -> u32 {
        rank_parts(self.n, self.max_val, self.rem_r, &self.sel, &self.vals_rems, idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Members are the zero bits of `bitmap`; rank must equal a naive count.
    fn check_bitmap(bitmap: &[bool]) {
        let zeros: Vec<u32> = (0..bitmap.len() as u32)
            .filter(|&i| !bitmap[i as usize])
            .collect();
        let cr = CompressedRank::new(&zeros);
        let mut buf = Vec::new();
        cr.pack(&mut buf);
        assert_eq!(buf.len(), cr.packed_size());
        let view = CompressedRankRef::read(&mut PackedCursor::new(&buf));

        let mut naive = 0u32;
        for i in 0..=bitmap.len() {
            assert_eq!(cr.query(i as u32), naive, "position {i}");
            assert_eq!(view.query(i as u32), naive);
            if i < bitmap.len() && !bitmap[i] {
                naive += 1;
            }
        }
    }

    #[test]
    fn test_rank_random_bitmaps() {
        let mut rng = StdRng::seed_from_u64(5);
        for density in [0.1, 0.5, 0.9, 0.99] {
            let bitmap: Vec<bool> = (0..3000).map(|_| rng.gen_bool(density)).collect();
            check_bitmap(&bitmap);
        }
    }

    #[test]
    fn test_rank_edge_sets() {
        check_bitmap(&[false]);
        check_bitmap(&[true, true, true, false]);
        check_bitmap(&[false, true, true, true]);
        check_bitmap(&[true; 64]);
    }

    #[test]
    fn test_reload() {
        let vals = [3u32, 9, 10, 400, 401, 4000];
        let cr = CompressedRank::new(&vals);
        let mut buf = Vec::new();
        cr.pack(&mut buf);
        let loaded = CompressedRank::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(loaded, cr);
        assert_eq!(loaded.query(10), 2);
        assert_eq!(loaded.query(5000), 6);
    }
}

//! Compressed integer sequence with random access.
//!
//! Value `v > 0` is stored in `floor(log2(v + 1))` bits as `v - (2^len - 1)`;
//! zero costs no bits. Cumulative lengths are split into low `rem_r` bits
//! (fixed-width table) and high bits (unary, indexed by [`Select`]).

use crate::codec::{PackExt, PackedCursor, ReadExt};
use crate::error::MphError;
use crate::select::{Select, SelectQuery, SelectRef};
use crate::util::{
    LeWords, Words, bits_table_size, get_bits_at_pos, get_bits_value, i_log2, set_bits_at_pos,
    set_bits_value,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::Read;

#[inline]
fn encoded_len(v: u32) -> u32 {
    if v == 0 {
        0
    } else {
        63 - (v as u64 + 1).leading_zeros()
    }
}

#[inline]
fn implicit_base(len: u32) -> u32 {
    ((1u64 << len) - 1) as u32
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedSeq {
    n: u32,
    rem_r: u32,
    total_length: u32,
    sel: Select,
    length_rems: Vec<u32>,
    store_table: Vec<u32>,
}

impl CompressedSeq {
    pub fn new(vals: &[u32]) -> Self {
        let n = vals.len() as u32;
        let mut lengths: Vec<u32> = vals.iter().map(|&v| encoded_len(v)).collect();
        let total: u64 = lengths.iter().map(|&l| l as u64).sum();
        let total_length = total as u32;

        let mut store_table = vec![0u32; ((total + 31) >> 5) as usize];
        let mut pos = 0u64;
        for (&v, &len) in vals.iter().zip(&lengths) {
            if len == 0 {
                continue;
            }
            set_bits_at_pos(&mut store_table, pos, v - implicit_base(len), len);
            pos += len as u64;
        }

        let rem_r = if n == 0 {
            1
        } else {
            i_log2(total_length / n).max(1)
        };
        let rems_mask = (1u32 << rem_r) - 1;
        let mut length_rems = vec![0u32; bits_table_size(n, rem_r) as usize];
        let mut cumulative = 0u32;
        for (i, len) in lengths.iter_mut().enumerate() {
            cumulative += *len;
            set_bits_value(&mut length_rems, i as u32, cumulative & rems_mask, rem_r);
            *len = cumulative >> rem_r;
        }
        let sel = Select::new(&lengths, total_length >> rem_r);

        Self {
            n,
            rem_r,
            total_length,
            sel,
            length_rems,
            store_table,
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

    /// Value at `idx`; `idx < len()`.
    #[inline]
    pub fn query(&self, idx: u32) -> u32 {
        query_parts(
            self.rem_r,
            &self.sel,
            self.length_rems.as_slice(),
            self.store_table.as_slice(),
            idx,
        )
    }

    pub fn packed_size(&self) -> usize {
        16 + self.sel.packed_size() + 4 * (self.length_rems.len() + self.store_table.len())
    }

    /// `n`, `rem_r`, `total_length`, select size, select, length remainders,
    /// stored values.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.put_u32(self.n);
        out.put_u32(self.rem_r);
        out.put_u32(self.total_length);
        out.put_u32(self.sel.packed_size() as u32);
        self.sel.pack(out);
        out.put_u32s(&self.length_rems);
        out.put_u32s(&self.store_table);
    }

    pub(crate) fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        let n = r.read_u32()?;
        let rem_r = r.read_u32()?;
        let total_length = r.read_u32()?;
        if rem_r == 0 || rem_r > 32 {
            return Err(MphError::Corrupt(format!("compressed sequence rem_r {rem_r}")));
        }
        let sel_size = r.read_u32()? as usize;
        let sel_bytes = r.read_bytes(sel_size)?;
        let sel = Select::read_from(&mut sel_bytes.as_slice())?;
        let length_rems = r.read_u32s(bits_table_size(n, rem_r) as usize)?;
        let store_table = r.read_u32s(((total_length as u64 + 31) >> 5) as usize)?;
        Ok(Self {
            n,
            rem_r,
            total_length,
            sel,
            length_rems,
            store_table,
        })
    }
}

fn query_parts<S, L, T>(rem_r: u32, sel: &S, rems: &L, store: &T, idx: u32) -> u32
where
    S: SelectQuery,
    L: Words + ?Sized,
    T: Words + ?Sized,
{
    let (enc_idx, sel_res) = if idx == 0 {
        (0u32, sel.query(0))
    } else {
        let prev = sel.query(idx - 1);
        let enc_idx = ((prev - (idx - 1)) << rem_r) + get_bits_value(rems, idx - 1, rem_r);
        (enc_idx, sel.next_query(prev))
    };
    let enc_length = ((sel_res - idx) << rem_r) + get_bits_value(rems, idx, rem_r) - enc_idx;
    if enc_length == 0 {
        return 0;
    }
    get_bits_at_pos(store, enc_idx as u64, enc_length) + implicit_base(enc_length)
}

/// Borrowed view of a packed [`CompressedSeq`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompressedSeqRef<'a> {
    rem_r: u32,
    sel: SelectRef<'a>,
    length_rems: LeWords<'a>,
    store_table: LeWords<'a>,
}

impl<'a> CompressedSeqRef<'a> {
    pub fn read(cur: &mut PackedCursor<'a>) -> Self {
        let n = cur.u32();
        let rem_r = cur.u32();
        let total_length = cur.u32();
        let sel_size = cur.u32() as usize;
        let sel = SelectRef::read(&mut PackedCursor::new(cur.bytes(sel_size)));
        let length_rems = LeWords(cur.bytes(bits_table_size(n, rem_r) as usize * 4));
        let store_table = LeWords(cur.bytes((((total_length as u64 + 31) >> 5) * 4) as usize));
        Self {
            rem_r,
            sel,
            length_rems,
            store_table,
        }
    }

    #[inline]
    pub fn query(&self, idx: u32) -> u32 {
        query_parts(self.rem_r, &self.sel, &self.length_rems, &self.store_table, idx)
    }
}

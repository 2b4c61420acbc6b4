use crate::codec::le_u32;

#[derive(Debug, Clone)]
pub struct BitSet {
    bits: Vec<u64>,
    n: usize,
}
impl BitSet {
    pub fn new(n: usize) -> Self {
        let words = n.div_ceil(64);
        Self { bits: vec![0; words], n }
    }
    #[inline]
    pub fn len(&self) -> usize {
        self.n
    }
    #[inline]
    pub fn test(&self, idx: usize) -> bool {
        let (w, b) = (idx / 64, idx % 64);
        (self.bits[w] >> b) & 1 == 1
    }
    #[inline]
    pub fn set(&mut self, idx: usize) {
        let (w, b) = (idx / 64, idx % 64);
        self.bits[w] |= 1u64 << b;
    }
    #[inline]
    pub fn clear(&mut self, idx: usize) {
        let (w, b) = (idx / 64, idx % 64);
        self.bits[w] &= !(1u64 << b);
    }
}

/// Read access to a little-endian `u32` word array, either owned or still
/// sitting inside a packed byte buffer.
pub(crate) trait Words {
    fn word(&self, i: usize) -> u32;
    #[inline]
    fn byte(&self, i: usize) -> u8 {
        (self.word(i >> 2) >> ((i & 3) * 8)) as u8
    }
}

impl Words for [u32] {
    #[inline]
    fn word(&self, i: usize) -> u32 {
        self[i]
    }
}

/// `u32` words stored as raw little-endian bytes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeWords<'a>(pub &'a [u8]);

impl Words for LeWords<'_> {
    #[inline]
    fn word(&self, i: usize) -> u32 {
        le_u32(self.0, i * 4)
    }
    #[inline]
    fn byte(&self, i: usize) -> u8 {
        self.0[i]
    }
}

/// Number of `u32` words needed for `n` fields of `len` bits.
#[inline]
pub(crate) fn bits_table_size(n: u32, len: u32) -> u32 {
    ((n as u64 * len as u64 + 31) >> 5) as u32
}

#[inline]
fn mask(len: u32) -> u64 {
    (1u64 << len) - 1
}

/// Writes the low `len` bits of `value` at bit `pos`; `len <= 32`.
pub(crate) fn set_bits_at_pos(table: &mut [u32], pos: u64, value: u32, len: u32) {
    let w = (pos >> 5) as usize;
    let shift = (pos & 31) as u32;
    let m = mask(len) << shift;
    let v = (value as u64 & mask(len)) << shift;
    table[w] = (table[w] & !(m as u32)) | v as u32;
    if shift + len > 32 {
        table[w + 1] = (table[w + 1] & !((m >> 32) as u32)) | (v >> 32) as u32;
    }
}

/// Reads `len` bits starting at bit `pos`; `len <= 32`.
pub(crate) fn get_bits_at_pos<W: Words + ?Sized>(table: &W, pos: u64, len: u32) -> u32 {
    let w = (pos >> 5) as usize;
    let shift = (pos & 31) as u32;
    let mut v = table.word(w) as u64;
    if shift + len > 32 {
        v |= (table.word(w + 1) as u64) << 32;
    }
    ((v >> shift) & mask(len)) as u32
}

/// Fixed-width field `index` of `len` bits.
#[inline]
pub(crate) fn set_bits_value(table: &mut [u32], index: u32, value: u32, len: u32) {
    set_bits_at_pos(table, index as u64 * len as u64, value, len)
}

#[inline]
pub(crate) fn get_bits_value<W: Words + ?Sized>(table: &W, index: u32, len: u32) -> u32 {
    get_bits_at_pos(table, index as u64 * len as u64, len)
}

/// floor(log2(x)), with `i_log2(0) == 0`.
#[inline]
pub(crate) fn i_log2(x: u32) -> u32 {
    if x == 0 { 0 } else { 31 - x.leading_zeros() }
}

/// `v` as little-endian bytes, for handing word tables to `LeWords`.
pub(crate) fn words_to_bytes(v: &[u32]) -> Vec<u8> {
    v.iter().flat_map(|w| w.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset() {
        let mut b = BitSet::new(130);
        assert_eq!(b.len(), 130);
        b.set(0);
        b.set(129);
        assert!(b.test(0) && b.test(129) && !b.test(64));
        b.clear(129);
        assert!(!b.test(129));
    }

    #[test]
    fn test_bits_straddle_words() {
        let mut t = vec![0u32; 4];
        set_bits_at_pos(&mut t, 28, 0b1011_0110, 8);
        assert_eq!(get_bits_at_pos(t.as_slice(), 28, 8), 0b1011_0110);
        assert_eq!(t[0] >> 28, 0b0110);
        assert_eq!(t[1] & 0xF, 0b1011);

        set_bits_at_pos(&mut t, 40, u32::MAX, 32);
        assert_eq!(get_bits_at_pos(t.as_slice(), 40, 32), u32::MAX);
        // neighbours untouched
        assert_eq!(get_bits_at_pos(t.as_slice(), 28, 8), 0b1011_0110);
        set_bits_at_pos(&mut t, 40, 5, 32);
        assert_eq!(get_bits_at_pos(t.as_slice(), 40, 32), 5);
    }

    #[test]
    fn test_fixed_width_fields() {
        let mut t = vec![0u32; bits_table_size(10, 7) as usize];
        for i in 0..10 {
            set_bits_value(&mut t, i, i * 11, 7);
        }
        let bytes = words_to_bytes(&t);
        for i in 0..10 {
            assert_eq!(get_bits_value(t.as_slice(), i, 7), i * 11);
            assert_eq!(get_bits_value(&LeWords(&bytes), i, 7), i * 11);
        }
    }

    #[test]
    fn test_i_log2() {
        assert_eq!(i_log2(0), 0);
        assert_eq!(i_log2(1), 0);
        assert_eq!(i_log2(2), 1);
        assert_eq!(i_log2(255), 7);
        assert_eq!(i_log2(256), 8);
        assert_eq!(i_log2(u32::MAX), 31);
    }
}

//! Seeded 32-bit key hashing.
//!
//! Every hash kind produces a correlated 3-vector from a single pass over the
//! key; `hash()` is always element 2 of that vector, so partitioning with
//! `hash()` and searching with `hash_vector()[2]` agree.

use crate::codec::{PackExt, PackedCursor, ReadExt, WriteExt};
use crate::error::MphError;
use rand::Rng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use xxhash_rust::xxh3::xxh3_128_with_seed;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashKind {
    /// Bob Jenkins' lookup2.
    #[default]
    Jenkins = 0,
    Xxh3 = 1,
    WyHash = 2,
}

impl HashKind {
    pub const ALL: [HashKind; 3] = [HashKind::Jenkins, HashKind::Xxh3, HashKind::WyHash];

    pub fn name(self) -> &'static str {
        match self {
            HashKind::Jenkins => "jenkins",
            HashKind::Xxh3 => "xxh3",
            HashKind::WyHash => "wyhash",
        }
    }

    #[inline]
    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Option<HashKind> {
        HashKind::ALL.get(tag as usize).copied()
    }

    pub fn from_name(name: &str) -> Option<HashKind> {
        HashKind::ALL.iter().copied().find(|k| k.name() == name)
    }
}

/// A seeded hash function over byte keys.
pub trait KeyHasher {
    fn hash_vector(&self, key: &[u8]) -> [u32; 3];

    #[inline]
    fn hash(&self, key: &[u8]) -> u32 {
        self.hash_vector(key)[2]
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jenkins {
    pub seed: u32,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Xxh3 {
    pub seed: u32,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WyHash {
    pub seed: u32,
}

#[inline(always)]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    macro_rules! step {
        ($x:ident, $y:ident, $z:ident, $op:tt $s:expr) => {
            *$x = $x.wrapping_sub(*$y).wrapping_sub(*$z);
            *$x ^= *$z $op $s;
        };
    }
    step!(a, b, c, >> 13);
    step!(b, c, a, << 8);
    step!(c, a, b, >> 13);
    step!(a, b, c, >> 12);
    step!(b, c, a, << 16);
    step!(c, a, b, >> 5);
    step!(a, b, c, >> 3);
    step!(b, c, a, << 10);
    step!(c, a, b, >> 15);
}

#[inline]
fn le32(k: &[u8]) -> u32 {
    u32::from_le_bytes([k[0], k[1], k[2], k[3]])
}

impl KeyHasher for Jenkins {
    fn hash_vector(&self, key: &[u8]) -> [u32; 3] {
        let (mut a, mut b, mut c) = (0x9e37_79b9u32, 0x9e37_79b9u32, self.seed);
        let mut blocks = key.chunks_exact(12);
        for k in &mut blocks {
            a = a.wrapping_add(le32(&k[0..4]));
            b = b.wrapping_add(le32(&k[4..8]));
            c = c.wrapping_add(le32(&k[8..12]));
            mix(&mut a, &mut b, &mut c);
        }
        c = c.wrapping_add(key.len() as u32);
        // Tail: bytes 0..4 go to a, 4..8 to b, 8..11 to c above its low byte.
        for (i, &byte) in blocks.remainder().iter().enumerate() {
            let v = byte as u32;
            match i {
                0..=3 => a = a.wrapping_add(v << (8 * i)),
                4..=7 => b = b.wrapping_add(v << (8 * (i - 4))),
                _ => c = c.wrapping_add(v << (8 * (i - 7))),
            }
        }
        mix(&mut a, &mut b, &mut c);
        [a, b, c]
    }
}

impl KeyHasher for Xxh3 {
    #[inline]
    fn hash_vector(&self, key: &[u8]) -> [u32; 3] {
        let h = xxh3_128_with_seed(key, self.seed as u64);
        [h as u32, (h >> 32) as u32, (h >> 64) as u32]
    }
}

impl KeyHasher for WyHash {
    /// 1× wyhash + splitmix64 for the third lane.
    #[inline]
    fn hash_vector(&self, key: &[u8]) -> [u32; 3] {
        let base = wyhash::wyhash(key, self.seed as u64);
        [base as u32, (base >> 32) as u32, splitmix64(base) as u32]
    }
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// A hash function instance: kind plus seed.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashState {
    Jenkins(Jenkins),
    Xxh3(Xxh3),
    WyHash(WyHash),
}

impl HashState {
    /// Size of the tag-free packed form.
    pub const PACKED_SIZE: usize = 4;

    /// New instance whose seed is drawn from `[0, seed_space)`.
    pub fn new<R: Rng + ?Sized>(kind: HashKind, seed_space: u32, rng: &mut R) -> Self {
        let seed = if seed_space == 0 {
            0
        } else {
            rng.gen_range(0..seed_space)
        };
        Self::with_seed(kind, seed)
    }

    /// New instance with a seed drawn from the whole `u32` range.
    pub fn random<R: Rng + ?Sized>(kind: HashKind, rng: &mut R) -> Self {
        Self::with_seed(kind, rng.r#gen())
    }

    pub fn with_seed(kind: HashKind, seed: u32) -> Self {
        match kind {
            HashKind::Jenkins => HashState::Jenkins(Jenkins { seed }),
            HashKind::Xxh3 => HashState::Xxh3(Xxh3 { seed }),
            HashKind::WyHash => HashState::WyHash(WyHash { seed }),
        }
    }

    pub fn kind(&self) -> HashKind {
        match self {
            HashState::Jenkins(_) => HashKind::Jenkins,
            HashState::Xxh3(_) => HashKind::Xxh3,
            HashState::WyHash(_) => HashKind::WyHash,
        }
    }

    pub fn seed(&self) -> u32 {
        match self {
            HashState::Jenkins(h) => h.seed,
            HashState::Xxh3(h) => h.seed,
            HashState::WyHash(h) => h.seed,
        }
    }

    /// Self-describing form: name, NUL, 4-byte seed.
    pub fn dump(&self) -> Vec<u8> {
        let name = self.kind().name();
        let mut out = Vec::with_capacity(name.len() + 1 + Self::PACKED_SIZE);
        out.put_bytes(name.as_bytes());
        out.put_u8(0);
        out.put_u32(self.seed());
        out
    }

    /// Inverse of [`HashState::dump`]. Unknown names fail with `UnknownHash`.
    pub fn load(buf: &[u8]) -> Result<Self, MphError> {
        let mut r = buf;
        let name = r.read_cstr()?;
        let kind = HashKind::from_name(&name).ok_or(MphError::UnknownHash(name))?;
        let seed = r.read_u32()?;
        Ok(Self::with_seed(kind, seed))
    }

    #[inline]
    pub fn packed_size(&self) -> usize {
        Self::PACKED_SIZE
    }

    /// Tag-free packed form; the caller records the kind.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.put_u32(self.seed());
    }

    pub fn from_packed(kind: HashKind, buf: &[u8]) -> Self {
        Self::with_seed(kind, PackedCursor::new(buf).u32())
    }

    /// Length-prefixed dump, as embedded in algorithm streams.
    pub(crate) fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_blob(&self.dump())
    }

    pub(crate) fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        Self::load(&r.read_blob()?)
    }

    /// Kind tag followed by the packed state.
    pub(crate) fn pack_tagged(&self, out: &mut Vec<u8>) {
        out.put_u32(self.kind().tag());
        self.pack(out);
    }

    pub(crate) const PACKED_TAGGED_SIZE: usize = 4 + Self::PACKED_SIZE;

    pub(crate) fn read_packed(cur: &mut PackedCursor<'_>) -> Self {
        let tag = cur.u32();
        let Some(kind) = HashKind::from_tag(tag) else {
            panic!("corrupt packed buffer: unknown hash tag {tag}");
        };
        Self::with_seed(kind, cur.u32())
    }
}

impl KeyHasher for HashState {
    #[inline]
    fn hash_vector(&self, key: &[u8]) -> [u32; 3] {
        match self {
            HashState::Jenkins(h) => h.hash_vector(key),
            HashState::Xxh3(h) => h.hash_vector(key),
            HashState::WyHash(h) => h.hash_vector(key),
        }
    }
}

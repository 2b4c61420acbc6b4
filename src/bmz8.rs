use crate::bmz::{Labelling, label};
use crate::codec::{PackExt, PackedCursor, ReadExt, WriteExt};
use crate::config::{Algo, BuildConfig};
use crate::error::MphError;
use crate::graph::{endpoints, graph_size};
use crate::hash::{HashState, KeyHasher};
use crate::keys::KeySource;
use rand::rngs::StdRng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// BMZ with byte-sized labels, for key sets below 256 (the bucket solver of
/// BRZ). Labelling runs on 32-bit values and is truncated afterwards: every
/// edge sum is below 256, so the truncation is exact.
///
/// Query: f(k) = (g[h1(k)] + g[h2(k)]) mod 256
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bmz8 {
    hashes: [HashState; 2],
    n: u8,
    m: u8,
    g: Vec<u8>,
}

impl Bmz8 {
    pub const DEFAULT_C: f64 = 1.15;
    pub const MAX_KEYS: u32 = 255;

    pub(crate) fn build(
        src: &mut dyn KeySource,
        cfg: &BuildConfig,
        rng: &mut StdRng,
    ) -> Result<Self, MphError> {
        let m = src.nkeys();
        let c = if cfg.c == 0.0 { Self::DEFAULT_C } else { cfg.c };
        if m > Self::MAX_KEYS {
            return Err(MphError::TooManyKeys {
                algo: Algo::Bmz8,
                max: Self::MAX_KEYS,
            });
        }
        if graph_size(c, m) > u8::MAX as u32 {
            return Err(MphError::TooManyKeys {
                algo: Algo::Bmz8,
                max: (u8::MAX as f64 / c).floor() as u32,
            });
        }
        let Labelling { hashes, n, m, g } = label(src, cfg, rng, Algo::Bmz8, c)?;
        Ok(Self {
            hashes,
            n: n as u8,
            m: m as u8,
            g: g.into_iter().map(|v| v as u8).collect(),
        })
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.m as u32
    }

    #[inline]
    pub fn search(&self, key: &[u8]) -> u32 {
        search_bytes(&self.hashes, &self.g, key) as u32
    }

    pub(crate) fn hashes(&self) -> &[HashState; 2] {
        &self.hashes
    }

    pub(crate) fn g(&self) -> &[u8] {
        &self.g
    }

    pub(crate) fn dump_body<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(2)?;
        self.hashes[0].write_to(w)?;
        self.hashes[1].write_to(w)?;
        w.write_u8(self.n)?;
        w.write_u8(self.m)?;
        w.write_all(&self.g)
    }

    pub(crate) fn load_body<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        let nhashes = r.read_u8()?;
        if nhashes != 2 {
            return Err(MphError::Corrupt(format!("bmz8 expects 2 hash functions, found {nhashes}")));
        }
        let hashes = [HashState::read_from(r)?, HashState::read_from(r)?];
        let n = r.read_u8()?;
        let m = r.read_u8()?;
        if n < 2 || m == 0 {
            return Err(MphError::Corrupt(format!("bmz8 with n={n} m={m}")));
        }
        let g = r.read_bytes(n as usize)?;
        Ok(Self { hashes, n, m, g })
    }

    pub fn packed_size(&self) -> usize {
        2 * HashState::PACKED_TAGGED_SIZE + 1 + self.g.len()
    }

    /// h1, h2 (each tagged), n as one byte, g.
    pub fn pack(&self, out: &mut Vec<u8>) {
        self.hashes[0].pack_tagged(out);
        self.hashes[1].pack_tagged(out);
        out.put_u8(self.n);
        out.put_bytes(&self.g);
    }

    pub(crate) fn search_packed(buf: &[u8], key: &[u8]) -> u32 {
        let mut cur = PackedCursor::new(buf);
        let hashes = [HashState::read_packed(&mut cur), HashState::read_packed(&mut cur)];
        let n = cur.u8() as usize;
        search_bytes(&hashes, cur.bytes(n), key) as u32
    }
}

/// Byte-label lookup shared with the BRZ buckets; `g.len()` is the vertex count.
#[inline]
pub(crate) fn search_bytes(hashes: &[HashState; 2], g: &[u8], key: &[u8]) -> u8 {
    let (h1, h2) = endpoints(hashes[0].hash(key), hashes[1].hash(key), g.len() as u32);
    g[h1 as usize].wrapping_add(g[h2 as usize])
}

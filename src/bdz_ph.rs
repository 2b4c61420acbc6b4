use crate::bdz::map;
use crate::codec::{PackExt, PackedCursor, ReadExt, WriteExt};
use crate::config::{Algo, BuildConfig};
use crate::error::MphError;
use crate::hash::HashState;
use crate::hypergraph::{Hypergraph, Peel, edge_vertices, partition_size};
use crate::keys::KeySource;
use log::info;
use rand::rngs::StdRng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

const POW3: [u8; 5] = [1, 3, 9, 27, 81];

/// Base-3 digit `j` of a packed byte.
#[inline]
fn digit(byte: u8, j: u32) -> u8 {
    (byte / POW3[j as usize]) % 3
}

#[inline]
fn get_value(g: &[u8], v: u32) -> u8 {
    digit(g[(v / 5) as usize], v % 5)
}

/// Perfect (not minimal) hash by BDZ without the rank step:
/// - same hypergraph mapping as [`crate::bdz::Bdz`]
/// - vertex values are packed five per byte in base 3
///
/// Query: f(k) = v[(g[v0] + g[v1] + g[v2]) % 3], in `[0, n)`
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BdzPh {
    hash: HashState,
    n: u32,
    m: u32,
    r: u32,
    g: Vec<u8>, // ceil(n / 5) bytes
}

impl BdzPh {
    pub const DEFAULT_C: f64 = 1.23;

    pub(crate) fn build(
        src: &mut dyn KeySource,
        cfg: &BuildConfig,
        rng: &mut StdRng,
    ) -> Result<Self, MphError> {
        let m = src.nkeys();
        let c = if cfg.c == 0.0 { Self::DEFAULT_C } else { cfg.c };
        let r = partition_size(c, m);
        let n = 3 * r;
        let mut graph = Hypergraph::new(n, m);

        info!("bdz_ph: mapping {m} keys onto a hypergraph of {n} vertices");
        let (hash, order) = map(src, cfg, rng, &mut graph, r, Algo::BdzPh, cfg.limits.bdz_ph)?;
        info!("bdz_ph: assigning step");
        let values = assign(&graph, &order, n);
        Ok(Self {
            hash,
            n,
            m,
            r,
            g: pack_base3(&values),
        })
    }

    /// Output range: `n`, not the key count.
    #[inline]
    pub fn size(&self) -> u32 {
        self.n
    }

    #[inline]
    pub fn search(&self, key: &[u8]) -> u32 {
        search_in(&self.hash, self.r, &self.g, key)
    }

    pub(crate) fn dump_body<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        self.hash.write_to(w)?;
        w.write_u32(self.n)?;
        w.write_u32(self.m)?;
        w.write_u32(self.r)?;
        w.write_all(&self.g)
    }

    pub(crate) fn load_body<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        let hash = HashState::read_from(r)?;
        let n = r.read_u32()?;
        let m = r.read_u32()?;
        let part = r.read_u32()?;
        if n != 3 * part || m == 0 {
            return Err(MphError::Corrupt(format!("bdz_ph with n={n} m={m} r={part}")));
        }
        let g = r.read_bytes(n.div_ceil(5) as usize)?;
        Ok(Self {
            hash,
            n,
            m,
            r: part,
            g,
        })
    }

    pub fn packed_size(&self) -> usize {
        HashState::PACKED_TAGGED_SIZE + 4 + self.g.len()
    }

    /// h (tagged), r, g.
    pub fn pack(&self, out: &mut Vec<u8>) {
        self.hash.pack_tagged(out);
        out.put_u32(self.r);
        out.put_bytes(&self.g);
    }

    pub(crate) fn search_packed(buf: &[u8], key: &[u8]) -> u32 {
        let mut cur = PackedCursor::new(buf);
        let hash = HashState::read_packed(&mut cur);
        let r = cur.u32();
        search_in(&hash, r, cur.rest(), key)
    }
}

#[inline]
fn search_in(hash: &HashState, r: u32, g: &[u8], key: &[u8]) -> u32 {
    let v = edge_vertices(hash, key, r);
    let sum = get_value(g, v[0]) + get_value(g, v[1]) + get_value(g, v[2]);
    v[(sum % 3) as usize]
}

/// One value in `0..3` per vertex; untouched vertices stay 0.
fn assign(graph: &Hypergraph, order: &[Peel], n: u32) -> Vec<u8> {
    let mut g = vec![0u8; n as usize];
    for p in order.iter().rev() {
        let v = graph.edge(p.edge);
        let i = p.pivot as usize;
        let others = g[v[(i + 1) % 3] as usize] + g[v[(i + 2) % 3] as usize];
        g[v[i] as usize] = (6 + p.pivot - others) % 3;
    }
    g
}

fn pack_base3(values: &[u8]) -> Vec<u8> {
    values
        .chunks(5)
        .map(|chunk| chunk.iter().zip(POW3).map(|(&v, p)| v * p).sum())
        .collect()
}

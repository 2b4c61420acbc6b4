use crate::codec::{PackExt, PackedCursor, ReadExt, WriteExt, le_u32};
use crate::config::{Algo, BuildConfig};
use crate::error::MphError;
use crate::hash::HashState;
use crate::hypergraph::{Hypergraph, Peel, edge_vertices, partition_size};
use crate::keys::KeySource;
use log::{debug, info, warn};
use rand::rngs::StdRng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// 2-bit value of a vertex that selects no edge.
const UNASSIGNED: u8 = 3;

/// `ASSIGNED_IN_BYTE[b]` = number of 2-bit fields of `b` that are not
/// [`UNASSIGNED`].
static ASSIGNED_IN_BYTE: [u8; 256] = build_assigned_table();

const fn build_assigned_table() -> [u8; 256] {
    let mut t = [0u8; 256];
    let mut b = 0;
    while b < 256 {
        let mut count = 0;
        let mut f = 0;
        while f < 4 {
            if (b >> (2 * f)) & 3 != UNASSIGNED as usize {
                count += 1;
            }
            f += 1;
        }
        t[b] = count;
        b += 1;
    }
    t
}

#[inline]
fn get_value(g: &[u8], i: u32) -> u8 {
    (g[(i >> 2) as usize] >> ((i & 3) << 1)) & 3
}

#[inline]
fn set_value(g: &mut [u8], i: u32, v: u8) {
    let shift = (i & 3) << 1;
    let b = &mut g[(i >> 2) as usize];
    *b = (*b & !(3 << shift)) | ((v & 3) << shift);
}

/// Minimal perfect hash by BDZ (3-hypergraph peeling + rank):
/// - one hyperedge per key across three partitions of `r` vertices
/// - peel, then give each vertex a 2-bit value in reverse peel order
/// - vertices that select an edge are ranked in blocks of `2^b`
///
/// Query: f(k) = rank(v[(g[v0] + g[v1] + g[v2]) % 3])
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bdz {
    hash: HashState,
    n: u32,     // 3 * r
    m: u32,     // number of keys
    r: u32,     // partition size, odd
    g: Vec<u8>, // 2-bit values, ceil(n / 4) bytes
    k: u32,     // block size, 2^b
    b: u8,
    ranktable: Vec<u32>, // assigned vertices before each block
}

impl Bdz {
    pub const DEFAULT_C: f64 = 1.23;
    pub const DEFAULT_B: u32 = 7;

    pub(crate) fn build(
        src: &mut dyn KeySource,
        cfg: &BuildConfig,
        rng: &mut StdRng,
    ) -> Result<Self, MphError> {
        let m = src.nkeys();
        let c = if cfg.c == 0.0 { Self::DEFAULT_C } else { cfg.c };
        let b = if cfg.b <= 2 || cfg.b > 10 { Self::DEFAULT_B } else { cfg.b };
        let r = partition_size(c, m);
        let n = 3 * r;
        let k = 1u32 << b;
        let mut graph = Hypergraph::new(n, m);

        info!("bdz: mapping {m} keys onto a hypergraph of {n} vertices");
        let (hash, order) = map(src, cfg, rng, &mut graph, r, Algo::Bdz, cfg.limits.bdz)?;

        info!("bdz: assigning step");
        let g = assign(&graph, &order, n);
        info!("bdz: ranking step");
        let ranktable = ranking(&g, n, k);
        Ok(Self {
            hash,
            n,
            m,
            r,
            g,
            k,
            b: b as u8,
            ranktable,
        })
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.m
    }

    #[inline]
    pub fn search(&self, key: &[u8]) -> u32 {
        let vertex = select_vertex(&self.g, edge_vertices(&self.hash, key, self.r));
        rank(self.b as u32, &self.ranktable, &self.g, vertex)
    }

    pub(crate) fn dump_body<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        self.hash.write_to(w)?;
        w.write_u32(self.n)?;
        w.write_u32(self.m)?;
        w.write_u32(self.r)?;
        w.write_all(&self.g)?;
        w.write_u32(self.k)?;
        w.write_u8(self.b)?;
        w.write_u32(self.ranktable.len() as u32)?;
        w.write_u32s(&self.ranktable)
    }

    pub(crate) fn load_body<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        let hash = HashState::read_from(r)?;
        let n = r.read_u32()?;
        let m = r.read_u32()?;
        let part = r.read_u32()?;
        if n != 3 * part || m == 0 {
            return Err(MphError::Corrupt(format!("bdz with n={n} m={m} r={part}")));
        }
        let g = r.read_bytes(n.div_ceil(4) as usize)?;
        let k = r.read_u32()?;
        let b = r.read_u8()?;
        if b > 31 || k != 1 << b {
            return Err(MphError::Corrupt(format!("bdz with k={k} b={b}")));
        }
        let size = r.read_u32()?;
        let ranktable = r.read_u32s(size as usize)?;
        Ok(Self {
            hash,
            n,
            m,
            r: part,
            g,
            k,
            b,
            ranktable,
        })
    }

    pub fn packed_size(&self) -> usize {
        HashState::PACKED_TAGGED_SIZE + 8 + 4 * self.ranktable.len() + 1 + self.g.len()
    }

    /// h (tagged), r, rank table size, rank table, b, g.
    pub fn pack(&self, out: &mut Vec<u8>) {
        self.hash.pack_tagged(out);
        out.put_u32(self.r);
        out.put_u32(self.ranktable.len() as u32);
        out.put_u32s(&self.ranktable);
        out.put_u8(self.b);
        out.put_bytes(&self.g);
    }

    pub(crate) fn search_packed(buf: &[u8], key: &[u8]) -> u32 {
        let mut cur = PackedCursor::new(buf);
        let hash = HashState::read_packed(&mut cur);
        let r = cur.u32();
        let size = cur.u32() as usize;
        let ranktable = cur.bytes(4 * size);
        let b = cur.u8() as u32;
        let g = cur.rest();
        let vertex = select_vertex(g, edge_vertices(&hash, key, r));
        rank_with(b, |i| le_u32(ranktable, 4 * i), g, vertex)
    }
}

/// Mapping step shared with BDZ_PH: draws hashes until the hypergraph peels.
pub(crate) fn map(
    src: &mut dyn KeySource,
    cfg: &BuildConfig,
    rng: &mut StdRng,
    graph: &mut Hypergraph,
    r: u32,
    algo: Algo,
    limit: u32,
) -> Result<(HashState, Vec<Peel>), MphError> {
    for attempt in 1..=limit {
        let hash = HashState::random(cfg.hash_kind(0), rng);
        graph.map_keys(src, &hash, r)?;
        if let Some(order) = graph.peel() {
            return Ok((hash, order));
        }
        debug!("{algo}: acyclic graph creation failure, {} iterations remaining", limit - attempt);
    }
    warn!("{algo}: no peelable hypergraph after {limit} iterations");
    Err(MphError::Unresolvable(algo))
}

/// Reverse peel order: each pivot takes the value that makes the edge's sum
/// select it. Vertices never chosen keep [`UNASSIGNED`].
fn assign(graph: &Hypergraph, order: &[Peel], n: u32) -> Vec<u8> {
    let mut g = vec![0xffu8; n.div_ceil(4) as usize];
    for p in order.iter().rev() {
        let v = graph.edge(p.edge);
        let i = p.pivot as usize;
        let others = get_value(&g, v[(i + 1) % 3]) + get_value(&g, v[(i + 2) % 3]);
        set_value(&mut g, v[i], (6 + p.pivot - others) % 3);
    }
    g
}

fn ranking(g: &[u8], n: u32, k: u32) -> Vec<u32> {
    let blocks = n.div_ceil(k) as usize;
    let block_bytes = (k >> 2) as usize;
    let mut ranktable = Vec::with_capacity(blocks);
    let mut count = 0u32;
    for chunk in g.chunks(block_bytes).take(blocks) {
        ranktable.push(count);
        count += chunk.iter().map(|&b| ASSIGNED_IN_BYTE[b as usize] as u32).sum::<u32>();
    }
    ranktable
}

#[inline]
fn select_vertex(g: &[u8], v: [u32; 3]) -> u32 {
    let sum = get_value(g, v[0]) + get_value(g, v[1]) + get_value(g, v[2]);
    v[(sum % 3) as usize]
}

#[inline]
fn rank(b: u32, ranktable: &[u32], g: &[u8], vertex: u32) -> u32 {
    rank_with(b, |i| ranktable[i], g, vertex)
}

/// Assigned vertices strictly before `vertex`.
#[inline]
fn rank_with<T: Fn(usize) -> u32>(b: u32, ranktable: T, g: &[u8], vertex: u32) -> u32 {
    let index = vertex >> b;
    let mut base_rank = ranktable(index as usize);
    let mut beg_idx_b = (index << b) >> 2;
    let end_idx_b = vertex >> 2;
    while beg_idx_b < end_idx_b {
        base_rank += ASSIGNED_IN_BYTE[g[beg_idx_b as usize] as usize] as u32;
        beg_idx_b += 1;
    }
    for v in (beg_idx_b << 2)..vertex {
        if get_value(g, v) != UNASSIGNED {
            base_rank += 1;
        }
    }
    base_rank
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::VecKeys;
    use rand::SeedableRng;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("bdz/{i}")).collect()
    }

    fn build(keys: &[String], b: u32) -> Bdz {
        let mut rng = StdRng::seed_from_u64(21);
        let cfg = BuildConfig {
            b,
            ..BuildConfig::new(Algo::Bdz)
        };
        Bdz::build(&mut VecKeys::new(keys), &cfg, &mut rng).unwrap()
    }

    #[test]
    fn test_assigned_table() {
        assert_eq!(ASSIGNED_IN_BYTE[0xff], 0);
        assert_eq!(ASSIGNED_IN_BYTE[0x00], 4);
        assert_eq!(ASSIGNED_IN_BYTE[0b1111_0110], 2);
    }

    #[test]
    fn test_bijection_and_selection() {
        let keys = keys(3000);
        let mph = build(&keys, 0);
        assert_eq!(mph.b, 7);
        assert_eq!(mph.n, 3 * mph.r);
        let mut seen = vec![false; keys.len()];
        for k in &keys {
            // the selected vertex is the only one of the three that counts
            let v = edge_vertices(&mph.hash, k.as_bytes(), mph.r);
            let chosen = select_vertex(&mph.g, v);
            assert_ne!(get_value(&mph.g, chosen), UNASSIGNED);
            let i = mph.search(k.as_bytes()) as usize;
            assert!(i < keys.len() && !seen[i], "index {i}");
            seen[i] = true;
        }
    }

    #[test]
    fn test_block_sizes() {
        let keys = keys(500);
        for b in [3, 5, 10] {
            let mph = build(&keys, b);
            assert_eq!(mph.k, 1 << b);
            let mut out: Vec<u32> = keys.iter().map(|k| mph.search(k.as_bytes())).collect();
            out.sort_unstable();
            assert_eq!(out, (0..500).collect::<Vec<u32>>());
        }
    }

    #[test]
    fn test_dump_load_and_packed() {
        let keys = keys(800);
        let mph = build(&keys, 0);
        let mut buf = Vec::new();
        mph.dump_body(&mut buf).unwrap();
        assert_eq!(Bdz::load_body(&mut buf.as_slice()).unwrap(), mph);

        let mut packed = Vec::new();
        mph.pack(&mut packed);
        assert_eq!(packed.len(), mph.packed_size());
        for k in &keys {
            assert_eq!(Bdz::search_packed(&packed, k.as_bytes()), mph.search(k.as_bytes()));
        }
    }
}

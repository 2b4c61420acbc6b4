use crate::codec::{PackExt, PackedCursor, ReadExt, WriteExt, le_u32};
use crate::config::{Algo, BuildConfig};
use crate::error::MphError;
use crate::graph::{Graph, endpoints, graph_size};
use crate::hash::{HashState, KeyHasher};
use crate::keys::{KeySource, scan_keys};
use crate::util::BitSet;
use log::{debug, info, warn};
use rand::rngs::StdRng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Minimal perfect hash by CHM (random acyclic graph):
/// - one edge per key between two hashed vertices
/// - rehash until the graph has no cycle
/// - label vertices so every edge sums to its key index
///
/// Query: f(k) = (g[h1(k)] + g[h2(k)]) % m
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chm {
    hashes: [HashState; 2],
    n: u32,      // graph vertices (n = ceil(c * m))
    m: u32,      // number of keys
    g: Vec<u32>, // length == n
}

impl Chm {
    pub const DEFAULT_C: f64 = 2.09;

    pub(crate) fn build(
        src: &mut dyn KeySource,
        cfg: &BuildConfig,
        rng: &mut StdRng,
    ) -> Result<Self, MphError> {
        let m = src.nkeys();
        let c = if cfg.c == 0.0 { Self::DEFAULT_C } else { cfg.c };
        let n = graph_size(c, m);
        let mut graph = Graph::new(n, m);

        info!("chm: mapping {m} keys onto a graph of {n} vertices");
        let limit = cfg.limits.chm;
        for attempt in 1..=limit {
            let hashes = [
                HashState::new(cfg.hash_kind(0), n, rng),
                HashState::new(cfg.hash_kind(1), n, rng),
            ];
            if gen_edges(src, &mut graph, &hashes, n)? {
                info!("chm: assigning vertex labels");
                let g = assign(&graph);
                return Ok(Self { hashes, n, m, g });
            }
            debug!("chm: cyclic graph, {} iterations remaining", limit - attempt);
        }
        warn!("chm: no acyclic graph after {limit} iterations");
        Err(MphError::Unresolvable(Algo::Chm))
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.m
    }

    #[inline]
    pub fn search(&self, key: &[u8]) -> u32 {
        let (h1, h2) = endpoints(self.hashes[0].hash(key), self.hashes[1].hash(key), self.n);
        self.g[h1 as usize].wrapping_add(self.g[h2 as usize]) % self.m
    }

    pub(crate) fn dump_body<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32(2)?;
        self.hashes[0].write_to(w)?;
        self.hashes[1].write_to(w)?;
        w.write_u32(self.n)?;
        w.write_u32(self.m)?;
        w.write_u32s(&self.g)
    }

    pub(crate) fn load_body<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        let nhashes = r.read_u32()?;
        if nhashes != 2 {
            return Err(MphError::Corrupt(format!("chm expects 2 hash functions, found {nhashes}")));
        }
        let hashes = [HashState::read_from(r)?, HashState::read_from(r)?];
        let n = r.read_u32()?;
        let m = r.read_u32()?;
        if n < 2 || m == 0 {
            return Err(MphError::Corrupt(format!("chm with n={n} m={m}")));
        }
        let g = r.read_u32s(n as usize)?;
        Ok(Self { hashes, n, m, g })
    }

    pub fn packed_size(&self) -> usize {
        2 * HashState::PACKED_TAGGED_SIZE + 8 + 4 * self.g.len()
    }

    /// h1, h2 (each tagged), n, m, g.
    pub fn pack(&self, out: &mut Vec<u8>) {
        self.hashes[0].pack_tagged(out);
        self.hashes[1].pack_tagged(out);
        out.put_u32(self.n);
        out.put_u32(self.m);
        out.put_u32s(&self.g);
    }

    pub(crate) fn search_packed(buf: &[u8], key: &[u8]) -> u32 {
        let mut cur = PackedCursor::new(buf);
        let h1 = HashState::read_packed(&mut cur);
        let h2 = HashState::read_packed(&mut cur);
        let n = cur.u32();
        let m = cur.u32();
        let g = cur.rest();
        let (a, b) = endpoints(h1.hash(key), h2.hash(key), n);
        le_u32(g, a as usize * 4).wrapping_add(le_u32(g, b as usize * 4)) % m
    }
}

/// Adds one edge per key. `Ok(false)` on a self-loop or a cycle.
fn gen_edges(
    src: &mut dyn KeySource,
    graph: &mut Graph,
    hashes: &[HashState; 2],
    n: u32,
) -> Result<bool, MphError> {
    graph.clear_edges();
    let complete = scan_keys(src, |i, key| {
        let (h1, h2) = endpoints(hashes[0].hash(key), hashes[1].hash(key), n);
        if h1 == h2 {
            debug!("chm: self loop for key {i}");
            return Ok(false);
        }
        graph.add_edge(h1, h2);
        Ok(true)
    })?;
    Ok(complete && !graph.is_cyclic())
}

/// Depth-first labelling of an acyclic graph: each tree root gets 0 and each
/// newly reached vertex gets `edge id - g[parent]` (mod 2^32).
fn assign(graph: &Graph) -> Vec<u32> {
    let n = graph.nnodes();
    let mut g = vec![0u32; n as usize];
    let mut visited = BitSet::new(n as usize);
    // (vertex, next adjacency slot to examine)
    let mut stack: Vec<(u32, Option<u32>)> = Vec::new();
    for root in 0..n {
        if visited.test(root as usize) {
            continue;
        }
        visited.set(root as usize);
        stack.push((root, graph.first_slot(root)));
        while let Some(top) = stack.last_mut() {
            let (v, cursor) = *top;
            let Some(slot) = cursor else {
                stack.pop();
                continue;
            };
            top.1 = graph.next_slot(slot);
            let nb = graph.target(slot);
            if visited.test(nb as usize) {
                continue;
            }
            g[nb as usize] = graph.edge_id(slot).wrapping_sub(g[v as usize]);
            visited.set(nb as usize);
            stack.push((nb, graph.first_slot(nb)));
        }
    }
    g
}

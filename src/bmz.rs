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
use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Above this ratio critical vertices are labelled by exhaustive lookahead,
/// below it by the unused-value heuristic.
const EXACT_LABELLING_C: f64 = 1.14;

/// Minimal perfect hash by BMZ (graph with a 2-core):
/// - one edge per key, no self-loops and no multi-edges
/// - vertices of the 2-core are labelled first, breadth-first, so that the
///   edge sums they produce stay distinct
/// - the remaining forest takes the unused edge values in order
///
/// Query: f(k) = g[h1(k)] + g[h2(k)] (mod 2^32, already in `[0, m)`)
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bmz {
    hashes: [HashState; 2],
    n: u32,
    m: u32,
    g: Vec<u32>,
}

impl Bmz {
    pub const DEFAULT_C: f64 = 1.15;

    pub(crate) fn build(
        src: &mut dyn KeySource,
        cfg: &BuildConfig,
        rng: &mut StdRng,
    ) -> Result<Self, MphError> {
        let c = if cfg.c == 0.0 { Self::DEFAULT_C } else { cfg.c };
        let Labelling { hashes, n, m, g } = label(src, cfg, rng, Algo::Bmz, c)?;
        Ok(Self { hashes, n, m, g })
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.m
    }

    #[inline]
    pub fn search(&self, key: &[u8]) -> u32 {
        let (h1, h2) = endpoints(self.hashes[0].hash(key), self.hashes[1].hash(key), self.n);
        self.g[h1 as usize].wrapping_add(self.g[h2 as usize])
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
            return Err(MphError::Corrupt(format!("bmz expects 2 hash functions, found {nhashes}")));
        }
        let hashes = [HashState::read_from(r)?, HashState::read_from(r)?];
        let n = r.read_u32()?;
        let m = r.read_u32()?;
        if n < 2 || m == 0 {
            return Err(MphError::Corrupt(format!("bmz with n={n} m={m}")));
        }
        let g = r.read_u32s(n as usize)?;
        Ok(Self { hashes, n, m, g })
    }

    pub fn packed_size(&self) -> usize {
        2 * HashState::PACKED_TAGGED_SIZE + 4 + 4 * self.g.len()
    }

    /// h1, h2 (each tagged), n, g.
    pub fn pack(&self, out: &mut Vec<u8>) {
        self.hashes[0].pack_tagged(out);
        self.hashes[1].pack_tagged(out);
        out.put_u32(self.n);
        out.put_u32s(&self.g);
    }

    pub(crate) fn search_packed(buf: &[u8], key: &[u8]) -> u32 {
        let mut cur = PackedCursor::new(buf);
        let h1 = HashState::read_packed(&mut cur);
        let h2 = HashState::read_packed(&mut cur);
        let n = cur.u32();
        let g = cur.rest();
        let (a, b) = endpoints(h1.hash(key), h2.hash(key), n);
        le_u32(g, a as usize * 4).wrapping_add(le_u32(g, b as usize * 4))
    }
}

/// Result of a successful BMZ labelling, shared with [`crate::bmz8::Bmz8`].
pub(crate) struct Labelling {
    pub hashes: [HashState; 2],
    pub n: u32,
    pub m: u32,
    pub g: Vec<u32>,
}

/// Mapping, ordering and searching steps of BMZ for graph ratio `c`.
pub(crate) fn label(
    src: &mut dyn KeySource,
    cfg: &BuildConfig,
    rng: &mut StdRng,
    algo: Algo,
    c: f64,
) -> Result<Labelling, MphError> {
    let m = src.nkeys();
    let n = graph_size(c, m);
    let mut graph = Graph::new(n, m);
    let limit = cfg.limits.bmz_mapping;

    for attempt in 1..=limit {
        info!("{algo}: mapping {m} keys onto a graph of {n} vertices");
        let Some(hashes) = simple_graph(src, cfg, rng, &mut graph, algo)? else {
            warn!("{algo}: no simple graph after {} iterations", cfg.limits.bmz_edges);
            return Err(MphError::Unresolvable(algo));
        };

        info!("{algo}: ordering step");
        let critical = graph.critical_nodes();

        info!("{algo}: searching step");
        let mut labeller = Labeller::new(&graph, &critical);
        if labeller.label_critical(c > EXACT_LABELLING_C) {
            labeller.label_non_critical();
            info!("{algo}: minimal perfect hash generated");
            return Ok(Labelling { hashes, n, m, g: labeller.g });
        }
        debug!("{algo}: restarting mapping step, {} iterations remaining", limit - attempt);
    }
    warn!("{algo}: labelling failed after {limit} mapping iterations");
    Err(MphError::Unresolvable(algo))
}

/// Draws hash pairs until the key graph is simple.
fn simple_graph(
    src: &mut dyn KeySource,
    cfg: &BuildConfig,
    rng: &mut StdRng,
    graph: &mut Graph,
    algo: Algo,
) -> Result<Option<[HashState; 2]>, MphError> {
    let n = graph.nnodes();
    let limit = cfg.limits.bmz_edges;
    for attempt in 1..=limit {
        let hashes = [
            HashState::new(cfg.hash_kind(0), n, rng),
            HashState::new(cfg.hash_kind(1), n, rng),
        ];
        if gen_edges(src, graph, &hashes)? {
            return Ok(Some(hashes));
        }
        debug!("{algo}: simple graph creation failure, {} iterations remaining", limit - attempt);
    }
    Ok(None)
}

/// `Ok(false)` on a self-loop or a repeated edge.
fn gen_edges(src: &mut dyn KeySource, graph: &mut Graph, hashes: &[HashState; 2]) -> Result<bool, MphError> {
    graph.clear_edges();
    let n = graph.nnodes();
    scan_keys(src, |i, key| {
        let (h1, h2) = endpoints(hashes[0].hash(key), hashes[1].hash(key), n);
        if h1 == h2 {
            debug!("bmz: self loop for key {i}");
            return Ok(false);
        }
        if graph.contains_edge(h1, h2) {
            debug!("bmz: non simple graph at key {i}");
            return Ok(false);
        }
        graph.add_edge(h1, h2);
        Ok(true)
    })
}

enum Lookahead {
    Free,
    Collision,
    /// An edge value would reach `m`: the mapping must be redone.
    Overflow,
}

struct Labeller<'a> {
    graph: &'a Graph,
    critical: &'a BitSet,
    m: u32,
    g: Vec<u32>,
    visited: BitSet,
    used_edges: BitSet,
    biggest_g: u32,
    biggest_edge: u32,
}

impl<'a> Labeller<'a> {
    fn new(graph: &'a Graph, critical: &'a BitSet) -> Self {
        let n = graph.nnodes() as usize;
        let m = graph.len_edges();
        Self {
            graph,
            critical,
            m,
            g: vec![0; n],
            visited: BitSet::new(n),
            used_edges: BitSet::new(m as usize),
            biggest_g: 0,
            biggest_edge: 1,
        }
    }

    #[inline]
    fn is_labelled_critical(&self, v: u32) -> bool {
        self.critical.test(v as usize) && self.visited.test(v as usize)
    }

    /// Labels every critical component. `false` asks for a new mapping.
    fn label_critical(&mut self, exact: bool) -> bool {
        for v in 0..self.graph.nnodes() {
            if self.critical.test(v as usize) && !self.visited.test(v as usize) && !self.traverse_critical(v, exact) {
                return false;
            }
        }
        true
    }

    fn traverse_critical(&mut self, root: u32, exact: bool) -> bool {
        // g values skipped because of a collision, retried first (heuristic only)
        let mut unused: Vec<u32> = Vec::new();
        let graph = self.graph;
        self.g[root as usize] = self.biggest_edge.div_ceil(2) - 1;
        self.visited.set(root as usize);
        let mut queue = VecDeque::from([root]);

        while let Some(v) = queue.pop_front() {
            for (u, _) in graph.neighbors(v) {
                if !self.critical.test(u as usize) || self.visited.test(u as usize) {
                    continue;
                }
                let mut next_idx = 0usize;
                let (next_g, from_unused) = loop {
                    let (candidate, from) = if !exact && next_idx < unused.len() {
                        next_idx += 1;
                        (unused[next_idx - 1], Some(next_idx - 1))
                    } else {
                        next_idx = usize::MAX;
                        (self.biggest_g + 1, None)
                    };
                    let outcome = self.lookahead(u, candidate);
                    if let Lookahead::Overflow = outcome {
                        return false;
                    }
                    let collided = matches!(outcome, Lookahead::Collision);
                    if !exact && collided && candidate > self.biggest_g {
                        unused.push(candidate);
                    }
                    self.biggest_g = self.biggest_g.max(candidate);
                    if !collided {
                        break (candidate, from);
                    }
                };
                if let Some(i) = from_unused {
                    unused.swap_remove(i);
                }
                self.commit(u, next_g);
                queue.push_back(u);
            }
        }
        true
    }

    /// Checks the edge values `u` would create against its labelled
    /// critical neighbours.
    fn lookahead(&self, u: u32, next_g: u32) -> Lookahead {
        for (lav, _) in self.graph.neighbors(u) {
            if !self.is_labelled_critical(lav) {
                continue;
            }
            let value = next_g as u64 + self.g[lav as usize] as u64;
            if value >= self.m as u64 {
                return Lookahead::Overflow;
            }
            if self.used_edges.test(value as usize) {
                return Lookahead::Collision;
            }
        }
        Lookahead::Free
    }

    fn commit(&mut self, u: u32, next_g: u32) {
        let graph = self.graph;
        for (lav, _) in graph.neighbors(u) {
            if self.is_labelled_critical(lav) {
                let value = next_g + self.g[lav as usize];
                self.used_edges.set(value as usize);
                self.biggest_edge = self.biggest_edge.max(value);
            }
        }
        self.g[u as usize] = next_g;
        self.visited.set(u as usize);
    }

    /// Gives the forest hanging off labelled vertices, then the untouched
    /// trees, the edge values the critical pass left free.
    fn label_non_critical(&mut self) {
        let mut next_value = 0u32;
        for e in 0..self.m {
            let v1 = self.graph.vertex_id(e, 0);
            let v2 = self.graph.vertex_id(e, 1);
            let (seen1, seen2) = (self.visited.test(v1 as usize), self.visited.test(v2 as usize));
            if seen1 == seen2 {
                continue;
            }
            self.traverse(if seen1 { v1 } else { v2 }, &mut next_value);
        }
        for v in 0..self.graph.nnodes() {
            if !self.visited.test(v as usize) {
                self.g[v as usize] = 0;
                self.visited.set(v as usize);
                self.traverse(v, &mut next_value);
            }
        }
    }

    fn next_unused_edge(&self, mut idx: u32) -> u32 {
        loop {
            assert!(idx < self.m, "bmz: ran out of free edge values");
            if !self.used_edges.test(idx as usize) {
                return idx;
            }
            idx += 1;
        }
    }

    fn traverse(&mut self, root: u32, next_value: &mut u32) {
        let graph = self.graph;
        let mut stack: Vec<(u32, Option<u32>)> = vec![(root, graph.first_slot(root))];
        while let Some(top) = stack.last_mut() {
            let (v, cursor) = *top;
            let Some(slot) = cursor else {
                stack.pop();
                continue;
            };
            top.1 = graph.next_slot(slot);
            let nb = graph.target(slot);
            if self.visited.test(nb as usize) {
                continue;
            }
            *next_value = self.next_unused_edge(*next_value);
            self.g[nb as usize] = next_value.wrapping_sub(self.g[v as usize]);
            self.visited.set(nb as usize);
            *next_value += 1;
            stack.push((nb, graph.first_slot(nb)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::VecKeys;
    use rand::SeedableRng;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("bmz-key-{i}")).collect()
    }

    fn build_with_c(keys: &[String], c: f64) -> Bmz {
        let mut rng = StdRng::seed_from_u64(3);
        let cfg = BuildConfig {
            c,
            ..BuildConfig::new(Algo::Bmz)
        };
        Bmz::build(&mut VecKeys::new(keys), &cfg, &mut rng).unwrap()
    }

    fn assert_minimal(mph: &Bmz, keys: &[String]) {
        let mut seen = BitSet::new(keys.len());
        for k in keys {
            let i = mph.search(k.as_bytes()) as usize;
            assert!(i < keys.len(), "{i} out of range");
            assert!(!seen.test(i), "collision at {i}");
            seen.set(i);
        }
    }

    #[test]
    fn test_exact_labelling() {
        let keys = keys(2000);
        let mph = build_with_c(&keys, 0.0);
        assert_eq!(mph.n, (1.15f64 * 2000.0).ceil() as u32);
        assert_minimal(&mph, &keys);
    }

    #[test]
    fn test_heuristic_labelling() {
        let keys = keys(2000);
        let mph = build_with_c(&keys, 1.0);
        assert_eq!(mph.n, 2000);
        assert_minimal(&mph, &keys);
    }

    #[test]
    fn test_small_sets() {
        for n in [1, 2, 3, 10] {
            let keys = keys(n);
            assert_minimal(&build_with_c(&keys, 0.0), &keys);
        }
    }

    #[test]
    fn test_dump_load_and_packed() {
        let keys = keys(400);
        let mph = build_with_c(&keys, 0.0);
        let mut buf = Vec::new();
        mph.dump_body(&mut buf).unwrap();
        assert_eq!(Bmz::load_body(&mut buf.as_slice()).unwrap(), mph);

        let mut packed = Vec::new();
        mph.pack(&mut packed);
        assert_eq!(packed.len(), mph.packed_size());
        for k in &keys {
            assert_eq!(Bmz::search_packed(&packed, k.as_bytes()), mph.search(k.as_bytes()));
        }
    }

    #[test]
    fn test_labelling_of_a_cycle() {
        // square 0-1-2-3 with a path 3-4-5-6 and a pendant 7
        let mut graph = Graph::new(8, 8);
        for (a, b) in [(0, 1), (1, 2), (2, 3), (3, 0), (3, 4), (4, 5), (5, 6), (1, 7)] {
            graph.add_edge(a, b);
        }
        let critical = graph.critical_nodes();
        let mut labeller = Labeller::new(&graph, &critical);
        assert!(labeller.label_critical(true));
        labeller.label_non_critical();
        let mut sums: Vec<u32> = (0..8)
            .map(|e| {
                let (a, b) = (graph.vertex_id(e, 0), graph.vertex_id(e, 1));
                labeller.g[a as usize].wrapping_add(labeller.g[b as usize])
            })
            .collect();
        sums.sort_unstable();
        assert_eq!(sums, (0..8).collect::<Vec<u32>>());
    }
}

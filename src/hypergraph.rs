//! 3-uniform hypergraph for BDZ and BDZ_PH.
//!
//! Vertices fall into three partitions of `r` each; every key adds one edge
//! with a vertex in each partition. Peeling yields the elimination order the
//! 2-bit assignment replays in reverse.

use crate::error::MphError;
use crate::hash::{HashState, KeyHasher};
use crate::keys::{KeySource, scan_keys};

/// Partition size for `m` keys at ratio `c`: `ceil(c * m / 3)`, forced odd.
#[inline]
pub(crate) fn partition_size(c: f64, m: u32) -> u32 {
    let r = ((c * m as f64) / 3.0).ceil() as u32;
    if r % 2 == 0 { r + 1 } else { r }
}

/// Edge of `key`: one vertex per partition.
#[inline]
pub(crate) fn edge_vertices(hash: &HashState, key: &[u8], r: u32) -> [u32; 3] {
    let hl = hash.hash_vector(key);
    [hl[0] % r, hl[1] % r + r, hl[2] % r + (r << 1)]
}

/// One step of the peel: `edge` was removed through its vertex `pivot`
/// (index 0..3 into the edge), which had no other live edge at that time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Peel {
    pub edge: u32,
    pub pivot: u8,
}

#[derive(Debug, Clone)]
pub(crate) struct Hypergraph {
    nvertices: u32,
    edges: Vec<[u32; 3]>,
}

impl Hypergraph {
    pub fn new(nvertices: u32, nedges: u32) -> Self {
        Self {
            nvertices,
            edges: Vec::with_capacity(nedges as usize),
        }
    }

    #[inline]
    pub fn edge(&self, e: u32) -> [u32; 3] {
        self.edges[e as usize]
    }

    /// Edges mapped so far, not the reserved capacity.
    #[inline]
    pub fn len_edges(&self) -> u32 {
        self.edges.len() as u32
    }

    pub fn add_edge(&mut self, v: [u32; 3]) {
        debug_assert!(v.iter().all(|&x| x < self.nvertices));
        self.edges.push(v);
    }

    /// Rebuilds the edge set from the keys under `hash`.
    pub fn map_keys(&mut self, src: &mut dyn KeySource, hash: &HashState, r: u32) -> Result<(), MphError> {
        self.edges.clear();
        scan_keys(src, |_, key| {
            self.add_edge(edge_vertices(hash, key, r));
            Ok(true)
        })?;
        Ok(())
    }

    /// Peel order of every edge, or `None` when a 2-core remains.
    /// Steps:
    /// 1) degrees and CSR offsets
    /// 2) incidence lists
    /// 3) queue of degree-1 vertices, each removing its last live edge
    pub fn peel(&self) -> Option<Vec<Peel>> {
        let nv = self.nvertices as usize;
        let ne = self.edges.len();

        // 1) Degrees and offsets
        let mut deg = vec![0u32; nv];
        for e in &self.edges {
            for &v in e {
                deg[v as usize] += 1;
            }
        }
        let mut off = vec![0usize; nv + 1];
        for v in 0..nv {
            off[v + 1] = off[v] + deg[v] as usize;
        }

        // 2) Incidence lists
        let mut cur = off.clone();
        let mut incidence = vec![0u32; off[nv]];
        for (eid, e) in self.edges.iter().enumerate() {
            for &v in e {
                incidence[cur[v as usize]] = eid as u32;
                cur[v as usize] += 1;
            }
        }

        // 3) Peeling
        let mut queue: Vec<u32> = (0..self.nvertices).filter(|&v| deg[v as usize] == 1).collect();
        let mut head = 0usize;
        let mut removed = vec![false; ne];
        let mut order = Vec::with_capacity(ne);
        while head < queue.len() {
            let u = queue[head];
            head += 1;
            if deg[u as usize] != 1 {
                continue;
            }
            let live = incidence[off[u as usize]..off[u as usize + 1]]
                .iter()
                .copied()
                .find(|&e| !removed[e as usize]);
            let Some(e) = live else {
                continue;
            };
            removed[e as usize] = true;
            let verts = self.edges[e as usize];
            let pivot = verts.iter().position(|&v| v == u).unwrap_or(0) as u8;
            order.push(Peel { edge: e, pivot });
            for v in verts {
                deg[v as usize] -= 1;
                if deg[v as usize] == 1 {
                    queue.push(v);
                }
            }
        }

        (order.len() == ne).then_some(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_size_is_odd() {
        assert_eq!(partition_size(1.23, 3), 3);
        assert_eq!(partition_size(1.23, 100), 41);
        assert_eq!(partition_size(1.23, 98), 41);
        assert_eq!(partition_size(1.0, 6), 3);
    }

    #[test]
    fn test_peel_tree_like() {
        // r = 3: vertices 0..3 | 3..6 | 6..9
        let mut g = Hypergraph::new(9, 3);
        g.add_edge([0, 3, 6]);
        g.add_edge([0, 4, 7]);
        g.add_edge([1, 4, 8]);
        let order = g.peel().unwrap();
        assert_eq!(order.len(), 3);
        // every pivot is absent from all edges peeled after it
        for (i, p) in order.iter().enumerate() {
            let v = g.edge(p.edge)[p.pivot as usize];
            for later in &order[i + 1..] {
                assert!(!g.edge(later.edge).contains(&v));
            }
        }
    }

    #[test]
    fn test_two_core_is_not_peelable() {
        let mut g = Hypergraph::new(6, 2);
        g.add_edge([0, 2, 4]);
        g.add_edge([0, 2, 4]);
        assert!(g.peel().is_none());
        assert_eq!(g.len_edges(), 2);
    }
}

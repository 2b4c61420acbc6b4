//! Undirected multigraph for the two-hash algorithms (CHM, BMZ, BMZ8).
//!
//! Each edge `e` occupies two adjacency slots: slot `e` lives in the list of
//! its first endpoint and points at the second, slot `e + m` the reverse.
//! Cycle and 2-core detection peel degree-1 edges against a scratch bitset,
//! so the graph itself is never mutated by them.

use crate::util::BitSet;

const EMPTY: u32 = u32::MAX;

#[derive(Debug, Clone)]
pub(crate) struct Graph {
    nnodes: u32,
    nedges: u32,
    cedges: u32,
    first: Vec<u32>,
    edges: Vec<u32>,
    next: Vec<u32>,
}

impl Graph {
    pub fn new(nnodes: u32, nedges: u32) -> Self {
        Self {
            nnodes,
            nedges,
            cedges: 0,
            first: vec![EMPTY; nnodes as usize],
            edges: vec![0; 2 * nedges as usize],
            next: vec![EMPTY; 2 * nedges as usize],
        }
    }

    #[inline]
    pub fn nnodes(&self) -> u32 {
        self.nnodes
    }

    /// Edges inserted so far, not the capacity given to [`Graph::new`].
    #[inline]
    pub fn len_edges(&self) -> u32 {
        self.cedges
    }

    pub fn clear_edges(&mut self) {
        self.cedges = 0;
        self.first.fill(EMPTY);
        self.next.fill(EMPTY);
    }

    /// Panics when more edges are added than the graph was sized for.
    pub fn add_edge(&mut self, v1: u32, v2: u32) {
        assert!(self.cedges < self.nedges, "graph edge capacity exceeded");
        let e = self.cedges as usize;
        let m = self.nedges as usize;
        self.next[e] = self.first[v1 as usize];
        self.first[v1 as usize] = e as u32;
        self.edges[e] = v2;

        self.next[e + m] = self.first[v2 as usize];
        self.first[v2 as usize] = (e + m) as u32;
        self.edges[e + m] = v1;
        self.cedges += 1;
    }

    #[inline]
    fn abs_edge(&self, slot: u32, id: u32) -> usize {
        (slot % self.nedges + id * self.nedges) as usize
    }

    #[inline]
    fn check_edge(&self, slot: u32, v1: u32, v2: u32) -> bool {
        let a = self.edges[self.abs_edge(slot, 0)];
        let b = self.edges[self.abs_edge(slot, 1)];
        (a == v1 && b == v2) || (a == v2 && b == v1)
    }

    pub fn contains_edge(&self, v1: u32, v2: u32) -> bool {
        let mut slot = self.first[v1 as usize];
        while slot != EMPTY {
            if self.check_edge(slot, v1, v2) {
                return true;
            }
            slot = self.next[slot as usize];
        }
        false
    }

    /// Endpoint `id` (0 or 1) of edge `e`.
    #[inline]
    pub fn vertex_id(&self, e: u32, id: u32) -> u32 {
        self.edges[self.abs_edge(e, id)]
    }

    /// First adjacency slot of `v`, or `None` for an isolated vertex.
    #[inline]
    pub fn first_slot(&self, v: u32) -> Option<u32> {
        let s = self.first[v as usize];
        (s != EMPTY).then_some(s)
    }

    #[inline]
    pub fn next_slot(&self, slot: u32) -> Option<u32> {
        let s = self.next[slot as usize];
        (s != EMPTY).then_some(s)
    }

    /// Vertex at the far end of `slot`.
    #[inline]
    pub fn target(&self, slot: u32) -> u32 {
        self.edges[slot as usize]
    }

    /// Key index of the edge behind `slot`.
    #[inline]
    pub fn edge_id(&self, slot: u32) -> u32 {
        slot % self.nedges
    }

    pub fn neighbors(&self, v: u32) -> Neighbors<'_> {
        Neighbors {
            graph: self,
            slot: self.first_slot(v),
        }
    }

    /// The single live edge slot at `v`, if `v` has live degree exactly one.
    fn find_degree1_edge(&self, v: u32, deleted: &BitSet) -> Option<u32> {
        let mut found = None;
        let mut slot = self.first_slot(v);
        while let Some(s) = slot {
            if !deleted.test(self.abs_edge(s, 0)) {
                if found.is_some() {
                    return None;
                }
                found = Some(s);
            }
            slot = self.next_slot(s);
        }
        found
    }

    /// Peels the chain of degree-1 edges starting at `v`.
    fn cyclic_del_edge(&self, v: u32, deleted: &mut BitSet) {
        let mut v1 = v;
        let Some(mut e) = self.find_degree1_edge(v1, deleted) else {
            return;
        };
        loop {
            deleted.set(self.abs_edge(e, 0));
            let mut v2 = self.edges[self.abs_edge(e, 0)];
            if v2 == v1 {
                v2 = self.edges[self.abs_edge(e, 1)];
            }
            match self.find_degree1_edge(v2, deleted) {
                Some(next) => {
                    e = next;
                    v1 = v2;
                }
                None => break,
            }
        }
    }

    /// Edges surviving the peel, i.e. the 2-core.
    fn peel(&self) -> BitSet {
        let mut deleted = BitSet::new(self.nedges as usize);
        for v in 0..self.nnodes {
            self.cyclic_del_edge(v, &mut deleted);
        }
        deleted
    }

    pub fn is_cyclic(&self) -> bool {
        let deleted = self.peel();
        (0..self.cedges as usize).any(|e| !deleted.test(e))
    }

    /// Vertices touched by an edge of the 2-core.
    pub fn critical_nodes(&self) -> BitSet {
        let deleted = self.peel();
        let mut critical = BitSet::new(self.nnodes as usize);
        for e in 0..self.cedges as usize {
            if !deleted.test(e) {
                critical.set(self.edges[e] as usize);
                critical.set(self.edges[e + self.nedges as usize] as usize);
            }
        }
        critical
    }
}

/// Neighbors of a vertex as `(vertex, edge id)`, most recently added first.
pub(crate) struct Neighbors<'a> {
    graph: &'a Graph,
    slot: Option<u32>,
}

impl Iterator for Neighbors<'_> {
    type Item = (u32, u32);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let s = self.slot?;
        self.slot = self.graph.next_slot(s);
        Some((self.graph.target(s), self.graph.edge_id(s)))
    }
}

/// Vertex count for `m` keys at ratio `c`. Never below 2, so two distinct
/// endpoints always exist, and above `m` for up to 3 keys: with `m` vertices
/// and `m <= 3` every graph is a multi-edge or a cycle.
#[inline]
pub(crate) fn graph_size(c: f64, m: u32) -> u32 {
    let n = ((c * m as f64).ceil() as u32).max(2);
    if m <= 3 { n.max(m + 1) } else { n }
}

/// Maps two digests onto distinct vertices when possible: on a clash the
/// second endpoint moves to the next vertex, wrapping at `n`.
#[inline]
pub(crate) fn endpoints(h1: u32, h2: u32, n: u32) -> (u32, u32) {
    let a = h1 % n;
    let mut b = h2 % n;
    if a == b {
        b += 1;
        if b >= n {
            b = 0;
        }
    }
    (a, b)
}

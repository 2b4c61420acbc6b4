use crate::codec::{PackExt, PackedCursor, ReadExt, WriteExt};
use crate::compressed_seq::{CompressedSeq, CompressedSeqRef};
use crate::config::{Algo, BuildConfig};
use crate::error::MphError;
use crate::hash::{HashKind, HashState, KeyHasher};
use crate::keys::{KeySource, scan_keys};
use crate::util::BitSet;
use log::{debug, info, warn};
use rand::rngs::StdRng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Perfect (not minimal) hash by CHD (compress, hash and displace):
/// - keys fall into `nbuckets` small buckets
/// - each bucket gets a displacement `d` so that all of its keys land in
///   free bins among `n` (prime)
/// - displacements are stored in a [`CompressedSeq`]
///
/// Query: g = h0 % nbuckets, d = disp[g],
/// f(k) = (f + h * (d % n) + d / n) % n
///
/// With `keys_per_bin > 1` up to that many keys share one bin.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChdPh {
    hash: HashState,
    cs: CompressedSeq, // one displacement per bucket
    n: u32,
    nbuckets: u32,
}

impl ChdPh {
    pub const DEFAULT_KEYS_PER_BUCKET: u32 = 4;
    pub const MIN_LOAD_FACTOR: f64 = 0.5;
    pub const MAX_LOAD_FACTOR: f64 = 0.99;

    pub(crate) fn build(
        src: &mut dyn KeySource,
        cfg: &BuildConfig,
        rng: &mut StdRng,
    ) -> Result<Self, MphError> {
        let keys_per_bin = if cfg.keys_per_bin <= 1 || cfg.keys_per_bin >= 128 {
            1
        } else {
            cfg.keys_per_bin
        };
        let (mph, _) = Self::build_with_occupancy(src, cfg, rng, keys_per_bin, Algo::ChdPh)?;
        Ok(mph)
    }

    /// Builds and also hands back the final bin occupancy, from which CHD
    /// derives the free bins. `algo` only labels logs and errors.
    pub(crate) fn build_with_occupancy(
        src: &mut dyn KeySource,
        cfg: &BuildConfig,
        rng: &mut StdRng,
        keys_per_bin: u32,
        algo: Algo,
    ) -> Result<(Self, Occupancy), MphError> {
        let m = src.nkeys();
        let keys_per_bucket = if cfg.b < 1 || cfg.b >= 15 {
            Self::DEFAULT_KEYS_PER_BUCKET
        } else {
            cfg.b
        };
        let nbuckets = m / keys_per_bucket + 1;
        let load = cfg.c.clamp(Self::MIN_LOAD_FACTOR, Self::MAX_LOAD_FACTOR);
        let n = bin_count(m, keys_per_bin, load);
        let max_probes = ((m as f64).log2() / 20.0 * (1u32 << 20) as f64) as u32;

        let mut occupancy = Occupancy::new(n, keys_per_bin);
        let mut disp = vec![0u32; nbuckets as usize];
        let limit = cfg.limits.chd_searching;
        for attempt in 1..=limit {
            info!("{algo}: mapping {m} keys into {nbuckets} buckets over {n} bins");
            let Some(map) = mapping(src, cfg, rng, n, nbuckets, algo)? else {
                warn!("{algo}: no bucket mapping after {} iterations", cfg.limits.chd_mapping);
                return Err(MphError::Unresolvable(algo));
            };

            info!("{algo}: ordering step");
            let order = ordering(&map, nbuckets);

            info!("{algo}: searching step");
            let placed = if cfg.chd_heuristic {
                place_by_size(&map, &order, &mut occupancy, n, max_probes, &mut disp)
            } else {
                place_each(&map, &order, &mut occupancy, n, max_probes, &mut disp)
            };
            if placed {
                info!("{algo}: compressing displacements");
                let mph = Self {
                    hash: map.hash,
                    cs: CompressedSeq::new(&disp),
                    n,
                    nbuckets,
                };
                return Ok((mph, occupancy));
            }
            occupancy.reset();
            debug!(
                "{algo}: displacement search failed, {} iterations remaining",
                limit - attempt
            );
        }
        warn!("{algo}: no displacement found after {limit} iterations");
        Err(MphError::Unresolvable(algo))
    }

    /// Output range: the bin count `n`.
    #[inline]
    pub fn size(&self) -> u32 {
        self.n
    }

    #[inline]
    pub fn search(&self, key: &[u8]) -> u32 {
        bin_of(&self.hash, self.n, self.nbuckets, |g| self.cs.query(g), key)
    }

    pub(crate) fn dump_body<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        self.hash.write_to(w)?;
        let mut cs = Vec::with_capacity(self.cs.packed_size());
        self.cs.pack(&mut cs);
        w.write_blob(&cs)?;
        w.write_u32(self.n)?;
        w.write_u32(self.nbuckets)
    }

    pub(crate) fn load_body<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        let hash = HashState::read_from(r)?;
        let cs = CompressedSeq::read_from(&mut r.read_blob()?.as_slice())?;
        let n = r.read_u32()?;
        let nbuckets = r.read_u32()?;
        Self::checked(hash, cs, n, nbuckets)
    }

    /// Owned copy of a buffer written by [`ChdPh::pack`].
    pub(crate) fn unpack(mut buf: &[u8]) -> Result<Self, MphError> {
        let r = &mut buf;
        let tag = r.read_u32()?;
        let kind = HashKind::from_tag(tag)
            .ok_or_else(|| MphError::Corrupt(format!("chd_ph hash tag {tag}")))?;
        let hash = HashState::with_seed(kind, r.read_u32()?);
        let n = r.read_u32()?;
        let nbuckets = r.read_u32()?;
        let cs = CompressedSeq::read_from(r)?;
        Self::checked(hash, cs, n, nbuckets)
    }

    fn checked(hash: HashState, cs: CompressedSeq, n: u32, nbuckets: u32) -> Result<Self, MphError> {
        if n < 3 || nbuckets == 0 || cs.len() != nbuckets {
            return Err(MphError::Corrupt(format!(
                "chd_ph with n={n} nbuckets={nbuckets} displacements={}",
                cs.len()
            )));
        }
        Ok(Self { hash, cs, n, nbuckets })
    }

    pub fn packed_size(&self) -> usize {
        HashState::PACKED_TAGGED_SIZE + 8 + self.cs.packed_size()
    }

    /// h (tagged), n, nbuckets, compressed displacements.
    pub fn pack(&self, out: &mut Vec<u8>) {
        self.hash.pack_tagged(out);
        out.put_u32(self.n);
        out.put_u32(self.nbuckets);
        self.cs.pack(out);
    }

    pub(crate) fn search_packed(buf: &[u8], key: &[u8]) -> u32 {
        let mut cur = PackedCursor::new(buf);
        let hash = HashState::read_packed(&mut cur);
        let n = cur.u32();
        let nbuckets = cur.u32();
        let cs = CompressedSeqRef::read(&mut cur);
        bin_of(&hash, n, nbuckets, |g| cs.query(g), key)
    }
}

/// Residues of one key: first bin and step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Item {
    f: u32,
    h: u32, // in [1, n)
}

#[inline]
fn position(item: Item, p0: u32, p1: u32, n: u32) -> u32 {
    ((item.f as u64 + item.h as u64 * p0 as u64 + p1 as u64) % n as u64) as u32
}

#[inline]
fn bin_of<D: Fn(u32) -> u32>(hash: &HashState, n: u32, nbuckets: u32, disp: D, key: &[u8]) -> u32 {
    let hl = hash.hash_vector(key);
    let item = Item {
        f: hl[1] % n,
        h: hl[2] % (n - 1) + 1,
    };
    let d = disp(hl[0] % nbuckets);
    position(item, d % n, d / n, n)
}

/// Bins taken so far: one bit per bin, or a counter per bin when several
/// keys may share it.
#[derive(Debug, Clone)]
pub(crate) enum Occupancy {
    Bits(BitSet),
    Counts { counts: Vec<u8>, cap: u8 },
}

impl Occupancy {
    fn new(n: u32, keys_per_bin: u32) -> Self {
        if keys_per_bin == 1 {
            Occupancy::Bits(BitSet::new(n as usize))
        } else {
            Occupancy::Counts {
                counts: vec![0; n as usize],
                cap: keys_per_bin as u8,
            }
        }
    }

    #[inline]
    pub fn is_occupied(&self, pos: u32) -> bool {
        match self {
            Occupancy::Bits(bits) => bits.test(pos as usize),
            Occupancy::Counts { counts, .. } => counts[pos as usize] > 0,
        }
    }

    /// Claims one slot of bin `pos`; `false` when it is full.
    #[inline]
    fn take(&mut self, pos: u32) -> bool {
        match self {
            Occupancy::Bits(bits) => {
                if bits.test(pos as usize) {
                    return false;
                }
                bits.set(pos as usize);
            }
            Occupancy::Counts { counts, cap } => {
                let c = &mut counts[pos as usize];
                if *c >= *cap {
                    return false;
                }
                *c += 1;
            }
        }
        true
    }

    #[inline]
    fn release(&mut self, pos: u32) {
        match self {
            Occupancy::Bits(bits) => bits.clear(pos as usize),
            Occupancy::Counts { counts, .. } => counts[pos as usize] -= 1,
        }
    }

    fn reset(&mut self) {
        match self {
            Occupancy::Bits(bits) => *bits = BitSet::new(bits.len()),
            Occupancy::Counts { counts, .. } => counts.fill(0),
        }
    }
}

/// Keys grouped by bucket: bucket `b` owns `items[start[b]..start[b + 1]]`.
struct Mapping {
    hash: HashState,
    items: Vec<Item>,
    start: Vec<u32>,
    max_bucket_size: u32,
}

impl Mapping {
    #[inline]
    fn bucket(&self, b: u32) -> &[Item] {
        &self.items[self.start[b as usize] as usize..self.start[b as usize + 1] as usize]
    }

    #[inline]
    fn bucket_size(&self, b: u32) -> u32 {
        self.start[b as usize + 1] - self.start[b as usize]
    }
}

/// Draws hash functions until no bucket holds two keys with equal residues,
/// which no displacement could separate. `Ok(None)` once the limit is hit.
fn mapping(
    src: &mut dyn KeySource,
    cfg: &BuildConfig,
    rng: &mut StdRng,
    n: u32,
    nbuckets: u32,
    algo: Algo,
) -> Result<Option<Mapping>, MphError> {
    let m = src.nkeys();
    let limit = cfg.limits.chd_mapping;
    let mut keyed: Vec<(u32, Item)> = Vec::with_capacity(m as usize);
    for attempt in 1..=limit {
        let hash = HashState::new(cfg.hash_kind(0), m, rng);
        keyed.clear();
        scan_keys(src, |_, key| {
            let hl = hash.hash_vector(key);
            let item = Item {
                f: hl[1] % n,
                h: hl[2] % (n - 1) + 1,
            };
            keyed.push((hl[0] % nbuckets, item));
            Ok(true)
        })?;
        if let Some(map) = group(hash, &keyed, nbuckets) {
            return Ok(Some(map));
        }
        debug!(
            "{algo}: indistinguishable keys in one bucket, {} iterations remaining",
            limit - attempt
        );
    }
    Ok(None)
}

fn group(hash: HashState, keyed: &[(u32, Item)], nbuckets: u32) -> Option<Mapping> {
    let mut start = vec![0u32; nbuckets as usize + 1];
    for &(g, _) in keyed {
        start[g as usize + 1] += 1;
    }
    let max_bucket_size = start.iter().copied().max().unwrap_or(0);
    for b in 0..nbuckets as usize {
        start[b + 1] += start[b];
    }

    let mut fill = start.clone();
    let mut items = vec![Item::default(); keyed.len()];
    for &(g, item) in keyed {
        let lo = start[g as usize] as usize;
        let at = fill[g as usize] as usize;
        if items[lo..at].contains(&item) {
            return None;
        }
        items[at] = item;
        fill[g as usize] += 1;
    }
    Some(Mapping {
        hash,
        items,
        start,
        max_bucket_size,
    })
}

/// Non-empty bucket ids by descending size; ids ascend within one size.
fn ordering(map: &Mapping, nbuckets: u32) -> Vec<u32> {
    let max = map.max_bucket_size as usize;
    let mut count = vec![0u32; max + 1];
    for b in 0..nbuckets {
        count[map.bucket_size(b) as usize] += 1;
    }
    let mut next = vec![0u32; max + 1];
    let mut total = 0u32;
    for s in (1..=max).rev() {
        next[s] = total;
        total += count[s];
    }
    let mut order = vec![0u32; total as usize];
    for b in 0..nbuckets {
        let s = map.bucket_size(b) as usize;
        if s == 0 {
            continue;
        }
        order[next[s] as usize] = b;
        next[s] += 1;
    }
    order
}

/// Probe pair `(p0, p1)` walked with `p0` fastest; `p0 + p1 * n` is the
/// displacement that gets stored.
#[derive(Debug, Default)]
struct Probe {
    p0: u32,
    p1: u32,
    count: u32,
}

impl Probe {
    #[inline]
    fn disp(&self, n: u32) -> u32 {
        self.p0 + self.p1 * n
    }

    /// `false` once the probe budget or the `p1` range is spent.
    #[inline]
    fn advance(&mut self, n: u32, max_probes: u32) -> bool {
        self.p0 += 1;
        if self.p0 >= n {
            self.p0 -= n;
            self.p1 += 1;
        }
        self.count += 1;
        self.count < max_probes && self.p1 < n
    }
}

/// Claims a bin for every item, or none of them.
fn try_place(occupancy: &mut Occupancy, items: &[Item], probe: &Probe, n: u32) -> bool {
    for (i, &item) in items.iter().enumerate() {
        if !occupancy.take(position(item, probe.p0, probe.p1, n)) {
            for &prev in &items[..i] {
                occupancy.release(position(prev, probe.p0, probe.p1, n));
            }
            return false;
        }
    }
    true
}

/// Exhaustive variant: each bucket in turn walks the probes until it fits.
fn place_each(
    map: &Mapping,
    order: &[u32],
    occupancy: &mut Occupancy,
    n: u32,
    max_probes: u32,
    disp: &mut [u32],
) -> bool {
    for &b in order {
        let items = map.bucket(b);
        let mut probe = Probe::default();
        while !try_place(occupancy, items, &probe, n) {
            if !probe.advance(n, max_probes) {
                return false;
            }
        }
        disp[b as usize] = probe.disp(n);
    }
    true
}

/// Heuristic variant: all pending buckets of one size try the same probe,
/// and only those that failed move on to the next one.
fn place_by_size(
    map: &Mapping,
    order: &[u32],
    occupancy: &mut Occupancy,
    n: u32,
    max_probes: u32,
    disp: &mut [u32],
) -> bool {
    for same_size in order.chunk_by(|&a, &b| map.bucket_size(a) == map.bucket_size(b)) {
        let mut pending = same_size.to_vec();
        let mut probe = Probe::default();
        loop {
            pending.retain(|&b| {
                let placed = try_place(occupancy, map.bucket(b), &probe, n);
                if placed {
                    disp[b as usize] = probe.disp(n);
                }
                !placed
            });
            if pending.is_empty() {
                break;
            }
            if !probe.advance(n, max_probes) {
                return false;
            }
        }
    }
    true
}

/// Smallest prime `>= m / (keys_per_bin * load) + 1`.
fn bin_count(m: u32, keys_per_bin: u32, load: f64) -> u32 {
    let mut n = (m as f64 / (keys_per_bin as f64 * load)) as u32 + 1;
    if n % 2 == 0 {
        n += 1;
    }
    while !is_prime(n) {
        n += 2;
    }
    n
}

/// Deterministic Miller-Rabin; bases 2, 7 and 61 cover every `u32`.
fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    for p in [2u32, 3, 5, 7, 11, 13, 61] {
        if n % p == 0 {
            return n == p;
        }
    }
    let n = n as u64;
    let s = (n - 1).trailing_zeros();
    let d = (n - 1) >> s;
    'witness: for a in [2u64, 7, 61] {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = x * x % n;
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut acc = 1u64;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc * base % m;
        }
        base = base * base % m;
        exp >>= 1;
    }
    acc
}

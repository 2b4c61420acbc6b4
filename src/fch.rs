use crate::codec::{PackExt, PackedCursor, ReadExt, WriteExt, le_u32};
use crate::config::{Algo, BuildConfig};
use crate::error::MphError;
use crate::hash::{HashState, KeyHasher};
use crate::keys::{KeySource, collect_keys};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Minimal perfect hash by FCH (Fox, Chen and Heath):
/// - `h1` sends keys into `b` buckets through a skewed map, so roughly 60%
///   of the keys crowd 30% of the buckets
/// - buckets are fitted largest first, each by one offset `g[bucket]`
///
/// Query: f(k) = (h2(k) % m + g[mix(h1(k) % m)]) % m
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Fch {
    hashes: [HashState; 2],
    m: u32,
    c: f64,      // bits per key
    b: u32,      // buckets
    p1: u32,     // keys below p1 go to the first p2 buckets
    p2: u32,
    g: Vec<u32>, // length == b
}

impl Fch {
    pub const DEFAULT_C: f64 = 2.6;

    pub(crate) fn build(
        src: &mut dyn KeySource,
        cfg: &BuildConfig,
        rng: &mut StdRng,
    ) -> Result<Self, MphError> {
        let m = src.nkeys();
        let c = if cfg.c <= 2.0 { Self::DEFAULT_C } else { cfg.c };
        let (b, p1, p2) = params(c, m);
        let keys = collect_keys(src)?;

        let limit = cfg.limits.fch;
        for attempt in 1..=limit {
            info!("fch: mapping {m} keys into {b} buckets");
            let h1 = HashState::new(cfg.hash_kind(0), m, rng);
            let buckets = Buckets::new(&keys, |key| mix(b, p1, p2, h1.hash(key) % m), b);
            info!("fch: ordering step");
            let order = buckets.by_size();
            info!("fch: searching step");
            if let Some((h2, g)) = searching(&keys, &buckets, &order, m, b, cfg, rng) {
                return Ok(Self {
                    hashes: [h1, h2],
                    m,
                    c,
                    b,
                    p1,
                    p2,
                    g,
                });
            }
            debug!("fch: searching failed, {} iterations remaining", limit - attempt);
        }
        warn!("fch: no function found after {limit} iterations");
        Err(MphError::Unresolvable(Algo::Fch))
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.m
    }

    #[inline]
    pub fn search(&self, key: &[u8]) -> u32 {
        let bucket = mix(self.b, self.p1, self.p2, self.hashes[0].hash(key) % self.m);
        offset_slot(self.hashes[1].hash(key), self.g[bucket as usize], self.m)
    }

    pub(crate) fn hashes(&self) -> &[HashState; 2] {
        &self.hashes
    }

    pub(crate) fn g(&self) -> &[u32] {
        &self.g
    }

    pub(crate) fn dump_body<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        self.hashes[0].write_to(w)?;
        self.hashes[1].write_to(w)?;
        w.write_u32(self.m)?;
        w.write_f64(self.c)?;
        w.write_u32(self.b)?;
        w.write_f64(self.p1 as f64)?;
        w.write_f64(self.p2 as f64)?;
        w.write_u32s(&self.g)
    }

    pub(crate) fn load_body<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        let hashes = [HashState::read_from(r)?, HashState::read_from(r)?];
        let m = r.read_u32()?;
        let c = r.read_f64()?;
        let b = r.read_u32()?;
        let p1 = r.read_f64()? as u32;
        let p2 = r.read_f64()? as u32;
        if m == 0 || p2 == 0 || p2 > b {
            return Err(MphError::Corrupt(format!("fch with m={m} b={b} p2={p2}")));
        }
        let g = r.read_u32s(b as usize)?;
        Ok(Self {
            hashes,
            m,
            c,
            b,
            p1,
            p2,
            g,
        })
    }

    pub fn packed_size(&self) -> usize {
        2 * HashState::PACKED_TAGGED_SIZE + 8 + 16 + 4 * self.g.len()
    }

    /// h1, h2 (each tagged), m, b, p1 and p2 as `u64`, g.
    pub fn pack(&self, out: &mut Vec<u8>) {
        self.hashes[0].pack_tagged(out);
        self.hashes[1].pack_tagged(out);
        out.put_u32(self.m);
        out.put_u32(self.b);
        out.put_u64(self.p1 as u64);
        out.put_u64(self.p2 as u64);
        out.put_u32s(&self.g);
    }

    pub(crate) fn search_packed(buf: &[u8], key: &[u8]) -> u32 {
        let mut cur = PackedCursor::new(buf);
        let h1 = HashState::read_packed(&mut cur);
        let h2 = HashState::read_packed(&mut cur);
        let m = cur.u32();
        let b = cur.u32();
        let p1 = cur.u64() as u32;
        let p2 = cur.u64() as u32;
        let bucket = mix(b, p1, p2, h1.hash(key) % m);
        offset_slot(h2.hash(key), le_u32(cur.rest(), bucket as usize * 4), m)
    }
}

/// `(b, p1, p2)` for `m` keys at `c` bits per key.
pub(crate) fn params(c: f64, m: u32) -> (u32, u32, u32) {
    let b = (c * m as f64 / ((m as f64).log2() + 1.0)).ceil() as u32;
    let p1 = (0.55 * m as f64).ceil() as u32;
    let p2 = (0.3 * b as f64).ceil() as u32;
    (b, p1, p2)
}

/// Skewed bucket of a slot `i` in `[0, m)`: the first `p1` slots share the
/// first `p2` buckets, the rest spread over the remaining ones.
#[inline]
pub(crate) fn mix(b: u32, p1: u32, p2: u32, i: u32) -> u32 {
    if i < p1 {
        i % p2
    } else {
        let i = i % b;
        if i < p2 { i + p2 } else { i }
    }
}

#[inline]
pub(crate) fn offset_slot(h2: u32, g: u32, m: u32) -> u32 {
    (((h2 % m) as u64 + g as u64) % m as u64) as u32
}

/// Key indices grouped by bucket: bucket `i` owns
/// `members[start[i]..start[i + 1]]`, in key order.
#[derive(Debug)]
struct Buckets {
    start: Vec<u32>,
    members: Vec<u32>,
}

impl Buckets {
    fn new<F: Fn(&[u8]) -> u32>(keys: &[Vec<u8>], bucket_of: F, b: u32) -> Self {
        let ids: Vec<u32> = keys.iter().map(|k| bucket_of(k.as_slice())).collect();
        let mut start = vec![0u32; b as usize + 1];
        for &id in &ids {
            start[id as usize + 1] += 1;
        }
        for i in 0..b as usize {
            start[i + 1] += start[i];
        }
        let mut fill = start.clone();
        let mut members = vec![0u32; keys.len()];
        for (k, &id) in ids.iter().enumerate() {
            members[fill[id as usize] as usize] = k as u32;
            fill[id as usize] += 1;
        }
        Self { start, members }
    }

    #[inline]
    fn bucket(&self, i: u32) -> &[u32] {
        &self.members[self.start[i as usize] as usize..self.start[i as usize + 1] as usize]
    }

    /// Non-empty buckets by descending size, ascending id within a size.
    fn by_size(&self) -> Vec<u32> {
        let nbuckets = (self.start.len() - 1) as u32;
        let size = |i: u32| (self.start[i as usize + 1] - self.start[i as usize]) as usize;
        let max = (0..nbuckets).map(size).max().unwrap_or(0);
        let mut count = vec![0u32; max + 1];
        for i in 0..nbuckets {
            count[size(i)] += 1;
        }
        let mut next = vec![0u32; max + 1];
        let mut total = 0u32;
        for s in (1..=max).rev() {
            next[s] = total;
            total += count[s];
        }
        let mut order = vec![0u32; total as usize];
        for i in 0..nbuckets {
            let s = size(i);
            if s > 0 {
                order[next[s] as usize] = i;
                next[s] += 1;
            }
        }
        order
    }
}

/// Draws `h2` until every bucket fits. Slots are tracked through a random
/// permutation: positions below `filled` hold taken slots, `map` is its
/// inverse, and a failed bucket is undone by lowering `filled` again.
fn searching(
    keys: &[Vec<u8>],
    buckets: &Buckets,
    order: &[u32],
    m: u32,
    b: u32,
    cfg: &BuildConfig,
    rng: &mut StdRng,
) -> Option<(HashState, Vec<u32>)> {
    let mut random: Vec<u32> = (0..m).collect();
    random.shuffle(rng);
    let mut map = vec![0u32; m as usize];
    for (i, &slot) in random.iter().enumerate() {
        map[slot as usize] = i as u32;
    }
    let mut g = vec![0u32; b as usize];
    let mut h2_slots = vec![0u32; keys.len()];
    let mut seen = vec![false; m as usize];

    let (mut searches, mut h2_draws) = (0u32, 0u32);
    loop {
        let h2 = HashState::new(cfg.hash_kind(1), m, rng);
        for (slot, key) in h2_slots.iter_mut().zip(keys) {
            *slot = h2.hash(key) % m;
        }
        if collides_in_bucket(buckets, order, &h2_slots, &mut seen) {
            h2_draws += 1;
            if h2_draws >= cfg.limits.fch_h2 {
                debug!("fch: no collision-free h2 after {h2_draws} draws");
                return None;
            }
            continue;
        }
        searches += 1;
        h2_draws = 0;
        if place_buckets(buckets, order, &h2_slots, m, &mut random, &mut map, &mut g) {
            return Some((h2, g));
        }
        debug!(
            "fch: bucket placement failed, {} searches remaining",
            cfg.limits.fch_searching.saturating_sub(searches)
        );
        if searches >= cfg.limits.fch_searching {
            return None;
        }
    }
}

/// Whether two keys of one bucket share `h2 % m`; no offset could split them.
fn collides_in_bucket(buckets: &Buckets, order: &[u32], h2_slots: &[u32], seen: &mut [bool]) -> bool {
    for &i in order {
        let members = buckets.bucket(i);
        let mut hit = false;
        for &k in members {
            let s = h2_slots[k as usize] as usize;
            if seen[s] {
                hit = true;
                break;
            }
            seen[s] = true;
        }
        for &k in members {
            seen[h2_slots[k as usize] as usize] = false;
        }
        if hit {
            return true;
        }
    }
    false
}

fn place_buckets(
    buckets: &Buckets,
    order: &[u32],
    h2_slots: &[u32],
    m: u32,
    random: &mut [u32],
    map: &mut [u32],
    g: &mut [u32],
) -> bool {
    let mut filled = 0u32;
    for &i in order {
        let members = buckets.bucket(i);
        let first = h2_slots[members[0] as usize];
        let mut placed = false;
        for z in 0..m - filled {
            // aim the first key at the z-th free slot
            let target = random[(filled + z) as usize];
            let offset = ((m as u64 + target as u64 - first as u64) % m as u64) as u32;
            g[i as usize] = offset;
            let mut taken = 0u32;
            placed = true;
            for &k in members {
                let slot = offset_slot(h2_slots[k as usize], offset, m) as usize;
                let y = map[slot];
                if y < filled {
                    filled -= taken;
                    placed = false;
                    break;
                }
                random.swap(y as usize, filled as usize);
                map[random[y as usize] as usize] = y;
                map[random[filled as usize] as usize] = filled;
                filled += 1;
                taken += 1;
            }
            if placed {
                break;
            }
        }
        if !placed {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::VecKeys;
    use rand::SeedableRng;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("fch/{i:x}")).collect()
    }

    fn build(keys: &[String], c: f64, seed: u64) -> Fch {
        let mut rng = StdRng::seed_from_u64(seed);
        let cfg = BuildConfig {
            c,
            ..BuildConfig::new(Algo::Fch)
        };
        Fch::build(&mut VecKeys::new(keys), &cfg, &mut rng).unwrap()
    }

    #[test]
    fn test_params() {
        assert_eq!(params(2.6, 1000), (238, 550, 72));
        assert_eq!(params(2.6, 1), (3, 1, 1));
    }

    #[test]
    fn test_mix_is_skewed_and_in_range() {
        let (b, p1, p2) = params(2.6, 1000);
        for i in 0..1000 {
            let bucket = mix(b, p1, p2, i);
            assert!(bucket < b);
            if i < p1 {
                assert!(bucket < p2);
            } else {
                assert!(bucket >= p2);
            }
        }
    }

    #[test]
    fn test_bijection() {
        for n in [1, 2, 5, 100, 3000] {
            let keys = keys(n);
            let mph = build(&keys, 0.0, 3);
            assert_eq!(mph.c, Fch::DEFAULT_C);
            let mut seen = vec![false; n];
            for k in &keys {
                let i = mph.search(k.as_bytes()) as usize;
                assert!(i < n && !seen[i], "n={n} i={i}");
                seen[i] = true;
            }
        }
    }

    #[test]
    fn test_larger_c_uses_more_buckets() {
        let keys = keys(1000);
        let wide = build(&keys, 4.0, 8);
        assert_eq!(wide.b, params(4.0, 1000).0);
        assert!(wide.b > params(2.6, 1000).0);
    }

    #[test]
    fn test_same_seed_same_function() {
        let keys = keys(500);
        assert_eq!(build(&keys, 0.0, 11), build(&keys, 0.0, 11));
    }

    #[test]
    fn test_dump_load_and_packed() {
        let keys = keys(700);
        let mph = build(&keys, 3.0, 1);
        let mut buf = Vec::new();
        mph.dump_body(&mut buf).unwrap();
        assert_eq!(Fch::load_body(&mut buf.as_slice()).unwrap(), mph);

        let mut packed = Vec::new();
        mph.pack(&mut packed);
        assert_eq!(packed.len(), mph.packed_size());
        for k in &keys {
            assert_eq!(Fch::search_packed(&packed, k.as_bytes()), mph.search(k.as_bytes()));
        }
    }

    #[test]
    fn test_buckets_group_in_key_order() {
        let keys: Vec<Vec<u8>> = (0u8..6).map(|i| vec![i]).collect();
        let buckets = Buckets::new(&keys, |k| (k[0] % 3) as u32 * 2 % 5, 5);
        // key -> bucket: 0->0, 1->2, 2->4, 3->0, 4->2, 5->4
        assert_eq!(buckets.bucket(0), &[0, 3]);
        assert_eq!(buckets.bucket(1), &[] as &[u32]);
        assert_eq!(buckets.by_size(), vec![0, 2, 4]);
    }
}

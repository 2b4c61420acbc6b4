use crate::chd_ph::ChdPh;
use crate::codec::{PackExt, PackedCursor, ReadExt, WriteExt};
use crate::compressed_rank::{CompressedRank, CompressedRankRef};
use crate::config::{Algo, BuildConfig};
use crate::error::MphError;
use crate::keys::KeySource;
use log::info;
use rand::rngs::StdRng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Minimal perfect hash by CHD: a one-key-per-bin [`ChdPh`] whose bins are
/// renumbered to skip the free ones.
///
/// Query: p = chd_ph(k), f(k) = p - (free bins below p)
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chd {
    ph: ChdPh,
    free: CompressedRank, // unoccupied bins, ascending
}

impl Chd {
    pub(crate) fn build(
        src: &mut dyn KeySource,
        cfg: &BuildConfig,
        rng: &mut StdRng,
    ) -> Result<Self, MphError> {
        let (ph, occupancy) = ChdPh::build_with_occupancy(src, cfg, rng, 1, Algo::Chd)?;
        info!("chd: ranking the free bins");
        let vals: Vec<u32> = (0..ph.size()).filter(|&p| !occupancy.is_occupied(p)).collect();
        Ok(Self {
            ph,
            free: CompressedRank::new(&vals),
        })
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.ph.size() - self.free.len()
    }

    #[inline]
    pub fn search(&self, key: &[u8]) -> u32 {
        let bin = self.ph.search(key);
        bin - self.free.query(bin)
    }

    pub(crate) fn dump_body<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let mut free = Vec::with_capacity(self.free.packed_size());
        self.free.pack(&mut free);
        w.write_blob(&free)?;
        let mut ph = Vec::with_capacity(self.ph.packed_size());
        self.ph.pack(&mut ph);
        w.write_blob(&ph)
    }

    pub(crate) fn load_body<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        let free = CompressedRank::read_from(&mut r.read_blob()?.as_slice())?;
        let ph = ChdPh::unpack(&r.read_blob()?)?;
        if free.len() >= ph.size() {
            return Err(MphError::Corrupt(format!(
                "chd with {} free bins out of {}",
                free.len(),
                ph.size()
            )));
        }
        Ok(Self { ph, free })
    }

    pub fn packed_size(&self) -> usize {
        4 + self.free.packed_size() + 4 + self.ph.packed_size()
    }

    /// Free-bin rank and CHD_PH, each prefixed by its byte length.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.put_u32(self.free.packed_size() as u32);
        self.free.pack(out);
        out.put_u32(self.ph.packed_size() as u32);
        self.ph.pack(out);
    }

    pub(crate) fn search_packed(buf: &[u8], key: &[u8]) -> u32 {
        let mut cur = PackedCursor::new(buf);
        let free_len = cur.u32() as usize;
        let free = CompressedRankRef::read(&mut PackedCursor::new(cur.bytes(free_len)));
        let ph_len = cur.u32() as usize;
        let bin = ChdPh::search_packed(cur.bytes(ph_len), key);
        bin - free.query(bin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::VecKeys;
    use rand::SeedableRng;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://host-{}/{i}", i % 7)).collect()
    }

    fn build(keys: &[String], c: f64) -> Chd {
        let mut rng = StdRng::seed_from_u64(33);
        let cfg = BuildConfig {
            c,
            ..BuildConfig::new(Algo::Chd)
        };
        Chd::build(&mut VecKeys::new(keys), &cfg, &mut rng).unwrap()
    }

    #[test]
    fn test_minimal_bijection() {
        for (n, c) in [(1, 0.0), (3, 0.0), (1000, 0.5), (5000, 0.95)] {
            let keys = keys(n);
            let mph = build(&keys, c);
            assert_eq!(mph.size(), n as u32);
            let mut seen = vec![false; n];
            for k in &keys {
                let i = mph.search(k.as_bytes()) as usize;
                assert!(i < n && !seen[i], "n={n} i={i}");
                seen[i] = true;
            }
        }
    }

    #[test]
    fn test_keys_per_bin_is_ignored() {
        let keys = keys(400);
        let mut rng = StdRng::seed_from_u64(2);
        let cfg = BuildConfig {
            keys_per_bin: 8,
            ..BuildConfig::new(Algo::Chd)
        };
        let mph = Chd::build(&mut VecKeys::new(&keys), &cfg, &mut rng).unwrap();
        assert_eq!(mph.size(), 400);
    }

    #[test]
    fn test_dump_load_and_packed() {
        let keys = keys(1500);
        let mph = build(&keys, 0.0);
        let mut buf = Vec::new();
        mph.dump_body(&mut buf).unwrap();
        assert_eq!(Chd::load_body(&mut buf.as_slice()).unwrap(), mph);

        let mut packed = Vec::new();
        mph.pack(&mut packed);
        assert_eq!(packed.len(), mph.packed_size());
        for k in &keys {
            assert_eq!(Chd::search_packed(&packed, k.as_bytes()), mph.search(k.as_bytes()));
        }
    }

    #[test]
    fn test_truncated_dump() {
        let keys = keys(50);
        let mut buf = Vec::new();
        build(&keys, 0.0).dump_body(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(Chd::load_body(&mut buf.as_slice()), Err(MphError::Io(_))));
    }
}

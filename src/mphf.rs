use crate::bdz::Bdz;
use crate::bdz_ph::BdzPh;
use crate::bmz::Bmz;
use crate::bmz8::Bmz8;
use crate::brz::Brz;
use crate::chd::Chd;
use crate::chd_ph::ChdPh;
use crate::chm::Chm;
use crate::codec::{PackExt, ReadExt, WriteExt, le_u32};
use crate::config::Algo;
use crate::error::MphError;
use crate::fch::Fch;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// A constructed (minimal) perfect hash function.
///
/// Every variant maps its key set into `[0, size())`. All but BDZ_PH and
/// CHD_PH are minimal, so `size()` equals the number of keys.
/// Searching a key outside the construction set returns an arbitrary index.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Mphf {
    Chm(Chm),
    Bmz(Bmz),
    Bmz8(Bmz8),
    Bdz(Bdz),
    BdzPh(BdzPh),
    ChdPh(ChdPh),
    Chd(Chd),
    Fch(Fch),
    Brz(Brz),
}

impl Mphf {
    pub fn algo(&self) -> Algo {
        match self {
            Mphf::Chm(_) => Algo::Chm,
            Mphf::Bmz(_) => Algo::Bmz,
            Mphf::Bmz8(_) => Algo::Bmz8,
            Mphf::Bdz(_) => Algo::Bdz,
            Mphf::BdzPh(_) => Algo::BdzPh,
            Mphf::ChdPh(_) => Algo::ChdPh,
            Mphf::Chd(_) => Algo::Chd,
            Mphf::Fch(_) => Algo::Fch,
            Mphf::Brz(_) => Algo::Brz,
        }
    }

    /// Output range of [`Mphf::search`].
    pub fn size(&self) -> u32 {
        match self {
            Mphf::Chm(f) => f.size(),
            Mphf::Bmz(f) => f.size(),
            Mphf::Bmz8(f) => f.size(),
            Mphf::Bdz(f) => f.size(),
            Mphf::BdzPh(f) => f.size(),
            Mphf::ChdPh(f) => f.size(),
            Mphf::Chd(f) => f.size(),
            Mphf::Fch(f) => f.size(),
            Mphf::Brz(f) => f.size(),
        }
    }

    #[inline]
    pub fn search(&self, key: &[u8]) -> u32 {
        match self {
            Mphf::Chm(f) => f.search(key),
            Mphf::Bmz(f) => f.search(key),
            Mphf::Bmz8(f) => f.search(key),
            Mphf::Bdz(f) => f.search(key),
            Mphf::BdzPh(f) => f.search(key),
            Mphf::ChdPh(f) => f.search(key),
            Mphf::Chd(f) => f.search(key),
            Mphf::Fch(f) => f.search(key),
            Mphf::Brz(f) => f.search(key),
        }
    }

    #[inline]
    pub fn search_str(&self, s: &str) -> u32 {
        self.search(s.as_bytes())
    }

    /// Searches every key of `keys` on the rayon pool.
    #[cfg(feature = "parallel")]
    pub fn search_batch<K: AsRef<[u8]> + Sync>(&self, keys: &[K]) -> Vec<u32> {
        use rayon::prelude::*;
        keys.par_iter().map(|k| self.search(k.as_ref())).collect()
    }

    /// Writes the native dump: algorithm name, NUL, output size, then the body.
    pub fn dump<W: Write + ?Sized>(&self, w: &mut W) -> Result<(), MphError> {
        w.write_cstr(self.algo().name())?;
        w.write_u32(self.size())?;
        match self {
            Mphf::Chm(f) => f.dump_body(w)?,
            Mphf::Bmz(f) => f.dump_body(w)?,
            Mphf::Bmz8(f) => f.dump_body(w)?,
            Mphf::Bdz(f) => f.dump_body(w)?,
            Mphf::BdzPh(f) => f.dump_body(w)?,
            Mphf::ChdPh(f) => f.dump_body(w)?,
            Mphf::Chd(f) => f.dump_body(w)?,
            Mphf::Fch(f) => f.dump_body(w)?,
            Mphf::Brz(f) => f.dump_body(w)?,
        }
        Ok(())
    }

    /// Reads a dump written by [`Mphf::dump`].
    pub fn load<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        let name = r.read_cstr()?;
        let algo = Algo::from_name(&name).ok_or(MphError::UnknownAlgorithm(name))?;
        let size = r.read_u32()?;
        let mphf = match algo {
            Algo::Chm => Mphf::Chm(Chm::load_body(r)?),
            Algo::Bmz => Mphf::Bmz(Bmz::load_body(r)?),
            Algo::Bmz8 => Mphf::Bmz8(Bmz8::load_body(r)?),
            Algo::Bdz => Mphf::Bdz(Bdz::load_body(r)?),
            Algo::BdzPh => Mphf::BdzPh(BdzPh::load_body(r)?),
            Algo::ChdPh => Mphf::ChdPh(ChdPh::load_body(r)?),
            Algo::Chd => Mphf::Chd(Chd::load_body(r)?),
            Algo::Fch => Mphf::Fch(Fch::load_body(r)?),
            Algo::Brz => Mphf::Brz(Brz::load_body(r)?),
        };
        if mphf.size() != size {
            return Err(MphError::Corrupt(format!(
                "{algo} header says size {size}, body says {}",
                mphf.size()
            )));
        }
        Ok(mphf)
    }

    /// Exact length of [`Mphf::pack`]'s output.
    pub fn packed_size(&self) -> usize {
        4 + match self {
            Mphf::Chm(f) => f.packed_size(),
            Mphf::Bmz(f) => f.packed_size(),
            Mphf::Bmz8(f) => f.packed_size(),
            Mphf::Bdz(f) => f.packed_size(),
            Mphf::BdzPh(f) => f.packed_size(),
            Mphf::ChdPh(f) => f.packed_size(),
            Mphf::Chd(f) => f.packed_size(),
            Mphf::Fch(f) => f.packed_size(),
            Mphf::Brz(f) => f.packed_size(),
        }
    }

    /// Appends the relocatable packed form: `u32` algorithm tag, then payload.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.reserve(self.packed_size());
        out.put_u32(self.algo().tag());
        match self {
            Mphf::Chm(f) => f.pack(out),
            Mphf::Bmz(f) => f.pack(out),
            Mphf::Bmz8(f) => f.pack(out),
            Mphf::Bdz(f) => f.pack(out),
            Mphf::BdzPh(f) => f.pack(out),
            Mphf::ChdPh(f) => f.pack(out),
            Mphf::Chd(f) => f.pack(out),
            Mphf::Fch(f) => f.pack(out),
            Mphf::Brz(f) => f.pack(out),
        }
    }

    pub fn to_packed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.packed_size());
        self.pack(&mut out);
        out
    }

    #[cfg(feature = "serde")]
    pub fn to_bytes(&self) -> Result<Vec<u8>, MphError> {
        Ok(bincode::serialize(self)?)
    }
    #[cfg(feature = "serde")]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MphError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Searches a buffer produced by [`Mphf::pack`] without allocating.
///
/// # Panics
/// On a buffer that was not produced by `pack`.
#[inline]
pub fn search_packed(buf: &[u8], key: &[u8]) -> u32 {
    match Algo::from_tag(le_u32(buf, 0)) {
        Some(algo) => search_payload(algo, &buf[4..], key),
        None => panic!("packed buffer carries unknown algorithm tag {}", le_u32(buf, 0)),
    }
}

#[inline]
fn search_payload(algo: Algo, payload: &[u8], key: &[u8]) -> u32 {
    match algo {
        Algo::Chm => Chm::search_packed(payload, key),
        Algo::Bmz => Bmz::search_packed(payload, key),
        Algo::Bmz8 => Bmz8::search_packed(payload, key),
        Algo::Bdz => Bdz::search_packed(payload, key),
        Algo::BdzPh => BdzPh::search_packed(payload, key),
        Algo::ChdPh => ChdPh::search_packed(payload, key),
        Algo::Chd => Chd::search_packed(payload, key),
        Algo::Fch => Fch::search_packed(payload, key),
        Algo::Brz => Brz::search_packed(payload, key),
    }
}

/// A packed buffer whose header has been checked once.
#[derive(Debug, Clone, Copy)]
pub struct PackedMphf<'a> {
    algo: Algo,
    payload: &'a [u8],
}

impl<'a> PackedMphf<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, MphError> {
        if buf.len() < 4 {
            return Err(MphError::Corrupt(format!(
                "packed buffer of {} bytes has no algorithm tag",
                buf.len()
            )));
        }
        let tag = le_u32(buf, 0);
        let algo = Algo::from_tag(tag).ok_or_else(|| MphError::UnknownAlgorithm(format!("tag {tag}")))?;
        Ok(Self {
            algo,
            payload: &buf[4..],
        })
    }

    pub fn algo(&self) -> Algo {
        self.algo
    }

    #[inline]
    pub fn search(&self, key: &[u8]) -> u32 {
        search_payload(self.algo, self.payload, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    fn words() -> Vec<String> {
        (0..300).map(|i| format!("word-{i:04}")).collect()
    }

    #[test]
    fn test_dump_header() {
        let mph = Builder::new().with_algo(Algo::Bdz).build(&words()).unwrap();
        let mut buf = Vec::new();
        mph.dump(&mut buf).unwrap();
        assert!(buf.starts_with(b"bdz\0"));
        assert_eq!(le_u32(&buf, 4), 300);
        assert_eq!(Mphf::load(&mut buf.as_slice()).unwrap(), mph);
    }

    #[test]
    fn test_load_rejects_unknown_algorithm() {
        let mut buf = b"cuckoo\0".to_vec();
        buf.extend_from_slice(&3u32.to_le_bytes());
        match Mphf::load(&mut buf.as_slice()) {
            Err(MphError::UnknownAlgorithm(name)) => assert_eq!(name, "cuckoo"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_load_rejects_size_mismatch() {
        let mph = Builder::new().with_algo(Algo::Chm).build(&words()).unwrap();
        let mut buf = Vec::new();
        mph.dump(&mut buf).unwrap();
        buf[4..8].copy_from_slice(&299u32.to_le_bytes());
        assert!(matches!(Mphf::load(&mut buf.as_slice()), Err(MphError::Corrupt(_))));
    }

    #[test]
    fn test_packed_view() {
        let keys = words();
        let mph = Builder::new().with_algo(Algo::Chd).build(&keys).unwrap();
        let packed = mph.to_packed();
        assert_eq!(packed.len(), mph.packed_size());
        assert_eq!(le_u32(&packed, 0), Algo::Chd.tag());
        let view = PackedMphf::new(&packed).unwrap();
        assert_eq!(view.algo(), Algo::Chd);
        for k in &keys {
            assert_eq!(view.search(k.as_bytes()), mph.search_str(k));
            assert_eq!(search_packed(&packed, k.as_bytes()), mph.search_str(k));
        }
    }

    #[test]
    fn test_packed_view_rejects_bad_header() {
        assert!(matches!(PackedMphf::new(&[1, 0]), Err(MphError::Corrupt(_))));
        assert!(matches!(
            PackedMphf::new(&42u32.to_le_bytes()),
            Err(MphError::UnknownAlgorithm(_))
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_bincode_round_trip() {
        let mph = Builder::new().with_algo(Algo::Fch).build(&words()).unwrap();
        let bytes = mph.to_bytes().unwrap();
        assert_eq!(Mphf::from_bytes(&bytes).unwrap(), mph);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_search_batch() {
        let keys = words();
        let mph = Builder::new().with_algo(Algo::Bmz).build(&keys).unwrap();
        let batch = mph.search_batch(&keys);
        for (k, i) in keys.iter().zip(batch) {
            assert_eq!(mph.search_str(k), i);
        }
    }
}

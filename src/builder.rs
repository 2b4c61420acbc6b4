use crate::bdz::Bdz;
use crate::bdz_ph::BdzPh;
use crate::bmz::Bmz;
use crate::bmz8::Bmz8;
use crate::brz::Brz;
use crate::chd::Chd;
use crate::chd_ph::ChdPh;
use crate::chm::Chm;
use crate::config::{Algo, BuildConfig};
use crate::error::MphError;
use crate::fch::Fch;
use crate::keys::{KeySource, VecKeys, scan_keys};
use crate::mphf::Mphf;
use ahash::RandomState;
use hashbrown::HashSet;
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Entry point for construction.
///
/// ```
/// use mph_toolkit::{Algo, Builder};
///
/// let keys = ["foo", "bar", "baz"];
/// let mph = Builder::new().with_algo(Algo::Bdz).build(&keys).unwrap();
/// assert_eq!(mph.size(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    cfg: BuildConfig,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            cfg: BuildConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: BuildConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn with_algo(mut self, algo: Algo) -> Self {
        self.cfg.algo = algo;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.cfg.seed = seed;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.cfg
    }

    /// Build over in-memory keys. **Unique** keys are required.
    pub fn build<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Mphf, MphError> {
        self.build_from(&mut VecKeys::new(keys))
    }

    /// Build over any rewindable key source.
    pub fn build_from(&self, src: &mut dyn KeySource) -> Result<Mphf, MphError> {
        let cfg = &self.cfg;
        let n = src.nkeys();
        if n == 0 {
            return Err(MphError::EmptyKeySet);
        }
        // BRZ is meant for sets that do not fit in memory.
        if cfg.reject_duplicates && cfg.algo != Algo::Brz {
            check_unique(src)?;
        }

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mphf = match cfg.algo {
            Algo::Chm => Mphf::Chm(Chm::build(src, cfg, &mut rng)?),
            Algo::Bmz => Mphf::Bmz(Bmz::build(src, cfg, &mut rng)?),
            Algo::Bmz8 => Mphf::Bmz8(Bmz8::build(src, cfg, &mut rng)?),
            Algo::Bdz => Mphf::Bdz(Bdz::build(src, cfg, &mut rng)?),
            Algo::BdzPh => Mphf::BdzPh(BdzPh::build(src, cfg, &mut rng)?),
            Algo::ChdPh => Mphf::ChdPh(ChdPh::build(src, cfg, &mut rng)?),
            Algo::Chd => Mphf::Chd(Chd::build(src, cfg, &mut rng)?),
            Algo::Fch => Mphf::Fch(Fch::build(src, cfg, &mut rng)?),
            Algo::Brz => Mphf::Brz(Brz::build(src, cfg, &mut rng)?),
        };
        info!("{}: built over {n} keys, output range {}", cfg.algo, mphf.size());
        Ok(mphf)
    }
}

/// Exact byte comparison, no probabilistic fingerprints.
fn check_unique(src: &mut dyn KeySource) -> Result<(), MphError> {
    let mut seen: HashSet<Vec<u8>, RandomState> =
        HashSet::with_capacity_and_hasher(src.nkeys() as usize, RandomState::new());
    let mut dup = false;
    scan_keys(src, |_, k| {
        dup = !seen.insert(k.to_vec());
        Ok(!dup)
    })?;
    if dup { Err(MphError::DuplicateKey) } else { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_set() {
        let keys: [&str; 0] = [];
        for algo in Algo::ALL {
            assert!(matches!(
                Builder::new().with_algo(algo).build(&keys),
                Err(MphError::EmptyKeySet)
            ));
        }
    }

    #[test]
    fn test_duplicate_key() {
        let keys = ["alpha", "beta", "gamma", "beta"];
        for algo in Algo::ALL.into_iter().filter(|&a| a != Algo::Brz) {
            assert!(matches!(
                Builder::new().with_algo(algo).build(&keys),
                Err(MphError::DuplicateKey)
            ));
        }
    }

    #[test]
    fn test_duplicates_unchecked_exhaust_retries() {
        let keys = ["same", "same"];
        let cfg = BuildConfig {
            reject_duplicates: false,
            ..BuildConfig::new(Algo::Chm)
        };
        assert!(matches!(
            Builder::new().with_config(cfg).build(&keys),
            Err(MphError::Unresolvable(Algo::Chm))
        ));
    }

    #[test]
    fn test_seed_changes_function() {
        let keys: Vec<String> = (0..200).map(|i| format!("{i}")).collect();
        let a = Builder::new().with_seed(1).build(&keys).unwrap();
        let b = Builder::new().with_seed(2).build(&keys).unwrap();
        let c = Builder::new().with_seed(1).build(&keys).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }
}

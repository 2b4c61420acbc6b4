use crate::error::MphError;
use crate::hash::HashKind;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Construction algorithm. The discriminant is the tag written at the head of
/// every packed buffer, so the order must never change.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algo {
    Bmz = 0,
    Bmz8 = 1,
    Chm = 2,
    Brz = 3,
    Fch = 4,
    Bdz = 5,
    BdzPh = 6,
    ChdPh = 7,
    Chd = 8,
}

impl Algo {
    pub const ALL: [Algo; 9] = [
        Algo::Bmz,
        Algo::Bmz8,
        Algo::Chm,
        Algo::Brz,
        Algo::Fch,
        Algo::Bdz,
        Algo::BdzPh,
        Algo::ChdPh,
        Algo::Chd,
    ];

    /// Name used in dump headers.
    pub fn name(self) -> &'static str {
        match self {
            Algo::Bmz => "bmz",
            Algo::Bmz8 => "bmz8",
            Algo::Chm => "chm",
            Algo::Brz => "brz",
            Algo::Fch => "fch",
            Algo::Bdz => "bdz",
            Algo::BdzPh => "bdz_ph",
            Algo::ChdPh => "chd_ph",
            Algo::Chd => "chd",
        }
    }

    #[inline]
    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Option<Algo> {
        Algo::ALL.get(tag as usize).copied()
    }

    pub fn from_name(name: &str) -> Option<Algo> {
        Algo::ALL.iter().copied().find(|a| a.name() == name)
    }

    /// Whether the output range is exactly `[0, m)`. BDZ_PH and CHD_PH map
    /// into a larger range of `n` slots.
    pub fn is_minimal(self) -> bool {
        !matches!(self, Algo::BdzPh | Algo::ChdPh)
    }
}

impl fmt::Display for Algo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algo {
    type Err = MphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algo::from_name(s).ok_or_else(|| MphError::UnknownAlgorithm(s.to_owned()))
    }
}

/// Retry bounds for the randomized search loops.
/// Every count here is empirical; raise one when a key set is unusually hard.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryLimits {
    /// CHM: attempts at an acyclic graph.
    pub chm: u32,
    /// BMZ/BMZ8: full mapping attempts (graph + labelling).
    pub bmz_mapping: u32,
    /// BMZ/BMZ8: hash pairs tried per mapping attempt to avoid multi-edges.
    pub bmz_edges: u32,
    /// BDZ: attempts at a peelable hypergraph.
    pub bdz: u32,
    /// BDZ_PH: attempts at a peelable hypergraph.
    pub bdz_ph: u32,
    /// CHD: bucket mappings tried per searching attempt.
    pub chd_mapping: u32,
    /// CHD: displacement searches before giving up.
    pub chd_searching: u32,
    /// FCH: mapping attempts.
    pub fch: u32,
    /// FCH: complete searches per mapping.
    pub fch_searching: u32,
    /// FCH: regenerations of the second hash per search.
    pub fch_h2: u32,
    /// BRZ: partitioning attempts.
    pub brz: u32,
    /// BRZ: temp files allowed before the memory budget is deemed too small.
    pub brz_max_flushes: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            chm: 20,
            bmz_mapping: 20,
            bmz_edges: 100,
            bdz: 1000,
            bdz_ph: 100,
            chd_mapping: 1000,
            chd_searching: 100,
            fch: 100,
            fch_searching: 10,
            fch_h2: 1000,
            brz: 20,
            brz_max_flushes: 1024,
        }
    }
}

/// Builder configuration.
/// Zero in `c`/`b` selects the algorithm default; out-of-range values are
/// clamped to it instead of rejected.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub algo: Algo,
    /// Hash kinds by role (h1, h2, h3 or h0 for BRZ). Missing entries are Jenkins.
    pub hashes: Vec<HashKind>,
    /// Space ratio: vertices per key for graph methods, load factor for CHD,
    /// bits per key for FCH.
    pub c: f64,
    /// Rank block bits (BDZ), keys per bucket (CHD) or bucket size (BRZ).
    pub b: u32,
    /// CHD_PH: keys allowed per bin (t-perfect hashing).
    pub keys_per_bin: u32,
    /// CHD: probe all buckets of one size together instead of exhausting the
    /// probes of each bucket in turn.
    pub chd_heuristic: bool,
    /// BRZ: bytes of keys buffered in memory before spilling to disk.
    pub memory_budget: usize,
    /// BRZ: parent directory for spill files. Defaults to the OS temp dir.
    pub tmp_dir: Option<PathBuf>,
    /// Seed for every random choice; same keys + same config => identical dump.
    pub seed: u64,
    /// Verify exact key uniqueness before building (skipped for BRZ).
    pub reject_duplicates: bool,
    pub limits: RetryLimits,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            algo: Algo::Chm,
            hashes: vec![HashKind::Jenkins; 3],
            c: 0.0,
            b: 0,
            keys_per_bin: 1,
            chd_heuristic: true,
            memory_budget: 1024 * 1024,
            tmp_dir: None,
            seed: 0xC0FF_EE00_D15E_A5E,
            reject_duplicates: true,
            limits: RetryLimits::default(),
        }
    }
}

impl BuildConfig {
    pub fn new(algo: Algo) -> Self {
        Self {
            algo,
            ..Default::default()
        }
    }

    /// Hash kind for role `i`.
    #[inline]
    pub(crate) fn hash_kind(&self, i: usize) -> HashKind {
        self.hashes.get(i).copied().unwrap_or_default()
    }
}

//! mph_toolkit: (minimal) perfect hash functions over static key sets.
//!
//! - Build once on a set of **unique** keys (bytes/str), pulled through a
//!   rewindable [`KeySource`].
//! - O(1) lookups: key -> unique index in `[0..size)`.
//! - Nine algorithms behind one [`Mphf`]: CHM, BMZ, BMZ8, BDZ, BDZ_PH, CHD,
//!   CHD_PH, FCH and the external-memory BRZ.
//! - Native dump/load streams and a relocatable packed buffer searchable
//!   without allocation ([`search_packed`], [`PackedMphf`]).
//! - Robust: a failed attempt (cyclic graph, unpeelable hypergraph, exhausted
//!   displacement search) is retried with fresh seeds up to [`RetryLimits`].
//!
//! Progress is reported through the `log` facade; no logger is installed.

mod bdz;
mod bdz_ph;
mod bmz;
mod bmz8;
mod brz;
mod builder;
mod chd;
mod chd_ph;
mod chm;
mod codec;
mod compressed_rank;
mod compressed_seq;
mod config;
mod error;
mod fch;
mod graph;
mod hash;
mod hypergraph;
mod keys;
mod mphf;
mod select;
mod util;

pub use bdz::Bdz;
pub use bdz_ph::BdzPh;
pub use bmz::Bmz;
pub use bmz8::Bmz8;
pub use brz::Brz;
pub use builder::Builder;
pub use chd::Chd;
pub use chd_ph::ChdPh;
pub use chm::Chm;
pub use compressed_rank::CompressedRank;
pub use compressed_seq::CompressedSeq;
pub use config::{Algo, BuildConfig, RetryLimits};
pub use error::MphError;
pub use fch::Fch;
pub use hash::{HashKind, HashState, Jenkins, KeyHasher, WyHash, Xxh3};
pub use keys::{KeySource, NlFileKeys, StructVecKeys, VecKeys};
pub use mphf::{Mphf, PackedMphf, search_packed};
pub use select::Select;

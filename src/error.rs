use crate::config::Algo;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MphError {
    #[error("duplicate key detected during build")]
    DuplicateKey,
    #[error("cannot build a perfect hash over an empty key set")]
    EmptyKeySet,
    #[error("{algo} supports at most {max} keys")]
    TooManyKeys { algo: Algo, max: u32 },
    #[error("{0}: no valid function found within the retry limit")]
    Unresolvable(Algo),
    #[error("partitioning produced {flushes} temporary files (limit {limit}); raise the memory budget")]
    TooManyFlushes { flushes: u32, limit: u32 },
    #[error("unknown algorithm `{0}`")]
    UnknownAlgorithm(String),
    #[error("unknown hash function `{0}`")]
    UnknownHash(String),
    #[error("corrupt input: {0}")]
    Corrupt(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serde")]
    #[error("serialization error: {0}")]
    Serde(#[from] Box<bincode::ErrorKind>),
}

//! External-memory minimal perfect hashing (BRZ).
//!
//! Keys are spread by `h0` into `k` buckets of at most 255 keys. Partitioning
//! streams the key source once, spilling bucket-sorted runs to temporary files
//! whenever the memory budget fills up; a k-way merge then hands each bucket
//! to a small BMZ8 or FCH solver. Only per-bucket functions stay in memory.

use crate::bmz8::{Bmz8, search_bytes};
use crate::codec::{PackExt, PackedCursor, ReadExt, WriteExt, le_u32};
use crate::config::{Algo, BuildConfig};
use crate::error::MphError;
use crate::fch::{Fch, mix, offset_slot, params};
use crate::graph::graph_size;
use crate::hash::{HashState, KeyHasher};
use crate::keys::{KeySource, VecKeys, scan_keys};
use log::{debug, info, warn};
use rand::rngs::StdRng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const MAX_BUCKET_SIZE: u32 = 255;

/// Bounds on the read buffer of each run during the merge.
const MIN_RUN_BUFFER: usize = 512;
const MAX_RUN_BUFFER: usize = 64 * 1024;

/// Splits `memory_budget` between the read buffers of `runs` open runs.
fn run_buffer_capacity(memory_budget: usize, runs: usize) -> usize {
    (memory_budget / runs.max(1)).clamp(MIN_RUN_BUFFER, MAX_RUN_BUFFER)
}

/// Minimal perfect hash by BRZ: `h0` picks a bucket, the bucket's own
/// function ranks the key inside it.
///
/// Query: i = h0(k) % k, f(k) = offset[i] + f_i(k)
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Brz {
    c: f64,
    algo: Algo, // bucket solver: Bmz8 or Fch
    m: u32,
    h0: HashState,
    size: Vec<u8>,               // keys per bucket
    offset: Vec<u32>,            // keys in all earlier buckets
    buckets: Vec<Option<Bucket>>, // None for empty buckets
}

/// Function of one bucket; `g` holds one byte per vertex (BMZ8) or per
/// FCH bucket.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
struct Bucket {
    hashes: [HashState; 2],
    g: Vec<u8>,
}

impl Brz {
    pub const DEFAULT_B: u32 = 128;

    pub(crate) fn build(
        src: &mut dyn KeySource,
        cfg: &BuildConfig,
        rng: &mut StdRng,
    ) -> Result<Self, MphError> {
        let m = src.nkeys();
        let (algo, c) = bucket_solver(cfg.c);
        let b = if cfg.b <= 64 || cfg.b >= 175 {
            Self::DEFAULT_B
        } else {
            cfg.b
        };
        let k = m.div_ceil(b);
        let sub_cfg = BuildConfig {
            c,
            hashes: cfg.hashes.clone(),
            limits: cfg.limits.clone(),
            reject_duplicates: false,
            ..BuildConfig::new(algo)
        };
        let parent = cfg.tmp_dir.clone().unwrap_or_else(std::env::temp_dir);

        let limit = cfg.limits.brz;
        for attempt in 1..=limit {
            let dir = tempfile::Builder::new().prefix("brz").tempdir_in(&parent)?;
            let h0 = HashState::new(cfg.hash_kind(2), k, rng);

            info!("brz: partitioning {m} keys into {k} buckets");
            let Some(parts) = partition(src, cfg, &h0, k, algo, c, dir.path())? else {
                debug!("brz: oversized bucket, {} iterations remaining", limit - attempt);
                continue;
            };

            info!("brz: solving {k} buckets with {algo} over {} runs", parts.runs.len());
            if let Some(buckets) = merge_and_solve(&parts, &h0, k, &sub_cfg, cfg.memory_budget, rng)? {
                let mut offset = Vec::with_capacity(k as usize);
                let mut acc = 0u32;
                for &s in &parts.size {
                    offset.push(acc);
                    acc += s as u32;
                }
                dir.close()?;
                return Ok(Self {
                    c,
                    algo,
                    m,
                    h0,
                    size: parts.size,
                    offset,
                    buckets,
                });
            }
            debug!("brz: bucket solver failed, {} iterations remaining", limit - attempt);
        }
        warn!("brz: no partitioning after {limit} iterations");
        Err(MphError::Unresolvable(Algo::Brz))
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.m
    }

    /// Solver used for the buckets.
    pub fn bucket_algo(&self) -> Algo {
        self.algo
    }

    /// Number of buckets `k`.
    pub fn nbuckets(&self) -> u32 {
        self.size.len() as u32
    }

    #[inline]
    pub fn search(&self, key: &[u8]) -> u32 {
        let i = (self.h0.hash(key) % self.size.len() as u32) as usize;
        match &self.buckets[i] {
            Some(bucket) => {
                self.offset[i] + bucket_search(self.algo, self.c, self.size[i], &bucket.hashes, &bucket.g, key)
            }
            None => self.offset[i],
        }
    }

    pub(crate) fn dump_body<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_f64(self.c)?;
        w.write_u32(self.algo.tag())?;
        w.write_u32(self.size.len() as u32)?;
        w.write_all(&self.size)?;
        for bucket in self.buckets.iter().flatten() {
            bucket.hashes[0].write_to(w)?;
            bucket.hashes[1].write_to(w)?;
            w.write_all(&bucket.g)?;
        }
        self.h0.write_to(w)?;
        w.write_u32(self.m)?;
        w.write_u32s(&self.offset)
    }

    pub(crate) fn load_body<R: Read + ?Sized>(r: &mut R) -> Result<Self, MphError> {
        let c = r.read_f64()?;
        let tag = r.read_u32()?;
        let algo = match Algo::from_tag(tag) {
            Some(a @ (Algo::Bmz8 | Algo::Fch)) => a,
            _ => return Err(MphError::Corrupt(format!("brz bucket solver tag {tag}"))),
        };
        let k = r.read_u32()?;
        if k == 0 {
            return Err(MphError::Corrupt("brz without buckets".into()));
        }
        let size = r.read_bytes(k as usize)?;
        let mut buckets = Vec::with_capacity(k as usize);
        for &s in &size {
            if s == 0 {
                buckets.push(None);
                continue;
            }
            let hashes = [HashState::read_from(r)?, HashState::read_from(r)?];
            let g = r.read_bytes(g_len(algo, c, s) as usize)?;
            buckets.push(Some(Bucket { hashes, g }));
        }
        let h0 = HashState::read_from(r)?;
        let m = r.read_u32()?;
        let offset = r.read_u32s(k as usize)?;
        let total: u32 = size.iter().map(|&s| s as u32).sum();
        if total != m {
            return Err(MphError::Corrupt(format!("brz bucket sizes sum to {total}, expected {m}")));
        }
        Ok(Self {
            c,
            algo,
            m,
            h0,
            size,
            offset,
            buckets,
        })
    }

    fn header_size(&self) -> usize {
        let k = self.size.len();
        8 + 4 + 4 + HashState::PACKED_TAGGED_SIZE + 4 * k + k + 8 * k
    }

    pub fn packed_size(&self) -> usize {
        let records: usize = self
            .buckets
            .iter()
            .flatten()
            .map(|b| 2 * HashState::PACKED_TAGGED_SIZE + b.g.len())
            .sum();
        self.header_size() + records
    }

    /// c, solver tag, k, h0 (tagged), offset[k], size[k], then one `u64`
    /// position per bucket record (relative to the payload start) and the
    /// records: h1, h2 (each tagged), g bytes.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.put_f64(self.c);
        out.put_u32(self.algo.tag());
        out.put_u32(self.size.len() as u32);
        self.h0.pack_tagged(out);
        out.put_u32s(&self.offset);
        out.put_bytes(&self.size);
        let mut pos = self.header_size() as u64;
        for bucket in &self.buckets {
            out.put_u64(pos);
            if let Some(b) = bucket {
                pos += (2 * HashState::PACKED_TAGGED_SIZE + b.g.len()) as u64;
            }
        }
        for bucket in self.buckets.iter().flatten() {
            bucket.hashes[0].pack_tagged(out);
            bucket.hashes[1].pack_tagged(out);
            out.put_bytes(&bucket.g);
        }
    }

    pub(crate) fn search_packed(buf: &[u8], key: &[u8]) -> u32 {
        let mut cur = PackedCursor::new(buf);
        let c = cur.f64();
        let algo = if cur.u32() == Algo::Fch.tag() {
            Algo::Fch
        } else {
            Algo::Bmz8
        };
        let k = cur.u32();
        let h0 = HashState::read_packed(&mut cur);
        let i = (h0.hash(key) % k) as usize;
        let offset = le_u32(cur.bytes(4 * k as usize), 4 * i);
        let size = cur.bytes(k as usize)[i];
        if size == 0 {
            return offset;
        }
        let pos = PackedCursor::new(&cur.rest()[8 * i..]).u64() as usize;
        let mut rec = PackedCursor::new(&buf[pos..]);
        let hashes = [HashState::read_packed(&mut rec), HashState::read_packed(&mut rec)];
        let g = rec.bytes(g_len(algo, c, size) as usize);
        offset + bucket_search(algo, c, size, &hashes, g, key)
    }
}

/// Solver and its space ratio: FCH from `c >= 2` (at least 2.6), BMZ8
/// below (0 means 1).
fn bucket_solver(c: f64) -> (Algo, f64) {
    if c >= 2.0 {
        (Algo::Fch, if c <= 2.0 { Fch::DEFAULT_C } else { c })
    } else if c == 0.0 {
        (Algo::Bmz8, 1.0)
    } else {
        (Algo::Bmz8, c)
    }
}

/// Bytes of `g` for a bucket of `size` keys.
fn g_len(algo: Algo, c: f64, size: u8) -> u32 {
    match algo {
        Algo::Fch => params(c, size as u32).0,
        _ => graph_size(c, size as u32),
    }
}

#[inline]
fn bucket_search(algo: Algo, c: f64, size: u8, hashes: &[HashState; 2], g: &[u8], key: &[u8]) -> u32 {
    match algo {
        Algo::Fch => {
            let m = size as u32;
            let (b, p1, p2) = params(c, m);
            let i = mix(b, p1, p2, hashes[0].hash(key) % m);
            offset_slot(hashes[1].hash(key), g[i as usize] as u32, m)
        }
        _ => search_bytes(hashes, g, key) as u32,
    }
}

/// Result of the partitioning pass.
struct Partition {
    size: Vec<u8>,
    runs: Vec<(PathBuf, u32)>, // spill file, keys in it
}

/// Streams every key into the buffer, spilling it as a bucket-sorted run of
/// `[u32 len][key]` records whenever `memory_budget` would overflow.
/// `Ok(None)` when a bucket grows past what its solver accepts.
fn partition(
    src: &mut dyn KeySource,
    cfg: &BuildConfig,
    h0: &HashState,
    k: u32,
    algo: Algo,
    c: f64,
    dir: &Path,
) -> Result<Option<Partition>, MphError> {
    let mut size = vec![0u8; k as usize];
    let mut runs = Vec::new();
    let mut buffer: Vec<u8> = Vec::new();
    let mut index: Vec<(u32, usize)> = Vec::new(); // (bucket, record start)

    let complete = scan_keys(src, |_, key| {
        let record = 4 + key.len();
        if !buffer.is_empty() && buffer.len() + record > cfg.memory_budget {
            runs.push(flush(&buffer, &mut index, dir, runs.len())?);
            buffer.clear();
        }
        let bucket = h0.hash(key) % k;
        let s = size[bucket as usize] as u32;
        if s == MAX_BUCKET_SIZE || (algo == Algo::Bmz8 && graph_size(c, s + 1) > MAX_BUCKET_SIZE) {
            debug!("brz: bucket {bucket} is full");
            return Ok(false);
        }
        size[bucket as usize] += 1;
        index.push((bucket, buffer.len()));
        buffer.put_u32(key.len() as u32);
        buffer.put_bytes(key);
        Ok(true)
    })?;
    if !complete {
        return Ok(None);
    }
    if !buffer.is_empty() {
        runs.push(flush(&buffer, &mut index, dir, runs.len())?);
    }

    let limit = cfg.limits.brz_max_flushes;
    if runs.len() as u32 > limit {
        warn!("brz: {} runs exceed the limit of {limit}", runs.len());
        return Err(MphError::TooManyFlushes {
            flushes: runs.len() as u32,
            limit,
        });
    }
    Ok(Some(Partition { size, runs }))
}

/// Writes the buffered records ordered by bucket (stable) to `{seq}.cmph`.
fn flush(buffer: &[u8], index: &mut Vec<(u32, usize)>, dir: &Path, seq: usize) -> io::Result<(PathBuf, u32)> {
    let path = dir.join(format!("{seq}.cmph"));
    debug!("brz: flushing {} keys to {}", index.len(), path.display());
    index.sort_by_key(|&(bucket, _)| bucket);
    let mut w = BufWriter::new(File::create(&path)?);
    for &(_, start) in index.iter() {
        let len = le_u32(buffer, start) as usize;
        w.write_all(&buffer[start..start + 4 + len])?;
    }
    w.flush()?;
    let count = index.len() as u32;
    index.clear();
    Ok((path, count))
}

/// Read cursor over one run; `head` is its next key with that key's bucket.
struct Run {
    reader: BufReader<File>,
    left: u32,
    head: Option<(u32, Vec<u8>)>,
}

impl Run {
    fn open(path: &Path, count: u32, h0: &HashState, k: u32, capacity: usize) -> io::Result<Self> {
        let mut run = Self {
            reader: BufReader::with_capacity(capacity, File::open(path)?),
            left: count,
            head: None,
        };
        run.advance(h0, k)?;
        Ok(run)
    }

    fn advance(&mut self, h0: &HashState, k: u32) -> io::Result<()> {
        self.head = if self.left == 0 {
            None
        } else {
            self.left -= 1;
            let len = self.reader.read_u32()?;
            let key = self.reader.read_bytes(len as usize)?;
            Some((h0.hash(&key) % k, key))
        };
        Ok(())
    }
}

/// Merges the runs bucket by bucket and solves each one. The read buffers of
/// all runs together stay within `memory_budget` unless a run would get less
/// than [`MIN_RUN_BUFFER`]. `Ok(None)` when a bucket solver gives up.
fn merge_and_solve(
    parts: &Partition,
    h0: &HashState,
    k: u32,
    sub_cfg: &BuildConfig,
    memory_budget: usize,
    rng: &mut StdRng,
) -> Result<Option<Vec<Option<Bucket>>>, MphError> {
    let capacity = run_buffer_capacity(memory_budget, parts.runs.len());
    let mut runs = parts
        .runs
        .iter()
        .map(|(path, count)| Run::open(path, *count, h0, k, capacity))
        .collect::<io::Result<Vec<_>>>()?;

    let mut buckets = Vec::with_capacity(k as usize);
    let mut keys: Vec<Vec<u8>> = Vec::with_capacity(MAX_BUCKET_SIZE as usize);
    for (i, &expected) in parts.size.iter().enumerate() {
        keys.clear();
        for run in runs.iter_mut() {
            while run.head.as_ref().is_some_and(|(b, _)| *b == i as u32) {
                if let Some((_, key)) = run.head.take() {
                    keys.push(key);
                }
                run.advance(h0, k)?;
            }
        }
        if keys.len() != expected as usize {
            return Err(MphError::Corrupt(format!(
                "brz bucket {i}: expected {expected} keys in the runs, found {}",
                keys.len()
            )));
        }
        if keys.is_empty() {
            buckets.push(None);
            continue;
        }
        let Some(bucket) = solve_bucket(&keys, sub_cfg, rng)? else {
            debug!("brz: {} failed on bucket {} of {k}", sub_cfg.algo, i + 1);
            return Ok(None);
        };
        buckets.push(Some(bucket));
        if i % 1000 == 0 {
            debug!("brz: bucket {} of {k} solved", i + 1);
        }
    }
    Ok(Some(buckets))
}

fn solve_bucket(keys: &[Vec<u8>], sub_cfg: &BuildConfig, rng: &mut StdRng) -> Result<Option<Bucket>, MphError> {
    let mut src = VecKeys::new(keys);
    let built = match sub_cfg.algo {
        Algo::Fch => Fch::build(&mut src, sub_cfg, rng).map(|f| Bucket {
            hashes: *f.hashes(),
            g: f.g().iter().map(|&v| v as u8).collect(),
        }),
        _ => Bmz8::build(&mut src, sub_cfg, rng).map(|b| Bucket {
            hashes: *b.hashes(),
            g: b.g().to_vec(),
        }),
    };
    match built {
        Ok(bucket) => Ok(Some(bucket)),
        Err(MphError::Unresolvable(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

//! Key sources.
//!
//! Builders never hold on to a caller's collection: they pull keys through
//! [`KeySource`], rewinding once per construction attempt.

use crate::error::MphError;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

/// A rewindable sequence of byte keys whose count is known up front.
pub trait KeySource {
    fn nkeys(&self) -> u32;
    /// Restarts the sequence from the first key.
    fn rewind(&mut self) -> io::Result<()>;
    /// Replaces `buf` with the next key. Returns `Ok(false)` once exhausted.
    fn read_key(&mut self, buf: &mut Vec<u8>) -> io::Result<bool>;
}

/// Rewinds `src` and feeds every key to `f` with its index.
/// `f` returns `Ok(false)` to abandon the scan; the result then is `Ok(false)`.
pub(crate) fn scan_keys<F>(src: &mut dyn KeySource, mut f: F) -> Result<bool, MphError>
where
    F: FnMut(u32, &[u8]) -> Result<bool, MphError>,
{
    src.rewind()?;
    let mut buf = Vec::new();
    for i in 0..src.nkeys() {
        if !src.read_key(&mut buf)? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("key source ended after {i} of {} keys", src.nkeys()),
            )
            .into());
        }
        if !f(i, &buf)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Reads all keys into memory.
pub(crate) fn collect_keys(src: &mut dyn KeySource) -> Result<Vec<Vec<u8>>, MphError> {
    let mut keys = Vec::with_capacity(src.nkeys() as usize);
    scan_keys(src, |_, k| {
        keys.push(k.to_vec());
        Ok(true)
    })?;
    Ok(keys)
}

/// Keys held in a slice.
#[derive(Debug)]
pub struct VecKeys<'a, K> {
    keys: &'a [K],
    pos: usize,
}

impl<'a, K: AsRef<[u8]>> VecKeys<'a, K> {
    pub fn new(keys: &'a [K]) -> Self {
        Self { keys, pos: 0 }
    }
}

impl<K: AsRef<[u8]>> KeySource for VecKeys<'_, K> {
    fn nkeys(&self) -> u32 {
        self.keys.len() as u32
    }
    fn rewind(&mut self) -> io::Result<()> {
        self.pos = 0;
        Ok(())
    }
    fn read_key(&mut self, buf: &mut Vec<u8>) -> io::Result<bool> {
        let Some(k) = self.keys.get(self.pos) else {
            return Ok(false);
        };
        buf.clear();
        buf.extend_from_slice(k.as_ref());
        self.pos += 1;
        Ok(true)
    }
}

/// One key per line; the trailing `\n` is not part of the key.
#[derive(Debug)]
pub struct NlFileKeys<R> {
    reader: R,
    nkeys: u32,
    read: u32,
}

impl NlFileKeys<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: BufRead + Seek> NlFileKeys<R> {
    /// Counts the lines first, then rewinds.
    pub fn new(mut reader: R) -> io::Result<Self> {
        let mut nkeys = 0u32;
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            nkeys += 1;
        }
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader,
            nkeys,
            read: 0,
        })
    }

    /// Uses only the first `nkeys` lines.
    pub fn with_nkeys(reader: R, nkeys: u32) -> Self {
        Self {
            reader,
            nkeys,
            read: 0,
        }
    }
}

impl<R: BufRead + Seek> KeySource for NlFileKeys<R> {
    fn nkeys(&self) -> u32 {
        self.nkeys
    }
    fn rewind(&mut self) -> io::Result<()> {
        self.read = 0;
        self.reader.seek(SeekFrom::Start(0)).map(|_| ())
    }
    fn read_key(&mut self, buf: &mut Vec<u8>) -> io::Result<bool> {
        if self.read == self.nkeys {
            return Ok(false);
        }
        buf.clear();
        if self.reader.read_until(b'\n', buf)? == 0 {
            return Ok(false);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        self.read += 1;
        Ok(true)
    }
}

/// Fixed-size records laid out back to back, the key being a fixed-length
/// field inside each record.
#[derive(Debug)]
pub struct StructVecKeys<'a> {
    records: &'a [u8],
    stride: usize,
    key_offset: usize,
    key_len: usize,
    pos: usize,
}

impl<'a> StructVecKeys<'a> {
    /// Panics if the key field does not fit inside a record.
    pub fn new(records: &'a [u8], stride: usize, key_offset: usize, key_len: usize) -> Self {
        assert!(stride > 0 && key_offset + key_len <= stride, "key field outside record");
        Self {
            records,
            stride,
            key_offset,
            key_len,
            pos: 0,
        }
    }
}

impl KeySource for StructVecKeys<'_> {
    fn nkeys(&self) -> u32 {
        (self.records.len() / self.stride) as u32
    }
    fn rewind(&mut self) -> io::Result<()> {
        self.pos = 0;
        Ok(())
    }
    fn read_key(&mut self, buf: &mut Vec<u8>) -> io::Result<bool> {
        if self.pos >= self.nkeys() as usize {
            return Ok(false);
        }
        let start = self.pos * self.stride + self.key_offset;
        buf.clear();
        buf.extend_from_slice(&self.records[start..start + self.key_len]);
        self.pos += 1;
        Ok(true)
    }
}

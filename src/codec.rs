//! Little-endian field codecs.
//!
//! `WriteExt`/`ReadExt` drive the streaming dump/load format, `PackExt` fills
//! an in-memory packed buffer, and `PackedCursor` walks one without copying.

use std::io::{self, Read, Write};

/// Longest name accepted in a NUL-terminated header field.
const MAX_NAME_LEN: usize = 64;

pub(crate) trait WriteExt: Write {
    #[inline]
    fn write_u8(&mut self, v: u8) -> io::Result<()> {
        self.write_all(&[v])
    }
    #[inline]
    fn write_u32(&mut self, v: u32) -> io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }
    #[inline]
    fn write_f64(&mut self, v: f64) -> io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }
    fn write_u32s(&mut self, vs: &[u32]) -> io::Result<()> {
        for &v in vs {
            self.write_u32(v)?;
        }
        Ok(())
    }
    /// `u32` length followed by the bytes.
    fn write_blob(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_u32(bytes.len() as u32)?;
        self.write_all(bytes)
    }
    /// Name followed by a NUL terminator.
    fn write_cstr(&mut self, s: &str) -> io::Result<()> {
        self.write_all(s.as_bytes())?;
        self.write_all(&[0])
    }
}

impl<W: Write + ?Sized> WriteExt for W {}

pub(crate) trait ReadExt: Read {
    #[inline]
    fn read_u8(&mut self) -> io::Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }
    #[inline]
    fn read_u32(&mut self) -> io::Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }
    #[inline]
    fn read_f64(&mut self) -> io::Result<f64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(f64::from_le_bytes(b))
    }
    fn read_u32s(&mut self, n: usize) -> io::Result<Vec<u32>> {
        let bytes = self.read_bytes(n * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
    /// Reads exactly `n` bytes. Grows in chunks so a corrupt length cannot
    /// trigger one huge allocation up front.
    fn read_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n.min(1 << 16));
        let mut chunk = [0u8; 4096];
        let mut left = n;
        while left > 0 {
            let k = left.min(chunk.len());
            self.read_exact(&mut chunk[..k])?;
            out.extend_from_slice(&chunk[..k]);
            left -= k;
        }
        Ok(out)
    }
    fn read_blob(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }
    fn read_cstr(&mut self) -> io::Result<String> {
        let mut name = Vec::new();
        loop {
            let b = self.read_u8()?;
            if b == 0 {
                break;
            }
            if name.len() == MAX_NAME_LEN {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "unterminated name"));
            }
            name.push(b);
        }
        String::from_utf8(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<R: Read + ?Sized> ReadExt for R {}

/// Appends fields to a packed buffer.
pub(crate) trait PackExt {
    fn put_u8(&mut self, v: u8);
    fn put_u32(&mut self, v: u32);
    fn put_u64(&mut self, v: u64);
    fn put_f64(&mut self, v: f64);
    fn put_u32s(&mut self, vs: &[u32]);
    fn put_bytes(&mut self, bytes: &[u8]);
}

impl PackExt for Vec<u8> {
    #[inline]
    fn put_u8(&mut self, v: u8) {
        self.push(v);
    }
    #[inline]
    fn put_u32(&mut self, v: u32) {
        self.extend_from_slice(&v.to_le_bytes());
    }
    #[inline]
    fn put_u64(&mut self, v: u64) {
        self.extend_from_slice(&v.to_le_bytes());
    }
    #[inline]
    fn put_f64(&mut self, v: f64) {
        self.extend_from_slice(&v.to_le_bytes());
    }
    fn put_u32s(&mut self, vs: &[u32]) {
        self.reserve(vs.len() * 4);
        for &v in vs {
            self.put_u32(v);
        }
    }
    #[inline]
    fn put_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Forward-only reader over a packed buffer.
/// Reading past the end panics: a malformed packed buffer is an invariant
/// violation, not a recoverable error.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PackedCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PackedCursor<'a> {
    #[inline]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    #[inline]
    pub fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }
    #[inline]
    pub fn u32(&mut self) -> u32 {
        let v = le_u32(self.buf, self.pos);
        self.pos += 4;
        v
    }
    #[inline]
    pub fn u64(&mut self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        u64::from_le_bytes(b)
    }
    #[inline]
    pub fn f64(&mut self) -> f64 {
        f64::from_bits(self.u64())
    }
    /// Borrows the next `n` bytes.
    #[inline]
    pub fn bytes(&mut self, n: usize) -> &'a [u8] {
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        s
    }
    /// Everything not consumed yet.
    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Reads a little-endian `u32` at byte offset `pos`.
#[inline]
pub(crate) fn le_u32(buf: &[u8], pos: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[pos..pos + 4]);
    u32::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_fields() {
        let mut out = Vec::new();
        out.write_cstr("chm").unwrap();
        out.write_u32(7).unwrap();
        out.write_blob(b"abc").unwrap();
        out.write_f64(2.5).unwrap();
        out.write_u32s(&[1, 2, 3]).unwrap();

        let mut r = out.as_slice();
        assert_eq!(r.read_cstr().unwrap(), "chm");
        assert_eq!(r.read_u32().unwrap(), 7);
        assert_eq!(r.read_blob().unwrap(), b"abc");
        assert_eq!(r.read_f64().unwrap(), 2.5);
        assert_eq!(r.read_u32s(3).unwrap(), vec![1, 2, 3]);
        assert!(r.is_empty());
    }

    #[test]
    fn test_short_read_is_error() {
        let mut r: &[u8] = &[1, 2];
        let err = r.read_u32().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_unterminated_name() {
        let long = vec![b'a'; 100];
        let mut r = long.as_slice();
        assert!(r.read_cstr().is_err());
    }

    #[test]
    fn test_packed_cursor() {
        let mut buf = Vec::new();
        buf.put_u32(0xDEAD_BEEF);
        buf.put_u8(9);
        buf.put_u64(1 << 40);
        buf.put_bytes(b"xy");
        let mut c = PackedCursor::new(&buf);
        assert_eq!(c.u32(), 0xDEAD_BEEF);
        assert_eq!(c.u8(), 9);
        assert_eq!(c.u64(), 1 << 40);
        assert_eq!(c.bytes(2), b"xy");
        assert!(c.rest().is_empty());
    }
}

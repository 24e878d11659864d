//! Byte-level plumbing shared by every codec: vbyte varints, endian-aware
//! fixed-width reads, and zero-copy cursors over either a borrowed slice or an
//! `Arc<Mmap>` region. Adapted from the teacher's `io_helper.rs`/`mem/encoders.rs`,
//! generalized so the `Storage` abstraction (`crate::store`) can hand back
//! either kind of cursor depending on whether the backend supports mmap.

use crate::Error;
use memmap::Mmap;
use std::convert::TryInto;
use std::io::{self, Write};
use std::sync::Arc;
use std::{cmp::Ordering, fmt, str};

pub trait InputStream {
    fn tell(&self) -> usize;
    fn len(&self) -> usize;
    fn eof(&self) -> bool {
        self.tell() >= self.len()
    }
    fn advance(&mut self, n: usize) -> Result<&[u8], Error>;
    fn get(&mut self) -> Result<u8, Error>;
    fn seek(&mut self, position: usize) -> Result<(), Error>;
}

pub trait DataInputStream {
    fn read_vbyte(&mut self) -> Result<u64, Error>;
    fn read_signed_vbyte(&mut self) -> Result<i64, Error>;
    fn read_u64(&mut self) -> Result<u64, Error>;
    fn read_u32(&mut self) -> Result<u32, Error>;
    fn read_u16(&mut self) -> Result<u16, Error>;
    fn read_u8(&mut self) -> Result<u8, Error>;
    fn read_f32(&mut self) -> Result<f32, Error>;
    fn read_bytes(&mut self, n: usize) -> Result<&[u8], Error>;
}

impl<I> DataInputStream for I
where
    I: InputStream,
{
    /// Highest bit set means "this is the last byte" (teacher's Galago vbyte).
    fn read_vbyte(&mut self) -> Result<u64, Error> {
        let mut result: u64 = 0;
        let mut bit_p: u8 = 0;
        loop {
            let byte = self.get()? as u64;
            if byte & 0x80 > 0 {
                result |= (byte & 0x7f) << bit_p;
                return Ok(result);
            }
            result |= byte << bit_p;
            bit_p += 7;
        }
    }
    fn read_signed_vbyte(&mut self) -> Result<i64, Error> {
        let raw = self.read_vbyte()?;
        let keep_bits = (raw / 2) as i64;
        if raw & 1 > 0 {
            Ok(-keep_bits)
        } else {
            Ok(keep_bits)
        }
    }
    fn read_u64(&mut self) -> Result<u64, Error> {
        let exact = self.advance(8)?;
        Ok(u64::from_be_bytes(exact.try_into().unwrap()))
    }
    fn read_u32(&mut self) -> Result<u32, Error> {
        let exact = self.advance(4)?;
        Ok(u32::from_be_bytes(exact.try_into().unwrap()))
    }
    fn read_u16(&mut self) -> Result<u16, Error> {
        let exact = self.advance(2)?;
        Ok(u16::from_be_bytes(exact.try_into().unwrap()))
    }
    fn read_u8(&mut self) -> Result<u8, Error> {
        self.get()
    }
    fn read_f32(&mut self) -> Result<f32, Error> {
        let exact = self.advance(4)?;
        Ok(f32::from_be_bytes(exact.try_into().unwrap()))
    }
    fn read_bytes(&mut self, n: usize) -> Result<&[u8], Error> {
        self.advance(n)
    }
}

/// Zero-copy cursor over a borrowed slice.
#[derive(Clone)]
pub struct SliceInputStream<'src> {
    data: &'src [u8],
    position: usize,
}

impl fmt::Debug for SliceInputStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SliceInputStream[@{}..{}]", self.position, self.data.len())
    }
}

impl<'src> SliceInputStream<'src> {
    pub fn new(data: &'src [u8]) -> Self {
        Self { data, position: 0 }
    }
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }
    pub fn remaining(&self) -> &'src [u8] {
        &self.data[self.position..]
    }
}

impl<'src> InputStream for SliceInputStream<'src> {
    fn tell(&self) -> usize {
        self.position
    }
    fn len(&self) -> usize {
        self.data.len()
    }
    fn advance(&mut self, n: usize) -> Result<&[u8], Error> {
        let end = self.position + n;
        if end > self.data.len() {
            return Err(Error::OverrunError);
        }
        let found = &self.data[self.position..end];
        self.position = end;
        Ok(found)
    }
    fn get(&mut self) -> Result<u8, Error> {
        if self.position >= self.data.len() {
            Err(Error::OverrunError)
        } else {
            let b = self.data[self.position];
            self.position += 1;
            Ok(b)
        }
    }
    fn seek(&mut self, position: usize) -> Result<(), Error> {
        if position > self.data.len() {
            return Err(Error::OverrunError);
        }
        self.position = position;
        Ok(())
    }
}

/// A cursor over a shared, reference-counted mmap region; lets readers hand
/// out independent cursors into the same backing pages without copying.
#[derive(Debug, Clone)]
pub struct ArcInputStream {
    source: Arc<Mmap>,
    start: usize,
    end: usize,
    offset: usize,
}

impl ArcInputStream {
    pub fn new(source: Arc<Mmap>, start: usize, end: usize) -> Self {
        Self { source, start, end, offset: 0 }
    }
    pub fn from_mmap(source: Arc<Mmap>) -> Self {
        let end = source.len();
        Self::new(source, 0, end)
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.source[self.start + self.offset..self.end]
    }
}

impl InputStream for ArcInputStream {
    fn tell(&self) -> usize {
        self.offset
    }
    fn len(&self) -> usize {
        self.end - self.start
    }
    fn advance(&mut self, n: usize) -> Result<&[u8], Error> {
        let lhs = self.start + self.offset;
        let rhs = lhs + n;
        if rhs > self.end {
            return Err(Error::OverrunError);
        }
        self.offset += n;
        Ok(&self.source[lhs..rhs])
    }
    fn get(&mut self) -> Result<u8, Error> {
        if self.eof() {
            Err(Error::OverrunError)
        } else {
            let b = self.source[self.start + self.offset];
            self.offset += 1;
            Ok(b)
        }
    }
    fn seek(&mut self, position: usize) -> Result<(), Error> {
        if position > self.len() {
            return Err(Error::OverrunError);
        }
        self.offset = position;
        Ok(())
    }
}

/// Byte-exact comparable owned byte string, used for term dictionary keys.
#[derive(Hash, Eq, PartialEq, Clone, PartialOrd, Ord)]
pub struct Bytes {
    pub data: Box<[u8]>,
}

impl Bytes {
    pub fn from_slice(input: &[u8]) -> Self {
        Self { data: input.to_vec().into_boxed_slice() }
    }
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn cmp_bytes(&self, rhs: &[u8]) -> Ordering {
        self.data.as_ref().cmp(rhs)
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(readable) = str::from_utf8(&self.data) {
            write!(f, "{:?}", readable)
        } else {
            write!(f, "{:?}", &self.data)
        }
    }
}

/// Write a vbyte varint (Galago-style: highest bit set means "stop").
pub fn write_vbyte<W: Write>(i: u64, out: &mut W) -> io::Result<usize> {
    let mut buf = [0u8; 10];
    let mut n = 0;
    let mut v = i;
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            byte |= 0x80;
            buf[n] = byte;
            n += 1;
            break;
        }
        buf[n] = byte;
        n += 1;
    }
    out.write_all(&buf[..n])?;
    Ok(n)
}

/// Fold a signed integer into an unsigned vbyte (lowest bit is the sign).
pub fn write_signed_vbyte<W: Write>(i: i64, out: &mut W) -> io::Result<usize> {
    let folded = if i < 0 { ((-i) as u64) * 2 + 1 } else { (i as u64) * 2 };
    write_vbyte(folded, out)
}

/// A thin wrapper that tracks how many bytes have been written so far, the
/// way the teacher's `CountingFileWriter`/`PagePacker::tell` do, so codec
/// writers can record offsets as they stream blocks out.
pub struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
    pub fn tell(&self) -> u64 {
        self.written
    }
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vbyte_round_trips() {
        let values: &[u64] = &[0, 1, 127, 128, 16384, u32::MAX as u64, u64::MAX / 2];
        let mut buf = Vec::new();
        for v in values {
            write_vbyte(*v, &mut buf).unwrap();
        }
        let mut stream = SliceInputStream::new(&buf);
        for v in values {
            assert_eq!(*v, stream.read_vbyte().unwrap());
        }
        assert!(stream.eof());
    }

    #[test]
    fn signed_vbyte_round_trips() {
        let values: &[i64] = &[0, 1, -1, 1000, -1000, i32::MAX as i64, i32::MIN as i64];
        let mut buf = Vec::new();
        for v in values {
            write_signed_vbyte(*v, &mut buf).unwrap();
        }
        let mut stream = SliceInputStream::new(&buf);
        for v in values {
            assert_eq!(*v, stream.read_signed_vbyte().unwrap());
        }
    }

    #[test]
    fn fixed_width_big_endian() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&42u32.to_be_bytes());
        buf.extend_from_slice(&7u16.to_be_bytes());
        let mut stream = SliceInputStream::new(&buf);
        assert_eq!(42u32, stream.read_u32().unwrap());
        assert_eq!(7u16, stream.read_u16().unwrap());
    }
}

//! Codec dispatch: wraps the per-method compressor/decompressor behind one
//! enum so the read/write stream pipelines don't need to know which of
//! stored, deflate, or bzip2 they're driving.
//!
//! LZMA is deliberately asymmetric: `Compressor::Lzma` passes data through
//! unmodified (the method id is still written so the archive claims LZMA),
//! and there is no corresponding `Decompressor::Lzma` variant at all — the
//! reference implementation this crate is modeled on has no LZMA decoder
//! either, and trying to read an LZMA-flagged entry back is a
//! `ZipError::NotImplemented`.

use crate::entry::CompressionMethod;
use crate::error::{Result, ZipError};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// A decoder over compressed bytes that yields the original plaintext.
pub enum Decompressor<R> {
    Stored(R),
    Deflate(DeflateDecoder<R>),
    Bzip2(Box<BzDecoder<R>>),
}

impl<R: Read> Decompressor<R> {
    pub fn new(method: CompressionMethod, source: R) -> Result<Self> {
        match method {
            CompressionMethod::Stored => Ok(Decompressor::Stored(source)),
            CompressionMethod::Deflated => Ok(Decompressor::Deflate(DeflateDecoder::new(source))),
            CompressionMethod::Bzip2 => Ok(Decompressor::Bzip2(Box::new(BzDecoder::new(source)))),
            CompressionMethod::Lzma => Err(ZipError::NotImplemented(
                "reading LZMA-compressed entries".into(),
            )),
        }
    }

    /// Recover the wrapped reader, discarding any buffered decompressor
    /// state. Used when a read stream needs to reset its pipeline (e.g. on
    /// a backward seek).
    pub fn into_inner(self) -> R {
        match self {
            Decompressor::Stored(r) => r,
            Decompressor::Deflate(d) => d.into_inner(),
            Decompressor::Bzip2(d) => d.into_inner(),
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Stored(r) => r.read(buf),
            Decompressor::Deflate(d) => d.read(buf),
            Decompressor::Bzip2(d) => d.read(buf),
        }
    }
}

/// An encoder that accepts plaintext writes and emits compressed bytes to
/// the wrapped sink.
pub enum Compressor<W: Write> {
    Stored(W),
    Deflate(DeflateEncoder<W>),
    Bzip2(Box<BzEncoder<W>>),
    /// LZMA entries are written uncompressed; only the method id on the
    /// header marks them as LZMA.
    Lzma(W),
}

impl<W: Write> Compressor<W> {
    pub fn new(method: CompressionMethod, sink: W, level: u32) -> Self {
        match method {
            CompressionMethod::Stored => Compressor::Stored(sink),
            CompressionMethod::Deflated => {
                Compressor::Deflate(DeflateEncoder::new(sink, Compression::new(level.min(9))))
            }
            CompressionMethod::Bzip2 => {
                Compressor::Bzip2(Box::new(BzEncoder::new(sink, bzip2::Compression::new(level.clamp(1, 9)))))
            }
            CompressionMethod::Lzma => Compressor::Lzma(sink),
        }
    }

    /// Flush and finalize the underlying codec, returning the wrapped sink.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Stored(w) => Ok(w),
            Compressor::Deflate(e) => e.finish(),
            Compressor::Bzip2(e) => e.finish(),
            Compressor::Lzma(w) => Ok(w),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Stored(w) => w.write(buf),
            Compressor::Deflate(e) => e.write(buf),
            Compressor::Bzip2(e) => e.write(buf),
            Compressor::Lzma(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Stored(w) => w.flush(),
            Compressor::Deflate(e) => e.flush(),
            Compressor::Bzip2(e) => e.flush(),
            Compressor::Lzma(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn stored_roundtrip() {
        let mut out = Vec::new();
        {
            let mut c = Compressor::new(CompressionMethod::Stored, &mut out, 6);
            c.write_all(b"hello world").unwrap();
            c.finish().unwrap();
        }
        let mut d = Decompressor::new(CompressionMethod::Stored, Cursor::new(out)).unwrap();
        let mut result = Vec::new();
        d.read_to_end(&mut result).unwrap();
        assert_eq!(result, b"hello world");
    }

    #[test]
    fn deflate_roundtrip() {
        let mut out = Vec::new();
        {
            let mut c = Compressor::new(CompressionMethod::Deflated, &mut out, 6);
            c.write_all(b"the quick brown fox jumps over the lazy dog").unwrap();
            c.finish().unwrap();
        }
        let mut d = Decompressor::new(CompressionMethod::Deflated, Cursor::new(out)).unwrap();
        let mut result = Vec::new();
        d.read_to_end(&mut result).unwrap();
        assert_eq!(result, b"the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn bzip2_roundtrip() {
        let mut out = Vec::new();
        {
            let mut c = Compressor::new(CompressionMethod::Bzip2, &mut out, 6);
            c.write_all(b"bzip2 test payload, repeated ".repeat(20).as_slice()).unwrap();
            c.finish().unwrap();
        }
        let mut d = Decompressor::new(CompressionMethod::Bzip2, Cursor::new(out)).unwrap();
        let mut result = Vec::new();
        d.read_to_end(&mut result).unwrap();
        assert_eq!(result, b"bzip2 test payload, repeated ".repeat(20));
    }

    #[test]
    fn lzma_write_is_passthrough_and_read_is_not_implemented() {
        let mut out = Vec::new();
        {
            let mut c = Compressor::new(CompressionMethod::Lzma, &mut out, 6);
            c.write_all(b"not actually compressed").unwrap();
            c.finish().unwrap();
        }
        assert_eq!(out, b"not actually compressed");
        assert!(Decompressor::new(CompressionMethod::Lzma, Cursor::new(out)).is_err());
    }
}

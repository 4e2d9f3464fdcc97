//! Shared Source: one underlying file handle, safe to read from multiple
//! open entry streams at once, with a gate that keeps any of those reads
//! from running concurrently with an open write stream.
//!
//! Mirrors the reference implementation's `_SharedFile`, which protects a
//! single OS file descriptor behind a lock and a remembered position so
//! that interleaved reads from different `ZipExtFile` objects don't
//! clobber each other's seek position. Rust has no GIL to lean on, so the
//! lock here is explicit.

use crate::error::{Result, ZipError};
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct Inner<F> {
    file: F,
    position: u64,
}

/// Cloneable handle to one underlying file, shared across every open read
/// stream for that archive.
pub struct SharedSource<F> {
    inner: Arc<Mutex<Inner<F>>>,
    writer_gate: Arc<AtomicBool>,
}

impl<F> Clone for SharedSource<F> {
    fn clone(&self) -> Self {
        SharedSource {
            inner: Arc::clone(&self.inner),
            writer_gate: Arc::clone(&self.writer_gate),
        }
    }
}

impl<F: Read + Seek> SharedSource<F> {
    pub fn new(file: F, writer_gate: Arc<AtomicBool>) -> Result<Self> {
        Ok(SharedSource {
            inner: Arc::new(Mutex::new(Inner { file, position: 0 })),
            writer_gate,
        })
    }

    /// Read `buf.len()` bytes starting at `offset`, restoring the shared
    /// cursor afterward isn't necessary since every caller always seeks
    /// before reading — but the lock does serialize concurrent callers.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if self.writer_gate.load(Ordering::Acquire) {
            return Err(ZipError::InvalidArgument(
                "cannot read from the archive while a write stream is open".into(),
            ));
        }

        let mut guard = self.inner.lock().expect("shared source mutex poisoned");
        if guard.position != offset {
            guard.file.seek(SeekFrom::Start(offset))?;
            guard.position = offset;
        }
        let n = guard.file.read(buf)?;
        guard.position += n as u64;
        Ok(n)
    }
}

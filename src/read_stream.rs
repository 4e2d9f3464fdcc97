//! Read Stream: the decoder pipeline handed back to callers that open an
//! entry for reading.
//!
//! Layered like the reference implementation's `ZipExtFile`: a bounded
//! slice of the underlying file (never read past `compress_size`) feeds an
//! optional legacy decrypter, which feeds the method-specific decompressor.
//! CRC-32 is accumulated over the plaintext as it's produced and checked
//! against the entry's recorded CRC the moment EOF is reached.

use crate::compression::Decompressor;
use crate::crypto::{self, LegacyCipher, PasswordCheck};
use crate::entry::ZipEntry;
use crate::error::{Result, ZipError};
use crate::shared::SharedSource;
use crate::spec::{MASK_USE_DATA_DESCRIPTOR, MAX_SEEK_READ, MIN_READ_SIZE};
use std::io::{self, Read, Seek, SeekFrom};

/// Reads at most `limit` bytes total from a `SharedSource` starting at
/// `base + consumed`, advancing `consumed` as bytes are delivered.
struct BoundedSource<F> {
    source: SharedSource<F>,
    base: u64,
    limit: u64,
    consumed: u64,
}

impl<F: Read + Seek> Read for BoundedSource<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.limit - self.consumed;
        if remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = self
            .source
            .read_at(self.base + self.consumed, &mut buf[..want])
            .map_err(io::Error::from)?;
        self.consumed += n as u64;
        Ok(n)
    }
}

/// A decompressing, seekable, CRC-checking reader over one archived
/// member's data.
pub struct ReadStream<F> {
    source: SharedSource<F>,
    data_offset: u64,
    compress_size: u64,
    file_size: u64,
    crc_expected: u32,
    crc_running: crc32fast::Hasher,
    position: u64,
    decoder: Option<Decompressor<CipherSource<F>>>,
    /// Password and check byte needed to re-prime the decrypter on a
    /// backward seek; `None` for entries that aren't encrypted.
    decrypt_init: Option<(Vec<u8>, PasswordCheck)>,
    method: crate::entry::CompressionMethod,
}

/// Adapts a `BoundedSource` to optionally decrypt bytes as they're read.
struct CipherSource<F> {
    inner: BoundedSource<F>,
    cipher: Option<LegacyCipher>,
}

impl<F: Read + Seek> Read for CipherSource<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(cipher) = &mut self.cipher {
            cipher.decrypt(&mut buf[..n]);
        }
        Ok(n)
    }
}

impl<F: Read + Seek> ReadStream<F> {
    /// `local_data_offset` is where compressed bytes begin (i.e. just past
    /// the local header, name, and extra field). `encrypted` selects
    /// whether a 12-byte PKWARE header precedes the compressed data, in
    /// which case `password` must decrypt it correctly.
    pub fn open(
        source: SharedSource<F>,
        entry: &ZipEntry,
        local_data_offset: u64,
        encrypted: bool,
        password: Option<&[u8]>,
    ) -> Result<Self> {
        let mut data_offset = local_data_offset;
        let mut compress_size = entry.compress_size;

        let decrypt_init = if encrypted {
            let password = password
                .ok_or_else(|| ZipError::InvalidArgument("archive entry is encrypted but no password was supplied".into()))?;

            let check = if entry.flag_bits & MASK_USE_DATA_DESCRIPTOR != 0 {
                PasswordCheck::RawTime(entry.raw_time)
            } else {
                PasswordCheck::Crc(entry.crc)
            };

            let mut cipher = LegacyCipher::new(password);
            let mut header = [0u8; crypto::ENCRYPTION_HEADER_LEN];
            let n = source.read_at(data_offset, &mut header)?;
            if n != header.len() {
                return Err(ZipError::BadZipFile("truncated encryption header".into()));
            }
            if crypto::verify_header(&mut cipher, &mut header, check).is_err() {
                return Err(ZipError::BadPassword);
            }

            data_offset += crypto::ENCRYPTION_HEADER_LEN as u64;
            compress_size -= crypto::ENCRYPTION_HEADER_LEN as u64;
            Some((password.to_vec(), check))
        } else {
            None
        };

        let cipher_state = decrypt_init
            .as_ref()
            .map(|(password, _)| LegacyCipher::new(password));

        let bounded = BoundedSource {
            source: source.clone(),
            base: data_offset,
            limit: compress_size,
            consumed: 0,
        };
        let cipher_source = CipherSource {
            inner: bounded,
            cipher: cipher_state,
        };

        let decoder = Decompressor::new(entry.compress_type, cipher_source)?;

        Ok(ReadStream {
            source,
            data_offset,
            compress_size,
            file_size: entry.file_size,
            crc_expected: entry.crc,
            crc_running: crc32fast::Hasher::new(),
            position: 0,
            decoder: Some(decoder),
            decrypt_init,
            method: entry.compress_type,
        })
    }

    /// Reset the decompressor (and, for encrypted entries, re-prime the
    /// decrypter) back to the start of the plaintext stream, for a backward
    /// seek. A fresh `LegacyCipher` keyed from the stored password matches
    /// the state right after priming; it must still consume the 12-byte
    /// encryption header again to reach the state the first data byte was
    /// decrypted under, exactly as in [`ReadStream::open`].
    fn reset_pipeline(&mut self) -> Result<()> {
        let cipher_state = match &self.decrypt_init {
            Some((password, check)) => {
                let mut cipher = LegacyCipher::new(password);
                let header_offset = self.data_offset - crypto::ENCRYPTION_HEADER_LEN as u64;
                let mut header = [0u8; crypto::ENCRYPTION_HEADER_LEN];
                let n = self.source.read_at(header_offset, &mut header)?;
                if n != header.len() {
                    return Err(ZipError::BadZipFile("truncated encryption header".into()));
                }
                if crypto::verify_header(&mut cipher, &mut header, *check).is_err() {
                    return Err(ZipError::BadPassword);
                }
                Some(cipher)
            }
            None => None,
        };

        let bounded = BoundedSource {
            source: self.source.clone(),
            base: self.data_offset,
            limit: self.compress_size,
            consumed: 0,
        };
        let cipher_source = CipherSource {
            inner: bounded,
            cipher: cipher_state,
        };
        self.decoder = Some(Decompressor::new(self.method, cipher_source)?);
        self.position = 0;
        self.crc_running = crc32fast::Hasher::new();
        Ok(())
    }
}

impl<F: Read + Seek> Read for ReadStream<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let decoder = self
            .decoder
            .as_mut()
            .expect("read stream used after being finished");

        let n = decoder.read(buf)?;
        self.crc_running.update(&buf[..n]);
        self.position += n as u64;

        if n == 0 && self.position < self.file_size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "entry truncated before its recorded uncompressed size",
            ));
        }

        if n == 0 {
            let crc = self.crc_running.clone().finalize();
            if crc != self.crc_expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "CRC-32 mismatch: expected {:08x}, got {:08x}",
                        self.crc_expected, crc
                    ),
                ));
            }
        }

        Ok(n)
    }
}

impl<F: Read + Seek> Seek for ReadStream<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(n) => (self.position as i64 + n).max(0) as u64,
            SeekFrom::End(n) => (self.file_size as i64 + n).max(0) as u64,
        };

        if target < self.position {
            self.reset_pipeline().map_err(io::Error::from)?;
        }

        let mut remaining = target - self.position;
        let mut scratch = vec![0u8; MIN_READ_SIZE];
        while remaining > 0 {
            let chunk = remaining.min(MAX_SEEK_READ) as usize;
            let want = chunk.min(scratch.len());
            let n = self.read(&mut scratch[..want])?;
            if n == 0 {
                break;
            }
            remaining -= n as u64;
        }

        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{CompressionMethod, ZipEntry};
    use std::io::Cursor;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn make_entry(file_size: u64, compress_size: u64, crc: u32) -> ZipEntry {
        let mut e = ZipEntry::new("a.txt", (2020, 1, 1, 0, 0, 0)).unwrap();
        e.compress_type = CompressionMethod::Stored;
        e.file_size = file_size;
        e.compress_size = compress_size;
        e.crc = crc;
        e
    }

    #[test]
    fn reads_stored_entry_and_checks_crc() {
        let plaintext = b"hello world";
        let crc = crc32fast::hash(plaintext);
        let entry = make_entry(plaintext.len() as u64, plaintext.len() as u64, crc);

        let gate = Arc::new(AtomicBool::new(false));
        let source = SharedSource::new(Cursor::new(plaintext.to_vec()), gate).unwrap();

        let mut stream = ReadStream::open(source, &entry, 0, false, None).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn crc_mismatch_is_reported() {
        let plaintext = b"hello world";
        let entry = make_entry(plaintext.len() as u64, plaintext.len() as u64, 0xDEAD_BEEF);

        let gate = Arc::new(AtomicBool::new(false));
        let source = SharedSource::new(Cursor::new(plaintext.to_vec()), gate).unwrap();

        let mut stream = ReadStream::open(source, &entry, 0, false, None).unwrap();
        let mut out = Vec::new();
        let err = stream.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn forward_seek_skips_bytes() {
        let plaintext = b"0123456789";
        let crc = crc32fast::hash(plaintext);
        let entry = make_entry(plaintext.len() as u64, plaintext.len() as u64, crc);

        let gate = Arc::new(AtomicBool::new(false));
        let source = SharedSource::new(Cursor::new(plaintext.to_vec()), gate).unwrap();

        let mut stream = ReadStream::open(source, &entry, 0, false, None).unwrap();
        stream.seek(SeekFrom::Start(5)).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"56789");
    }
}

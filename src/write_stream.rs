//! Write Stream: compresses data on the fly as the caller supplies it, and
//! commits the finished entry as either a data-descriptor trailer or a
//! rewritten local header, mirroring the reference implementation's
//! `_ZipWriteFile.close()` choice between the two.

use crate::compression::Compressor;
use crate::entry::ZipEntry;
use crate::error::{Result, ZipError};
use crate::spec::{DATA_DESCRIPTOR_SIGNATURE, MASK_USE_DATA_DESCRIPTOR, ZIP64_LIMIT};
use std::io::{Seek, SeekFrom, Write};

/// Counts bytes and accumulates a CRC-32 over everything written through
/// it, then forwards the (compressed) bytes on to the real sink.
pub struct CrcCountingWriter<W> {
    sink: W,
    crc: crc32fast::Hasher,
    uncompressed_count: u64,
    compressed_count: u64,
}

impl<W: Write> CrcCountingWriter<W> {
    fn new(sink: W) -> Self {
        CrcCountingWriter {
            sink,
            crc: crc32fast::Hasher::new(),
            uncompressed_count: 0,
            compressed_count: 0,
        }
    }
}

impl<W: Write> Write for CrcCountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.sink.write(buf)?;
        self.compressed_count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.sink.flush()
    }
}

/// A write-only pipeline for one entry: plaintext goes in, compressed
/// bytes come out the other side into `W`.
pub struct WriteStream<W: Write> {
    compressor: Compressor<CrcCountingWriter<W>>,
    local_header_offset: u64,
    uses_data_descriptor: bool,
}

impl<W: Write + Seek> WriteStream<W> {
    /// `sink` must already be positioned just past the name/extra field of
    /// the local header written for this entry at `local_header_offset`.
    pub fn new(
        sink: W,
        entry: &ZipEntry,
        local_header_offset: u64,
        compress_level: u32,
    ) -> Self {
        let uses_data_descriptor = entry.flag_bits & MASK_USE_DATA_DESCRIPTOR != 0;
        let counting = CrcCountingWriter::new(sink);
        let compressor = Compressor::new(entry.compress_type, counting, compress_level);

        WriteStream {
            compressor,
            local_header_offset,
            uses_data_descriptor,
        }
    }

    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.hash_plaintext(data);
        self.compressor.write_all(data)?;
        Ok(())
    }

    fn hash_plaintext(&mut self, data: &[u8]) {
        match &mut self.compressor {
            Compressor::Stored(w) => {
                w.crc.update(data);
                w.uncompressed_count += data.len() as u64;
            }
            Compressor::Deflate(e) => {
                let w = e.get_mut();
                w.crc.update(data);
                w.uncompressed_count += data.len() as u64;
            }
            Compressor::Bzip2(e) => {
                let w = e.get_mut();
                w.crc.update(data);
                w.uncompressed_count += data.len() as u64;
            }
            Compressor::Lzma(w) => {
                w.crc.update(data);
                w.uncompressed_count += data.len() as u64;
            }
        }
    }

    /// Finish compression, write the data descriptor (or go back and
    /// rewrite the local header), and return the entry updated with the
    /// final CRC/sizes plus the sink for the next entry.
    ///
    /// `force_zip64` mirrors the `force_zip64` the caller passed to
    /// [`crate::archive::ZipArchive::start_entry`]: a data descriptor
    /// always carries 64-bit sizes, and a rewritten local header always
    /// carries the ZIP64 extra, regardless of how small the entry turned
    /// out to be. `allow_zip64` is the archive-wide `OpenOptions`
    /// setting; when it's `false` and the entry wasn't opened with
    /// `force_zip64`, an entry whose uncompressed *or* compressed size
    /// overflows `ZIP64_LIMIT` is rejected before the descriptor or
    /// rewritten header is written, rather than silently promoting the
    /// archive to ZIP64 behind the caller's back.
    pub fn finish(self, mut entry: ZipEntry, force_zip64: bool, allow_zip64: bool) -> Result<(ZipEntry, W)> {
        let local_header_offset = self.local_header_offset;
        let uses_data_descriptor = self.uses_data_descriptor;

        let counting = self.compressor.finish()?;
        let crc = counting.crc.clone().finalize();
        let compressed_size = counting.compressed_count;
        let uncompressed_size = counting.uncompressed_count;
        let mut sink = counting.sink;

        if !force_zip64 && !allow_zip64 && (uncompressed_size > ZIP64_LIMIT || compressed_size > ZIP64_LIMIT) {
            return Err(ZipError::LargeZipFile(entry.name.clone()));
        }

        entry.crc = crc;
        entry.compress_size = compressed_size;
        entry.file_size = uncompressed_size;
        entry.header_offset = local_header_offset;

        if uses_data_descriptor {
            sink.write_all(&DATA_DESCRIPTOR_SIGNATURE.to_le_bytes())?;
            sink.write_all(&crc.to_le_bytes())?;
            if force_zip64 || compressed_size > ZIP64_LIMIT || uncompressed_size > ZIP64_LIMIT {
                sink.write_all(&compressed_size.to_le_bytes())?;
                sink.write_all(&uncompressed_size.to_le_bytes())?;
            } else {
                sink.write_all(&(compressed_size as u32).to_le_bytes())?;
                sink.write_all(&(uncompressed_size as u32).to_le_bytes())?;
            }
        } else {
            // No data descriptor: the local header was already written
            // (without a ZIP64 extra, since `force_zip64` was false) before
            // any data was known. If the entry turned out to need ZIP64
            // anyway, rewriting it here would grow the header and clobber
            // the compressed bytes that immediately follow it — so this is
            // the fatal internal error the spec calls for rather than a
            // silent promotion.
            if !force_zip64 && (compressed_size > ZIP64_LIMIT || uncompressed_size > ZIP64_LIMIT) {
                return Err(ZipError::LargeZipFile(format!(
                    "entry {:?} exceeds the non-ZIP64 size limit but was not opened with force_zip64",
                    entry.name
                )));
            }

            // Go back and rewrite the local header's CRC/size fields now
            // that they're known, then return to the end of the stream so
            // the next entry appends correctly.
            let end = sink.stream_position()?;
            sink.seek(SeekFrom::Start(local_header_offset))?;
            let header = entry.file_header(Some(force_zip64))?;
            sink.write_all(&header)?;
            sink.seek(SeekFrom::Start(end))?;
        }

        Ok((entry, sink))
    }
}

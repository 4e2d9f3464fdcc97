//! The caller-facing archive type: one object that can be opened for
//! reading, writing, or appending, unifying what the reference
//! implementation splits across a read-only `StreamingZipReader` and a
//! write-only `StreamingZipWriter`. A single `ZipArchive` needs this
//! because the Shared Source's writer gate has to be visible from both
//! sides of the same archive.

use crate::eocd;
use crate::entry::{CompressionMethod, ZipEntry};
use crate::error::{Result, ZipError};
use crate::read_stream::ReadStream;
use crate::shared::SharedSource;
use crate::spec::{
    MASK_COMPRESSED_PATCH, MASK_ENCRYPTED, MASK_STRONG_ENCRYPTION, MASK_USE_DATA_DESCRIPTOR,
    ZIP64_LIMIT, ZIP_FILECOUNT_LIMIT,
};
use crate::write_stream::WriteStream;
use std::collections::HashMap;
use std::fs::{File, OpenOptions as FsOpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-open tuning knobs.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub password: Option<Vec<u8>>,
    /// Apply ZIP64 promotion when an entry or the central directory needs
    /// it; matches the reference implementation's `allowZip64=True` default.
    /// Set to `false` to reject promotion instead.
    pub allow_zip64: bool,
    pub comment: Option<Vec<u8>>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            password: None,
            allow_zip64: true,
            comment: None,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Which lifecycle state the archive is in. Mirrors `zipfile.ZipFile`'s
/// `'r'`, `'w'`, `'x'`, `'a'` modes, minus `'x'`'s exclusive-create
/// distinction (callers express that via `std::fs::File` options before
/// calling [`ZipArchive::create`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    Read,
    Write,
    Append,
}

/// A currently-open write stream plus the entry metadata it's filling in.
struct PendingEntry {
    stream: WriteStream<File>,
    entry: ZipEntry,
    force_zip64: bool,
}

/// Random-access ZIP reader and streaming ZIP writer over a single
/// archive.
pub struct ZipArchive {
    mode: ArchiveMode,
    source: Option<SharedSource<File>>,
    file: Option<File>,
    entries: Vec<ZipEntry>,
    name_index: HashMap<String, usize>,
    writer_gate: Arc<AtomicBool>,
    /// Byte offset correction for self-extracting archives / prepended
    /// stubs; added to every `header_offset` read from the catalog.
    concat: i64,
    comment: Vec<u8>,
    allow_zip64: bool,
    password: Option<Vec<u8>>,
    pending: Option<PendingEntry>,
    closed: bool,
    /// Where the stale central directory began, concat-corrected. Only
    /// meaningful right after [`ZipArchive::open_for_reading`]; consumed by
    /// [`ZipArchive::append`] to know where new entries should start.
    cd_start: u64,
}

impl ZipArchive {
    /// Open an existing archive for random-access reading.
    pub fn open<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::open_for_reading(file, ArchiveMode::Read, options)
    }

    /// Create a new archive, truncating any existing file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Self> {
        let file = FsOpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .read(true)
            .open(path.as_ref())?;

        let mut archive = ZipArchive {
            mode: ArchiveMode::Write,
            source: None,
            file: Some(file),
            entries: Vec::new(),
            name_index: HashMap::new(),
            writer_gate: Arc::new(AtomicBool::new(false)),
            concat: 0,
            comment: Vec::new(),
            allow_zip64: options.allow_zip64,
            password: options.password,
            pending: None,
            closed: false,
            cd_start: 0,
        };
        if let Some(comment) = options.comment {
            archive.set_comment(comment);
        }
        Ok(archive)
    }

    /// Open an existing archive for appending: the existing catalog is
    /// preserved, and new entries are written starting right where the
    /// old central directory used to begin — which is then fully
    /// rewritten (old and new entries alike) on [`ZipArchive::close`].
    pub fn append<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Self> {
        let read_file = File::open(path.as_ref())?;
        let mut archive = Self::open_for_reading(read_file, ArchiveMode::Append, options)?;

        let mut write_file = FsOpenOptions::new().write(true).read(true).open(path.as_ref())?;
        write_file.set_len(archive.cd_start)?;
        write_file.seek(SeekFrom::Start(archive.cd_start))?;

        archive.source = None;
        archive.file = Some(write_file);
        Ok(archive)
    }

    fn open_for_reading(file: File, mode: ArchiveMode, options: OpenOptions) -> Result<Self> {
        let mut reader = file;
        let (eocd_record, concat) = eocd::locate(&mut reader)?;
        log::debug!(
            "located end of central directory at {}, prepend offset {concat}",
            eocd_record.eocd_offset
        );
        if eocd_record.zip64 {
            log::trace!("archive uses ZIP64 end of central directory extensions");
        }

        if eocd_record.total_entries > ZIP_FILECOUNT_LIMIT && !eocd_record.zip64 {
            return Err(ZipError::BadZipFile(
                "central directory entry count exceeds the non-ZIP64 limit".into(),
            ));
        }
        if concat < 0 {
            return Err(ZipError::BadZipFile(
                "central directory offset precedes the archive's own end of central directory".into(),
            ));
        }

        let cd_offset = (eocd_record.cd_offset as i64 + concat) as u64;
        reader.seek(SeekFrom::Start(cd_offset))?;

        let mut cd_buf = vec![0u8; eocd_record.cd_size as usize];
        reader.read_exact(&mut cd_buf)?;

        let mut entries = Vec::with_capacity(eocd_record.total_entries as usize);
        let mut name_index = HashMap::new();
        let mut cursor = 0usize;
        for _ in 0..eocd_record.total_entries {
            if cursor >= cd_buf.len() {
                break;
            }
            let (mut entry, consumed) = ZipEntry::parse_central_directory(&cd_buf[cursor..])?;
            entry.header_offset = (entry.header_offset as i64 + concat) as u64;
            cursor += consumed;
            if name_index.contains_key(&entry.name) {
                log::warn!("duplicate name in archive: {}", entry.name);
            }
            name_index.insert(entry.name.clone(), entries.len());
            entries.push(entry);
        }

        let writer_gate = Arc::new(AtomicBool::new(false));
        let source = SharedSource::new(reader, Arc::clone(&writer_gate))?;

        Ok(ZipArchive {
            mode,
            source: Some(source),
            file: None,
            entries,
            name_index,
            writer_gate,
            concat,
            comment: eocd_record.comment,
            allow_zip64: options.allow_zip64,
            password: options.password,
            pending: None,
            closed: false,
            cd_start: cd_offset,
        })
    }

    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn info(&self, name: &str) -> Option<&ZipEntry> {
        self.name_index.get(name).map(|&i| &self.entries[i])
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Set the archive comment, truncating (with a warning) to the 65535
    /// bytes a ZIP comment field can hold.
    pub fn set_comment(&mut self, mut comment: Vec<u8>) {
        if comment.len() > crate::spec::ZIP_MAX_COMMENT {
            log::warn!(
                "archive comment is too long; truncating to {} bytes",
                crate::spec::ZIP_MAX_COMMENT
            );
            comment.truncate(crate::spec::ZIP_MAX_COMMENT);
        }
        self.comment = comment;
    }

    /// Open one archived member for streaming, CRC-checked reading, using
    /// the archive-wide password set in [`OpenOptions`] (if any).
    pub fn open_member(&mut self, name: &str) -> Result<ReadStream<File>> {
        self.open_member_with_password(name, None)
    }

    /// Open one archived member, overriding the archive-wide password for
    /// this entry only. Passing `None` falls back to the archive-wide
    /// password, matching `open(name, pwd=None)` in the reference
    /// implementation.
    pub fn open_member_with_password(
        &mut self,
        name: &str,
        password: Option<&[u8]>,
    ) -> Result<ReadStream<File>> {
        let idx = *self
            .name_index
            .get(name)
            .ok_or_else(|| ZipError::InvalidArgument(format!("no such entry: {name}")))?;
        let entry = self.entries[idx].clone();
        let password = password.or(self.password.as_deref());
        self.open_member_entry_with_password(&entry, password)
    }

    pub fn open_member_entry(&mut self, entry: &ZipEntry) -> Result<ReadStream<File>> {
        let password = self.password.clone();
        self.open_member_entry_with_password(entry, password.as_deref())
    }

    fn open_member_entry_with_password(
        &mut self,
        entry: &ZipEntry,
        password: Option<&[u8]>,
    ) -> Result<ReadStream<File>> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| ZipError::InvalidArgument("archive is not open for reading".into()))?;

        let local_header = read_local_header(&source, entry.header_offset)?;

        if local_header.flag_bits & MASK_COMPRESSED_PATCH != 0 {
            return Err(ZipError::NotImplemented(
                "compressed patched data (flag bit 5)".into(),
            ));
        }
        if local_header.flag_bits & MASK_STRONG_ENCRYPTION != 0 {
            return Err(ZipError::NotImplemented("strong encryption (flag bit 6)".into()));
        }
        if local_header.name != entry.original_name {
            return Err(ZipError::BadZipFile(format!(
                "local file header name {:?} disagrees with central directory name {:?}",
                local_header.name, entry.original_name
            )));
        }

        let encrypted = entry.flag_bits & MASK_ENCRYPTED != 0;

        ReadStream::open(
            source,
            entry,
            entry.header_offset + local_header.fixed_and_variable_len,
            encrypted,
            password,
        )
    }

    /// Extract every entry into `dest_dir`, creating subdirectories as
    /// needed. Entries whose normalized name would escape `dest_dir`
    /// (absolute paths, `..` components) are rejected rather than
    /// followed — ZIP archives are an adversarial input, and path
    /// traversal here is a well-known attack (Zip Slip).
    pub fn extract_all(&mut self, dest_dir: &Path) -> Result<()> {
        let entries = self.entries.clone();
        for entry in &entries {
            let target = safe_join(dest_dir, &entry.name)?;
            if entry.is_dir() {
                std::fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut reader = self.open_member_entry(entry)?;
            let mut out = File::create(&target)?;
            std::io::copy(&mut reader, &mut out)?;
        }
        Ok(())
    }

    /// Begin writing a new entry. Data descriptor mode is used
    /// unconditionally since sizes aren't known until the caller finishes
    /// supplying data. Fails if another write stream is already open — the
    /// writer gate, per the reference implementation's `_writing` flag,
    /// requires the caller to [`ZipArchive::finish_entry`] first.
    ///
    /// `force_zip64` forces a ZIP64 local/central header and data
    /// descriptor even if the entry turns out to be small, matching
    /// `open(name, 'w', force_zip64=True)`.
    pub fn start_entry(
        &mut self,
        name: &str,
        date_time: crate::entry::DateTime,
        compress_type: CompressionMethod,
        compress_level: u32,
        force_zip64: bool,
    ) -> Result<()> {
        self.writecheck()?;
        if self.pending.is_some() {
            return Err(ZipError::InvalidArgument(
                "can't open a new entry while a write stream is open; call finish_entry() first"
                    .into(),
            ));
        }

        if self.name_index.contains_key(name) {
            log::warn!("duplicate name in archive: {name}");
        }

        let mut entry = ZipEntry::new(name, date_time)?;
        entry.compress_type = compress_type;
        entry.compress_level = Some(compress_level);
        entry.flag_bits |= MASK_USE_DATA_DESCRIPTOR;
        if !name.is_ascii() {
            entry.flag_bits |= crate::spec::MASK_UTF8_NAME;
        }
        if force_zip64 {
            entry.extract_version = entry.extract_version.max(crate::spec::ZIP64_VERSION);
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ZipError::InvalidArgument("archive is not open for writing".into()))?;

        let local_header_offset = file.stream_position()?;
        let header = entry.file_header(Some(force_zip64))?;
        file.write_all(&header)?;

        let sink = file.try_clone()?;
        let stream = WriteStream::new(sink, &entry, local_header_offset, compress_level);

        self.writer_gate.store(true, Ordering::Release);
        self.pending = Some(PendingEntry { stream, entry, force_zip64 });
        Ok(())
    }

    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| ZipError::InvalidArgument("no entry has been started".into()))?;
        pending.stream.write_data(data)
    }

    /// Finish the currently open write stream (if any): flush the
    /// compressor, emit the data descriptor or rewrite the local header,
    /// and append the finished entry to the catalog. A no-op if no write
    /// stream is open.
    pub fn finish_entry(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            let (entry, _sink) =
                pending
                    .stream
                    .finish(pending.entry, pending.force_zip64, self.allow_zip64)?;
            self.name_index.insert(entry.name.clone(), self.entries.len());
            self.entries.push(entry);
            self.writer_gate.store(false, Ordering::Release);

            // Resync the archive's own file cursor past the bytes the
            // cloned sink just wrote (they share an OS file offset on
            // POSIX, but keep this explicit rather than relying on it).
            if let Some(file) = &mut self.file {
                let real_end = file.seek(SeekFrom::End(0))?;
                file.seek(SeekFrom::Start(real_end))?;
            }
        }
        Ok(())
    }

    /// Write a whole file from disk as one entry.
    pub fn write_path(&mut self, disk_path: &Path, arcname: Option<&str>, compress_type: CompressionMethod, compress_level: u32) -> Result<()> {
        if self.pending.is_some() {
            return Err(ZipError::InvalidArgument(
                "can't write to the archive while an open writing handle exists".into(),
            ));
        }

        #[cfg(unix)]
        let mut entry_template = ZipEntry::from_path(disk_path, arcname)?;
        #[cfg(not(unix))]
        let mut entry_template = {
            let name = arcname.map(|s| s.to_string()).unwrap_or_else(|| {
                disk_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
            });
            ZipEntry::new(&name, (1980, 1, 1, 0, 0, 0))?
        };

        if entry_template.is_dir() {
            return self.make_dir(&entry_template.name);
        }

        entry_template.compress_type = compress_type;
        self.start_entry(&entry_template.name, entry_template.date_time, compress_type, compress_level, false)?;

        let mut file = File::open(disk_path)?;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.write_data(&buf[..n])?;
        }
        self.finish_entry()
    }

    /// Write a zero-length directory entry. Per the reference
    /// implementation's known ordering bug (fixed here): validation runs
    /// *before* the entry is added to the catalog, not after, so a
    /// rejected `mkdir` never leaves a half-registered entry behind.
    pub fn make_dir(&mut self, name: &str) -> Result<()> {
        self.writecheck()?;
        if self.pending.is_some() {
            return Err(ZipError::InvalidArgument(
                "can't create a directory entry while a write stream is open".into(),
            ));
        }

        let name = if name.ends_with('/') {
            name.to_string()
        } else {
            format!("{name}/")
        };

        if self.name_index.contains_key(&name) {
            log::warn!("duplicate name in archive: {name}");
        }

        let mut entry = ZipEntry::new(&name, (1980, 1, 1, 0, 0, 0))?;
        entry.external_attr = 0o40755 << 16 | 0x10;
        entry.compress_type = CompressionMethod::Stored;

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ZipError::InvalidArgument("archive is not open for writing".into()))?;
        entry.header_offset = file.stream_position()?;

        let header = entry.file_header(Some(false))?;
        file.write_all(&header)?;

        // Validation already happened above, before this push.
        self.name_index.insert(entry.name.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    fn writecheck(&self) -> Result<()> {
        if self.closed {
            return Err(ZipError::InvalidArgument("archive is closed".into()));
        }
        if self.mode == ArchiveMode::Read {
            return Err(ZipError::InvalidArgument(
                "archive was not opened for writing".into(),
            ));
        }
        Ok(())
    }

    /// Finish the last pending entry (if any), write the central
    /// directory and End Of Central Directory record, and flush to disk.
    pub fn close(mut self) -> Result<()> {
        if self.mode == ArchiveMode::Read || self.closed {
            self.closed = true;
            return Ok(());
        }

        if self.pending.is_some() {
            return Err(ZipError::InvalidArgument(
                "can't close the archive while a write stream is open; call finish_entry() first"
                    .into(),
            ));
        }
        self.writer_gate.store(true, Ordering::Release);

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ZipError::InvalidArgument("archive is not open for writing".into()))?;

        let cd_offset = file.stream_position()?;
        let mut cd_size = 0u64;
        for entry in &self.entries {
            let header = entry.central_directory_header();
            cd_size += header.len() as u64;
            file.write_all(&header)?;
        }

        let needs_zip64 = self.entries.len() as u64 > ZIP_FILECOUNT_LIMIT
            || cd_size > ZIP64_LIMIT
            || cd_offset > ZIP64_LIMIT;

        if needs_zip64 && !self.allow_zip64 {
            return Err(ZipError::LargeZipFile("central directory".into()));
        }
        if needs_zip64 {
            log::debug!("promoting end of central directory to ZIP64");
        }

        let eocd = eocd::build(
            self.entries.len() as u64,
            cd_size,
            cd_offset,
            &self.comment,
            needs_zip64,
        );
        file.write_all(&eocd)?;
        file.flush()?;

        self.closed = true;
        Ok(())
    }
}

/// Join `name` onto `dest_dir`, rejecting any entry name that would escape
/// it via an absolute path or `..` component.
fn safe_join(dest_dir: &Path, name: &str) -> Result<PathBuf> {
    let mut target = dest_dir.to_path_buf();
    for component in Path::new(name).components() {
        use std::path::Component;
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ZipError::InvalidArgument(format!(
                    "entry name escapes the extraction directory: {name}"
                )));
            }
        }
    }
    Ok(target)
}

struct LocalHeaderInfo {
    fixed_and_variable_len: u64,
    flag_bits: u16,
    name: String,
}

/// Read the local file header: the fixed 30-byte part plus the name it
/// declares, enough to validate it against the central directory entry and
/// to find where the compressed data begins.
fn read_local_header(source: &SharedSource<File>, offset: u64) -> Result<LocalHeaderInfo> {
    let mut fixed = [0u8; crate::spec::SIZE_LOCAL_FILE_HEADER as usize];
    let n = source.read_at(offset, &mut fixed)?;
    if n != fixed.len() {
        return Err(ZipError::BadZipFile("truncated local file header".into()));
    }

    let sig = u32::from_le_bytes(fixed[0..4].try_into().unwrap());
    if sig != crate::spec::LOCAL_FILE_HEADER_SIGNATURE {
        return Err(ZipError::BadZipFile(
            "bad magic number for local file header".into(),
        ));
    }

    let flag_bits = u16::from_le_bytes(fixed[6..8].try_into().unwrap());
    let name_len = u16::from_le_bytes(fixed[26..28].try_into().unwrap()) as u64;
    let extra_len = u16::from_le_bytes(fixed[28..30].try_into().unwrap()) as u64;

    let mut name_raw = vec![0u8; name_len as usize];
    if name_len > 0 {
        let n = source.read_at(offset + crate::spec::SIZE_LOCAL_FILE_HEADER, &mut name_raw)?;
        if n != name_raw.len() {
            return Err(ZipError::BadZipFile("truncated local file header name".into()));
        }
    }
    let name = ZipEntry::decode_text(&name_raw, flag_bits);

    Ok(LocalHeaderInfo {
        fixed_and_variable_len: crate::spec::SIZE_LOCAL_FILE_HEADER + name_len + extra_len,
        flag_bits,
        name,
    })
}

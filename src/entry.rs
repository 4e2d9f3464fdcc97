//! Entry record: metadata for one archived member, and the local/central
//! header codecs that (de)serialize it.

use crate::error::{Result, ZipError};
use crate::extra;
use crate::spec::*;
use codepage_437::{BorrowFromCp437, CP437_CONTROL};
use std::borrow::Cow;
use std::path::Path;

/// One of the four compression identifiers this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
    Bzip2,
    Lzma,
}

impl CompressionMethod {
    pub fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Bzip2 => 12,
            CompressionMethod::Lzma => 14,
        }
    }

    pub fn from_u16(v: u16) -> Result<Self> {
        match v {
            0 => Ok(CompressionMethod::Stored),
            8 => Ok(CompressionMethod::Deflated),
            12 => Ok(CompressionMethod::Bzip2),
            14 => Ok(CompressionMethod::Lzma),
            other => Err(ZipError::NotImplemented(format!(
                "compression method {other} is not supported"
            ))),
        }
    }

    fn min_version(self) -> u16 {
        match self {
            CompressionMethod::Bzip2 => BZIP2_VERSION,
            CompressionMethod::Lzma => LZMA_VERSION,
            _ => 0,
        }
    }
}

/// Six-tuple date/time as stored in a ZIP entry: `(year, month, day, hour,
/// minute, second)`. `year >= 1980`; `second` is even (DOS time only has
/// two-second resolution).
pub type DateTime = (u16, u8, u8, u8, u8, u8);

fn dos_to_datetime(date: u16, time: u16) -> DateTime {
    (
        (date >> 9) + 1980,
        ((date >> 5) & 0xF) as u8,
        (date & 0x1F) as u8,
        (time >> 11) as u8,
        ((time >> 5) & 0x3F) as u8,
        ((time & 0x1F) * 2) as u8,
    )
}

/// Convert a Unix mtime to a ZIP `DateTime`, clamped to the range the
/// format's DOS-derived date field can represent (1980-2107).
#[cfg(unix)]
fn mtime_to_datetime(mtime: i64) -> DateTime {
    const DAYS_BY_MONTH: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

    fn is_leap(year: i64) -> bool {
        (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
    }

    if mtime < 0 {
        return (1980, 1, 1, 0, 0, 0);
    }

    let mut days = mtime / 86_400;
    let secs_of_day = mtime % 86_400;

    let mut year = 1970i64;
    loop {
        let year_days = if is_leap(year) { 366 } else { 365 };
        if days < year_days {
            break;
        }
        days -= year_days;
        year += 1;
        if year > 2107 {
            return (2107, 12, 31, 23, 59, 58);
        }
    }

    let mut month = 0usize;
    for (i, &len) in DAYS_BY_MONTH.iter().enumerate() {
        let len = if i == 1 && is_leap(year) { 29 } else { len };
        if days < len {
            month = i;
            break;
        }
        days -= len;
    }

    let day = days + 1;
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;

    if year < 1980 {
        (1980, 1, 1, 0, 0, 0)
    } else {
        (
            year as u16,
            (month + 1) as u8,
            day as u8,
            hour as u8,
            minute as u8,
            (second - second % 2) as u8,
        )
    }
}

fn datetime_to_dos(dt: DateTime) -> (u16, u16) {
    let (year, month, day, hour, minute, second) = dt;
    let date = (year - 1980) << 9 | (month as u16) << 5 | day as u16;
    let time = (hour as u16) << 11 | (minute as u16) << 5 | (second as u16) / 2;
    (date, time)
}

/// Metadata for one archived member.
///
/// `original_name` is the caller- or archive-supplied name before
/// normalization, `name` the normalized (forward-slash, null-stripped)
/// path used for lookups.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub original_name: String,
    pub name: String,
    pub date_time: DateTime,
    pub compress_type: CompressionMethod,
    pub compress_level: Option<u32>,
    pub flag_bits: u16,
    pub create_system: u8,
    pub create_version: u16,
    pub extract_version: u16,
    pub reserved: u16,
    pub volume: u16,
    pub internal_attr: u16,
    pub external_attr: u32,
    pub crc: u32,
    pub compress_size: u64,
    pub file_size: u64,
    pub header_offset: u64,
    pub comment: Vec<u8>,
    pub extra: Vec<u8>,
    pub raw_time: u16,
}

impl ZipEntry {
    /// Construct a new entry for writing, with the defaults the reference
    /// implementation uses for a freshly-created `ZipInfo`.
    pub fn new(name: &str, date_time: DateTime) -> Result<Self> {
        if date_time.0 < 1980 {
            return Err(ZipError::InvalidArgument(
                "ZIP does not support timestamps before 1980".into(),
            ));
        }

        let original_name = name.to_string();
        let normalized = normalize_name(name);

        Ok(ZipEntry {
            original_name,
            name: normalized,
            date_time,
            compress_type: CompressionMethod::Stored,
            compress_level: None,
            flag_bits: 0,
            create_system: 3, // unix
            create_version: DEFAULT_VERSION,
            extract_version: DEFAULT_VERSION,
            reserved: 0,
            volume: 0,
            internal_attr: 0,
            external_attr: 0,
            crc: 0,
            compress_size: 0,
            file_size: 0,
            header_offset: 0,
            comment: Vec::new(),
            extra: Vec::new(),
            raw_time: 0,
        })
    }

    /// Build an entry from a file on disk: name defaults to the final path
    /// component (or the whole relative path if `arcname` is given), the
    /// timestamp comes from the file's mtime clamped to the range ZIP
    /// supports (1980-2107), and Unix permission bits land in the high
    /// 16 bits of `external_attr` the way `zipfile.ZipInfo.from_file` packs
    /// them (`st_mode << 16`).
    #[cfg(unix)]
    pub fn from_path(path: &Path, arcname: Option<&str>) -> Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = std::fs::metadata(path)?;
        let name = arcname
            .map(|s| s.to_string())
            .unwrap_or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());

        let is_dir = metadata.is_dir();
        let name = if is_dir && !name.ends_with('/') {
            format!("{name}/")
        } else {
            name
        };

        let date_time = mtime_to_datetime(metadata.mtime());
        let mut entry = ZipEntry::new(&name, date_time)?;
        entry.external_attr = (metadata.mode() as u32) << 16;
        if is_dir {
            entry.external_attr |= 0x10; // FILE_ATTRIBUTE_DIRECTORY, for cross-platform tools
        }
        Ok(entry)
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    fn encode_name(&self) -> (Vec<u8>, u16) {
        if self.name.is_ascii() {
            (self.name.as_bytes().to_vec(), self.flag_bits)
        } else {
            (self.name.as_bytes().to_vec(), self.flag_bits | MASK_UTF8_NAME)
        }
    }

    /// Decode a raw name/comment byte string per flag bit 11: UTF-8 when
    /// set, Code Page 437 otherwise (never lossy UTF-8 fallback, matching
    /// `metadata_encoding or 'cp437'` in the reference implementation).
    pub fn decode_text(raw: &[u8], flag_bits: u16) -> String {
        if flag_bits & MASK_UTF8_NAME != 0 {
            String::from_utf8_lossy(raw).into_owned()
        } else {
            match Cow::borrow_from_cp437(raw, &CP437_CONTROL) {
                Cow::Borrowed(s) => s.to_string(),
                Cow::Owned(s) => s,
            }
        }
    }

    /// Serialize the local file header (§6): 30-byte fixed part + name +
    /// extra. `zip64` forces the ZIP64 extra/sentinel representation;
    /// `None` auto-decides based on current sizes.
    pub fn file_header(&self, zip64: Option<bool>) -> Result<Vec<u8>> {
        let (dosdate, dostime) = datetime_to_dos(self.date_time);

        let (crc, compress_size, file_size) = if self.flag_bits & MASK_USE_DATA_DESCRIPTOR != 0 {
            (0, 0, 0)
        } else {
            (self.crc, self.compress_size, self.file_size)
        };

        let zip64 = zip64.unwrap_or(file_size > ZIP64_LIMIT || compress_size > ZIP64_LIMIT);

        let mut extra = self.extra.clone();
        let mut min_version = 0u16;
        let (wire_compress_size, wire_file_size) = if zip64 {
            // The local header's ZIP64 block always carries both sizes,
            // unconditionally, regardless of which one actually overflowed.
            let mut payload = Vec::new();
            payload.extend_from_slice(&file_size.to_le_bytes());
            payload.extend_from_slice(&compress_size.to_le_bytes());
            extra.extend_from_slice(&extra::encode_blocks(&[extra::ExtraField {
                id: ZIP64_EXTRA_ID,
                payload,
            }]));
            (SENTINEL_32, SENTINEL_32)
        } else {
            (compress_size as u32, file_size as u32)
        };

        if (file_size > ZIP64_LIMIT || compress_size > ZIP64_LIMIT) && !zip64 {
            return Err(ZipError::LargeZipFile("filesize".into()));
        }
        if zip64 {
            min_version = ZIP64_VERSION;
        }
        min_version = min_version.max(self.compress_type.min_version());

        let extract_version = self.extract_version.max(min_version);

        let (name_bytes, flag_bits) = self.encode_name();

        let mut out = Vec::with_capacity(SIZE_LOCAL_FILE_HEADER as usize + name_bytes.len() + extra.len());
        out.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&extract_version.to_le_bytes());
        out.extend_from_slice(&flag_bits.to_le_bytes());
        out.extend_from_slice(&self.compress_type.to_u16().to_le_bytes());
        out.extend_from_slice(&dostime.to_le_bytes());
        out.extend_from_slice(&dosdate.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&wire_compress_size.to_le_bytes());
        out.extend_from_slice(&wire_file_size.to_le_bytes());
        out.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&name_bytes);
        out.extend_from_slice(&extra);

        Ok(out)
    }

    /// Serialize the central directory header (§6): 46-byte fixed part +
    /// name + extra + comment. Only size/offset fields that overflow 32
    /// bits get a ZIP64 extra, each pinned to its sentinel maximum.
    pub fn central_directory_header(&self) -> Vec<u8> {
        let (dosdate, dostime) = datetime_to_dos(self.date_time);

        let (file_size, compress_size) = if self.file_size > ZIP64_LIMIT || self.compress_size > ZIP64_LIMIT {
            (SENTINEL_32, SENTINEL_32)
        } else {
            (self.file_size as u32, self.compress_size as u32)
        };

        let header_offset = if self.header_offset > ZIP64_LIMIT {
            SENTINEL_32
        } else {
            self.header_offset as u32
        };

        let mut extra_data = extra::strip_by_id(&self.extra, &[ZIP64_EXTRA_ID]);
        let mut min_version = 0u16;
        if let Some(block) = extra::build_zip64_extra(self.file_size, self.compress_size, self.header_offset) {
            let mut combined = block;
            combined.extend_from_slice(&extra_data);
            extra_data = combined;
            min_version = ZIP64_VERSION;
        }

        min_version = min_version.max(self.compress_type.min_version());
        let extract_version = self.extract_version.max(min_version);
        let create_version = self.create_version.max(min_version);

        let (name_bytes, flag_bits) = self.encode_name();

        let mut out = Vec::with_capacity(
            SIZE_CENTRAL_DIR_HEADER as usize + name_bytes.len() + extra_data.len() + self.comment.len(),
        );
        out.extend_from_slice(&CENTRAL_DIRECTORY_HEADER_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&[create_version as u8, self.create_system]);
        out.extend_from_slice(&[extract_version as u8, self.reserved as u8]);
        out.extend_from_slice(&flag_bits.to_le_bytes());
        out.extend_from_slice(&self.compress_type.to_u16().to_le_bytes());
        out.extend_from_slice(&dostime.to_le_bytes());
        out.extend_from_slice(&dosdate.to_le_bytes());
        out.extend_from_slice(&self.crc.to_le_bytes());
        out.extend_from_slice(&compress_size.to_le_bytes());
        out.extend_from_slice(&file_size.to_le_bytes());
        out.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra_data.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.volume.to_le_bytes());
        out.extend_from_slice(&self.internal_attr.to_le_bytes());
        out.extend_from_slice(&self.external_attr.to_le_bytes());
        out.extend_from_slice(&header_offset.to_le_bytes());
        out.extend_from_slice(&name_bytes);
        out.extend_from_slice(&extra_data);
        out.extend_from_slice(&self.comment);
        out
    }

    /// Parse a 46-byte central directory header plus trailing variable
    /// fields from `buf` (already positioned at the signature).
    pub fn parse_central_directory(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < SIZE_CENTRAL_DIR_HEADER as usize {
            return Err(ZipError::BadZipFile("truncated central directory".into()));
        }

        let sig = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if sig != CENTRAL_DIRECTORY_HEADER_SIGNATURE {
            return Err(ZipError::BadZipFile(
                "bad magic number for central directory".into(),
            ));
        }

        let create_version = buf[4] as u16;
        let create_system = buf[5];
        let extract_version = buf[6] as u16;
        let reserved = buf[7] as u16;
        let flag_bits = u16::from_le_bytes(buf[8..10].try_into().unwrap());
        let compress_type_raw = u16::from_le_bytes(buf[10..12].try_into().unwrap());
        let time = u16::from_le_bytes(buf[12..14].try_into().unwrap());
        let date = u16::from_le_bytes(buf[14..16].try_into().unwrap());
        let crc = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let compress_size_32 = u32::from_le_bytes(buf[20..24].try_into().unwrap());
        let file_size_32 = u32::from_le_bytes(buf[24..28].try_into().unwrap());
        let name_len = u16::from_le_bytes(buf[28..30].try_into().unwrap()) as usize;
        let extra_len = u16::from_le_bytes(buf[30..32].try_into().unwrap()) as usize;
        let comment_len = u16::from_le_bytes(buf[32..34].try_into().unwrap()) as usize;
        let volume = u16::from_le_bytes(buf[34..36].try_into().unwrap());
        let internal_attr = u16::from_le_bytes(buf[36..38].try_into().unwrap());
        let external_attr = u32::from_le_bytes(buf[38..42].try_into().unwrap());
        let header_offset_32 = u32::from_le_bytes(buf[42..46].try_into().unwrap());

        if extract_version > MAX_EXTRACT_VERSION {
            return Err(ZipError::NotImplemented(format!(
                "zip file version {:.1}",
                extract_version as f32 / 10.0
            )));
        }

        let fixed_end = SIZE_CENTRAL_DIR_HEADER as usize;
        let name_end = fixed_end + name_len;
        let extra_end = name_end + extra_len;
        let comment_end = extra_end + comment_len;
        if buf.len() < comment_end {
            return Err(ZipError::BadZipFile("truncated central directory".into()));
        }

        let name_raw = &buf[fixed_end..name_end];
        let extra_raw = buf[name_end..extra_end].to_vec();
        let comment_raw = buf[extra_end..comment_end].to_vec();

        let name = Self::decode_text(name_raw, flag_bits);
        let compress_type = CompressionMethod::from_u16(compress_type_raw)
            .unwrap_or(CompressionMethod::Stored);

        let date_time = dos_to_datetime(date, time);

        let file_size_sentinel = file_size_32 == SENTINEL_32;
        let compress_size_sentinel = compress_size_32 == SENTINEL_32;
        let header_offset_sentinel = header_offset_32 == SENTINEL_32;

        let pending = extra::read_zip64_extra(
            &extra_raw,
            file_size_sentinel,
            compress_size_sentinel,
            header_offset_sentinel,
        )?;

        let file_size = pending.file_size.unwrap_or(file_size_32 as u64);
        let compress_size = pending.compress_size.unwrap_or(compress_size_32 as u64);
        let header_offset = pending.header_offset.unwrap_or(header_offset_32 as u64);

        let entry = ZipEntry {
            original_name: name.clone(),
            name,
            date_time,
            compress_type,
            compress_level: None,
            flag_bits,
            create_system,
            create_version,
            extract_version,
            reserved,
            volume,
            internal_attr,
            external_attr,
            crc,
            compress_size,
            file_size,
            header_offset,
            comment: comment_raw,
            extra: extra_raw,
            raw_time: time,
        };

        Ok((entry, comment_end))
    }
}

/// Normalize a caller- or archive-supplied name: strip anything from the
/// first NUL byte onward, and rewrite platform path separators to `/`.
pub fn normalize_name(name: &str) -> String {
    let stripped = match name.find('\0') {
        Some(idx) => &name[..idx],
        None => name,
    };
    if std::path::MAIN_SEPARATOR != '/' {
        stripped.replace(std::path::MAIN_SEPARATOR, "/")
    } else {
        stripped.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dos_datetime_roundtrip() {
        let dt: DateTime = (2020, 1, 2, 3, 4, 6);
        let (d, t) = datetime_to_dos(dt);
        assert_eq!(dos_to_datetime(d, t), dt);
    }

    #[test]
    fn rejects_pre_1980() {
        let err = ZipEntry::new("a.txt", (1979, 1, 1, 0, 0, 0));
        assert!(err.is_err());
    }

    #[test]
    fn directory_name_detection() {
        let e = ZipEntry::new("dir/", (2020, 1, 1, 0, 0, 0)).unwrap();
        assert!(e.is_dir());
    }

    #[test]
    fn central_directory_header_roundtrip() {
        let mut e = ZipEntry::new("hello.txt", (2020, 1, 1, 0, 0, 0)).unwrap();
        e.crc = 0x3610_A686;
        e.file_size = 5;
        e.compress_size = 5;
        e.header_offset = 0;

        let header = e.central_directory_header();
        let (parsed, consumed) = ZipEntry::parse_central_directory(&header).unwrap();
        assert_eq!(consumed, header.len());
        assert_eq!(parsed.name, "hello.txt");
        assert_eq!(parsed.crc, 0x3610_A686);
        assert_eq!(parsed.file_size, 5);
    }
}

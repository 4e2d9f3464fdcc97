//! Trailer Locator: find the End Of Central Directory record (and, if
//! present, its ZIP64 extension) by scanning backward from the end of the
//! file, the way every real ZIP reader has to since the central directory
//! itself is found only through this trailer.

use crate::error::{Result, ZipError};
use crate::spec::*;
use std::io::{Read, Seek, SeekFrom};

/// Parsed End Of Central Directory record, already promoted to ZIP64 values
/// where a ZIP64 locator/record was found.
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub entries_on_disk: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
    pub comment: Vec<u8>,
    /// Byte offset of the EOCD signature itself within the file.
    pub eocd_offset: u64,
    pub zip64: bool,
}

/// Locate and parse the EOCD (promoting to the ZIP64 record when present).
///
/// `concat` compensates for self-extracting archives or archives with a
/// prefixed stub: it's the difference between where the archive's logical
/// byte 0 sits and where the file on disk actually starts, computed from
/// where the trailer says the central directory should begin versus where
/// it was actually found.
pub fn locate<R: Read + Seek>(reader: &mut R) -> Result<(EndOfCentralDirectory, i64)> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    let eocd_offset = find_eocd_signature(reader, file_size)?;

    reader.seek(SeekFrom::Start(eocd_offset))?;
    let mut fixed = [0u8; SIZE_END_CENTRAL_DIR as usize];
    reader.read_exact(&mut fixed)?;

    let disk_number = u16::from_le_bytes(fixed[4..6].try_into().unwrap()) as u32;
    let disk_with_cd = u16::from_le_bytes(fixed[6..8].try_into().unwrap()) as u32;
    let entries_on_disk_16 = u16::from_le_bytes(fixed[8..10].try_into().unwrap());
    let total_entries_16 = u16::from_le_bytes(fixed[10..12].try_into().unwrap());
    let cd_size_32 = u32::from_le_bytes(fixed[12..16].try_into().unwrap());
    let cd_offset_32 = u32::from_le_bytes(fixed[16..20].try_into().unwrap());
    let comment_len = u16::from_le_bytes(fixed[20..22].try_into().unwrap()) as usize;

    let mut comment = vec![0u8; comment_len];
    if comment_len > 0 {
        reader.read_exact(&mut comment)?;
    }

    let needs_zip64 = total_entries_16 == SENTINEL_16
        || entries_on_disk_16 == SENTINEL_16
        || cd_size_32 == SENTINEL_32
        || cd_offset_32 == SENTINEL_32;

    let mut eocd = EndOfCentralDirectory {
        disk_number,
        disk_with_cd,
        entries_on_disk: entries_on_disk_16 as u64,
        total_entries: total_entries_16 as u64,
        cd_size: cd_size_32 as u64,
        cd_offset: cd_offset_32 as u64,
        comment,
        eocd_offset,
        zip64: false,
    };

    // The on-disk position the central directory's tail is immediately
    // followed by: the classic EOCD itself, unless a ZIP64 locator/record
    // pair sits between the two (they're assumed contiguous, immediately
    // preceding the classic EOCD — see DESIGN.md's Open Question on this).
    let mut record_location = eocd_offset;

    if needs_zip64 {
        if let Some(zip64) = try_read_zip64(reader, eocd_offset)? {
            eocd.disk_number = zip64.disk_number;
            eocd.disk_with_cd = zip64.disk_with_cd;
            eocd.entries_on_disk = zip64.entries_on_disk;
            eocd.total_entries = zip64.total_entries;
            eocd.cd_size = zip64.cd_size;
            eocd.cd_offset = zip64.cd_offset;
            eocd.zip64 = true;
            record_location = zip64.record_offset;
        }
    }

    // A self-extracting archive or one with a prepended stub shifts every
    // offset in the archive by a constant. The trailer knows where the
    // central directory "should" start (cd_offset) and we know where it
    // actually ends (record_location); the difference between the two is
    // that constant shift.
    let expected_cd_end = eocd.cd_offset + eocd.cd_size;
    let concat = record_location as i64 - expected_cd_end as i64;

    Ok((eocd, concat))
}

/// Locate the EOCD signature. The common case — no archive comment — is a
/// single fixed-offset read at `file_size - 22`; only when that doesn't
/// pan out (a comment is present, or trailing junk confuses the fixed
/// offset) does this fall back to scanning the last 64KiB+22 bytes for the
/// rightmost signature, matching the two-path shape of the original
/// `_EndRecData`.
fn find_eocd_signature<R: Read + Seek>(reader: &mut R, file_size: u64) -> Result<u64> {
    let sig = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();

    if file_size >= SIZE_END_CENTRAL_DIR {
        let fixed_offset = file_size - SIZE_END_CENTRAL_DIR;
        reader.seek(SeekFrom::Start(fixed_offset))?;
        let mut fixed = [0u8; SIZE_END_CENTRAL_DIR as usize];
        if reader.read_exact(&mut fixed).is_ok() && fixed[0..4] == sig && fixed[20..22] == [0, 0] {
            return Ok(fixed_offset);
        }
    }

    let search_start = file_size.saturating_sub(MAX_COMMENT_SEARCH);
    reader.seek(SeekFrom::Start(search_start))?;

    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;

    for i in (0..buffer.len().saturating_sub(sig.len() - 1)).rev() {
        if buffer[i..i + 4] == sig {
            return Ok(search_start + i as u64);
        }
    }

    Err(ZipError::BadZipFile(
        "end of central directory record not found".into(),
    ))
}

struct Zip64Record {
    disk_number: u32,
    disk_with_cd: u32,
    entries_on_disk: u64,
    total_entries: u64,
    cd_size: u64,
    cd_offset: u64,
    /// Offset of the ZIP64 EOCD record's own signature, i.e. where the
    /// central directory's tail is immediately followed by this record.
    record_offset: u64,
}

/// Find the ZIP64 locator immediately preceding the EOCD, and from it read
/// the ZIP64 EOCD record itself. Returns `None` when no locator is found —
/// archives with a 32-bit-but-full-of-sentinels EOCD (malformed) are the
/// caller's problem, not this function's.
fn try_read_zip64<R: Read + Seek>(
    reader: &mut R,
    eocd_offset: u64,
) -> Result<Option<Zip64Record>> {
    let locator_offset = match eocd_offset.checked_sub(SIZE_END_CENTRAL_DIR64_LOCATOR) {
        Some(off) => off,
        None => return Ok(None),
    };

    reader.seek(SeekFrom::Start(locator_offset))?;
    let mut locator = [0u8; SIZE_END_CENTRAL_DIR64_LOCATOR as usize];
    reader.read_exact(&mut locator)?;

    let sig = u32::from_le_bytes(locator[0..4].try_into().unwrap());
    if sig != ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE {
        return Ok(None);
    }

    let disk_with_zip64_eocd = u32::from_le_bytes(locator[4..8].try_into().unwrap());
    let total_disks = u32::from_le_bytes(locator[16..20].try_into().unwrap());
    if disk_with_zip64_eocd != 0 || total_disks > 1 {
        return Err(ZipError::NotImplemented("multi-disk archives".into()));
    }

    // The locator's own offset field is the *logical* (pre-prepend)
    // position of the ZIP64 EOCD record, which only matches where the
    // record physically sits when nothing precedes the archive's logical
    // byte 0. Self-extracting / prepended archives break that. The ZIP64
    // EOCD and its locator are assumed contiguous and immediately
    // preceding the classic EOCD (see DESIGN.md's Open Question on this),
    // so the record's true physical offset is derived from the locator's
    // own physical position instead of trusting the stored offset.
    let record_offset = match locator_offset.checked_sub(SIZE_END_CENTRAL_DIR64) {
        Some(off) => off,
        None => {
            return Err(ZipError::BadZipFile(
                "truncated ZIP64 end of central directory record".into(),
            ))
        }
    };

    reader.seek(SeekFrom::Start(record_offset))?;
    let mut record = [0u8; SIZE_END_CENTRAL_DIR64 as usize];
    reader.read_exact(&mut record)?;

    let sig = u32::from_le_bytes(record[0..4].try_into().unwrap());
    if sig != ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE {
        return Err(ZipError::BadZipFile(
            "bad magic number for ZIP64 end of central directory record".into(),
        ));
    }

    let create_version = u16::from_le_bytes(record[12..14].try_into().unwrap());
    let _ = create_version;
    let disk_number = u32::from_le_bytes(record[16..20].try_into().unwrap());
    let disk_with_cd = u32::from_le_bytes(record[20..24].try_into().unwrap());
    let entries_on_disk = u64::from_le_bytes(record[24..32].try_into().unwrap());
    let total_entries = u64::from_le_bytes(record[32..40].try_into().unwrap());
    let cd_size = u64::from_le_bytes(record[40..48].try_into().unwrap());
    let cd_offset = u64::from_le_bytes(record[48..56].try_into().unwrap());

    Ok(Some(Zip64Record {
        disk_number,
        disk_with_cd,
        entries_on_disk,
        total_entries,
        cd_size,
        cd_offset,
        record_offset,
    }))
}

/// Serialize the End Of Central Directory record (and, if `zip64` is set,
/// the ZIP64 record and locator that must precede it) for `total_entries`
/// members occupying `cd_size` bytes starting at `cd_offset`.
pub fn build(total_entries: u64, cd_size: u64, cd_offset: u64, comment: &[u8], zip64: bool) -> Vec<u8> {
    let mut out = Vec::new();

    if zip64 {
        let zip64_eocd_offset = cd_offset + cd_size;

        out.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&(SIZE_END_CENTRAL_DIR64 - 12).to_le_bytes());
        out.extend_from_slice(&ZIP64_VERSION.to_le_bytes());
        out.extend_from_slice(&ZIP64_VERSION.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // disk number
        out.extend_from_slice(&0u32.to_le_bytes()); // disk with central dir
        out.extend_from_slice(&total_entries.to_le_bytes());
        out.extend_from_slice(&total_entries.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());

        out.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // disk with zip64 eocd
        out.extend_from_slice(&zip64_eocd_offset.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes()); // total disks
    }

    let (wire_entries, wire_cd_size, wire_cd_offset) = if zip64 {
        (SENTINEL_16, SENTINEL_32, SENTINEL_32)
    } else {
        (total_entries as u16, cd_size as u32, cd_offset as u32)
    };

    out.extend_from_slice(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // disk number
    out.extend_from_slice(&0u16.to_le_bytes()); // disk with central dir
    out.extend_from_slice(&wire_entries.to_le_bytes());
    out.extend_from_slice(&wire_entries.to_le_bytes());
    out.extend_from_slice(&wire_cd_size.to_le_bytes());
    out.extend_from_slice(&wire_cd_offset.to_le_bytes());
    out.extend_from_slice(&(comment.len() as u16).to_le_bytes());
    out.extend_from_slice(comment);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn locates_plain_eocd() {
        let record = build(3, 138, 1000, b"hi", false);
        // The zero-filled region stands in for every byte preceding the
        // EOCD: the archive's entries plus the central directory itself,
        // i.e. cd_offset + cd_size bytes when there's no prepended stub.
        let mut archive = vec![0u8; 1000 + 138];
        archive.extend_from_slice(&record);

        let mut cursor = Cursor::new(archive);
        let (eocd, concat) = locate(&mut cursor).unwrap();

        assert_eq!(eocd.total_entries, 3);
        assert_eq!(eocd.cd_size, 138);
        assert_eq!(eocd.cd_offset, 1000);
        assert_eq!(eocd.comment, b"hi");
        assert!(!eocd.zip64);
        assert_eq!(concat, 0);
    }

    #[test]
    fn locates_zip64_eocd() {
        let cd_offset = 1_000_000u64;
        let cd_size = 999_999u64;
        let record = build(70_000, cd_size, cd_offset, b"", true);
        // The zero-filled region stands in for "central directory start" +
        // "central directory bytes": the ZIP64 EOCD record must immediately
        // follow the real end of the central directory.
        let mut archive = vec![0u8; (cd_offset + cd_size) as usize];
        archive.extend_from_slice(&record);

        let mut cursor = Cursor::new(archive);
        let (eocd, concat) = locate(&mut cursor).unwrap();

        assert_eq!(eocd.total_entries, 70_000);
        assert_eq!(eocd.cd_size, cd_size);
        assert_eq!(eocd.cd_offset, cd_offset);
        assert!(eocd.zip64);
        assert_eq!(concat, 0);
    }

    #[test]
    fn detects_prepend_offset() {
        let record = build(1, 46, 100, b"", false);
        let mut archive = vec![0xAAu8; 50]; // prepended stub
        archive.extend(vec![0u8; 146]); // cd_offset(100) + cd_size(46)
        archive.extend_from_slice(&record);

        let mut cursor = Cursor::new(archive);
        let (_eocd, concat) = locate(&mut cursor).unwrap();
        assert_eq!(concat, 50);
    }

    #[test]
    fn detects_prepend_offset_with_zip64() {
        let cd_offset = 200u64;
        let cd_size = 80u64;
        let record = build(1, cd_size, cd_offset, b"", true);
        let mut archive = vec![0xAAu8; 4096]; // self-extractor stub
        archive.extend(vec![0u8; (cd_offset + cd_size) as usize]);
        archive.extend_from_slice(&record);

        let mut cursor = Cursor::new(archive);
        let (eocd, concat) = locate(&mut cursor).unwrap();
        assert!(eocd.zip64);
        assert_eq!(concat, 4096);
    }

    #[test]
    fn missing_eocd_is_bad_zip_file() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        assert!(locate(&mut cursor).is_err());
    }
}

//! Extra-field codec: the TLV blocks attached to local and central headers.
//!
//! Parsing is strictly sequential, as APPNOTE requires. The ZIP64 block
//! (id `0x0001`) is special-cased because its payload omits fields that
//! aren't sentinel in the fixed-size header, so `read_zip64` is driven by
//! which fields the caller says are still pending.

use crate::error::{Result, ZipError};
use crate::spec::ZIP64_EXTRA_ID;

/// One `(id, payload)` block from an extra field.
#[derive(Debug, Clone)]
pub struct ExtraField {
    pub id: u16,
    pub payload: Vec<u8>,
}

/// Parse a raw extra-field byte string into its constituent blocks.
///
/// Malformed trailing bytes (fewer than 4 header bytes, or a declared
/// length that runs past the buffer) are silently dropped, matching
/// `ZipInfo._decodeExtra`'s behavior of stopping at the first short block
/// rather than rejecting the whole archive — extra fields are advisory,
/// only the ZIP64 block is ever load-bearing.
pub fn parse_blocks(extra: &[u8]) -> Vec<ExtraField> {
    let mut blocks = Vec::new();
    let mut i = 0usize;
    while i + 4 <= extra.len() {
        let id = u16::from_le_bytes([extra[i], extra[i + 1]]);
        let len = u16::from_le_bytes([extra[i + 2], extra[i + 3]]) as usize;
        if i + 4 + len > extra.len() {
            break;
        }
        blocks.push(ExtraField {
            id,
            payload: extra[i + 4..i + 4 + len].to_vec(),
        });
        i += 4 + len;
    }
    blocks
}

/// Re-serialize extra-field blocks back into their TLV wire form.
pub fn encode_blocks(blocks: &[ExtraField]) -> Vec<u8> {
    let mut out = Vec::new();
    for block in blocks {
        out.extend_from_slice(&block.id.to_le_bytes());
        out.extend_from_slice(&(block.payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&block.payload);
    }
    out
}

/// Emit a copy of `extra` omitting any block whose id is in `ids`.
///
/// Used before re-emitting a fresh ZIP64 block on central-directory write,
/// so a stale one already present in `extra` isn't duplicated.
pub fn strip_by_id(extra: &[u8], ids: &[u16]) -> Vec<u8> {
    let blocks = parse_blocks(extra);
    let kept: Vec<ExtraField> = blocks.into_iter().filter(|b| !ids.contains(&b.id)).collect();
    encode_blocks(&kept)
}

/// Pending ZIP64 fields to lift out of a type-`0x0001` extra block, in the
/// fixed wire order: file_size, compress_size, header_offset. A `None`
/// entry means that field was not a 32-bit sentinel and is not looked up.
pub struct Zip64Pending {
    pub file_size: Option<u64>,
    pub compress_size: Option<u64>,
    pub header_offset: Option<u64>,
}

/// Lift the true 64-bit values for whichever fields were 32-bit sentinels.
///
/// The ZIP64 extra field stores only the sentinel fields, each as 8
/// sequential bytes, in the order file_size, compress_size, header_offset.
/// If the block doesn't have enough bytes for a field that's pending,
/// that's a corrupt archive.
pub fn read_zip64_extra(
    extra: &[u8],
    file_size_sentinel: bool,
    compress_size_sentinel: bool,
    header_offset_sentinel: bool,
) -> Result<Zip64Pending> {
    let blocks = parse_blocks(extra);
    let block = blocks.iter().find(|b| b.id == ZIP64_EXTRA_ID);

    let mut pending = Zip64Pending {
        file_size: None,
        compress_size: None,
        header_offset: None,
    };

    if !(file_size_sentinel || compress_size_sentinel || header_offset_sentinel) {
        return Ok(pending);
    }

    let data = match block {
        Some(b) => &b.payload[..],
        None => {
            return Err(ZipError::BadZipFile(
                "corrupt zip64 extra field: missing ZIP64 block".into(),
            ))
        }
    };

    let mut cursor = 0usize;
    let mut take_u64 = |field: &str| -> Result<u64> {
        if cursor + 8 > data.len() {
            return Err(ZipError::BadZipFile(format!(
                "corrupt zip64 extra field: {field} not found"
            )));
        }
        let v = u64::from_le_bytes(data[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;
        Ok(v)
    };

    if file_size_sentinel {
        pending.file_size = Some(take_u64("file size")?);
    }
    if compress_size_sentinel {
        pending.compress_size = Some(take_u64("compress size")?);
    }
    if header_offset_sentinel {
        pending.header_offset = Some(take_u64("header offset")?);
    }

    Ok(pending)
}

/// Build a central-directory ZIP64 extra block, in fixed order: file_size,
/// compress_size, header_offset. `file_size` and `compress_size` are paired
/// (either one overflowing 32 bits pulls both into the block, matching the
/// original's `if zinfo.file_size > ZIP64_LIMIT or zinfo.compress_size >
/// ZIP64_LIMIT`); `header_offset` is checked on its own. Returns `None` when
/// none of the three need it, i.e. no block should be emitted.
pub fn build_zip64_extra(file_size: u64, compress_size: u64, header_offset: u64) -> Option<Vec<u8>> {
    use crate::spec::ZIP64_LIMIT;

    let mut data = Vec::new();
    if file_size > ZIP64_LIMIT || compress_size > ZIP64_LIMIT {
        data.extend_from_slice(&file_size.to_le_bytes());
        data.extend_from_slice(&compress_size.to_le_bytes());
    }
    if header_offset > ZIP64_LIMIT {
        data.extend_from_slice(&header_offset.to_le_bytes());
    }

    if data.is_empty() {
        None
    } else {
        let block = ExtraField { id: ZIP64_EXTRA_ID, payload: data };
        Some(encode_blocks(&[block]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_encode_roundtrip() {
        let blocks = vec![
            ExtraField { id: 0x0001, payload: vec![1, 2, 3, 4, 5, 6, 7, 8] },
            ExtraField { id: 0x5455, payload: vec![9, 9] },
        ];
        let encoded = encode_blocks(&blocks);
        let parsed = parse_blocks(&encoded);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].id, 0x0001);
        assert_eq!(parsed[1].payload, vec![9, 9]);
    }

    #[test]
    fn strip_removes_only_named_ids() {
        let blocks = vec![
            ExtraField { id: 0x0001, payload: vec![0; 8] },
            ExtraField { id: 0x5455, payload: vec![1, 2] },
        ];
        let encoded = encode_blocks(&blocks);
        let stripped = strip_by_id(&encoded, &[0x0001]);
        let parsed = parse_blocks(&stripped);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, 0x5455);
    }

    #[test]
    fn zip64_extra_reads_only_sentinel_fields() {
        let data = {
            let mut d = Vec::new();
            d.extend_from_slice(&5_000_000_000u64.to_le_bytes());
            d.extend_from_slice(&123u64.to_le_bytes());
            d
        };
        let block = ExtraField { id: 0x0001, payload: data };
        let extra = encode_blocks(&[block]);

        let pending = read_zip64_extra(&extra, true, false, true).unwrap();
        assert_eq!(pending.file_size, Some(5_000_000_000));
        assert_eq!(pending.compress_size, None);
        assert_eq!(pending.header_offset, Some(123));
    }

    #[test]
    fn zip64_extra_missing_field_is_corrupt() {
        let block = ExtraField { id: 0x0001, payload: vec![0; 4] };
        let extra = encode_blocks(&[block]);
        assert!(read_zip64_extra(&extra, true, false, false).is_err());
    }
}

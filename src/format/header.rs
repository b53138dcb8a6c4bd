//! Header record codec.
//!
//! Pure encode/decode for the four record shapes of the container format:
//! local file headers, central directory records, the end-of-directory
//! record, and the 64-bit extension record/locator pair. All fields are
//! little-endian and every record opens with a 4-byte signature.
//!
//! Decode failure (bad signature, truncated buffer, lengths implying more
//! bytes than available) is a format error, never a partial result.
//!
//! # 64-bit promotion
//!
//! A field whose true value exceeds its 32-bit (or 16-bit) range is written
//! as the all-ones sentinel and its real value moves into the zip64
//! sub-record inside the extra field, in the fixed order
//! `size, compressed size, offset, disk`. Only overflowing fields are
//! present; decode reconstructs which by looking at the sentinels.

use std::io::{Read, Seek, SeekFrom};

use crate::entry::{CompressionMethod, U16_SENTINEL, U32_SENTINEL, ZipEntry, Zip64Mode};
use crate::error::{Error, Result};
use crate::format::extra::{ExtraData, ZIP64_TAG};

/// Record signatures (`PK..` magics).
pub(crate) mod sig {
    /// Local file header: `PK\x03\x04`.
    pub const LOCAL: u32 = 0x0403_4B50;
    /// Central directory record: `PK\x01\x02`.
    pub const CENTRAL: u32 = 0x0201_4B50;
    /// End of central directory: `PK\x05\x06`.
    pub const EOCD: u32 = 0x0605_4B50;
    /// Zip64 end of central directory record: `PK\x06\x06`.
    pub const ZIP64_EOCD: u32 = 0x0606_4B50;
    /// Zip64 end of central directory locator: `PK\x06\x07`.
    pub const ZIP64_LOCATOR: u32 = 0x0706_4B50;
    /// Data descriptor: `PK\x07\x08`.
    pub const DESCRIPTOR: u32 = 0x0807_4B50;
}

/// Fixed byte length of a local header, excluding name and extra field.
pub(crate) const LOCAL_HEADER_FIXED: usize = 30;
/// Fixed byte length of the end-of-directory record, excluding comment.
pub(crate) const EOCD_FIXED: usize = 22;
/// Byte length of the zip64 locator record.
pub(crate) const ZIP64_LOCATOR_LEN: usize = 20;

pub(crate) fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Bounds-checked little-endian scanner over a byte buffer.
///
/// `base` is the archive offset of the buffer's first byte, used to report
/// absolute positions in corruption errors.
pub(crate) struct Scan<'a> {
    buf: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> Scan<'a> {
    pub(crate) fn new(buf: &'a [u8], base: u64) -> Self {
        Self { buf, pos: 0, base }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn truncated(&self, what: &str) -> Error {
        Error::CorruptHeader {
            offset: self.offset(),
            reason: format!("truncated {what}"),
        }
    }

    pub(crate) fn u16(&mut self, what: &str) -> Result<u16> {
        let b = self.bytes(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.bytes(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self, what: &str) -> Result<u64> {
        let b = self.bytes(8, what)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub(crate) fn bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.truncated(what));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

/// The fixed-width fields of a local header, after the signature.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawLocalHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub dos_time: u32,
    pub crc: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_len: u16,
    pub extra_len: u16,
}

impl RawLocalHeader {
    /// Decodes the 26 fixed bytes that follow the local header signature.
    pub(crate) fn decode(buf: &[u8; 26]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Self {
            version_needed: u16_at(0),
            flags: u16_at(2),
            method: u16_at(4),
            dos_time: u32_at(6),
            crc: u32_at(10),
            compressed_size: u32_at(14),
            uncompressed_size: u32_at(18),
            name_len: u16_at(22),
            extra_len: u16_at(24),
        }
    }
}

/// An encoded local header plus the offsets a seekable writer patches
/// after the payload is flushed.
pub(crate) struct LocalHeaderLayout {
    /// The complete header: signature, fixed fields, name, extra field.
    pub bytes: Vec<u8>,
    /// Offset of the 4-byte CRC field.
    pub crc_offset: usize,
    /// Offset of the 4+4 compressed/uncompressed size fields.
    pub sizes_offset: usize,
    /// Offset of the 8+8 size/compressed-size pair inside the zip64
    /// extra payload, when the header carries one.
    pub zip64_sizes_offset: Option<usize>,
}

/// Encodes a local header for `entry`.
///
/// Unknown CRC/sizes encode as zero; the returned offsets let a seekable
/// writer patch the real values in place afterwards.
pub(crate) fn encode_local_header(entry: &ZipEntry, zip64: bool) -> Result<LocalHeaderLayout> {
    let mut extra = ExtraData::from_bytes(entry.extra().to_vec())?;
    extra.delete(ZIP64_TAG);
    if zip64 {
        let mut payload = Vec::with_capacity(16);
        put_u64(&mut payload, entry.size.unwrap_or(0));
        put_u64(&mut payload, entry.compressed_size.unwrap_or(0));
        extra.add(ZIP64_TAG, &payload)?;
    }
    let zip64_sizes_offset = if zip64 {
        extra.find(ZIP64_TAG);
        Some(LOCAL_HEADER_FIXED + entry.name().len() + extra.current_read_index())
    } else {
        None
    };
    let extra_bytes = extra.into_bytes();

    let mut out = Vec::with_capacity(LOCAL_HEADER_FIXED + entry.name().len() + extra_bytes.len());
    put_u32(&mut out, sig::LOCAL);
    put_u16(&mut out, entry.version_needed(zip64));
    put_u16(&mut out, entry.flags);
    put_u16(&mut out, entry.method.to_id());
    put_u32(&mut out, entry.dos_time);
    let crc_offset = out.len();
    put_u32(&mut out, entry.crc.unwrap_or(0));
    let sizes_offset = out.len();
    if zip64 {
        put_u32(&mut out, U32_SENTINEL);
        put_u32(&mut out, U32_SENTINEL);
    } else {
        put_u32(&mut out, entry.compressed_size.unwrap_or(0) as u32);
        put_u32(&mut out, entry.size.unwrap_or(0) as u32);
    }
    put_u16(&mut out, entry.name().len() as u16);
    put_u16(&mut out, extra_bytes.len() as u16);
    out.extend_from_slice(entry.name().as_bytes());
    out.extend_from_slice(&extra_bytes);

    Ok(LocalHeaderLayout {
        bytes: out,
        crc_offset,
        sizes_offset,
        zip64_sizes_offset,
    })
}

/// Builds a [`ZipEntry`] from a decoded local header plus its name and
/// extra bytes, applying zip64 promotion.
///
/// `offset` is the archive position of the header signature. When the
/// descriptor flag is set, CRC and sizes stay unknown until the trailing
/// descriptor supplies them.
pub(crate) fn entry_from_local_header(
    raw: &RawLocalHeader,
    name: &[u8],
    extra: &[u8],
    offset: u64,
) -> Result<ZipEntry> {
    let name = String::from_utf8_lossy(name).into_owned();
    let mut entry = ZipEntry::new(name)?;
    entry.flags = raw.flags;
    entry.method = CompressionMethod::from_id(raw.method)?;
    entry.dos_time = raw.dos_time;
    entry.local_header_offset = offset;
    entry.extra = extra.to_vec();

    let deferred = entry.has_descriptor();
    if !deferred {
        entry.crc = Some(raw.crc);
    }

    let mut size = raw.uncompressed_size as u64;
    let mut csize = raw.compressed_size as u64;
    let promote_size = raw.uncompressed_size == U32_SENTINEL;
    let promote_csize = raw.compressed_size == U32_SENTINEL;
    if promote_size || promote_csize {
        let mut store = ExtraData::from_bytes(extra.to_vec())?;
        if !store.find(ZIP64_TAG) {
            return Err(Error::CorruptHeader {
                offset,
                reason: "size fields sentineled but no zip64 extra field present".into(),
            });
        }
        if promote_size {
            size = store.read_u64()?;
        }
        if promote_csize {
            csize = store.read_u64()?;
        }
        entry.force_zip64 = true;
    }
    if !deferred {
        entry.size = Some(size);
        entry.compressed_size = Some(csize);
    } else if csize != 0 {
        // A streaming writer may still know sizes even when it defers the
        // CRC; treat non-zero values as authoritative.
        entry.size = Some(size);
        entry.compressed_size = Some(csize);
    }
    Ok(entry)
}

/// Encodes the central directory record for `entry`.
pub(crate) fn encode_central_record(
    entry: &ZipEntry,
    mode: Zip64Mode,
    out: &mut Vec<u8>,
) -> Result<()> {
    let force = entry.force_zip64 || mode == Zip64Mode::On;
    let size = entry.size.unwrap_or(0);
    let csize = entry.compressed_size.unwrap_or(0);
    let offset = entry.local_header_offset;
    let promote_size = force || size >= U32_SENTINEL as u64;
    let promote_csize = force || csize >= U32_SENTINEL as u64;
    let promote_offset = offset >= U32_SENTINEL as u64;
    let zip64 = promote_size || promote_csize || promote_offset;
    if zip64 && mode == Zip64Mode::Off {
        return Err(Error::InvalidOperation(
            "entry requires zip64 but zip64 is disabled",
        ));
    }

    let mut extra = ExtraData::from_bytes(entry.extra().to_vec())?;
    extra.delete(ZIP64_TAG);
    if zip64 {
        let mut payload = Vec::with_capacity(24);
        if promote_size {
            put_u64(&mut payload, size);
        }
        if promote_csize {
            put_u64(&mut payload, csize);
        }
        if promote_offset {
            put_u64(&mut payload, offset);
        }
        extra.add(ZIP64_TAG, &payload)?;
    }
    let extra_bytes = extra.into_bytes();

    put_u32(out, sig::CENTRAL);
    put_u16(out, entry.version_needed(zip64));
    put_u16(out, entry.version_needed(zip64));
    put_u16(out, entry.flags);
    put_u16(out, entry.method.to_id());
    put_u32(out, entry.dos_time);
    put_u32(out, entry.crc.unwrap_or(0));
    put_u32(out, if promote_csize { U32_SENTINEL } else { csize as u32 });
    put_u32(out, if promote_size { U32_SENTINEL } else { size as u32 });
    put_u16(out, entry.name().len() as u16);
    put_u16(out, extra_bytes.len() as u16);
    put_u16(out, 0); // comment length
    put_u16(out, 0); // disk number start
    put_u16(out, entry.internal_attributes);
    put_u32(out, entry.external_attributes);
    put_u32(out, if promote_offset { U32_SENTINEL } else { offset as u32 });
    out.extend_from_slice(entry.name().as_bytes());
    out.extend_from_slice(&extra_bytes);
    Ok(())
}

/// Decodes one central directory record from `scan`, applying zip64
/// promotion for sentineled fields.
pub(crate) fn decode_central_record(scan: &mut Scan<'_>) -> Result<ZipEntry> {
    let record_offset = scan.offset();
    let signature = scan.u32("central record signature")?;
    if signature != sig::CENTRAL {
        return Err(Error::CorruptHeader {
            offset: record_offset,
            reason: format!("bad central record signature {signature:#010x}"),
        });
    }
    let _version_made_by = scan.u16("central record")?;
    let _version_needed = scan.u16("central record")?;
    let flags = scan.u16("central record")?;
    let method = scan.u16("central record")?;
    let dos_time = scan.u32("central record")?;
    let crc = scan.u32("central record")?;
    let csize32 = scan.u32("central record")?;
    let size32 = scan.u32("central record")?;
    let name_len = scan.u16("central record")? as usize;
    let extra_len = scan.u16("central record")? as usize;
    let comment_len = scan.u16("central record")? as usize;
    let disk_start = scan.u16("central record")?;
    let internal_attributes = scan.u16("central record")?;
    let external_attributes = scan.u32("central record")?;
    let offset32 = scan.u32("central record")?;
    let name = scan.bytes(name_len, "central record name")?;
    let extra = scan.bytes(extra_len, "central record extra field")?;
    let _comment = scan.bytes(comment_len, "central record comment")?;

    let mut entry = ZipEntry::new(String::from_utf8_lossy(name).into_owned())?;
    entry.flags = flags;
    entry.method = CompressionMethod::from_id(method)?;
    entry.dos_time = dos_time;
    entry.crc = Some(crc);
    entry.internal_attributes = internal_attributes;
    entry.external_attributes = external_attributes;
    entry.extra = extra.to_vec();

    let mut size = size32 as u64;
    let mut csize = csize32 as u64;
    let mut offset = offset32 as u64;
    if size32 == U32_SENTINEL
        || csize32 == U32_SENTINEL
        || offset32 == U32_SENTINEL
        || disk_start == U16_SENTINEL
    {
        let mut store = ExtraData::from_bytes(extra.to_vec())?;
        if !store.find(ZIP64_TAG) {
            return Err(Error::CorruptHeader {
                offset: record_offset,
                reason: "fields sentineled but no zip64 extra field present".into(),
            });
        }
        // Fixed sub-field order: size, compressed size, offset, disk.
        if size32 == U32_SENTINEL {
            size = store.read_u64()?;
        }
        if csize32 == U32_SENTINEL {
            csize = store.read_u64()?;
        }
        if offset32 == U32_SENTINEL {
            offset = store.read_u64()?;
        }
        entry.force_zip64 = true;
    }
    entry.size = Some(size);
    entry.compressed_size = Some(csize);
    entry.local_header_offset = offset;
    Ok(entry)
}

/// The end-of-directory summary, with zip64 promotion already applied.
#[derive(Debug, Clone, Default)]
pub(crate) struct EndOfCentralDirectory {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
    pub comment: Vec<u8>,
}

/// Encodes the archive tail: the optional zip64 record/locator pair
/// followed by the end-of-directory record.
///
/// `position` is the archive offset where these records begin (one past
/// the central directory). `zip64` forces the 64-bit pair even when no
/// field overflows.
pub(crate) fn encode_end_records(
    eocd: &EndOfCentralDirectory,
    position: u64,
    zip64: bool,
    out: &mut Vec<u8>,
) {
    let need_zip64 = zip64
        || eocd.total_entries >= U16_SENTINEL as u64
        || eocd.cd_size >= U32_SENTINEL as u64
        || eocd.cd_offset >= U32_SENTINEL as u64;

    if need_zip64 {
        // Zip64 end of central directory record.
        put_u32(out, sig::ZIP64_EOCD);
        put_u64(out, 44); // size of the remainder of this record
        put_u16(out, 45); // version made by
        put_u16(out, 45); // version needed
        put_u32(out, 0); // this disk
        put_u32(out, 0); // disk with the central directory
        put_u64(out, eocd.total_entries);
        put_u64(out, eocd.total_entries);
        put_u64(out, eocd.cd_size);
        put_u64(out, eocd.cd_offset);

        // Locator, immediately preceding the end-of-directory record.
        put_u32(out, sig::ZIP64_LOCATOR);
        put_u32(out, 0); // disk with the zip64 record
        put_u64(out, position);
        put_u32(out, 1); // total disks
    }

    let entries16 = if eocd.total_entries >= U16_SENTINEL as u64 {
        U16_SENTINEL
    } else {
        eocd.total_entries as u16
    };
    let size32 = if eocd.cd_size >= U32_SENTINEL as u64 {
        U32_SENTINEL
    } else {
        eocd.cd_size as u32
    };
    let offset32 = if need_zip64 && eocd.cd_offset >= U32_SENTINEL as u64 {
        U32_SENTINEL
    } else if need_zip64 {
        // Readers that understand zip64 ignore this field once the
        // locator is present, but keep it accurate when it fits.
        eocd.cd_offset as u32
    } else {
        eocd.cd_offset as u32
    };

    put_u32(out, sig::EOCD);
    put_u16(out, 0); // this disk
    put_u16(out, 0); // disk with the central directory
    put_u16(out, entries16);
    put_u16(out, entries16);
    put_u32(out, size32);
    put_u32(out, offset32);
    put_u16(out, eocd.comment.len() as u16);
    out.extend_from_slice(&eocd.comment);
}

/// Encodes a trailing data descriptor, always with its signature.
/// Zip64 entries use 8-byte size fields.
pub(crate) fn encode_descriptor(crc: u32, csize: u64, size: u64, zip64: bool, out: &mut Vec<u8>) {
    put_u32(out, sig::DESCRIPTOR);
    put_u32(out, crc);
    if zip64 {
        put_u64(out, csize);
        put_u64(out, size);
    } else {
        put_u32(out, csize as u32);
        put_u32(out, size as u32);
    }
}

/// Locates and decodes the end-of-directory record by scanning backwards
/// from the end of the stream, following the zip64 locator when the
/// record is sentineled.
pub(crate) fn find_end_of_central_directory<R: Read + Seek>(
    reader: &mut R,
) -> Result<EndOfCentralDirectory> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    if file_len < EOCD_FIXED as u64 {
        return Err(Error::InvalidFormat(
            "stream too short to hold an end-of-directory record".into(),
        ));
    }
    let window = (EOCD_FIXED as u64 + u16::MAX as u64).min(file_len);
    let window_start = file_len - window;
    reader.seek(SeekFrom::Start(window_start))?;
    let mut tail = vec![0u8; window as usize];
    reader.read_exact(&mut tail)?;

    let eocd_magic = sig::EOCD.to_le_bytes();
    let mut found = None;
    for pos in (0..=tail.len() - EOCD_FIXED).rev() {
        if tail[pos..pos + 4] == eocd_magic {
            let comment_len =
                u16::from_le_bytes([tail[pos + 20], tail[pos + 21]]) as usize;
            if pos + EOCD_FIXED + comment_len == tail.len() {
                found = Some(pos);
                break;
            }
        }
    }
    let pos = found.ok_or_else(|| {
        Error::InvalidFormat("end-of-directory record not found".into())
    })?;
    let eocd_pos = window_start + pos as u64;

    let mut scan = Scan::new(&tail[pos..], eocd_pos);
    let _sig = scan.u32("end-of-directory record")?;
    let _this_disk = scan.u16("end-of-directory record")?;
    let _cd_disk = scan.u16("end-of-directory record")?;
    let _entries_this_disk = scan.u16("end-of-directory record")?;
    let entries16 = scan.u16("end-of-directory record")?;
    let size32 = scan.u32("end-of-directory record")?;
    let offset32 = scan.u32("end-of-directory record")?;
    let comment_len = scan.u16("end-of-directory record")? as usize;
    let comment = scan.bytes(comment_len, "archive comment")?.to_vec();

    let mut eocd = EndOfCentralDirectory {
        total_entries: entries16 as u64,
        cd_size: size32 as u64,
        cd_offset: offset32 as u64,
        comment,
    };

    let sentineled = entries16 == U16_SENTINEL
        || size32 == U32_SENTINEL
        || offset32 == U32_SENTINEL;
    if sentineled {
        read_zip64_end(reader, eocd_pos, &mut eocd)?;
    }
    Ok(eocd)
}

/// Follows the zip64 locator (which must immediately precede the
/// end-of-directory record) to the zip64 record and replaces the
/// sentineled summary fields with the real 64-bit values.
fn read_zip64_end<R: Read + Seek>(
    reader: &mut R,
    eocd_pos: u64,
    eocd: &mut EndOfCentralDirectory,
) -> Result<()> {
    if eocd_pos < ZIP64_LOCATOR_LEN as u64 {
        return Err(Error::CorruptHeader {
            offset: eocd_pos,
            reason: "sentineled end-of-directory but no room for a zip64 locator".into(),
        });
    }
    let locator_pos = eocd_pos - ZIP64_LOCATOR_LEN as u64;
    reader.seek(SeekFrom::Start(locator_pos))?;
    let mut buf = [0u8; ZIP64_LOCATOR_LEN];
    reader.read_exact(&mut buf)?;
    let mut scan = Scan::new(&buf, locator_pos);
    let signature = scan.u32("zip64 locator")?;
    if signature != sig::ZIP64_LOCATOR {
        return Err(Error::CorruptHeader {
            offset: locator_pos,
            reason: format!("bad zip64 locator signature {signature:#010x}"),
        });
    }
    let _disk = scan.u32("zip64 locator")?;
    let record_pos = scan.u64("zip64 locator")?;
    let _total_disks = scan.u32("zip64 locator")?;

    reader.seek(SeekFrom::Start(record_pos))?;
    let mut buf = [0u8; 56];
    reader.read_exact(&mut buf)?;
    let mut scan = Scan::new(&buf, record_pos);
    let signature = scan.u32("zip64 end-of-directory record")?;
    if signature != sig::ZIP64_EOCD {
        return Err(Error::CorruptHeader {
            offset: record_pos,
            reason: format!("bad zip64 end-of-directory signature {signature:#010x}"),
        });
    }
    let _record_size = scan.u64("zip64 end-of-directory record")?;
    let _version_made_by = scan.u16("zip64 end-of-directory record")?;
    let _version_needed = scan.u16("zip64 end-of-directory record")?;
    let _this_disk = scan.u32("zip64 end-of-directory record")?;
    let _cd_disk = scan.u32("zip64 end-of-directory record")?;
    let _entries_this_disk = scan.u64("zip64 end-of-directory record")?;
    eocd.total_entries = scan.u64("zip64 end-of-directory record")?;
    eocd.cd_size = scan.u64("zip64 end-of-directory record")?;
    eocd.cd_offset = scan.u64("zip64 end-of-directory record")?;
    Ok(())
}

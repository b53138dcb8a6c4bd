//! The entry value type and its associated enums.
//!
//! A [`ZipEntry`] describes one archived file: its name, sizes, checksum,
//! compression method, flag bits, timestamp, and position in the archive.
//! Entries are plain values; the writer, reader, and editor own all
//! positional state.

use crate::dostime;
use crate::error::{Error, Result};

/// General-purpose flag bit: the entry payload is encrypted.
pub(crate) const FLAG_ENCRYPTED: u16 = 0x0001;
/// General-purpose flag bit: sizes and CRC follow the payload in a
/// trailing data descriptor.
pub(crate) const FLAG_DESCRIPTOR: u16 = 0x0008;
/// General-purpose flag bit: the entry name and comment are UTF-8.
pub(crate) const FLAG_UNICODE: u16 = 0x0800;

/// Sentinel meaning "the real value lives in the zip64 extra field".
pub(crate) const U32_SENTINEL: u32 = 0xFFFF_FFFF;
/// Sentinel for 16-bit count fields widened by zip64.
pub(crate) const U16_SENTINEL: u16 = 0xFFFF;

/// How an entry's payload is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    /// Uncompressed, byte-for-byte.
    Stored,
    /// Raw deflate.
    #[default]
    Deflated,
}

impl CompressionMethod {
    /// The method id used in archive headers.
    pub fn to_id(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
        }
    }

    /// Decodes a header method id.
    pub fn from_id(id: u16) -> Result<Self> {
        match id {
            0 => Ok(CompressionMethod::Stored),
            8 => Ok(CompressionMethod::Deflated),
            other => Err(Error::UnsupportedMethod { method: other }),
        }
    }
}

/// Archive-wide policy for the 64-bit size extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zip64Mode {
    /// Never emit zip64 records. Writing oversized values fails.
    Off,
    /// Always emit zip64 records, regardless of sizes.
    On,
    /// Emit zip64 records only when a value overflows its 32-bit field.
    #[default]
    Auto,
}

/// A single archive entry.
///
/// Sizes and CRC may be unknown until the entry's payload has been
/// written; they are either both known before the first payload byte or
/// both deferred to a trailing data descriptor, never partially known.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    name: String,
    /// Packed DOS timestamp.
    pub(crate) dos_time: u32,
    pub(crate) method: CompressionMethod,
    pub(crate) flags: u16,
    pub(crate) crc: Option<u32>,
    pub(crate) compressed_size: Option<u64>,
    pub(crate) size: Option<u64>,
    pub(crate) local_header_offset: u64,
    pub(crate) extra: Vec<u8>,
    pub(crate) force_zip64: bool,
    pub(crate) internal_attributes: u16,
    pub(crate) external_attributes: u32,
}

impl ZipEntry {
    /// Creates an entry with the given name, timestamped "now".
    ///
    /// Names use forward slashes and at most 65,535 encoded bytes. Non-ASCII
    /// names are stored as UTF-8 with the unicode flag bit set.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.len() > u16::MAX as usize {
            return Err(Error::NameTooLong { length: name.len() });
        }
        let mut flags = 0;
        if !name.is_ascii() {
            flags |= FLAG_UNICODE;
        }
        Ok(Self {
            name,
            dos_time: dostime::now(),
            method: CompressionMethod::default(),
            flags,
            crc: None,
            compressed_size: None,
            size: None,
            local_header_offset: 0,
            extra: Vec::new(),
            force_zip64: false,
            internal_attributes: 0,
            external_attributes: 0,
        })
    }

    /// The entry name as stored in the archive.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The compression method.
    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    /// Selects the compression method for this entry.
    pub fn set_method(&mut self, method: CompressionMethod) {
        self.method = method;
    }

    /// The uncompressed size, if known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Declares the uncompressed size up front.
    ///
    /// Together with a declared CRC this lets a streaming writer emit a
    /// complete header without a trailing descriptor.
    pub fn set_size(&mut self, size: u64) {
        self.size = Some(size);
    }

    /// The compressed size, if known. Includes the 12-byte encryption
    /// header for encrypted entries.
    pub fn compressed_size(&self) -> Option<u64> {
        self.compressed_size
    }

    /// The CRC-32 of the uncompressed payload, if known.
    pub fn crc(&self) -> Option<u32> {
        self.crc
    }

    /// Declares the payload CRC-32 up front.
    pub fn set_crc(&mut self, crc: u32) {
        self.crc = Some(crc);
    }

    /// The packed DOS modification timestamp.
    pub fn dos_time(&self) -> u32 {
        self.dos_time
    }

    /// Sets the modification time from a packed DOS timestamp.
    /// Zero means "now".
    pub fn set_dos_time(&mut self, dos_time: u32) {
        self.dos_time = if dos_time == 0 {
            dostime::now()
        } else {
            dos_time
        };
    }

    /// Sets the modification time from Unix seconds, clamped to the DOS
    /// range.
    pub fn set_time_unix(&mut self, secs: i64) {
        self.dos_time = dostime::from_unix(secs);
    }

    /// The raw general-purpose flag bits.
    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Whether the payload is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Whether sizes and CRC follow the payload in a data descriptor.
    pub fn has_descriptor(&self) -> bool {
        self.flags & FLAG_DESCRIPTOR != 0
    }

    /// Byte offset of this entry's local header within the archive.
    pub fn local_header_offset(&self) -> u64 {
        self.local_header_offset
    }

    /// The entry's extra-field bytes (vendor metadata).
    pub fn extra(&self) -> &[u8] {
        &self.extra
    }

    /// Replaces the entry's extra-field bytes.
    pub fn set_extra(&mut self, extra: Vec<u8>) -> Result<()> {
        if extra.len() > u16::MAX as usize {
            return Err(Error::CapacityExceeded {
                what: "extra field",
                limit: u16::MAX as usize,
            });
        }
        self.extra = extra;
        Ok(())
    }

    /// Forces the 64-bit extension for this entry even when its sizes fit
    /// in 32 bits.
    pub fn force_zip64(&mut self) {
        self.force_zip64 = true;
    }

    /// Whether this entry's local header must carry the 64-bit extension.
    pub(crate) fn local_header_requires_zip64(&self, mode: Zip64Mode) -> bool {
        match mode {
            Zip64Mode::Off => false,
            Zip64Mode::On => true,
            Zip64Mode::Auto => {
                self.force_zip64
                    || self.size.is_some_and(|s| s >= U32_SENTINEL as u64)
                    || self
                        .compressed_size
                        .is_some_and(|s| s >= U32_SENTINEL as u64)
            }
        }
    }

    /// The "version needed to extract" field for this entry.
    pub(crate) fn version_needed(&self, zip64: bool) -> u16 {
        if zip64 {
            45
        } else if self.method == CompressionMethod::Deflated
            || self.is_encrypted()
            || self.has_descriptor()
        {
            20
        } else {
            10
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_defaults() {
        let entry = ZipEntry::new("dir/file.txt").unwrap();
        assert_eq!(entry.name(), "dir/file.txt");
        assert_eq!(entry.method(), CompressionMethod::Deflated);
        assert!(!entry.is_encrypted());
        assert!(!entry.has_descriptor());
        assert!(entry.size().is_none());
        assert!(entry.crc().is_none());
        assert_ne!(entry.dos_time(), 0);
    }

    #[test]
    fn unicode_name_sets_flag() {
        let entry = ZipEntry::new("héllo.txt").unwrap();
        assert_ne!(entry.flags() & FLAG_UNICODE, 0);
        let plain = ZipEntry::new("hello.txt").unwrap();
        assert_eq!(plain.flags() & FLAG_UNICODE, 0);
    }

    #[test]
    fn oversized_name_rejected() {
        let name = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            ZipEntry::new(name),
            Err(Error::NameTooLong { .. })
        ));
    }

    #[test]
    fn zero_dos_time_means_now() {
        let mut entry = ZipEntry::new("a").unwrap();
        entry.set_dos_time(0);
        assert_ne!(entry.dos_time(), 0);
    }

    #[test]
    fn zip64_promotion_rules() {
        let mut entry = ZipEntry::new("big").unwrap();
        assert!(!entry.local_header_requires_zip64(Zip64Mode::Auto));
        assert!(entry.local_header_requires_zip64(Zip64Mode::On));
        assert!(!entry.local_header_requires_zip64(Zip64Mode::Off));

        entry.set_size(u32::MAX as u64);
        assert!(entry.local_header_requires_zip64(Zip64Mode::Auto));

        let mut forced = ZipEntry::new("forced").unwrap();
        forced.force_zip64();
        assert!(forced.local_header_requires_zip64(Zip64Mode::Auto));
    }

    #[test]
    fn version_needed_tracks_features() {
        let mut entry = ZipEntry::new("v").unwrap();
        entry.set_method(CompressionMethod::Stored);
        assert_eq!(entry.version_needed(false), 10);
        entry.set_method(CompressionMethod::Deflated);
        assert_eq!(entry.version_needed(false), 20);
        assert_eq!(entry.version_needed(true), 45);
    }

    #[test]
    fn method_id_round_trip() {
        assert_eq!(CompressionMethod::from_id(0).unwrap(), CompressionMethod::Stored);
        assert_eq!(CompressionMethod::from_id(8).unwrap(), CompressionMethod::Deflated);
        assert!(matches!(
            CompressionMethod::from_id(12),
            Err(Error::UnsupportedMethod { method: 12 })
        ));
    }
}

//! Random-access archive reading.
//!
//! [`ZipArchive`] locates the end-of-directory record by scanning
//! backwards from the end of a seekable source, loads the central
//! directory, and serves entry payloads in any order. Local headers are
//! cross-checked against their central records on access, so the two
//! views of an entry cannot silently disagree.

use std::io::{Read, Seek, SeekFrom};

use flate2::{Decompress, FlushDecompress, Status};
use log::{debug, warn};

use crate::READ_BUFFER_SIZE;
use crate::checksum::Crc32;
use crate::crypto::{self, CRYPT_HEADER_SIZE, Password};
use crate::entry::{CompressionMethod, U32_SENTINEL, ZipEntry};
use crate::error::{Error, Result};
use crate::format::header::{
    self, LOCAL_HEADER_FIXED, RawLocalHeader, Scan, sig,
};

/// Random-access archive reader over a seekable source.
///
/// # Example
///
/// ```rust,no_run
/// use std::fs::File;
/// use zipedit::ZipArchive;
///
/// # fn main() -> zipedit::Result<()> {
/// let mut archive = ZipArchive::open(File::open("in.zip")?)?;
/// for entry in archive.entries() {
///     println!("{}", entry.name());
/// }
/// let data = archive.read_entry("readme.txt")?;
/// # let _ = data;
/// # Ok(())
/// # }
/// ```
pub struct ZipArchive<R: Read + Seek> {
    inner: R,
    entries: Vec<ZipEntry>,
    comment: Vec<u8>,
    cd_offset: u64,
    password: Option<Password>,
}

impl<R: Read + Seek> ZipArchive<R> {
    /// Opens an archive by reading its central directory.
    pub fn open(mut inner: R) -> Result<Self> {
        let eocd = header::find_end_of_central_directory(&mut inner)?;
        inner.seek(SeekFrom::Start(eocd.cd_offset))?;
        let mut directory = vec![
            0u8;
            usize::try_from(eocd.cd_size).map_err(|_| Error::InvalidFormat(
                "central directory too large to load".into()
            ))?
        ];
        inner.read_exact(&mut directory)?;

        let mut scan = Scan::new(&directory, eocd.cd_offset);
        let mut entries = Vec::with_capacity(eocd.total_entries.min(4096) as usize);
        for _ in 0..eocd.total_entries {
            entries.push(header::decode_central_record(&mut scan)?);
        }
        if scan.remaining() != 0 {
            return Err(Error::InvalidFormat(format!(
                "{} stray bytes after the last central directory record",
                scan.remaining()
            )));
        }
        debug!(
            "opened archive: {} entries, central directory at {}",
            entries.len(),
            eocd.cd_offset
        );
        Ok(Self {
            inner,
            entries,
            comment: eocd.comment,
            cd_offset: eocd.cd_offset,
            password: None,
        })
    }

    /// Sets the password used to read encrypted entries.
    pub fn set_password(&mut self, password: Option<Password>) {
        self.password = password;
    }

    /// The entries in central directory order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The archive comment bytes.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Looks up an entry by exact, case-sensitive name.
    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }

    /// Offset of the central directory, which is also one past the last
    /// entry's span.
    pub(crate) fn central_directory_offset(&self) -> u64 {
        self.cd_offset
    }

    pub(crate) fn entries_cloned(&self) -> Vec<ZipEntry> {
        self.entries.clone()
    }

    /// Returns the archive's source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads and verifies a whole entry payload.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find_entry(name)
            .cloned()
            .ok_or_else(|| Error::EntryNotFound {
                name: name.to_string(),
            })?;
        self.read_entry_payload(&entry)
    }

    /// Verifies archive structure, and payload checksums when
    /// `validate_payload` is set. Returns whether everything checked out.
    pub fn test_archive(&mut self, validate_payload: bool) -> bool {
        self.test_archive_with(validate_payload, |_, _| {})
    }

    /// Like [`test_archive`](Self::test_archive), reporting each entry's
    /// verdict to `on_entry` as it is checked.
    pub fn test_archive_with<F>(&mut self, validate_payload: bool, mut on_entry: F) -> bool
    where
        F: FnMut(&ZipEntry, bool),
    {
        let entries = self.entries.clone();
        let mut all_ok = true;
        for entry in &entries {
            let verdict = if validate_payload && !(entry.is_encrypted() && self.password.is_none())
            {
                self.read_entry_payload(entry).map(|_| ())
            } else {
                self.locate_entry_data(entry).map(|_| ())
            };
            let ok = match verdict {
                Ok(()) => true,
                Err(err) => {
                    warn!("entry '{}' failed verification: {err}", entry.name());
                    false
                }
            };
            all_ok &= ok;
            on_entry(entry, ok);
        }
        all_ok
    }

    /// Seeks to an entry's local header, cross-checks it against the
    /// central record, and returns the offset of the first payload byte
    /// (the crypt header for encrypted entries).
    fn locate_entry_data(&mut self, entry: &ZipEntry) -> Result<u64> {
        let offset = entry.local_header_offset();
        self.inner.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; 4 + 26];
        self.inner.read_exact(&mut buf)?;
        let signature = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if signature != sig::LOCAL {
            return Err(Error::CorruptHeader {
                offset,
                reason: format!(
                    "central directory points at {signature:#010x}, not a local header"
                ),
            });
        }
        let mut fixed = [0u8; 26];
        fixed.copy_from_slice(&buf[4..]);
        let raw = RawLocalHeader::decode(&fixed);

        if raw.method != entry.method().to_id() {
            return Err(Error::CorruptHeader {
                offset,
                reason: format!(
                    "local header method {} disagrees with central record {}",
                    raw.method,
                    entry.method().to_id()
                ),
            });
        }
        if raw.flags != entry.flags {
            return Err(Error::CorruptHeader {
                offset,
                reason: format!(
                    "local header flags {:#06x} disagree with central record {:#06x}",
                    raw.flags, entry.flags
                ),
            });
        }
        if raw.dos_time != entry.dos_time() {
            return Err(Error::CorruptHeader {
                offset,
                reason: "local header timestamp disagrees with central record".into(),
            });
        }
        // CRC and sizes are deferred to the descriptor (written as zero)
        // or sentineled for zip64, so each comparison is conditional.
        let crc_matches = match entry.crc() {
            Some(crc) if !entry.has_descriptor() => raw.crc == crc,
            Some(crc) => raw.crc == 0 || raw.crc == crc,
            None => true,
        };
        if !crc_matches {
            return Err(Error::CorruptHeader {
                offset,
                reason: "local header checksum disagrees with central record".into(),
            });
        }
        let size_matches = |local: u32, central: Option<u64>| match central {
            _ if local == U32_SENTINEL => true,
            _ if entry.has_descriptor() && local == 0 => true,
            Some(central) => local as u64 == central,
            None => true,
        };
        if !size_matches(raw.compressed_size, entry.compressed_size()) {
            return Err(Error::CorruptHeader {
                offset,
                reason: "local header compressed size disagrees with central record".into(),
            });
        }
        if !size_matches(raw.uncompressed_size, entry.size()) {
            return Err(Error::CorruptHeader {
                offset,
                reason: "local header uncompressed size disagrees with central record".into(),
            });
        }
        let mut name = vec![0u8; raw.name_len as usize];
        self.inner.read_exact(&mut name)?;
        if name != entry.name().as_bytes() {
            return Err(Error::CorruptHeader {
                offset,
                reason: "local header name disagrees with central record".into(),
            });
        }
        let data_offset =
            offset + (LOCAL_HEADER_FIXED + raw.name_len as usize + raw.extra_len as usize) as u64;
        self.inner.seek(SeekFrom::Start(data_offset))?;
        Ok(data_offset)
    }

    fn read_entry_payload(&mut self, entry: &ZipEntry) -> Result<Vec<u8>> {
        self.locate_entry_data(entry)?;
        let csize = entry.compressed_size().ok_or_else(|| {
            Error::CorruptHeader {
                offset: entry.local_header_offset(),
                reason: "central record has no compressed size".into(),
            }
        })?;
        let size = entry.size().unwrap_or(0);

        let mut keys = None;
        let mut payload_len = csize;
        if entry.is_encrypted() {
            let password = self.password.as_ref().ok_or_else(|| Error::PasswordRequired {
                entry_name: entry.name().to_string(),
            })?;
            let mut crypt_header = [0u8; CRYPT_HEADER_SIZE];
            self.inner.read_exact(&mut crypt_header)?;
            let expected = crypto::check_byte_for(
                entry.crc(),
                entry.dos_time(),
                entry.has_descriptor(),
            );
            keys = Some(crypto::verify_crypt_header(
                password,
                &crypt_header,
                expected,
                entry.name(),
            )?);
            payload_len = csize.checked_sub(CRYPT_HEADER_SIZE as u64).ok_or_else(|| {
                Error::CorruptHeader {
                    offset: entry.local_header_offset(),
                    reason: "compressed size smaller than encryption header".into(),
                }
            })?;
        }

        let mut output = Vec::with_capacity(size.min(1 << 20) as usize);
        match entry.method() {
            CompressionMethod::Stored => {
                let mut remaining = payload_len;
                let mut buf = [0u8; READ_BUFFER_SIZE];
                while remaining > 0 {
                    let want = buf.len().min(remaining.min(usize::MAX as u64) as usize);
                    self.inner.read_exact(&mut buf[..want])?;
                    if let Some(keys) = &mut keys {
                        keys.decrypt(&mut buf[..want]);
                    }
                    output.extend_from_slice(&buf[..want]);
                    remaining -= want as u64;
                }
            }
            CompressionMethod::Deflated => {
                let mut decompressor = Decompress::new(false);
                let mut remaining = payload_len;
                let mut input = [0u8; READ_BUFFER_SIZE];
                let mut out = [0u8; READ_BUFFER_SIZE];
                let mut ended = false;
                while remaining > 0 && !ended {
                    let want = input.len().min(remaining.min(usize::MAX as u64) as usize);
                    self.inner.read_exact(&mut input[..want])?;
                    if let Some(keys) = &mut keys {
                        keys.decrypt(&mut input[..want]);
                    }
                    remaining -= want as u64;
                    let mut fed = 0;
                    while fed < want {
                        let before_in = decompressor.total_in();
                        let before_out = decompressor.total_out();
                        let status = decompressor
                            .decompress(&input[fed..want], &mut out, FlushDecompress::None)
                            .map_err(|_| {
                                Error::InvalidFormat("invalid deflate stream".into())
                            })?;
                        fed += (decompressor.total_in() - before_in) as usize;
                        let produced = (decompressor.total_out() - before_out) as usize;
                        output.extend_from_slice(&out[..produced]);
                        if status == Status::StreamEnd {
                            ended = true;
                            break;
                        }
                    }
                }
                if !ended {
                    // Drain any pending output the final block produced.
                    loop {
                        let before_out = decompressor.total_out();
                        let status = decompressor
                            .decompress(&[], &mut out, FlushDecompress::None)
                            .map_err(|_| {
                                Error::InvalidFormat("invalid deflate stream".into())
                            })?;
                        let produced = (decompressor.total_out() - before_out) as usize;
                        output.extend_from_slice(&out[..produced]);
                        if status == Status::StreamEnd {
                            break;
                        }
                        if produced == 0 {
                            return Err(Error::InvalidFormat(
                                "deflate stream ended prematurely".into(),
                            ));
                        }
                    }
                }
            }
        }

        if let Some(declared) = entry.size() {
            if declared != output.len() as u64 {
                return Err(Error::SizeMismatch {
                    entry_name: entry.name().to_string(),
                    field: "uncompressed",
                    declared,
                    actual: output.len() as u64,
                });
            }
        }
        if let Some(expected) = entry.crc() {
            let actual = Crc32::compute(&output);
            if expected != actual {
                return Err(Error::CrcMismatch {
                    entry_name: Some(entry.name().to_string()),
                    expected,
                    actual,
                });
            }
        }
        Ok(output)
    }

    /// The byte span an entry occupies, from its local header signature
    /// through its trailing descriptor: `(start, length)`.
    ///
    /// The span can be copied verbatim into another archive; nothing in
    /// it depends on the entry's position except the central record,
    /// which is not part of the span.
    pub(crate) fn raw_entry_span(&mut self, entry: &ZipEntry) -> Result<(u64, u64)> {
        let start = entry.local_header_offset();
        self.inner.seek(SeekFrom::Start(start + 4))?;
        let mut fixed = [0u8; 26];
        self.inner.read_exact(&mut fixed)?;
        let raw = RawLocalHeader::decode(&fixed);
        let csize = entry.compressed_size().ok_or_else(|| Error::CorruptHeader {
            offset: start,
            reason: "central record has no compressed size".into(),
        })?;

        let mut len =
            (4 + 26 + raw.name_len as usize + raw.extra_len as usize) as u64 + csize;
        if entry.has_descriptor() {
            // The signature word is optional; peek to see whether this
            // writer used it. Descriptor field width follows the local
            // header, which may be 64-bit even when the central record
            // was not promoted.
            self.inner.seek(SeekFrom::Start(start + len))?;
            let mut peek = [0u8; 4];
            self.inner.read_exact(&mut peek)?;
            let with_signature = u32::from_le_bytes(peek) == sig::DESCRIPTOR;
            let local_zip64 = raw.compressed_size == U32_SENTINEL
                || raw.uncompressed_size == U32_SENTINEL;
            let fields = if local_zip64 { 4 + 8 + 8 } else { 4 + 4 + 4 };
            len += fields + if with_signature { 4 } else { 0 };
        }
        Ok((start, len))
    }

    /// A bounded reader over `len` bytes starting at `start`.
    pub(crate) fn span_reader(&mut self, start: u64, len: u64) -> Result<std::io::Take<&mut R>> {
        self.inner.seek(SeekFrom::Start(start))?;
        Ok(Read::take(&mut self.inner, len))
    }
}

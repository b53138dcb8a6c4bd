//! Archive creation.
//!
//! [`ZipWriter`] produces an archive one entry at a time: open an entry,
//! stream its payload, close it, repeat, then finish. The writer adapts to
//! what it knows and where it writes:
//!
//! - On a seekable sink, sizes and CRC unknown at header time are written
//!   as placeholders and patched in place once the payload is done.
//! - On a forward-only sink they are deferred to a trailing data
//!   descriptor instead, and a stored entry with unknown sizes is silently
//!   converted to deflate at level 0 so a sequential reader can find the
//!   payload's end.
//!
//! Encrypted entries get a 12-byte encryption header; its check byte is
//! derived from the CRC when that is known at header time and from the
//! timestamp otherwise, with the descriptor flag telling readers which.

use std::io::{self, Read, Seek, SeekFrom, Write};

use flate2::{Compress, Compression, FlushCompress, Status};
use log::{debug, trace};

use crate::READ_BUFFER_SIZE;
use crate::checksum::Crc32;
use crate::crypto::{self, CRYPT_HEADER_SIZE, Password, ZipCryptoKeys};
use crate::entry::{
    CompressionMethod, FLAG_DESCRIPTOR, FLAG_ENCRYPTED, U32_SENTINEL, ZipEntry, Zip64Mode,
};
use crate::error::{Error, Result};
use crate::format::header::{
    self, EndOfCentralDirectory, encode_central_record, encode_descriptor, encode_local_header,
};

/// Where a writer sends its bytes.
///
/// The two implementations are [`SeekSink`] for seekable destinations,
/// which can patch already-written headers, and [`StreamSink`] for
/// forward-only destinations such as sockets and pipes.
pub trait OutputSink {
    /// The wrapped destination type.
    type Inner;

    /// Appends bytes at the current position.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// The current append position, in bytes from the start of the
    /// archive.
    fn position(&self) -> u64;

    /// Whether [`patch`](OutputSink::patch) is available.
    fn can_patch(&self) -> bool;

    /// Overwrites bytes at an earlier offset, leaving the append position
    /// unchanged.
    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()>;

    /// Flushes the destination.
    fn flush(&mut self) -> io::Result<()>;

    /// Unwraps the destination.
    fn into_inner(self) -> Self::Inner;
}

/// A sink over a seekable destination. Headers can be patched in place,
/// so no trailing data descriptors are needed.
pub struct SeekSink<W: Write + Seek> {
    inner: W,
    position: u64,
}

impl<W: Write + Seek> SeekSink<W> {
    /// Wraps a seekable destination, appending from its current position.
    pub fn new(mut inner: W) -> Result<Self> {
        let position = inner.stream_position()?;
        Ok(Self { inner, position })
    }
}

impl<W: Write + Seek> OutputSink for SeekSink<W> {
    type Inner = W;

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn can_patch(&self) -> bool {
        true
    }

    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(bytes)?;
        self.inner.seek(SeekFrom::Start(self.position))?;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

/// A sink over a forward-only destination. The writer falls back to
/// trailing data descriptors for values unknown at header time.
pub struct StreamSink<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> StreamSink<W> {
    /// Wraps a forward-only destination.
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }
}

impl<W: Write> OutputSink for StreamSink<W> {
    type Inner = W;

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn can_patch(&self) -> bool {
        false
    }

    fn patch(&mut self, _offset: u64, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::other("cannot patch a forward-only sink"))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

/// How the open entry's unknown fields will be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    /// All fields were known when the header was written.
    UpFront,
    /// Placeholders in the header will be patched after the payload.
    Patch,
    /// A trailing data descriptor carries the final values.
    Descriptor,
}

struct OpenEntry {
    entry: ZipEntry,
    completion: Completion,
    zip64: bool,
    /// Absolute offset of the header's CRC field.
    crc_offset: u64,
    /// Absolute offset of the header's 32-bit size pair.
    sizes_offset: u64,
    /// Absolute offset of the 64-bit size pair in the zip64 extra field.
    zip64_sizes_offset: Option<u64>,
    crc: Crc32,
    uncompressed: u64,
    compressor: Option<Compress>,
    keys: Option<ZipCryptoKeys>,
    /// Payload bytes written to the sink, excluding the crypt header.
    payload_out: u64,
    effective_level: u32,
    converted_to_deflate: bool,
}

/// Streaming archive writer.
///
/// # Example
///
/// ```rust,no_run
/// use std::fs::File;
/// use std::io::Write;
/// use zipedit::{ZipEntry, ZipWriter};
///
/// # fn main() -> zipedit::Result<()> {
/// let file = File::create("out.zip")?;
/// let mut writer = ZipWriter::new(file)?;
/// writer.put_next_entry(ZipEntry::new("hello.txt")?)?;
/// writer.write_all(b"hello world")?;
/// writer.close_entry()?;
/// writer.close()?;
/// # Ok(())
/// # }
/// ```
pub struct ZipWriter<S: OutputSink> {
    sink: S,
    entries: Vec<ZipEntry>,
    current: Option<OpenEntry>,
    finished: bool,
    password: Option<Password>,
    level: u32,
    comment: Vec<u8>,
    zip64_mode: Zip64Mode,
}

impl<W: Write + Seek> ZipWriter<SeekSink<W>> {
    /// Creates a writer over a seekable destination.
    pub fn new(inner: W) -> Result<Self> {
        Ok(Self::over(SeekSink::new(inner)?))
    }
}

impl<W: Write> ZipWriter<StreamSink<W>> {
    /// Creates a writer over a forward-only destination.
    ///
    /// Unknown sizes and CRCs are completed with trailing data
    /// descriptors, and stored entries with unknown sizes are converted
    /// to deflate at level 0.
    pub fn new_streaming(inner: W) -> Self {
        Self::over(StreamSink::new(inner))
    }
}

impl<S: OutputSink> ZipWriter<S> {
    /// Creates a writer over any sink.
    pub fn over(sink: S) -> Self {
        Self {
            sink,
            entries: Vec::new(),
            current: None,
            finished: false,
            password: None,
            level: 6,
            comment: Vec::new(),
            zip64_mode: Zip64Mode::default(),
        }
    }

    /// Sets the password for subsequently opened entries; `None` turns
    /// encryption off. Entries already written keep their state.
    pub fn set_password(&mut self, password: Option<Password>) {
        self.password = password;
    }

    /// Sets the deflate level (0-9) for subsequently opened entries.
    pub fn set_level(&mut self, level: u32) -> Result<()> {
        if level > 9 {
            return Err(Error::InvalidOperation("compression level must be 0-9"));
        }
        self.level = level;
        Ok(())
    }

    /// The compression level in effect.
    ///
    /// While an entry is open this reports the level actually used for it,
    /// which is 0 when a stored entry was converted to deflate.
    pub fn level(&self) -> u32 {
        match &self.current {
            Some(open) => open.effective_level,
            None => self.level,
        }
    }

    /// Sets the archive comment, at most 65,535 bytes.
    pub fn set_comment(&mut self, comment: impl Into<Vec<u8>>) -> Result<()> {
        let comment = comment.into();
        if comment.len() > u16::MAX as usize {
            return Err(Error::CapacityExceeded {
                what: "archive comment",
                limit: u16::MAX as usize,
            });
        }
        self.comment = comment;
        Ok(())
    }

    /// Sets the archive-wide zip64 policy. Takes effect for subsequently
    /// opened entries and for the archive tail.
    pub fn set_zip64_mode(&mut self, mode: Zip64Mode) {
        self.zip64_mode = mode;
    }

    /// Opens a new entry. An entry still open is closed first.
    pub fn put_next_entry(&mut self, mut entry: ZipEntry) -> Result<()> {
        if self.finished {
            return Err(Error::InvalidOperation(
                "cannot add entries to a finished archive",
            ));
        }
        if self.current.is_some() {
            self.close_entry()?;
        }

        let encrypted = self.password.is_some();
        if encrypted {
            entry.flags |= FLAG_ENCRYPTED;
        } else {
            entry.flags &= !FLAG_ENCRYPTED;
        }

        // Stored entries can carry a complete header when both the size
        // and the CRC were declared; deflate never knows its compressed
        // size up front.
        let fully_known = entry.method == CompressionMethod::Stored
            && entry.size.is_some()
            && entry.crc.is_some();

        let mut effective_level = self.level;
        let mut converted = false;
        if !fully_known && entry.method == CompressionMethod::Stored && !self.sink.can_patch() {
            // A sequential reader cannot find the end of a stored payload
            // whose length is only in the trailing descriptor.
            entry.method = CompressionMethod::Deflated;
            effective_level = 0;
            converted = true;
            debug!(
                "converting stored entry '{}' to deflate level 0 for streaming output",
                entry.name()
            );
        }

        let completion = if fully_known {
            Completion::UpFront
        } else if self.sink.can_patch() && !(encrypted && entry.crc.is_none()) {
            Completion::Patch
        } else {
            Completion::Descriptor
        };
        match completion {
            Completion::Descriptor => entry.flags |= FLAG_DESCRIPTOR,
            _ => entry.flags &= !FLAG_DESCRIPTOR,
        }

        let zip64 = match self.zip64_mode {
            Zip64Mode::Off => false,
            Zip64Mode::On => true,
            Zip64Mode::Auto => {
                entry.force_zip64
                    || entry.size.is_none()
                    || entry.size.is_some_and(|s| s >= U32_SENTINEL as u64)
            }
        };

        if fully_known {
            let overhead = if encrypted { CRYPT_HEADER_SIZE as u64 } else { 0 };
            entry.compressed_size = entry.size.map(|s| s + overhead);
        } else {
            entry.compressed_size = None;
        }

        let header_offset = self.sink.position();
        entry.local_header_offset = header_offset;
        let layout = encode_local_header(&entry, zip64)?;
        self.sink.write_all(&layout.bytes)?;
        trace!(
            "local header for '{}' at {header_offset} ({:?}, zip64={zip64})",
            entry.name(),
            completion
        );

        let keys = match &self.password {
            Some(password) => {
                let check = crypto::check_byte_for(
                    entry.crc,
                    entry.dos_time,
                    entry.has_descriptor(),
                );
                let (crypt_header, keys) = crypto::make_crypt_header(password, check)?;
                self.sink.write_all(&crypt_header)?;
                Some(keys)
            }
            None => None,
        };

        let compressor = match entry.method {
            CompressionMethod::Deflated => {
                Some(Compress::new(Compression::new(effective_level), false))
            }
            CompressionMethod::Stored => None,
        };

        self.current = Some(OpenEntry {
            completion,
            zip64,
            crc_offset: header_offset + layout.crc_offset as u64,
            sizes_offset: header_offset + layout.sizes_offset as u64,
            zip64_sizes_offset: layout.zip64_sizes_offset.map(|o| header_offset + o as u64),
            crc: Crc32::new(),
            uncompressed: 0,
            compressor,
            keys,
            payload_out: 0,
            effective_level,
            converted_to_deflate: converted,
            entry,
        });
        Ok(())
    }

    /// Streams payload bytes into the open entry.
    pub fn write_entry_data(&mut self, data: &[u8]) -> Result<()> {
        let open = self
            .current
            .as_mut()
            .ok_or(Error::InvalidOperation("no entry is open for writing"))?;
        if data.is_empty() {
            return Ok(());
        }
        open.crc.update(data);
        open.uncompressed += data.len() as u64;

        match &mut open.compressor {
            None => {
                let mut out = data.to_vec();
                if let Some(keys) = &mut open.keys {
                    keys.encrypt(&mut out);
                }
                self.sink.write_all(&out)?;
                open.payload_out += out.len() as u64;
            }
            Some(compressor) => {
                let mut out = [0u8; READ_BUFFER_SIZE];
                let mut consumed = 0usize;
                while consumed < data.len() {
                    let before_in = compressor.total_in();
                    let before_out = compressor.total_out();
                    compressor
                        .compress(&data[consumed..], &mut out, FlushCompress::None)
                        .map_err(|e| Error::Io(io::Error::other(e)))?;
                    consumed += (compressor.total_in() - before_in) as usize;
                    let produced = (compressor.total_out() - before_out) as usize;
                    if produced > 0 {
                        if let Some(keys) = &mut open.keys {
                            keys.encrypt(&mut out[..produced]);
                        }
                        self.sink.write_all(&out[..produced])?;
                        open.payload_out += produced as u64;
                    }
                }
            }
        }
        Ok(())
    }

    /// Finishes the open entry: flushes compression, validates declared
    /// sizes, and completes the header by patching or with a descriptor.
    pub fn close_entry(&mut self) -> Result<()> {
        let mut open = self
            .current
            .take()
            .ok_or(Error::InvalidOperation("no entry is open"))?;

        if let Some(compressor) = &mut open.compressor {
            let mut out = [0u8; READ_BUFFER_SIZE];
            loop {
                let before_out = compressor.total_out();
                let status = compressor
                    .compress(&[], &mut out, FlushCompress::Finish)
                    .map_err(|e| Error::Io(io::Error::other(e)))?;
                let produced = (compressor.total_out() - before_out) as usize;
                if produced > 0 {
                    if let Some(keys) = &mut open.keys {
                        keys.encrypt(&mut out[..produced]);
                    }
                    self.sink.write_all(&out[..produced])?;
                    open.payload_out += produced as u64;
                }
                if status == Status::StreamEnd {
                    break;
                }
            }
        }

        let crc = open.crc.finalize();
        let overhead = if open.keys.is_some() { CRYPT_HEADER_SIZE as u64 } else { 0 };
        let csize = open.payload_out + overhead;
        let size = open.uncompressed;
        let mut entry = open.entry;

        if let Some(declared) = entry.size {
            if declared != size {
                return Err(Error::SizeMismatch {
                    entry_name: entry.name().to_string(),
                    field: "uncompressed",
                    declared,
                    actual: size,
                });
            }
        }
        if let Some(declared) = entry.crc {
            if declared != crc {
                return Err(Error::CrcMismatch {
                    entry_name: Some(entry.name().to_string()),
                    expected: declared,
                    actual: crc,
                });
            }
        }
        entry.crc = Some(crc);
        entry.size = Some(size);
        entry.compressed_size = Some(csize);

        if !open.zip64 && (csize >= U32_SENTINEL as u64 || size >= U32_SENTINEL as u64) {
            return Err(Error::InvalidOperation(
                "entry grew past 4 GiB but its header has no zip64 extension",
            ));
        }

        match open.completion {
            Completion::UpFront => {}
            Completion::Patch => {
                self.sink.patch(open.crc_offset, &crc.to_le_bytes())?;
                match open.zip64_sizes_offset {
                    Some(offset) => {
                        let mut pair = [0u8; 16];
                        pair[..8].copy_from_slice(&size.to_le_bytes());
                        pair[8..].copy_from_slice(&csize.to_le_bytes());
                        self.sink.patch(offset, &pair)?;
                    }
                    None => {
                        let mut pair = [0u8; 8];
                        pair[..4].copy_from_slice(&(csize as u32).to_le_bytes());
                        pair[4..].copy_from_slice(&(size as u32).to_le_bytes());
                        self.sink.patch(open.sizes_offset, &pair)?;
                    }
                }
            }
            Completion::Descriptor => {
                let mut descriptor = Vec::with_capacity(24);
                encode_descriptor(crc, csize, size, open.zip64, &mut descriptor);
                self.sink.write_all(&descriptor)?;
            }
        }

        trace!(
            "closed entry '{}': {size} bytes in, {csize} bytes out, crc {crc:#010x}",
            entry.name()
        );
        self.entries.push(entry);
        Ok(())
    }

    /// Copies a complete raw entry span (local header through descriptor)
    /// from `source`, without re-encoding or re-encrypting the payload.
    ///
    /// `entry` must describe the copied span; its header offset is
    /// rewritten to the copy's position.
    pub(crate) fn raw_copy_entry<R: Read>(
        &mut self,
        mut entry: ZipEntry,
        source: &mut R,
        span_len: u64,
    ) -> Result<()> {
        if self.finished || self.current.is_some() {
            return Err(Error::InvalidOperation(
                "raw copy requires no open entry and an unfinished archive",
            ));
        }
        entry.local_header_offset = self.sink.position();

        let mut remaining = span_len;
        let mut buf = [0u8; READ_BUFFER_SIZE];
        while remaining > 0 {
            let want = buf.len().min(remaining as usize);
            let n = source.read(&mut buf[..want])?;
            if n == 0 {
                return Err(Error::InvalidFormat(
                    "entry data ended before its recorded length".into(),
                ));
            }
            self.sink.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Seeds the central directory with entries already present in the
    /// sink, for appending to an existing archive in place.
    pub(crate) fn preload_entries(&mut self, entries: Vec<ZipEntry>) {
        self.entries = entries;
    }

    /// Number of entries written (or preloaded) so far.
    pub(crate) fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Writes the central directory and the archive tail. Idempotent;
    /// no entries can be added afterwards.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.current.is_some() {
            self.close_entry()?;
        }

        let cd_offset = self.sink.position();
        let mut directory = Vec::new();
        for entry in &self.entries {
            encode_central_record(entry, self.zip64_mode, &mut directory)?;
        }
        let cd_size = directory.len() as u64;
        self.sink.write_all(&directory)?;

        let eocd = EndOfCentralDirectory {
            total_entries: self.entries.len() as u64,
            cd_size,
            cd_offset,
            comment: std::mem::take(&mut self.comment),
        };
        let mut tail = Vec::new();
        header::encode_end_records(
            &eocd,
            cd_offset + cd_size,
            self.zip64_mode == Zip64Mode::On,
            &mut tail,
        );
        self.sink.write_all(&tail)?;
        self.finished = true;
        debug!(
            "finished archive: {} entries, central directory at {cd_offset} ({cd_size} bytes)",
            self.entries.len()
        );
        Ok(())
    }

    /// Finishes the archive and flushes the destination.
    pub fn close(mut self) -> Result<()> {
        self.finish()?;
        self.sink.flush()?;
        Ok(())
    }

    /// Finishes the archive and returns the destination.
    pub fn into_inner(mut self) -> Result<S::Inner> {
        self.finish()?;
        self.sink.flush()?;
        Ok(self.sink.into_inner())
    }
}

impl<S: OutputSink> Write for ZipWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_entry_data(buf).map_err(|e| match e {
            Error::Io(io) => io,
            other => io::Error::other(other),
        })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

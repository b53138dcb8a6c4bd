//! Sequential archive reading.
//!
//! [`ZipReader`] walks an archive front to back over any [`Read`] source,
//! with no seeking: local header, payload, optional descriptor, repeat,
//! until the central directory begins. Entry payloads are exposed through
//! the reader's own [`Read`] implementation; opening the next entry skips
//! whatever remains of the current one.
//!
//! Reading this way trusts local headers. For sources that can seek,
//! [`ZipArchive`](crate::ZipArchive) reads the central directory instead
//! and cross-checks the two.

use std::io::{self, Read};

use flate2::{Decompress, FlushDecompress, Status};
use log::trace;

use crate::READ_BUFFER_SIZE;
use crate::checksum::Crc32;
use crate::crypto::{self, CRYPT_HEADER_SIZE, Password, ZipCryptoKeys};
use crate::entry::{CompressionMethod, ZipEntry};
use crate::error::{Error, Result};
use crate::format::header::{self, RawLocalHeader, sig};

pub(crate) mod archive;

struct EntryState {
    entry: ZipEntry,
    /// Raw payload bytes (excluding the crypt header) not yet consumed,
    /// when the compressed size is known up front.
    remaining: Option<u64>,
    /// Raw payload bytes consumed so far.
    raw_consumed: u64,
    decompressor: Option<Decompress>,
    keys: Option<ZipCryptoKeys>,
    encrypted_no_password: bool,
    crypt_header_pending: bool,
    crc: Crc32,
    produced: u64,
    finished: bool,
    /// Compressed bytes fetched but not yet fed to the decompressor:
    /// ciphertext alongside its decrypted form, consumed in lockstep.
    chunk_raw: Vec<u8>,
    chunk_plain: Vec<u8>,
    chunk_pos: usize,
}

/// Forward-only archive reader.
///
/// # Example
///
/// ```rust,no_run
/// use std::fs::File;
/// use std::io::Read;
/// use zipedit::ZipReader;
///
/// # fn main() -> zipedit::Result<()> {
/// let mut reader = ZipReader::new(File::open("in.zip")?);
/// while let Some(entry) = reader.get_next_entry()? {
///     let mut data = Vec::new();
///     reader.read_to_end(&mut data)?;
///     println!("{}: {} bytes", entry.name(), data.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ZipReader<R: Read> {
    inner: R,
    /// Bytes fetched from `inner` but logically un-consumed (descriptor
    /// bytes that followed a deflate stream of unknown length).
    pending: Vec<u8>,
    /// Logical position in the archive stream.
    position: u64,
    password: Option<Password>,
    current: Option<EntryState>,
    done: bool,
}

impl<R: Read> ZipReader<R> {
    /// Creates a reader positioned at the start of an archive.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            position: 0,
            password: None,
            current: None,
            done: false,
        }
    }

    /// Sets the password used for entries opened from now on.
    ///
    /// With a password set, the check byte of each encrypted entry is
    /// verified as soon as the entry is opened. Without one, encrypted
    /// entries can still be listed and skipped but not read.
    pub fn set_password(&mut self, password: Option<Password>) {
        self.password = password;
    }

    /// Returns the reader's source. Any entry in progress is abandoned.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Advances to the next entry, skipping whatever remains of the
    /// current one. Returns `None` once the entry area ends.
    pub fn get_next_entry(&mut self) -> Result<Option<ZipEntry>> {
        if self.done {
            return Ok(None);
        }
        self.skip_current()?;
        self.current = None;

        let header_offset = self.position;
        let mut sig_buf = [0u8; 4];
        self.fetch_exact(&mut sig_buf, "record signature")?;
        let signature = u32::from_le_bytes(sig_buf);
        match signature {
            sig::LOCAL => {}
            sig::CENTRAL | sig::EOCD => {
                self.done = true;
                return Ok(None);
            }
            other => {
                return Err(Error::CorruptHeader {
                    offset: header_offset,
                    reason: format!("unexpected record signature {other:#010x}"),
                });
            }
        }

        let mut fixed = [0u8; 26];
        self.fetch_exact(&mut fixed, "local header")?;
        let raw = RawLocalHeader::decode(&fixed);
        let mut name = vec![0u8; raw.name_len as usize];
        self.fetch_exact(&mut name, "entry name")?;
        let mut extra = vec![0u8; raw.extra_len as usize];
        self.fetch_exact(&mut extra, "extra field")?;
        let entry = header::entry_from_local_header(&raw, &name, &extra, header_offset)?;
        trace!("entry '{}' at offset {header_offset}", entry.name());

        let mut keys = None;
        let mut encrypted_no_password = false;
        let mut crypt_header_pending = false;
        if entry.is_encrypted() {
            match self.password.clone() {
                Some(password) => {
                    let mut crypt_header = [0u8; CRYPT_HEADER_SIZE];
                    self.fetch_exact(&mut crypt_header, "encryption header")?;
                    let expected = crypto::check_byte_for(
                        entry.crc(),
                        entry.dos_time(),
                        entry.has_descriptor(),
                    );
                    keys = Some(crypto::verify_crypt_header(
                        &password,
                        &crypt_header,
                        expected,
                        entry.name(),
                    )?);
                }
                None => {
                    encrypted_no_password = true;
                    crypt_header_pending = true;
                }
            }
        }

        let overhead = if entry.is_encrypted() { CRYPT_HEADER_SIZE as u64 } else { 0 };
        let remaining = match entry.compressed_size() {
            Some(csize) => Some(csize.checked_sub(overhead).ok_or_else(|| {
                Error::CorruptHeader {
                    offset: header_offset,
                    reason: "compressed size smaller than encryption header".into(),
                }
            })?),
            None => None,
        };

        let decompressor = match entry.method() {
            CompressionMethod::Deflated => Some(Decompress::new(false)),
            CompressionMethod::Stored => None,
        };

        self.current = Some(EntryState {
            remaining,
            raw_consumed: 0,
            decompressor,
            keys,
            encrypted_no_password,
            crypt_header_pending,
            crc: Crc32::new(),
            produced: 0,
            finished: false,
            chunk_raw: Vec::new(),
            chunk_plain: Vec::new(),
            chunk_pos: 0,
            entry: entry.clone(),
        });
        Ok(Some(entry))
    }

    /// Consumes the rest of the current entry, if any.
    fn skip_current(&mut self) -> Result<()> {
        let Some(mut state) = self.current.take() else {
            return Ok(());
        };
        if state.finished {
            return Ok(());
        }
        match state.remaining {
            Some(remaining) => {
                // Raw-level skip works even without the password.
                let overhead = if state.crypt_header_pending {
                    CRYPT_HEADER_SIZE as u64
                } else {
                    0
                };
                let buffered = (state.chunk_raw.len() - state.chunk_pos) as u64;
                self.discard(overhead + remaining.saturating_sub(buffered))?;
                state.remaining = Some(0);
                state.chunk_pos = state.chunk_raw.len();
                if state.entry.has_descriptor() {
                    self.consume_descriptor(&mut state, false)?;
                }
            }
            None => {
                if state.encrypted_no_password {
                    return Err(Error::PasswordRequired {
                        entry_name: state.entry.name().to_string(),
                    });
                }
                // The payload end is only discoverable by decompressing.
                let mut scratch = [0u8; READ_BUFFER_SIZE];
                while !state.finished {
                    let n = self.read_entry(&mut state, &mut scratch)?;
                    if n == 0 {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn read_entry(&mut self, state: &mut EntryState, buf: &mut [u8]) -> Result<usize> {
        if state.finished || buf.is_empty() {
            return Ok(0);
        }
        if state.encrypted_no_password {
            return Err(Error::PasswordRequired {
                entry_name: state.entry.name().to_string(),
            });
        }
        match &state.decompressor {
            None => self.read_stored(state, buf),
            Some(_) => self.read_deflated(state, buf),
        }
    }

    fn read_stored(&mut self, state: &mut EntryState, buf: &mut [u8]) -> Result<usize> {
        let remaining = state.remaining.ok_or_else(|| {
            Error::InvalidFormat(
                "stored entry with unknown size cannot be read sequentially".into(),
            )
        })?;
        if remaining == 0 {
            self.finish_entry(state)?;
            return Ok(0);
        }
        let want = buf.len().min(remaining.min(usize::MAX as u64) as usize);
        let n = self.fetch(&mut buf[..want])?;
        if n == 0 {
            return Err(Error::InvalidFormat(
                "entry payload ended before its recorded length".into(),
            ));
        }
        if let Some(keys) = &mut state.keys {
            keys.decrypt(&mut buf[..n]);
        }
        state.crc.update(&buf[..n]);
        state.produced += n as u64;
        state.raw_consumed += n as u64;
        state.remaining = Some(remaining - n as u64);
        if state.remaining == Some(0) {
            self.finish_entry(state)?;
        }
        Ok(n)
    }

    fn read_deflated(&mut self, state: &mut EntryState, buf: &mut [u8]) -> Result<usize> {
        loop {
            if state.chunk_pos == state.chunk_plain.len() {
                self.refill_chunk(state)?;
            }
            let input = &state.chunk_plain[state.chunk_pos..];
            let input_was_empty = input.is_empty();
            let decompressor = state
                .decompressor
                .as_mut()
                .ok_or(Error::InvalidOperation("entry is not deflated"))?;
            let before_in = decompressor.total_in();
            let before_out = decompressor.total_out();
            let status = decompressor
                .decompress(input, buf, FlushDecompress::None)
                .map_err(|_| Error::InvalidFormat("invalid deflate stream".into()))?;
            let consumed = (decompressor.total_in() - before_in) as usize;
            let produced = (decompressor.total_out() - before_out) as usize;

            state.chunk_pos += consumed;
            state.raw_consumed += consumed as u64;
            if let Some(remaining) = &mut state.remaining {
                *remaining = remaining.saturating_sub(consumed as u64);
            }
            if produced > 0 {
                state.crc.update(&buf[..produced]);
                state.produced += produced as u64;
            }

            match status {
                Status::StreamEnd => {
                    self.end_deflate(state)?;
                    return Ok(produced);
                }
                Status::Ok | Status::BufError => {
                    if produced > 0 {
                        return Ok(produced);
                    }
                    if input_was_empty && consumed == 0 {
                        return Err(Error::InvalidFormat(
                            "deflate stream ended prematurely".into(),
                        ));
                    }
                    // Needs more input; loop refills the chunk.
                }
            }
        }
    }

    /// Handles the tail of a deflate stream: returns unused fetched bytes
    /// to the pending buffer, drains declared padding, and finishes the
    /// entry.
    fn end_deflate(&mut self, state: &mut EntryState) -> Result<()> {
        let leftover = state.chunk_raw.len() - state.chunk_pos;
        if leftover > 0 {
            let tail = state.chunk_raw[state.chunk_pos..].to_vec();
            self.unfetch(&tail);
            state.chunk_pos = state.chunk_raw.len();
        }
        if let Some(remaining) = state.remaining {
            // Rare, but a header may declare more compressed bytes than
            // the deflate stream used; they belong to the entry span.
            self.discard(remaining)?;
            state.raw_consumed += remaining;
            state.remaining = Some(0);
        }
        self.finish_entry(state)
    }

    /// Fetches the next compressed chunk and decrypts a working copy.
    fn refill_chunk(&mut self, state: &mut EntryState) -> Result<()> {
        let want = match state.remaining {
            Some(0) => {
                // All declared bytes consumed; hand the decompressor an
                // empty chunk so it can report the stream end it has
                // already seen.
                state.chunk_raw.clear();
                state.chunk_plain.clear();
                state.chunk_pos = 0;
                return Ok(());
            }
            Some(remaining) => READ_BUFFER_SIZE.min(remaining.min(usize::MAX as u64) as usize),
            None => READ_BUFFER_SIZE,
        };
        let mut chunk = vec![0u8; want];
        let n = self.fetch(&mut chunk)?;
        if n == 0 {
            return Err(Error::InvalidFormat(
                "archive ended inside an entry payload".into(),
            ));
        }
        chunk.truncate(n);
        state.chunk_raw = chunk.clone();
        if let Some(keys) = &mut state.keys {
            keys.decrypt(&mut chunk);
        }
        state.chunk_plain = chunk;
        state.chunk_pos = 0;
        Ok(())
    }

    /// Consumes the trailing descriptor (if flagged) and verifies sizes
    /// and checksum against what was actually produced.
    fn finish_entry(&mut self, state: &mut EntryState) -> Result<()> {
        if state.finished {
            return Ok(());
        }
        if state.entry.has_descriptor() {
            self.consume_descriptor(state, true)?;
        }

        let overhead = if state.entry.is_encrypted() {
            CRYPT_HEADER_SIZE as u64
        } else {
            0
        };
        if let Some(declared) = state.entry.compressed_size() {
            let actual = state.raw_consumed + overhead;
            if declared != actual {
                return Err(Error::SizeMismatch {
                    entry_name: state.entry.name().to_string(),
                    field: "compressed",
                    declared,
                    actual,
                });
            }
        }
        if let Some(declared) = state.entry.size() {
            if declared != state.produced {
                return Err(Error::SizeMismatch {
                    entry_name: state.entry.name().to_string(),
                    field: "uncompressed",
                    declared,
                    actual: state.produced,
                });
            }
        }
        if let Some(expected) = state.entry.crc() {
            let actual = state.crc.finalize();
            if expected != actual {
                return Err(Error::CrcMismatch {
                    entry_name: Some(state.entry.name().to_string()),
                    expected,
                    actual,
                });
            }
        }
        state.finished = true;
        Ok(())
    }

    /// Parses the data descriptor that follows the current entry's
    /// payload. The leading signature word is optional; 64-bit entries
    /// carry 8-byte size fields.
    fn consume_descriptor(&mut self, state: &mut EntryState, validate: bool) -> Result<()> {
        let offset = self.position;
        let mut first = [0u8; 4];
        self.fetch_exact(&mut first, "data descriptor")?;
        let crc = if u32::from_le_bytes(first) == sig::DESCRIPTOR {
            let mut crc_buf = [0u8; 4];
            self.fetch_exact(&mut crc_buf, "data descriptor")?;
            u32::from_le_bytes(crc_buf)
        } else {
            u32::from_le_bytes(first)
        };

        let zip64 = state.entry.force_zip64;
        let (csize, size) = if zip64 {
            let mut buf = [0u8; 16];
            self.fetch_exact(&mut buf, "data descriptor")?;
            let mut c = [0u8; 8];
            c.copy_from_slice(&buf[..8]);
            let mut s = [0u8; 8];
            s.copy_from_slice(&buf[8..]);
            (u64::from_le_bytes(c), u64::from_le_bytes(s))
        } else {
            let mut buf = [0u8; 8];
            self.fetch_exact(&mut buf, "data descriptor")?;
            (
                u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64,
                u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as u64,
            )
        };
        trace!("descriptor at {offset}: crc {crc:#010x}, csize {csize}, size {size}");

        if validate {
            state.entry.crc = Some(crc);
            state.entry.compressed_size = Some(csize);
            state.entry.size = Some(size);
        }
        Ok(())
    }

    /// Reads from the pending buffer first, then the source.
    fn fetch(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            n
        } else {
            self.inner.read(buf)?
        };
        self.position += n as u64;
        Ok(n)
    }

    fn fetch_exact(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.fetch(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::CorruptHeader {
                    offset: self.position,
                    reason: format!("truncated {what}"),
                });
            }
            filled += n;
        }
        Ok(())
    }

    /// Returns already-fetched bytes to the front of the stream.
    fn unfetch(&mut self, bytes: &[u8]) {
        let mut restored = Vec::with_capacity(bytes.len() + self.pending.len());
        restored.extend_from_slice(bytes);
        restored.append(&mut self.pending);
        self.pending = restored;
        self.position -= bytes.len() as u64;
    }

    /// Discards exactly `n` raw bytes.
    fn discard(&mut self, mut n: u64) -> Result<()> {
        let mut scratch = [0u8; READ_BUFFER_SIZE];
        while n > 0 {
            let want = scratch.len().min(n.min(usize::MAX as u64) as usize);
            let got = self.fetch(&mut scratch[..want])?;
            if got == 0 {
                return Err(Error::InvalidFormat(
                    "archive ended inside an entry payload".into(),
                ));
            }
            n -= got as u64;
        }
        Ok(())
    }
}

impl<R: Read> Read for ZipReader<R> {
    /// Reads decompressed (and decrypted) payload bytes of the current
    /// entry; `Ok(0)` at the entry's end or when no entry is open.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(mut state) = self.current.take() else {
            return Ok(0);
        };
        let result = self.read_entry(&mut state, buf);
        self.current = Some(state);
        result.map_err(|e| match e {
            Error::Io(io) => io,
            other => io::Error::other(other),
        })
    }
}

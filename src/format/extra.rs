//! The tagged extra-field mini-container.
//!
//! Entry headers may carry an extra field: a sequence of
//! `(tag: u16, length: u16, payload)` triples, little-endian, with a total
//! serialized budget of 65,535 bytes. The zip64 size extension lives here
//! under tag `0x0001`; vendors append their own tags (NTFS timestamps,
//! extended Unix data) using the same framing.
//!
//! [`ExtraData`] owns one such blob and offers tag-level editing plus a
//! cursor-based sequential reader positioned by [`find`](ExtraData::find).

use crate::error::{Error, Result};

/// Total serialized budget for an extra field, from the 16-bit header
/// length fields.
pub const EXTRA_DATA_LIMIT: usize = u16::MAX as usize;

/// Tag carrying the zip64 size/offset sub-record.
pub const ZIP64_TAG: u16 = 0x0001;

/// An editable, readable extra-field blob.
///
/// Tags are not required to be unique; [`find`](ExtraData::find) locates the
/// first match and [`add`](ExtraData::add) replaces the first existing
/// occurrence. The read cursor tracks an absolute position in the blob and
/// is only valid between a successful `find` and the next mutation.
#[derive(Debug, Clone, Default)]
pub struct ExtraData {
    data: Vec<u8>,
    /// Absolute read cursor.
    cursor: usize,
    /// Start of the current tag's payload.
    value_start: usize,
    /// Length of the current tag's payload.
    value_length: usize,
}

impl ExtraData {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps existing extra-field bytes.
    ///
    /// The bytes are not validated here; a malformed trailing fragment is
    /// simply never found by [`find`](ExtraData::find).
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() > EXTRA_DATA_LIMIT {
            return Err(Error::CapacityExceeded {
                what: "extra field",
                limit: EXTRA_DATA_LIMIT,
            });
        }
        Ok(Self {
            data,
            ..Self::default()
        })
    }

    /// The serialized bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the store, returning the serialized bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Total serialized length, including the 4-byte header of every tag.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the store holds no tags at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Adds a tagged block, replacing the first existing block with the
    /// same tag.
    ///
    /// Fails without mutating anything if the result would exceed the
    /// 65,535-byte budget.
    pub fn add(&mut self, tag: u16, payload: &[u8]) -> Result<()> {
        let removed = self
            .locate(tag)
            .map_or(0, |(start, len)| self.occupied(start, len));
        let new_total = self.data.len() - removed + 4 + payload.len();
        if payload.len() > EXTRA_DATA_LIMIT || new_total > EXTRA_DATA_LIMIT {
            return Err(Error::CapacityExceeded {
                what: "extra field",
                limit: EXTRA_DATA_LIMIT,
            });
        }
        self.delete(tag);
        self.data.extend_from_slice(&tag.to_le_bytes());
        self.data
            .extend_from_slice(&(payload.len() as u16).to_le_bytes());
        self.data.extend_from_slice(payload);
        self.invalidate_cursor();
        Ok(())
    }

    /// Removes the first block with this tag, shifting the remainder down.
    /// Returns whether anything was removed.
    pub fn delete(&mut self, tag: u16) -> bool {
        match self.locate(tag) {
            Some((start, len)) => {
                let end = (start + len).min(self.data.len());
                self.data.drain(start - 4..end);
                self.invalidate_cursor();
                true
            }
            None => false,
        }
    }

    /// Looks for the first block with this tag.
    ///
    /// On success the read cursor moves to the start of that tag's payload
    /// and [`unread_count`](ExtraData::unread_count) reflects its length.
    pub fn find(&mut self, tag: u16) -> bool {
        match self.locate(tag) {
            Some((start, len)) => {
                self.cursor = start;
                self.value_start = start;
                self.value_length = len;
                true
            }
            None => false,
        }
    }

    /// Payload length of the tag most recently found.
    pub fn value_length(&self) -> usize {
        self.value_length
    }

    /// Absolute position of the read cursor within the blob.
    pub fn current_read_index(&self) -> usize {
        self.cursor
    }

    /// Bytes left unread in the current tag's payload.
    pub fn unread_count(&self) -> usize {
        (self.value_start + self.value_length).saturating_sub(self.cursor)
    }

    /// Reads one payload byte, or `None` at the end of the current tag
    /// (or of the buffer, for a truncated tag).
    pub fn read_u8(&mut self) -> Option<u8> {
        if self.unread_count() == 0 || self.cursor >= self.data.len() {
            return None;
        }
        let b = self.data[self.cursor];
        self.cursor += 1;
        Some(b)
    }

    /// Reads a little-endian u16 from the current tag's payload.
    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_le_bytes(bytes))
    }

    /// Reads a little-endian u32 from the current tag's payload.
    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_array::<4>()?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Reads a little-endian u64 from the current tag's payload.
    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_array::<8>()?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Moves the read cursor by a signed amount within the current tag's
    /// payload. Skipping out of bounds in either direction fails and
    /// leaves the cursor unchanged.
    pub fn skip(&mut self, amount: i64) -> Result<()> {
        let target = self.cursor as i64 + amount;
        let lo = self.value_start as i64;
        let hi = (self.value_start + self.value_length) as i64;
        if target < lo || target > hi {
            return Err(Error::InvalidOperation(
                "skip out of range of tagged extra data",
            ));
        }
        self.cursor = target as usize;
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.unread_count() < N {
            return Err(Error::InvalidFormat(
                "read past end of tagged extra data".into(),
            ));
        }
        if self.cursor + N > self.data.len() {
            return Err(Error::InvalidFormat(
                "read past end of extra data buffer".into(),
            ));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.cursor..self.cursor + N]);
        self.cursor += N;
        Ok(out)
    }

    /// Returns `(payload_start, declared_len)` of the first block with
    /// this tag. Trailing bytes too short to form a header terminate the
    /// scan. The declared length is reported as-is even when the buffer
    /// holds fewer bytes, so reading a truncated tag fails as a buffer
    /// overrun rather than silently shrinking.
    fn locate(&self, tag: u16) -> Option<(usize, usize)> {
        let mut pos = 0;
        while pos + 4 <= self.data.len() {
            let t = u16::from_le_bytes([self.data[pos], self.data[pos + 1]]);
            let len = u16::from_le_bytes([self.data[pos + 2], self.data[pos + 3]]) as usize;
            if t == tag {
                return Some((pos + 4, len));
            }
            pos += 4 + len;
        }
        None
    }

    /// Bytes a block actually occupies, capped by the end of the buffer.
    fn occupied(&self, start: usize, declared_len: usize) -> usize {
        (start + declared_len).min(self.data.len()) - (start - 4)
    }

    fn invalidate_cursor(&mut self) {
        self.cursor = 0;
        self.value_start = 0;
        self.value_length = 0;
    }
}

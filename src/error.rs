//! Error types for ZIP archive operations.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes when working with ZIP archives, along with a convenient
//! [`Result<T>`] type alias.
//!
//! # Error Categories
//!
//! Errors fall into four broad categories:
//!
//! | Category | Variants | Typical cause |
//! |----------|----------|---------------|
//! | Format | [`InvalidFormat`][Error::InvalidFormat], [`CorruptHeader`][Error::CorruptHeader], [`CrcMismatch`][Error::CrcMismatch] | Invalid or damaged archive data |
//! | Crypto | [`WrongPassword`][Error::WrongPassword], [`PasswordRequired`][Error::PasswordRequired] | Encrypted entries |
//! | Usage | [`InvalidOperation`][Error::InvalidOperation], [`EntryNotFound`][Error::EntryNotFound], [`NameTooLong`][Error::NameTooLong] | Caller programming errors |
//! | Capacity | [`CapacityExceeded`][Error::CapacityExceeded] | A fixed byte budget was crossed |
//!
//! Format errors are always fatal to the current read or verify pass and are
//! never silently recovered. Capacity errors leave the state exactly as it
//! was before the failing operation.

use std::io;

/// The main error type for ZIP archive operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred on the underlying source or destination.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The archive data is invalid or not recognized as ZIP.
    ///
    /// The string describes what was expected versus what was found.
    #[error("Invalid ZIP format: {0}")]
    InvalidFormat(String),

    /// A header record is corrupt or truncated.
    ///
    /// The offset locates where in the stream the corruption was detected.
    #[error("Corrupt header at offset {offset:#x}: {reason}")]
    CorruptHeader {
        /// The byte offset where corruption was detected.
        offset: u64,
        /// A description of the corruption.
        reason: String,
    },

    /// Decompressed data did not match the stored CRC-32.
    #[error("CRC mismatch{}: expected {expected:#010x}, got {actual:#010x}",
        .entry_name.as_deref().map(|n| format!(" for entry '{n}'")).unwrap_or_default())]
    CrcMismatch {
        /// Name of the entry that failed verification, when known.
        entry_name: Option<String>,
        /// The CRC-32 recorded in the archive.
        expected: u32,
        /// The CRC-32 computed from the data.
        actual: u32,
    },

    /// The password is incorrect for an encrypted entry.
    ///
    /// Detected through the check byte of the entry's encryption header,
    /// as early as that header is available.
    #[error("Wrong password{}", .entry_name.as_deref().map(|n| format!(" for entry '{n}'")).unwrap_or_default())]
    WrongPassword {
        /// Name of the encrypted entry, when known.
        entry_name: Option<String>,
    },

    /// An entry is encrypted but no password was configured.
    #[error("Entry '{entry_name}' is encrypted but no password was provided")]
    PasswordRequired {
        /// Name of the encrypted entry.
        entry_name: String,
    },

    /// The entry uses a compression method this crate does not implement.
    #[error("Unsupported compression method: {method}")]
    UnsupportedMethod {
        /// The raw method id from the header.
        method: u16,
    },

    /// An operation was called in the wrong state or with invalid arguments.
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// An entry name exceeds the 65,535-byte field limit.
    #[error("Entry name too long: {length} bytes (limit 65535)")]
    NameTooLong {
        /// Encoded length of the offending name.
        length: usize,
    },

    /// A named entry does not exist in the archive.
    #[error("Entry not found: {name}")]
    EntryNotFound {
        /// The name that failed to resolve.
        name: String,
    },

    /// An entry with this name already exists.
    #[error("Entry already exists: {name}")]
    EntryExists {
        /// The duplicated name.
        name: String,
    },

    /// A fixed byte budget (extra field, comment) would be exceeded.
    ///
    /// The operation that would cross the budget fails and leaves the state
    /// unchanged; nothing is partially written.
    #[error("Capacity exceeded for {what}: limit is {limit} bytes")]
    CapacityExceeded {
        /// What ran out of room.
        what: &'static str,
        /// The byte budget that would be crossed.
        limit: usize,
    },

    /// A size declared up front did not match the bytes actually written.
    #[error("Size mismatch for entry '{entry_name}': declared {declared} {field} bytes, wrote {actual}")]
    SizeMismatch {
        /// The entry being written when the mismatch was found.
        entry_name: String,
        /// Which size field disagreed.
        field: &'static str,
        /// The value declared before writing.
        declared: u64,
        /// The value observed after writing.
        actual: u64,
    },
}

/// A specialized `Result` type for ZIP archive operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true for errors that indicate damaged archive data rather
    /// than caller mistakes or I/O trouble.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidFormat(_) | Error::CorruptHeader { .. } | Error::CrcMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_offset() {
        let err = Error::CorruptHeader {
            offset: 0x20,
            reason: "bad signature".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0x20"));
        assert!(msg.contains("bad signature"));
    }

    #[test]
    fn crc_mismatch_names_entry() {
        let err = Error::CrcMismatch {
            entry_name: Some("a.txt".into()),
            expected: 1,
            actual: 2,
        };
        assert!(err.to_string().contains("a.txt"));
        assert!(err.is_format_error());
    }

    #[test]
    fn usage_errors_are_not_format_errors() {
        assert!(!Error::InvalidOperation("nope").is_format_error());
        assert!(
            !Error::CapacityExceeded {
                what: "comment",
                limit: 65535
            }
            .is_format_error()
        );
    }
}

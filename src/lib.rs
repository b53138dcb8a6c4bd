//! ZIP archive reading, writing, and in-place editing.
//!
//! This crate works with the classic ZIP container format: stored and
//! deflated entries, traditional stream encryption, zip64 size
//! extensions, and archive comments. It offers four entry points:
//!
//! - [`ZipWriter`] creates archives entry by entry, over seekable or
//!   forward-only destinations.
//! - [`ZipReader`] walks an archive sequentially over any byte stream,
//!   without seeking.
//! - [`ZipArchive`] loads the central directory of a seekable source and
//!   reads entries in any order, cross-checking both header views.
//! - [`ZipEditor`] stages batches of additions and deletions and commits
//!   them atomically, copying surviving entries byte for byte.
//!
//! # Writing and reading
//!
//! ```rust
//! use std::io::{Cursor, Read, Write};
//! use zipedit::{ZipArchive, ZipEntry, ZipWriter};
//!
//! # fn main() -> zipedit::Result<()> {
//! let mut writer = ZipWriter::new(Cursor::new(Vec::new()))?;
//! writer.put_next_entry(ZipEntry::new("greeting.txt")?)?;
//! writer.write_all(b"hello zip")?;
//! writer.close_entry()?;
//! let cursor = writer.into_inner()?;
//!
//! let mut archive = ZipArchive::open(cursor)?;
//! assert_eq!(archive.read_entry("greeting.txt")?, b"hello zip");
//! # Ok(())
//! # }
//! ```
//!
//! # Editing
//!
//! ```rust
//! use zipedit::{ZipEditor, ZipEntry, ZipWriter};
//! use std::io::Cursor;
//!
//! # fn main() -> zipedit::Result<()> {
//! let mut writer = ZipWriter::new(Cursor::new(Vec::new()))?;
//! writer.put_next_entry(ZipEntry::new("keep.txt")?)?;
//! let bytes = writer.into_inner()?.into_inner();
//!
//! let mut editor = ZipEditor::in_memory(bytes)?;
//! editor.begin_update()?;
//! editor.add("added.txt", b"new data".to_vec())?;
//! editor.commit_update()?;
//! assert!(editor.find_entry("added.txt").is_some());
//! # Ok(())
//! # }
//! ```
//!
//! Encryption uses the traditional PKWARE stream cipher, which is
//! obsolete as cryptography; it is supported for interoperability with
//! existing archives, not for protecting data.

#![warn(missing_docs)]

pub mod checksum;
pub mod dostime;
pub mod format;

mod crypto;
mod edit;
mod entry;
mod error;
mod pipe;
mod read;
mod write;

pub use crypto::Password;
pub use edit::{
    CommitResult, FileStorage, MemoryStorage, StaticDataSource, StorageHandle, StorageStream,
    UpdateStorage, UpdateStrategy, ZipEditor,
};
pub use entry::{CompressionMethod, ZipEntry, Zip64Mode};
pub use error::{Error, Result};
pub use format::ExtraData;
pub use pipe::BoundedPipe;
pub use read::ZipReader;
pub use read::archive::ZipArchive;
pub use write::{OutputSink, SeekSink, StreamSink, ZipWriter};

/// Chunk size for internal copy and compression loops.
pub(crate) const READ_BUFFER_SIZE: usize = 8192;

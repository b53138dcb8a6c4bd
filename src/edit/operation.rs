//! Update operations and their supporting types.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::entry::ZipEntry;
use crate::error::Result;

/// How [`ZipEditor`](crate::ZipEditor) writes a batch of changes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateStrategy {
    /// Rewrite into a temporary destination and swap it in atomically
    /// once complete. A failure partway leaves the original untouched.
    #[default]
    Safe,
    /// Append new entries to the existing archive and rewrite only its
    /// central directory tail. Faster for large archives, but only
    /// possible for additions; a batch containing deletions falls back
    /// to the safe strategy.
    Direct,
}

/// Per-entry and total counts from a committed update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitResult {
    /// Entries carried over from the previous archive.
    pub kept: usize,
    /// Entries newly added.
    pub added: usize,
    /// Entries removed.
    pub deleted: usize,
}

/// A source of entry payload bytes that can be opened when the update
/// is committed, not when it is staged.
///
/// Opening late keeps staged updates cheap and lets file-backed sources
/// reflect their content at commit time.
pub trait StaticDataSource {
    /// Opens a fresh reader over the payload bytes.
    fn get_source(&self) -> Result<Box<dyn Read + '_>>;
}

impl StaticDataSource for Vec<u8> {
    fn get_source(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(self.as_slice()))
    }
}

impl StaticDataSource for &'static [u8] {
    fn get_source(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(*self))
    }
}

impl StaticDataSource for String {
    fn get_source(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(self.as_bytes()))
    }
}

impl StaticDataSource for &'static str {
    fn get_source(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(self.as_bytes()))
    }
}

impl StaticDataSource for PathBuf {
    fn get_source(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(self)?))
    }
}

/// One staged change, applied at commit time.
pub(crate) enum Operation {
    Add {
        entry: ZipEntry,
        source: Box<dyn StaticDataSource>,
    },
    Delete {
        name: String,
    },
}

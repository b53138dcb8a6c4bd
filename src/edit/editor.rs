//! Batched archive updates.
//!
//! [`ZipEditor`] holds a snapshot of an archive's central directory and
//! stages additions and deletions against it. Nothing touches the archive
//! until [`commit_update`](ZipEditor::commit_update), which applies the
//! whole batch with one of two strategies:
//!
//! - **Safe** (default): rewrite everything into a temporary destination,
//!   then swap it in. Surviving entries are copied byte for byte, so
//!   encrypted payloads keep their exact ciphertext and entries are never
//!   recompressed. A failure partway leaves the original archive intact.
//! - **Direct**: append the new entries over the old central directory
//!   and write a fresh directory after them. Only possible when the batch
//!   deletes nothing; otherwise the safe strategy is used regardless of
//!   the hint.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::{debug, info};

use crate::crypto::Password;
use crate::entry::{CompressionMethod, ZipEntry, Zip64Mode};
use crate::error::{Error, Result};
use crate::read::archive::ZipArchive;
use crate::write::ZipWriter;

use super::operation::{CommitResult, Operation, StaticDataSource, UpdateStrategy};
use super::storage::{FileStorage, MemoryStorage, UpdateStorage};

/// Batched editor over an archive held in some [`UpdateStorage`].
///
/// # Example
///
/// ```rust,no_run
/// use zipedit::ZipEditor;
///
/// # fn main() -> zipedit::Result<()> {
/// let mut editor = ZipEditor::open_path("data.zip")?;
/// editor.begin_update()?;
/// editor.add("notes/new.txt", b"fresh content".to_vec())?;
/// editor.delete("stale.bin")?;
/// let result = editor.commit_update()?;
/// println!("kept {}, added {}, deleted {}", result.kept, result.added, result.deleted);
/// # Ok(())
/// # }
/// ```
pub struct ZipEditor<S: UpdateStorage> {
    storage: S,
    entries: Vec<ZipEntry>,
    comment: Vec<u8>,
    cd_offset: u64,
    pending: Vec<Operation>,
    updating: bool,
    strategy: UpdateStrategy,
    password: Option<Password>,
    method: CompressionMethod,
    level: u32,
    zip64_mode: Zip64Mode,
}

impl ZipEditor<FileStorage> {
    /// Opens an editor over an existing archive file.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(FileStorage::new(path.as_ref()))
    }

    /// Creates an empty archive file and opens an editor over it.
    pub fn create_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::create(path.as_ref())?;
        ZipWriter::new(file)?.close()?;
        Self::open_path(path)
    }
}

impl ZipEditor<MemoryStorage> {
    /// Opens an editor over archive bytes held in memory.
    pub fn in_memory(bytes: Vec<u8>) -> Result<Self> {
        Self::new(MemoryStorage::new(bytes))
    }

    /// A copy of the current archive bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.storage.bytes()
    }
}

impl<S: UpdateStorage> ZipEditor<S> {
    /// Opens an editor over any storage backend.
    pub fn new(storage: S) -> Result<Self> {
        let mut editor = Self {
            storage,
            entries: Vec::new(),
            comment: Vec::new(),
            cd_offset: 0,
            pending: Vec::new(),
            updating: false,
            strategy: UpdateStrategy::default(),
            password: None,
            method: CompressionMethod::default(),
            level: 6,
            zip64_mode: Zip64Mode::default(),
        };
        editor.load()?;
        Ok(editor)
    }

    fn load(&mut self) -> Result<()> {
        let stream = self.storage.open_read()?;
        let archive = ZipArchive::open(stream)?;
        self.entries = archive.entries_cloned();
        self.comment = archive.comment().to_vec();
        self.cd_offset = archive.central_directory_offset();
        Ok(())
    }

    /// The current snapshot of entries, in archive order. Staged changes
    /// are not reflected until committed.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Looks up a snapshot entry by exact name.
    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }

    /// Sets the password applied to entries added from now on, and used
    /// when reading or verifying encrypted entries.
    pub fn set_password(&mut self, password: Option<Password>) {
        self.password = password;
    }

    /// Sets the compression method for entries added from now on.
    pub fn set_method(&mut self, method: CompressionMethod) {
        self.method = method;
    }

    /// Sets the deflate level (0-9) for entries added from now on.
    pub fn set_level(&mut self, level: u32) -> Result<()> {
        if level > 9 {
            return Err(Error::InvalidOperation("compression level must be 0-9"));
        }
        self.level = level;
        Ok(())
    }

    /// Sets the zip64 policy used when rewriting.
    pub fn set_zip64_mode(&mut self, mode: Zip64Mode) {
        self.zip64_mode = mode;
    }

    /// Starts an update batch with the default safe strategy.
    pub fn begin_update(&mut self) -> Result<()> {
        self.begin_update_with(UpdateStrategy::Safe)
    }

    /// Starts an update batch with an explicit strategy hint.
    pub fn begin_update_with(&mut self, strategy: UpdateStrategy) -> Result<()> {
        if self.updating {
            return Err(Error::InvalidOperation("an update is already in progress"));
        }
        self.updating = true;
        self.strategy = strategy;
        self.pending.clear();
        Ok(())
    }

    /// Stages adding an entry with the editor's current method, level,
    /// and password settings.
    pub fn add<D: StaticDataSource + 'static>(&mut self, name: &str, source: D) -> Result<()> {
        self.add_with_method(name, self.method, source)
    }

    /// Stages adding an entry with an explicit compression method.
    pub fn add_with_method<D: StaticDataSource + 'static>(
        &mut self,
        name: &str,
        method: CompressionMethod,
        source: D,
    ) -> Result<()> {
        self.require_update()?;
        if self.staged_view_contains(name) {
            return Err(Error::EntryExists {
                name: name.to_string(),
            });
        }
        let mut entry = ZipEntry::new(name)?;
        entry.set_method(method);
        self.pending.push(Operation::Add {
            entry,
            source: Box::new(source),
        });
        Ok(())
    }

    /// Stages deleting an entry. Fails when the name does not exist in
    /// the snapshot or was already staged for deletion.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        self.require_update()?;
        let in_snapshot = self.entries.iter().any(|e| e.name() == name);
        let already_staged = self.pending.iter().any(
            |op| matches!(op, Operation::Delete { name: staged } if staged == name),
        );
        if !in_snapshot || already_staged {
            return Err(Error::EntryNotFound {
                name: name.to_string(),
            });
        }
        self.pending.push(Operation::Delete {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Discards all staged operations and ends the batch.
    pub fn abort_update(&mut self) {
        self.pending.clear();
        self.updating = false;
    }

    /// Applies the staged batch to storage and reloads the snapshot.
    ///
    /// An empty batch commits as a no-op without touching storage. On
    /// error the batch stays staged and the stored archive is unchanged.
    pub fn commit_update(&mut self) -> Result<CommitResult> {
        self.require_update()?;
        if self.pending.is_empty() {
            self.updating = false;
            return Ok(CommitResult {
                kept: self.entries.len(),
                ..CommitResult::default()
            });
        }

        let has_deletes = self
            .pending
            .iter()
            .any(|op| matches!(op, Operation::Delete { .. }));
        let result = if self.strategy == UpdateStrategy::Direct && !has_deletes {
            self.commit_direct()?
        } else {
            self.commit_safe()?
        };

        self.pending.clear();
        self.updating = false;
        self.load()?;
        info!(
            "committed update: kept {}, added {}, deleted {}",
            result.kept, result.added, result.deleted
        );
        Ok(result)
    }

    /// Verifies the stored archive; with `validate_payload` each entry's
    /// data is decompressed and checked against its CRC.
    pub fn test_archive(&mut self, validate_payload: bool) -> Result<bool> {
        let stream = self.storage.open_read()?;
        let mut archive = ZipArchive::open(stream)?;
        archive.set_password(self.password.clone());
        Ok(archive.test_archive(validate_payload))
    }

    /// Reads one entry's payload from the stored archive.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let stream = self.storage.open_read()?;
        let mut archive = ZipArchive::open(stream)?;
        archive.set_password(self.password.clone());
        archive.read_entry(name)
    }

    fn require_update(&self) -> Result<()> {
        if self.updating {
            Ok(())
        } else {
            Err(Error::InvalidOperation("no update in progress"))
        }
    }

    fn staged_view_contains(&self, name: &str) -> bool {
        let staged_delete = self.pending.iter().any(
            |op| matches!(op, Operation::Delete { name: staged } if staged == name),
        );
        let staged_add = self.pending.iter().any(
            |op| matches!(op, Operation::Add { entry, .. } if entry.name() == name),
        );
        staged_add || (!staged_delete && self.entries.iter().any(|e| e.name() == name))
    }

    /// Full rewrite into a temporary destination, then swap.
    ///
    /// Surviving entries are copied as raw byte spans: no recompression,
    /// and encrypted payloads keep their original ciphertext. Only their
    /// central records move.
    fn commit_safe(&mut self) -> Result<CommitResult> {
        let source_stream = self.storage.open_read()?;
        let mut source = ZipArchive::open(source_stream)?;

        let temp = self.storage.make_temporary()?;
        let mut writer = ZipWriter::new(temp)?;
        writer.set_zip64_mode(self.zip64_mode);
        writer.set_comment(self.comment.clone())?;

        let mut kept = 0;
        for entry in self.entries.clone() {
            if self.is_staged_for_delete(entry.name()) {
                continue;
            }
            let (start, len) = source.raw_entry_span(&entry)?;
            let mut span = source.span_reader(start, len)?;
            writer.raw_copy_entry(entry, &mut span, len)?;
            kept += 1;
        }
        drop(source);

        let added = self.write_additions(&mut writer)?;
        writer.finish()?;
        let temp = writer.into_inner()?;
        self.storage.commit_temporary(temp)?;

        Ok(CommitResult {
            kept,
            added,
            deleted: self.entries.len() - kept,
        })
    }

    /// Appends new entries over the old central directory and writes a
    /// fresh directory after them, in place.
    fn commit_direct(&mut self) -> Result<CommitResult> {
        let mut stream = self.storage.open_for_direct_update()?;
        stream.seek(SeekFrom::Start(self.cd_offset))?;
        let mut writer = ZipWriter::new(stream)?;
        writer.set_zip64_mode(self.zip64_mode);
        writer.set_comment(self.comment.clone())?;
        writer.preload_entries(self.entries.clone());
        let kept = writer.entry_count();

        let added = self.write_additions(&mut writer)?;
        writer.finish()?;
        let mut stream = writer.into_inner()?;
        // The rewritten tail may be shorter than the old one.
        let end = stream.stream_position()?;
        stream.truncate(end)?;
        debug!("direct update appended {added} entries, archive now {end} bytes");

        Ok(CommitResult {
            kept,
            added,
            deleted: 0,
        })
    }

    fn write_additions(
        &mut self,
        writer: &mut ZipWriter<impl crate::write::OutputSink>,
    ) -> Result<usize> {
        writer.set_password(self.password.clone());
        writer.set_level(self.level)?;
        let mut added = 0;
        for op in &self.pending {
            let Operation::Add { entry, source } = op else {
                continue;
            };
            writer.put_next_entry(entry.clone())?;
            let mut reader = source.get_source()?;
            let mut buf = [0u8; crate::READ_BUFFER_SIZE];
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                writer.write_entry_data(&buf[..n])?;
            }
            writer.close_entry()?;
            added += 1;
        }
        Ok(added)
    }

    fn is_staged_for_delete(&self, name: &str) -> bool {
        self.pending.iter().any(
            |op| matches!(op, Operation::Delete { name: staged } if staged == name),
        )
    }
}

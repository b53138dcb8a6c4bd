//! Archive storage backends for the editor.
//!
//! [`UpdateStorage`] abstracts where an archive lives and how a rewritten
//! version replaces it: [`FileStorage`] rewrites through a sibling
//! temporary file and an atomic rename, [`MemoryStorage`] through a
//! second in-memory buffer. In both cases the original archive survives
//! until the replacement is complete.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};

/// A read/write/seek handle onto archive bytes, with truncation.
pub trait StorageStream: Read + Write + Seek {
    /// Shortens the destination to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl StorageStream for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// An owned handle onto archive bytes, as handed out by an
/// [`UpdateStorage`] backend.
pub struct StorageHandle {
    inner: Box<dyn StorageStream>,
}

impl StorageHandle {
    /// Wraps a backend stream.
    pub fn new(inner: Box<dyn StorageStream>) -> Self {
        Self { inner }
    }

    /// Shortens the destination to `len` bytes.
    pub fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.inner.truncate(len)
    }
}

impl Read for StorageHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for StorageHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for StorageHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Where an archive lives and how updated versions replace it.
pub trait UpdateStorage {
    /// Opens a fresh read handle on the current archive.
    fn open_read(&mut self) -> Result<StorageHandle>;

    /// Creates an empty temporary destination for a rewrite.
    fn make_temporary(&mut self) -> Result<StorageHandle>;

    /// Replaces the current archive with the completed temporary.
    ///
    /// `temp` is the handle returned by
    /// [`make_temporary`](UpdateStorage::make_temporary); it is closed as
    /// part of the swap.
    fn commit_temporary(&mut self, temp: StorageHandle) -> Result<()>;

    /// Opens the current archive for modification in place.
    fn open_for_direct_update(&mut self) -> Result<StorageHandle>;
}

/// File-backed storage. Rewrites go to a sibling `.tmp` file that
/// replaces the original with a rename; an uncommitted temporary is
/// removed on drop.
pub struct FileStorage {
    path: PathBuf,
    temp_path: Option<PathBuf>,
}

impl FileStorage {
    /// Storage over an existing archive file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temp_path: None,
        }
    }

    /// The archive's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fresh_temp_path(&self) -> Result<PathBuf> {
        let base = self.path.as_os_str().to_owned();
        for n in 0u32..1000 {
            let mut candidate = base.clone();
            candidate.push(format!(".{n}.tmp"));
            let candidate = PathBuf::from(candidate);
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(Error::InvalidOperation(
            "could not find a free temporary file name next to the archive",
        ))
    }

    fn discard_temp(&mut self) {
        if let Some(temp) = self.temp_path.take() {
            let _ = fs::remove_file(temp);
        }
    }
}

impl UpdateStorage for FileStorage {
    fn open_read(&mut self) -> Result<StorageHandle> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        Ok(StorageHandle::new(Box::new(file)))
    }

    fn make_temporary(&mut self) -> Result<StorageHandle> {
        self.discard_temp();
        let temp_path = self.fresh_temp_path()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        debug!("rewriting {:?} through {:?}", self.path, temp_path);
        self.temp_path = Some(temp_path);
        Ok(StorageHandle::new(Box::new(file)))
    }

    fn commit_temporary(&mut self, temp: StorageHandle) -> Result<()> {
        // Close the handle before renaming over the original.
        drop(temp);
        let temp_path = self
            .temp_path
            .take()
            .ok_or(Error::InvalidOperation("no temporary rewrite to commit"))?;
        if let Err(first) = fs::rename(&temp_path, &self.path) {
            // Some platforms refuse to rename over an existing file.
            if fs::remove_file(&self.path).is_err() || fs::rename(&temp_path, &self.path).is_err()
            {
                let _ = fs::remove_file(&temp_path);
                return Err(Error::Io(first));
            }
        }
        Ok(())
    }

    fn open_for_direct_update(&mut self) -> Result<StorageHandle> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        Ok(StorageHandle::new(Box::new(file)))
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        self.discard_temp();
    }
}

mod shared {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    pub(super) type SharedBuffer = Rc<RefCell<Vec<u8>>>;

    /// A cursor over a shared byte buffer.
    pub(super) struct SharedCursor {
        data: SharedBuffer,
        pos: u64,
    }

    impl SharedCursor {
        pub(super) fn new(data: SharedBuffer) -> Self {
            Self { data, pos: 0 }
        }
    }

    impl Read for SharedCursor {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let data = self.data.borrow();
            let start = (self.pos as usize).min(data.len());
            let n = buf.len().min(data.len() - start);
            buf[..n].copy_from_slice(&data[start..start + n]);
            self.pos += n as u64;
            Ok(n)
        }
    }

    impl Write for SharedCursor {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut data = self.data.borrow_mut();
            let start = self.pos as usize;
            if start > data.len() {
                data.resize(start, 0);
            }
            let overlap = buf.len().min(data.len().saturating_sub(start));
            data[start..start + overlap].copy_from_slice(&buf[..overlap]);
            data.extend_from_slice(&buf[overlap..]);
            self.pos += buf.len() as u64;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for SharedCursor {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            let len = self.data.borrow().len() as i64;
            let target = match pos {
                SeekFrom::Start(n) => n as i64,
                SeekFrom::End(n) => len + n,
                SeekFrom::Current(n) => self.pos as i64 + n,
            };
            if target < 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "seek before start",
                ));
            }
            self.pos = target as u64;
            Ok(self.pos)
        }
    }

    impl StorageStream for SharedCursor {
        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.data.borrow_mut().truncate(len as usize);
            Ok(())
        }
    }
}

use shared::{SharedBuffer, SharedCursor};
use std::cell::RefCell;
use std::rc::Rc;

/// In-memory storage, mainly for tests and transient archives.
pub struct MemoryStorage {
    current: SharedBuffer,
    temp: Option<SharedBuffer>,
}

impl MemoryStorage {
    /// Storage over existing archive bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            current: Rc::new(RefCell::new(bytes)),
            temp: None,
        }
    }

    /// A copy of the current archive bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.current.borrow().clone()
    }
}

impl UpdateStorage for MemoryStorage {
    fn open_read(&mut self) -> Result<StorageHandle> {
        Ok(StorageHandle::new(Box::new(SharedCursor::new(Rc::clone(
            &self.current,
        )))))
    }

    fn make_temporary(&mut self) -> Result<StorageHandle> {
        let buffer: SharedBuffer = Rc::new(RefCell::new(Vec::new()));
        self.temp = Some(Rc::clone(&buffer));
        Ok(StorageHandle::new(Box::new(SharedCursor::new(buffer))))
    }

    fn commit_temporary(&mut self, temp: StorageHandle) -> Result<()> {
        drop(temp);
        self.current = self
            .temp
            .take()
            .ok_or(Error::InvalidOperation("no temporary rewrite to commit"))?;
        Ok(())
    }

    fn open_for_direct_update(&mut self) -> Result<StorageHandle> {
        Ok(StorageHandle::new(Box::new(SharedCursor::new(Rc::clone(
            &self.current,
        )))))
    }
}

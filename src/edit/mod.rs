//! Batched archive editing: stage additions and deletions, then commit
//! them with a safe rewrite or an in-place append.

mod editor;
mod operation;
mod storage;

pub use editor::ZipEditor;
pub use operation::{CommitResult, StaticDataSource, UpdateStrategy};
pub use storage::{FileStorage, MemoryStorage, StorageHandle, StorageStream, UpdateStorage};

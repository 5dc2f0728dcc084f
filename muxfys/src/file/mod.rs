//! Per-open-file handles.
//!
//! Every successful `open`/`create` registers one of these behind a file
//! handle id. [`CachedFile`] serves reads from a local sparse file,
//! fetching missing ranges on demand; [`RemoteFile`] streams straight from
//! the remote when a target is configured without caching.

mod cached;
mod remote;

pub(crate) use cached::CachedFile;
pub(crate) use remote::RemoteFile;

use crate::fs::FsError;

/// The read/write contract the filesystem façade programs against.
pub(crate) trait FileHandle: Send {
    /// Mount-relative path this handle was opened on.
    fn name(&self) -> &str;

    /// Whether this handle accepts writes at all.
    fn writeable(&self) -> bool;

    fn read(&mut self, offset: i64, size: u32) -> Result<Vec<u8>, FsError>;

    fn write(&mut self, offset: i64, data: &[u8]) -> Result<u32, FsError>;

    fn flush(&mut self) -> Result<(), FsError>;

    fn release(&mut self);
}

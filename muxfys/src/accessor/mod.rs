//! The capability a remote target must provide.
//!
//! Everything above this layer talks to object stores exclusively through
//! [`RemoteAccessor`] trait objects, so the S3 client can be swapped for a
//! plain directory ([`LocalAccessor`]) or an arbitrary test double without
//! any other code noticing.

mod local;
mod s3;

pub use local::LocalAccessor;
pub use s3::S3Accessor;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// One entry returned by a non-recursive listing. Directory-like keys have
/// a name ending in `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Full key of the entry, including the listed prefix.
    pub name: String,
    pub size: i64,
    pub mtime: SystemTime,
}

/// Errors from accessor operations. Not-found classification lives on the
/// error because only the backend that produced it knows its 404 shape.
#[derive(Debug, Error)]
pub enum AccessorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Store(String),
}

impl AccessorError {
    /// True when the error means the object or prefix does not exist, as
    /// opposed to a transient or permission failure.
    pub fn is_not_exists(&self) -> bool {
        match self {
            AccessorError::NotFound(_) => true,
            AccessorError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            AccessorError::Store(_) => false,
        }
    }
}

/// An open object body positioned at some offset. Sequential reads come
/// from the current position; [`ObjectStream::seek_to`] repositions, which
/// a remote implementation may satisfy by re-opening with a range request.
pub trait ObjectStream: Read + Send {
    fn seek_to(&mut self, offset: u64) -> Result<(), AccessorError>;
}

impl std::fmt::Debug for dyn ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream").finish_non_exhaustive()
    }
}

/// The operations a remote target must support. `dir` and `path` arguments
/// are target-relative keys as produced by [`RemoteAccessor::remote_path`].
pub trait RemoteAccessor: Send + Sync {
    /// Non-recursive listing of `dir` (a prefix ending in `/`, or empty for
    /// the root). Directory names in the result end in `/`.
    fn list_entries(&self, dir: &str) -> Result<Vec<RemoteEntry>, AccessorError>;

    /// Open the object body for streaming reads from offset 0.
    fn open_file(&self, path: &str) -> Result<Box<dyn ObjectStream>, AccessorError>;

    /// Download the whole object body to `dest`.
    fn download_file(&self, source: &str, dest: &Path) -> Result<(), AccessorError>;

    /// Upload the file at `source` to the object key `dest`.
    fn upload_file(&self, source: &Path, dest: &str, content_type: &str)
        -> Result<(), AccessorError>;

    /// Server-side copy between two object keys where the backend supports
    /// it.
    fn copy_file(&self, source: &str, dest: &str) -> Result<(), AccessorError>;

    /// Delete an object key; deleting a key that does not exist succeeds.
    fn delete_file(&self, path: &str) -> Result<(), AccessorError>;

    /// The configured target, for log context.
    fn target(&self) -> String;

    /// Compose the target-relative key for a mount-relative path.
    fn remote_path(&self, rel_path: &str) -> String;

    /// Where a remote key is cached below `base_dir`.
    fn local_path(&self, base_dir: &Path, remote_path: &str) -> PathBuf;
}

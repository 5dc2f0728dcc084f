//! Cross-process file locking for shared cache directories.
//!
//! Cache directories may be shared between independent processes mounting
//! the same bucket. Before touching a cache file (range downloads, writes,
//! truncates, renames) a process takes an advisory OS lock on a sibling
//! lock file named `.muxfys_lock.<base>`, so two processes never populate
//! the same sparse range at once and readers never observe a range mid
//! fill. An in-process mutex would not survive this sharing, hence the
//! `flock` on a real file.

use std::fs::{DirBuilder, File, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

const LOCK_PREFIX: &str = ".muxfys_lock.";
pub(crate) const DIR_MODE: u32 = 0o700;
pub(crate) const FILE_MODE: u32 = 0o600;

/// Create `path` and any missing ancestors with the cache directory mode.
pub(crate) fn create_private_dirs(path: &Path) -> io::Result<()> {
    if path.as_os_str().is_empty() || path.is_dir() {
        return Ok(());
    }
    DirBuilder::new().recursive(true).mode(DIR_MODE).create(path)
}

/// An advisory lock on the sibling lock file of a cache path. Lock with
/// [`FileMutex::lock`]; the returned guard unlocks on drop.
#[derive(Debug)]
pub struct FileMutex {
    file: File,
    lock_path: PathBuf,
}

impl FileMutex {
    /// Prepare the lock file for `local_path`, creating its directory first
    /// if necessary.
    pub fn new(local_path: &Path) -> io::Result<Self> {
        let parent = local_path.parent().unwrap_or_else(|| Path::new("/"));
        create_private_dirs(parent)?;

        let base = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad cache path"))?;
        let lock_path = parent.join(format!("{LOCK_PREFIX}{base}"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .mode(FILE_MODE)
            .open(&lock_path)?;
        Ok(Self { file, lock_path })
    }

    /// Block until the exclusive lock is held.
    pub fn lock(&self) -> io::Result<FileMutexGuard<'_>> {
        flock(&self.file, libc::LOCK_EX)?;
        Ok(FileMutexGuard { mutex: self })
    }

    /// Path of the lock file itself.
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

/// Holds the exclusive lock; unlocks on drop.
#[derive(Debug)]
pub struct FileMutexGuard<'a> {
    mutex: &'a FileMutex,
}

impl Drop for FileMutexGuard<'_> {
    fn drop(&mut self) {
        let _ = flock(&self.mutex.file, libc::LOCK_UN);
    }
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

//! Handle over a locally cached sparse copy of a remote object.

use super::FileHandle;
use crate::fs::{unix_now, Attr, FsError};
use crate::interval::Interval;
use crate::lock::{FileMutex, FILE_MODE};
use crate::remote::Remote;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Serves reads and writes against the local sparse cache file. Missing
/// byte ranges are fetched from the remote on demand before a read is
/// satisfied; writes patch the sparse file in place and are uploaded only
/// at unmount.
pub(crate) struct CachedFile {
    remote: Arc<Remote>,
    name: String,
    remote_path: String,
    local_path: PathBuf,
    attr: Arc<Mutex<Attr>>,
    file: File,
    mutex: FileMutex,
    writeable: bool,
}

impl CachedFile {
    pub(crate) fn new(
        remote: Arc<Remote>,
        name: &str,
        remote_path: String,
        local_path: PathBuf,
        attr: Arc<Mutex<Attr>>,
        writeable: bool,
    ) -> Result<Self, FsError> {
        let mutex = FileMutex::new(&local_path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(FILE_MODE)
            .open(&local_path)?;
        // the local length must agree with the attr: an open that zeroed
        // the size must not leave stale sparse bytes to be uploaded
        file.set_len(attr.lock().unwrap().size)?;
        Ok(Self {
            remote,
            name: name.to_string(),
            remote_path,
            local_path,
            attr,
            file,
            mutex,
            writeable,
        })
    }
}

impl FileHandle for CachedFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn writeable(&self) -> bool {
        self.writeable
    }

    fn read(&mut self, offset: i64, size: u32) -> Result<Vec<u8>, FsError> {
        let file_size = self.attr.lock().unwrap().size as i64;
        if offset >= file_size {
            return Ok(Vec::new());
        }
        let end = (offset + size as i64).min(file_size);
        let probe = Interval::new(offset, end);

        let _guard = self.mutex.lock()?;
        for iv in self.remote.tracker.uncached(&self.local_path, probe) {
            self.remote
                .download_range(&self.remote_path, &self.local_path, iv)?;
        }

        let mut buf = vec![0u8; probe.length() as usize];
        self.file.read_exact_at(&mut buf, offset as u64)?;
        Ok(buf)
    }

    fn write(&mut self, offset: i64, data: &[u8]) -> Result<u32, FsError> {
        if !self.writeable {
            return Err(FsError::Permission);
        }
        let _guard = self.mutex.lock()?;
        self.file.write_all_at(data, offset as u64)?;

        {
            let mut attr = self.attr.lock().unwrap();
            attr.size = attr.size.max(offset as u64 + data.len() as u64);
            attr.mtime = unix_now();
        }
        self.remote.tracker.cached(
            &self.local_path,
            Interval::new(offset, offset + data.len() as i64),
        );
        Ok(data.len() as u32)
    }

    fn flush(&mut self) -> Result<(), FsError> {
        self.file.sync_all()?;
        Ok(())
    }

    fn release(&mut self) {}
}

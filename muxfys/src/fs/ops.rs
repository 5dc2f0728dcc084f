//! Path-based operation semantics behind every kernel callback.
//!
//! The kernel adapter in [`crate::fuse`] translates inodes to paths and
//! replies; everything it decides is decided here. Paths are
//! mount-relative, with `""` naming the root.

use super::{unix_now, Attr, DirEntry, EntryKind, FsCore, FsError, Namespace};
use crate::file::{CachedFile, FileHandle, RemoteFile};
use crate::interval::Interval;
use crate::lock::{create_private_dirs, FileMutex, DIR_MODE, FILE_MODE};
use crate::remote::Remote;
use std::fs::{DirBuilder, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

/// Mount-relative parent of a path (`""` for top-level entries).
pub(crate) fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Final component of a mount-relative path.
pub(crate) fn base_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Join a directory path and an entry name.
pub(crate) fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Whether the open flags imply any kind of mutation.
pub(crate) fn wants_write(flags: i32) -> bool {
    (flags & libc::O_ACCMODE) != libc::O_RDONLY
        || (flags & (libc::O_APPEND | libc::O_CREAT | libc::O_TRUNC)) != 0
}

impl FsCore {
    fn dir_attr(&self) -> Attr {
        Attr::directory(self.mount_time)
    }

    /// Look up a known file, optionally requiring that its remote accepts
    /// writes.
    fn file_details(
        &self,
        path: &str,
        should_be_writable: bool,
    ) -> Result<(Arc<Mutex<Attr>>, Arc<Remote>), FsError> {
        let ns = self.namespace.read().unwrap();
        let attr = ns.files.get(path).ok_or(FsError::NotFound)?;
        let remote = ns.file_to_remote.get(path).ok_or(FsError::NotFound)?;
        if should_be_writable && !remote.write {
            return Err(FsError::Permission);
        }
        Ok((Arc::clone(attr), Arc::clone(remote)))
    }

    pub(crate) fn dir_exists(&self, path: &str) -> bool {
        self.namespace.read().unwrap().dirs.contains_key(path)
    }

    /// Attributes of a path, listing its parent directory on first touch
    /// so that later lookups of siblings are free.
    pub(crate) fn get_attr(&self, path: &str) -> Result<Attr, FsError> {
        {
            let ns = self.namespace.read().unwrap();
            if ns.dirs.contains_key(path) {
                return Ok(self.dir_attr());
            }
            if let Some(attr) = ns.files.get(path) {
                return Ok(attr.lock().unwrap().clone());
            }
        }

        let mut ns = self.namespace.write().unwrap();
        let parent = parent_of(path).to_string();
        if !ns.dir_contents.contains_key(&parent) {
            if let Some(remotes) = ns.dirs.get(&parent).cloned() {
                for remote in remotes {
                    let _ = self.open_dir_remote(&mut ns, &remote, &parent);
                }
            }
        }

        if ns.dirs.contains_key(path) {
            return Ok(self.dir_attr());
        }
        if let Some(attr) = ns.files.get(path) {
            return Ok(attr.lock().unwrap().clone());
        }
        Err(FsError::NotFound)
    }

    /// The entries of a directory, listing all contributing remotes on
    /// first access and serving the cached union afterwards.
    pub(crate) fn open_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        {
            let ns = self.namespace.read().unwrap();
            if !ns.dirs.contains_key(path) {
                return Err(FsError::NotFound);
            }
            if let Some(entries) = ns.dir_contents.get(path) {
                return Ok(entries.clone());
            }
        }

        let mut ns = self.namespace.write().unwrap();
        let remotes = ns.dirs.get(path).cloned().ok_or(FsError::NotFound)?;
        if let Some(entries) = ns.dir_contents.get(path) {
            return Ok(entries.clone());
        }
        for remote in &remotes {
            let _ = self.open_dir_remote(&mut ns, remote, path);
        }
        ns.dir_contents.get(path).cloned().ok_or(FsError::NotFound)
    }

    /// List one remote's view of a directory into the namespace. Entries
    /// already contributed by an earlier remote win; this remote is only
    /// recorded as contributing to sub-directories it actually has.
    fn open_dir_remote(
        &self,
        ns: &mut Namespace,
        remote: &Arc<Remote>,
        name: &str,
    ) -> Result<(), FsError> {
        let mut remote_prefix = remote.get_remote_path(name);
        if !remote_prefix.is_empty() {
            remote_prefix.push('/');
        }

        let objects = match remote.find_objects(&remote_prefix) {
            Ok(objects) if !objects.is_empty() => objects,
            listed => {
                if name.is_empty() {
                    // the root is allowed to be an empty, non-existent or
                    // unlistable prefix
                    ns.dir_contents.entry(String::new()).or_default();
                    return Ok(());
                }
                return match listed {
                    Ok(_) => Err(FsError::NotFound),
                    Err(err) => Err(err.into()),
                };
            }
        };

        let mut found_any = false;
        for object in objects {
            if object.name == remote_prefix
                || object.name.trim_end_matches('/') == remote_prefix.trim_end_matches('/')
            {
                continue;
            }
            let Some(entry_name) = object.name.strip_prefix(&remote_prefix) else {
                continue;
            };
            if entry_name.is_empty() {
                continue;
            }
            found_any = true;

            if let Some(dir_name) = entry_name.strip_suffix('/') {
                let child = join_path(name, dir_name);
                let contributors = ns.dirs.entry(child).or_default();
                if !contributors.iter().any(|r| Arc::ptr_eq(r, remote)) {
                    contributors.push(Arc::clone(remote));
                }
                push_entry(ns, name, dir_name, EntryKind::Directory);
            } else {
                let child = join_path(name, entry_name);
                if ns.files.contains_key(&child) || ns.dirs.contains_key(&child) {
                    continue; // an earlier remote already owns this name
                }
                let mtime = object
                    .mtime
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let attr = Attr::regular(object.size.max(0) as u64, mtime);
                ns.files.insert(child.clone(), Arc::new(Mutex::new(attr)));
                ns.file_to_remote.insert(child, Arc::clone(remote));
                push_entry(ns, name, entry_name, EntryKind::Regular);
            }
        }

        if !found_any {
            return Err(FsError::NotFound);
        }
        if !ns.dirs.contains_key(name) {
            ns.dirs
                .insert(name.to_string(), vec![Arc::clone(remote)]);
        }
        ns.dir_contents.entry(name.to_string()).or_default();
        Ok(())
    }

    /// Open an existing file for reading or writing.
    pub(crate) fn open(&self, path: &str, flags: i32) -> Result<u64, FsError> {
        let (attr, remote) = self.file_details(path, wants_write(flags))?;
        let handle: Box<dyn FileHandle> = if remote.cache_data {
            self.open_cached(&remote, path, flags, &attr)?
        } else {
            Box::new(RemoteFile::new(
                Arc::clone(&remote),
                path,
                remote.get_remote_path(path),
                attr,
            ))
        };
        Ok(self.register_handle(handle))
    }

    /// Prepare the local cache copy for an open, then hand out a handle.
    fn open_cached(
        &self,
        remote: &Arc<Remote>,
        path: &str,
        flags: i32,
        attr: &Arc<Mutex<Attr>>,
    ) -> Result<Box<dyn FileHandle>, FsError> {
        let remote_path = remote.get_remote_path(path);
        let local_path = remote.get_local_path(&remote_path);
        let fmutex = FileMutex::new(&local_path)?;
        let guard = fmutex.lock()?;

        let mut create = false;
        match std::fs::metadata(&local_path) {
            Err(_) => {
                let _ = std::fs::remove_file(&local_path);
                create = true;
            }
            Ok(meta) => {
                let remote_size = attr.lock().unwrap().size;
                if meta.len() != remote_size {
                    remote.logger.warn(
                        "Cached size differs",
                        &[
                            ("path", path.to_string()),
                            ("local_size", meta.len().to_string()),
                            ("remote_size", remote_size.to_string()),
                        ],
                    );
                    std::fs::remove_file(&local_path)?;
                    create = true;
                }
            }
        }

        if create {
            remote.tracker.cache_delete(&local_path);
            if !remote.cache_is_tmp || (flags & libc::O_APPEND) != 0 {
                // the whole body must be on disk: a user-chosen cache dir
                // can be shared with other mounts, and appending to a
                // sparse file would upload holes where the original
                // content was
                remote.download_file(&remote_path, &local_path)?;
                let meta = match std::fs::metadata(&local_path) {
                    Ok(meta) => meta,
                    Err(err) => {
                        remote.logger.error(
                            "Downloaded file could not be accessed",
                            &[
                                ("path", local_path.display().to_string()),
                                ("err", err.to_string()),
                            ],
                        );
                        let _ = std::fs::remove_file(&local_path);
                        return Err(err.into());
                    }
                };
                let remote_size = attr.lock().unwrap().size;
                if meta.len() != remote_size {
                    remote.logger.error(
                        "Downloaded size is wrong",
                        &[
                            ("path", remote_path.clone()),
                            ("local_size", meta.len().to_string()),
                            ("remote_size", remote_size.to_string()),
                        ],
                    );
                    let _ = std::fs::remove_file(&local_path);
                    return Err(FsError::Io);
                }
            } else {
                // first open of this object: a sparse placeholder that
                // reads will populate range by range
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(FILE_MODE)
                    .open(&local_path)?;
                file.set_len(attr.lock().unwrap().size)?;
            }
        } else if remote.cache_is_tmp && (flags & libc::O_APPEND) != 0 {
            // everything must be present before an append so the upload
            // has the full original content under the new bytes
            let size = attr.lock().unwrap().size as i64;
            for iv in remote.tracker.uncached(&local_path, Interval::new(0, size)) {
                remote.download_range(&remote_path, &local_path, iv)?;
            }
        }

        if wants_write(flags) {
            if (flags & libc::O_APPEND) == 0 {
                remote.tracker.cache_delete(&local_path);
                attr.lock().unwrap().size = 0;
            }
            drop(guard);
            let (handle, _) = self.create_handle(path, flags)?;
            return Ok(handle);
        }

        drop(guard);
        Ok(Box::new(CachedFile::new(
            Arc::clone(remote),
            path,
            remote_path,
            local_path,
            Arc::clone(attr),
            false,
        )?))
    }

    /// Create a new file (or re-open an existing one as created), marking
    /// it for upload at unmount.
    pub(crate) fn create(&self, path: &str, flags: i32) -> Result<(u64, Attr), FsError> {
        let (handle, attr) = self.create_handle(path, flags)?;
        let snapshot = attr.lock().unwrap().clone();
        Ok((self.register_handle(handle), snapshot))
    }

    fn create_handle(
        &self,
        path: &str,
        _flags: i32,
    ) -> Result<(Box<dyn FileHandle>, Arc<Mutex<Attr>>), FsError> {
        let remote = self.write_remote.clone().ok_or(FsError::Permission)?;
        if !remote.cache_data {
            // without a cache there is nowhere to stage writes
            return Err(FsError::NotSupported);
        }
        let remote_path = remote.get_remote_path(path);
        let local_path = remote.get_local_path(&remote_path);
        let fmutex = FileMutex::new(&local_path)?;
        let _guard = fmutex.lock()?;

        let attr = {
            let mut ns = self.namespace.write().unwrap();
            let now = unix_now();
            let attr = match ns.files.get(path) {
                Some(attr) => {
                    {
                        let mut a = attr.lock().unwrap();
                        a.mtime = now;
                        a.atime = now;
                    }
                    Arc::clone(attr)
                }
                None => {
                    self.add_entry_to_its_dir(&mut ns, path, EntryKind::Regular);
                    let attr = Arc::new(Mutex::new(Attr::regular(0, now)));
                    ns.files.insert(path.to_string(), Arc::clone(&attr));
                    ns.file_to_remote
                        .insert(path.to_string(), Arc::clone(&remote));
                    attr
                }
            };
            ns.created_files.insert(path.to_string());
            attr
        };

        let handle = CachedFile::new(
            remote,
            path,
            remote_path,
            local_path,
            Arc::clone(&attr),
            true,
        )?;
        Ok((Box::new(handle), attr))
    }

    /// Truncate the local cached copy; the result is uploaded at unmount.
    pub(crate) fn truncate(&self, path: &str, offset: u64) -> Result<(), FsError> {
        let (attr, remote) = self.file_details(path, true)?;
        if offset >= attr.lock().unwrap().size {
            return Ok(());
        }
        if !remote.cache_data {
            return Err(FsError::NotSupported);
        }

        let remote_path = remote.get_remote_path(path);
        let local_path = remote.get_local_path(&remote_path);
        let fmutex = FileMutex::new(&local_path)?;
        let _guard = fmutex.lock()?;

        if local_path.is_file() {
            let file = OpenOptions::new().write(true).open(&local_path)?;
            file.set_len(offset)?;
            remote.tracker.cache_truncate(&local_path, offset as i64);
        } else {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .mode(FILE_MODE)
                .open(&local_path)?;
            if offset == 0 {
                drop(file);
                remote.tracker.cache_truncate(&local_path, 0);
            } else {
                drop(file);
                remote.tracker.cache_delete(&local_path);
                if let Err(err) =
                    remote.download_range(&remote_path, &local_path, Interval::new(0, offset as i64))
                {
                    let _ = std::fs::remove_file(&local_path);
                    return Err(err.into());
                }
            }
        }

        {
            let mut a = attr.lock().unwrap();
            a.size = offset;
            a.mtime = unix_now();
        }
        self.namespace
            .write()
            .unwrap()
            .created_files
            .insert(path.to_string());
        Ok(())
    }

    /// Delete a file remotely and scrub it from the namespace. The remote
    /// delete is best-effort: a remount reveals the true state, and the
    /// namespace must not keep advertising a file we removed.
    pub(crate) fn unlink(&self, path: &str) -> Result<(), FsError> {
        let (_, remote) = self.file_details(path, true)?;
        let remote_path = remote.get_remote_path(path);
        if remote.cache_data {
            let local_path = remote.get_local_path(&remote_path);
            let _ = std::fs::remove_file(&local_path);
            remote.tracker.cache_delete(&local_path);
        }
        let _ = remote.delete_file(&remote_path);

        let mut ns = self.namespace.write().unwrap();
        ns.files.remove(path);
        ns.file_to_remote.remove(path);
        ns.created_files.remove(path);
        rm_entry_from_its_dir(&mut ns, path);
        Ok(())
    }

    /// Register a directory. Nothing is created remotely; the remote has
    /// no real directories.
    pub(crate) fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let write_remote = self.write_remote.clone().ok_or(FsError::Permission)?;
        let mut ns = self.namespace.write().unwrap();
        if ns.dirs.contains_key(path) {
            return Ok(());
        }
        if !ns.dirs.contains_key(parent_of(path)) {
            return Err(FsError::NotFound);
        }

        if write_remote.cache_data {
            let local_path = write_remote.get_local_path(&write_remote.get_remote_path(path));
            if let Some(parent) = local_path.parent() {
                create_private_dirs(parent)?;
            }
            DirBuilder::new().mode(DIR_MODE).create(&local_path)?;
        }

        ns.dirs
            .entry(path.to_string())
            .or_default()
            .push(Arc::clone(&write_remote));
        ns.dir_contents.entry(path.to_string()).or_default();
        if write_remote.cache_data {
            ns.created_dirs.insert(path.to_string());
        }
        self.add_entry_to_its_dir(&mut ns, path, EntryKind::Directory);
        Ok(())
    }

    /// Remove an empty directory.
    pub(crate) fn rmdir(&self, path: &str) -> Result<(), FsError> {
        let write_remote = self.write_remote.clone().ok_or(FsError::Permission)?;
        let mut ns = self.namespace.write().unwrap();
        if !ns.dirs.contains_key(path) {
            return Err(FsError::NotFound);
        }
        if ns.dir_contents.get(path).is_some_and(|c| !c.is_empty()) {
            return Err(FsError::NotSupported);
        }

        if write_remote.cache_data {
            let local_path = write_remote.get_local_path(&write_remote.get_remote_path(path));
            if local_path.is_dir() {
                std::fs::remove_dir(&local_path)?;
            }
        }

        ns.dirs.remove(path);
        ns.created_dirs.remove(path);
        ns.dir_contents.remove(path);
        rm_entry_from_its_dir(&mut ns, path);
        Ok(())
    }

    /// Rename through the write remote. Directories must have been
    /// created during this mount; files are copied remotely, the cache is
    /// moved, and the old key deleted.
    pub(crate) fn rename(&self, old_path: &str, new_path: &str) -> Result<(), FsError> {
        let write_remote = self.write_remote.clone().ok_or(FsError::Permission)?;

        let is_dir = {
            let ns = self.namespace.read().unwrap();
            if ns.dirs.contains_key(old_path) {
                true
            } else if ns.file_to_remote.contains_key(old_path) {
                false
            } else {
                return Err(FsError::NotFound);
            }
        };

        if is_dir {
            let mut ns = self.namespace.write().unwrap();
            if !ns.dirs.contains_key(old_path) {
                return Err(FsError::NotFound);
            }
            if !ns.created_dirs.contains(old_path) {
                return Err(FsError::NotSupported);
            }
            if !ns.dirs.contains_key(parent_of(new_path)) {
                return Err(FsError::NotFound);
            }
            if !write_remote.cache_data {
                return Err(FsError::NotSupported);
            }

            let local_old = write_remote.get_local_path(&write_remote.get_remote_path(old_path));
            let local_new = write_remote.get_local_path(&write_remote.get_remote_path(new_path));
            if let Some(parent) = local_new.parent() {
                create_private_dirs(parent)?;
            }
            std::fs::rename(&local_old, &local_new)?;

            if let Some(contributors) = ns.dirs.remove(old_path) {
                ns.dirs.insert(new_path.to_string(), contributors);
            }
            if let Some(contents) = ns.dir_contents.remove(old_path) {
                ns.dir_contents.insert(new_path.to_string(), contents);
            }
            ns.created_dirs.remove(old_path);
            ns.created_dirs.insert(new_path.to_string());
            rm_entry_from_its_dir(&mut ns, old_path);
            self.add_entry_to_its_dir(&mut ns, new_path, EntryKind::Directory);
            return Ok(());
        }

        // the remote copy and delete are slow, retried calls; neither may
        // run under the namespace lock, and the file locks must come
        // before it, never after
        let remote_old = write_remote.get_remote_path(old_path);
        let remote_new = write_remote.get_remote_path(new_path);
        // remote copy first; abort with no side effects if it fails
        write_remote.copy_file(&remote_old, &remote_new)?;

        if write_remote.cache_data {
            let local_old = write_remote.get_local_path(&remote_old);
            let local_new = write_remote.get_local_path(&remote_new);
            let mutex_old = FileMutex::new(&local_old)?;
            let _guard_old = mutex_old.lock()?;
            let mutex_new = FileMutex::new(&local_new)?;
            let _guard_new = mutex_new.lock()?;
            let _ = std::fs::rename(&local_old, &local_new);
            write_remote.tracker.cache_rename(&local_old, &local_new);
        }

        {
            let mut ns = self.namespace.write().unwrap();
            if let Some(attr) = ns.files.remove(old_path) {
                ns.files.insert(new_path.to_string(), attr);
            }
            if let Some(owner) = ns.file_to_remote.remove(old_path) {
                ns.file_to_remote.insert(new_path.to_string(), owner);
            }
            if ns.created_files.remove(old_path) {
                ns.created_files.insert(new_path.to_string());
            }
            self.add_entry_to_its_dir(&mut ns, new_path, EntryKind::Regular);
            rm_entry_from_its_dir(&mut ns, old_path);
        }

        let _ = write_remote.delete_file(&remote_old);
        Ok(())
    }

    /// Create a mount-local symlink in the cache tree. Symlinks are
    /// ephemeral: they are never uploaded.
    pub(crate) fn symlink(&self, source: &str, dest: &str) -> Result<(), FsError> {
        let Some(write_remote) = self.write_remote.clone() else {
            return Err(FsError::NotSupported);
        };
        if !write_remote.cache_data {
            return Err(FsError::NotSupported);
        }

        let local_dest = write_remote.get_local_path(&write_remote.get_remote_path(dest));
        let fmutex = FileMutex::new(&local_dest)?;
        let _guard = fmutex.lock()?;
        if let Err(err) = std::os::unix::fs::symlink(source, &local_dest) {
            write_remote.logger.error(
                "Could not create symlink",
                &[
                    ("source", source.to_string()),
                    ("dest", local_dest.display().to_string()),
                    ("err", err.to_string()),
                ],
            );
            return Err(err.into());
        }

        let mut ns = self.namespace.write().unwrap();
        self.add_entry_to_its_dir(&mut ns, dest, EntryKind::Symlink);
        ns.files.insert(
            dest.to_string(),
            Arc::new(Mutex::new(Attr::symlink(unix_now()))),
        );
        ns.file_to_remote.insert(dest.to_string(), write_remote);
        Ok(())
    }

    pub(crate) fn read_link(&self, path: &str) -> Result<String, FsError> {
        let (_, remote) = self.file_details(path, true)?;
        let local = remote.get_local_path(&remote.get_remote_path(path));
        let target = std::fs::read_link(local)?;
        Ok(target.to_string_lossy().into_owned())
    }

    /// chmod/chown/xattr: silently succeed for anything known and
    /// writeable; there is no ownership or mode to change.
    pub(crate) fn silent_mutation(&self, path: &str) -> Result<(), FsError> {
        match self.file_details(path, true) {
            Ok(_) => Ok(()),
            Err(FsError::NotFound) if self.dir_exists(path) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Update times on a cached local copy, if there is one.
    pub(crate) fn utimens(&self, path: &str, atime: u64, mtime: u64) -> Result<(), FsError> {
        let (attr, remote) = match self.file_details(path, true) {
            Ok(details) => details,
            Err(FsError::NotFound) if self.dir_exists(path) => return Ok(()),
            Err(err) => return Err(err),
        };
        if !remote.cache_data {
            return Ok(());
        }

        let local = remote.get_local_path(&remote.get_remote_path(path));
        if local.is_file() {
            let file = OpenOptions::new().write(true).open(&local)?;
            let times = std::fs::FileTimes::new()
                .set_accessed(UNIX_EPOCH + Duration::from_secs(atime))
                .set_modified(UNIX_EPOCH + Duration::from_secs(mtime));
            file.set_times(times)?;
            let mut a = attr.lock().unwrap();
            a.atime = atime;
            a.mtime = mtime;
        }
        Ok(())
    }

    pub(crate) fn read(&self, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>, FsError> {
        let handle = self.handle(fh)?;
        let mut handle = handle.lock().unwrap();
        handle.read(offset, size)
    }

    pub(crate) fn write(&self, fh: u64, offset: i64, data: &[u8]) -> Result<u32, FsError> {
        let handle = self.handle(fh)?;
        let (written, name) = {
            let mut handle = handle.lock().unwrap();
            let written = handle.write(offset, data)?;
            (written, handle.name().to_string())
        };
        self.namespace
            .write()
            .unwrap()
            .created_files
            .insert(name);
        Ok(written)
    }

    pub(crate) fn flush(&self, fh: u64) -> Result<(), FsError> {
        let handle = self.handle(fh)?;
        let mut handle = handle.lock().unwrap();
        handle.flush()
    }

    pub(crate) fn release(&self, fh: u64) {
        let handle = self.handles.lock().unwrap().remove(&fh);
        if let Some(handle) = handle {
            handle.lock().unwrap().release();
        }
    }

    fn handle(&self, fh: u64) -> Result<Arc<Mutex<Box<dyn FileHandle>>>, FsError> {
        self.handles
            .lock()
            .unwrap()
            .get(&fh)
            .cloned()
            .ok_or(FsError::Io)
    }

    /// Add a directory entry for `path` to its parent, listing the parent
    /// first if it has never been listed.
    fn add_entry_to_its_dir(&self, ns: &mut Namespace, path: &str, kind: EntryKind) {
        let parent = parent_of(path).to_string();
        if !ns.dir_contents.contains_key(&parent) {
            if let Some(remotes) = ns.dirs.get(&parent).cloned() {
                for remote in remotes {
                    let _ = self.open_dir_remote(ns, &remote, &parent);
                }
            }
        }
        push_entry(ns, &parent, base_of(path), kind);
    }
}

fn push_entry(ns: &mut Namespace, dir: &str, name: &str, kind: EntryKind) {
    let entries = ns.dir_contents.entry(dir.to_string()).or_default();
    if !entries.iter().any(|e| e.name == name) {
        entries.push(DirEntry {
            name: name.to_string(),
            kind,
        });
    }
}

fn rm_entry_from_its_dir(ns: &mut Namespace, path: &str) {
    let parent = parent_of(path);
    let base = base_of(path);
    if let Some(entries) = ns.dir_contents.get_mut(parent) {
        entries.retain(|e| e.name != base);
    }
}

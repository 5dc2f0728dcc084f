//! The kernel bridge: a thin `fuser::Filesystem` over [`FsCore`].
//!
//! Everything here is translation: inode to path, [`Attr`] to
//! `fuser::FileAttr`, `FsError` to errno. Decisions live in
//! [`crate::fs::ops`].

mod inode;

use crate::fs::ops::{join_path, parent_of};
use crate::fs::{unix_now, Attr, EntryKind, FsCore};
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use inode::InodeTable;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Attribute/entry cache time handed to the kernel.
const TTL: Duration = Duration::from_secs(1);

/// Cosmetic statfs numbers: a 1 PB volume with a billion inodes, so tools
/// that check free space proceed.
const BLOCK_SIZE: u32 = 4096;
const TOTAL_BLOCKS: u64 = (1 << 50) / BLOCK_SIZE as u64;
const TOTAL_INODES: u64 = 1_000_000_000;
const NAME_LENGTH: u32 = 255;

pub(crate) struct MuxFuse {
    core: Arc<FsCore>,
    inodes: InodeTable,
    uid: u32,
    gid: u32,
}

impl MuxFuse {
    pub(crate) fn new(core: Arc<FsCore>) -> Self {
        Self {
            core,
            inodes: InodeTable::new(),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn file_attr(&self, ino: u64, attr: &Attr) -> FileAttr {
        let (kind, perm, nlink) = match attr.kind {
            EntryKind::Regular => (FileType::RegularFile, 0o600, 1),
            EntryKind::Directory => (FileType::Directory, 0o700, 2),
            EntryKind::Symlink => (FileType::Symlink, 0o600, 1),
        };
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: UNIX_EPOCH + Duration::from_secs(attr.atime),
            mtime: UNIX_EPOCH + Duration::from_secs(attr.mtime),
            ctime: UNIX_EPOCH + Duration::from_secs(attr.ctime),
            crtime: UNIX_EPOCH + Duration::from_secs(attr.ctime),
            kind,
            perm,
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let dir = self.inodes.path_of(parent)?;
        let name = name.to_str()?;
        Some(join_path(&dir, name))
    }
}

impl Filesystem for MuxFuse {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        self.core
            .logger
            .debug("lookup", &[("path", path.clone())]);
        match self.core.get_attr(&path) {
            Ok(attr) => {
                let ino = self.inodes.get_or_insert(&path);
                reply.entry(&TTL, &self.file_attr(ino, &attr), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.get_attr(&path) {
            Ok(attr) => reply.attr(&TTL, &self.file_attr(ino, &attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        if let Some(size) = size {
            if let Err(err) = self.core.truncate(&path, size) {
                reply.error(err.errno());
                return;
            }
        }
        if mode.is_some() || uid.is_some() || gid.is_some() {
            if let Err(err) = self.core.silent_mutation(&path) {
                reply.error(err.errno());
                return;
            }
        }
        if atime.is_some() || mtime.is_some() {
            let resolve = |t: Option<TimeOrNow>| match t {
                Some(TimeOrNow::SpecificTime(st)) => st
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
                Some(TimeOrNow::Now) | None => unix_now(),
            };
            if let Err(err) = self.core.utimens(&path, resolve(atime), resolve(mtime)) {
                reply.error(err.errno());
                return;
            }
        }

        match self.core.get_attr(&path) {
            Ok(attr) => reply.attr(&TTL, &self.file_attr(ino, &attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.read_link(&path) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        if let Err(err) = self.core.mkdir(&path) {
            reply.error(err.errno());
            return;
        }
        match self.core.get_attr(&path) {
            Ok(attr) => {
                let ino = self.inodes.get_or_insert(&path);
                reply.entry(&TTL, &self.file_attr(ino, &attr), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.unlink(&path) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.rmdir(&path) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, link_name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(target) = target.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        if let Err(err) = self.core.symlink(target, &path) {
            reply.error(err.errno());
            return;
        }
        match self.core.get_attr(&path) {
            Ok(attr) => {
                let ino = self.inodes.get_or_insert(&path);
                reply.entry(&TTL, &self.file_attr(ino, &attr), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(old_path), Some(new_path)) = (
            self.child_path(parent, name),
            self.child_path(newparent, newname),
        ) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.rename(&old_path, &new_path) {
            Ok(()) => {
                self.inodes.remove(&new_path);
                self.inodes.rename(&old_path, &new_path);
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.open(&path, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.create(&path, flags) {
            Ok((fh, attr)) => {
                let ino = self.inodes.get_or_insert(&path);
                reply.created(&TTL, &self.file_attr(ino, &attr), 0, fh, 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.core.logger.debug(
            "read",
            &[
                ("fh", fh.to_string()),
                ("offset", offset.to_string()),
                ("size", size.to_string()),
            ],
        );
        match self.core.read(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        self.core.logger.debug(
            "write",
            &[
                ("fh", fh.to_string()),
                ("offset", offset.to_string()),
                ("size", data.len().to_string()),
            ],
        );
        match self.core.write(fh, offset, data) {
            Ok(written) => reply.written(written),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.core.flush(fh) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.core.release(fh);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if self.core.dir_exists(&path) {
            reply.opened(0, 0);
        } else {
            reply.error(libc::ENOENT);
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.core.open_dir(&path) {
            Ok(entries) => entries,
            Err(err) => {
                reply.error(err.errno());
                return;
            }
        };

        let parent_ino = self.inodes.get_or_insert(parent_of(&path));
        let mut listing: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for entry in entries {
            let child = join_path(&path, &entry.name);
            let child_ino = self.inodes.get_or_insert(&child);
            let kind = match entry.kind {
                EntryKind::Directory => FileType::Directory,
                EntryKind::Symlink => FileType::Symlink,
                EntryKind::Regular => FileType::RegularFile,
            };
            listing.push((child_ino, kind, entry.name));
        }

        for (i, (child_ino, kind, name)) in listing.into_iter().enumerate() {
            let next_offset = (i + 1) as i64;
            if next_offset <= offset {
                continue;
            }
            if reply.add(child_ino, next_offset, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        reply.statfs(
            TOTAL_BLOCKS,
            TOTAL_BLOCKS,
            TOTAL_BLOCKS,
            TOTAL_INODES,
            TOTAL_INODES,
            BLOCK_SIZE,
            NAME_LENGTH,
            BLOCK_SIZE,
        );
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.silent_mutation(&path) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn removexattr(&mut self, _req: &Request, ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.silent_mutation(&path) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn access(&mut self, _req: &Request, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        // access checks happen in open
        reply.ok();
    }
}

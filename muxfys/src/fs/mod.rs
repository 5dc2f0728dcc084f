//! The filey system itself: namespace state, mount lifecycle, deferred
//! uploads and signal handling.
//!
//! [`MuxFys`] is the public handle (`new` → `mount` → `unmount`). The
//! namespace and per-callback semantics live on [`FsCore`] in [`ops`],
//! shared between the handle and the kernel adapter in [`crate::fuse`].

pub(crate) mod ops;
#[cfg(test)]
mod tests;

use crate::accessor::RemoteAccessor;
use crate::config::{self, Config, ConfigError};
use crate::file::FileHandle;
use crate::lock::{create_private_dirs, DIR_MODE};
use crate::log::{LogStore, Logger};
use crate::remote::{Remote, RemoteOptions};
use std::collections::{HashMap, HashSet};
use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, Once, OnceLock, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub(crate) const DIR_SIZE: u64 = 4096;
pub(crate) const SYMLINK_SIZE: u64 = 7;

/// Seconds since the epoch, for presentational attributes.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// What kind of namespace entry a path is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Regular,
    Directory,
    Symlink,
}

/// Presentational attributes of a namespace entry. Modes are fixed per
/// kind and only the mounting user is ever exposed, so neither is stored.
#[derive(Debug, Clone)]
pub(crate) struct Attr {
    pub size: u64,
    pub mtime: u64,
    pub atime: u64,
    pub ctime: u64,
    pub kind: EntryKind,
}

impl Attr {
    pub(crate) fn regular(size: u64, now: u64) -> Self {
        Self {
            size,
            mtime: now,
            atime: now,
            ctime: now,
            kind: EntryKind::Regular,
        }
    }

    pub(crate) fn directory(now: u64) -> Self {
        Self {
            size: DIR_SIZE,
            mtime: now,
            atime: now,
            ctime: now,
            kind: EntryKind::Directory,
        }
    }

    pub(crate) fn symlink(now: u64) -> Self {
        Self {
            size: SYMLINK_SIZE,
            mtime: now,
            atime: now,
            ctime: now,
            kind: EntryKind::Symlink,
        }
    }
}

/// One synthesized directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Kernel-facing operation failures; the adapter maps these to errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FsError {
    NotFound,
    Permission,
    NotSupported,
    Io,
}

impl FsError {
    pub(crate) fn errno(self) -> libc::c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::Permission => libc::EPERM,
            FsError::NotSupported => libc::ENOSYS,
            FsError::Io => libc::EIO,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::PermissionDenied => FsError::Permission,
            _ => FsError::Io,
        }
    }
}

impl From<crate::remote::RemoteError> for FsError {
    fn from(err: crate::remote::RemoteError) -> Self {
        if err.is_not_found() {
            FsError::NotFound
        } else {
            FsError::Io
        }
    }
}

/// Errors from the public lifecycle API.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("no targets provided")]
    NoTargets,

    #[error("you can't have more than one writeable target")]
    MultipleWriteTargets,

    #[error("Can't mount more that once at a time")]
    AlreadyMounted,

    #[error("Mount directory {0} was not empty")]
    MountNotEmpty(String),

    #[error("bad target: {0}")]
    BadTarget(String),

    #[error("failed to upload {0} files")]
    UploadFailed(usize),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Combined(String),
}

/// The namespace maps, guarded as a single unit.
#[derive(Default)]
pub(crate) struct Namespace {
    /// Directory path → remotes contributing to it.
    pub dirs: HashMap<String, Vec<Arc<Remote>>>,
    /// Directory path → synthesized entries, once listed.
    pub dir_contents: HashMap<String, Vec<DirEntry>>,
    /// File or symlink path → attributes, shared with open handles.
    pub files: HashMap<String, Arc<Mutex<Attr>>>,
    /// File path → the remote that owns it.
    pub file_to_remote: HashMap<String, Arc<Remote>>,
    /// Paths mutated during this mount, eligible for upload.
    pub created_files: HashSet<String>,
    /// Directories created during this mount, eligible for rename.
    pub created_dirs: HashSet<String>,
}

impl Namespace {
    fn wipe(&mut self) {
        *self = Self::default();
    }
}

/// State shared between the public handle and the kernel adapter.
pub(crate) struct FsCore {
    pub(crate) mount_point: PathBuf,
    pub(crate) remotes: Vec<Arc<Remote>>,
    pub(crate) write_remote: Option<Arc<Remote>>,
    pub(crate) namespace: RwLock<Namespace>,
    pub(crate) handles: Mutex<HashMap<u64, Arc<Mutex<Box<dyn FileHandle>>>>>,
    next_fh: AtomicU64,
    pub(crate) mount_time: u64,
    pub(crate) logger: Logger,
}

impl FsCore {
    /// Establish that the root is a directory served by every remote; the
    /// first access to its contents does the remote listing.
    pub(crate) fn seed_root(&self) {
        let mut ns = self.namespace.write().unwrap();
        ns.dirs.insert(String::new(), self.remotes.clone());
    }

    pub(crate) fn register_handle(&self, handle: Box<dyn FileHandle>) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.handles
            .lock()
            .unwrap()
            .insert(fh, Arc::new(Mutex::new(handle)));
        fh
    }
}

enum SignalMsg {
    Death,
    Ignore,
}

fn death_sender() -> &'static Mutex<Option<mpsc::Sender<SignalMsg>>> {
    static SLOT: OnceLock<Mutex<Option<mpsc::Sender<SignalMsg>>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

/// The process-wide SIGINT/SIGTERM handler can only be installed once; it
/// forwards into whichever mount is currently armed via `death_sender`.
fn install_signal_handler() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = ctrlc::set_handler(|| {
            if let Some(tx) = death_sender().lock().unwrap().as_ref() {
                let _ = tx.send(SignalMsg::Death);
            }
        });
    });
}

#[derive(Default)]
struct Lifecycle {
    mounted: bool,
    session: Option<fuser::BackgroundSession>,
    handling_signals: bool,
    watcher_tx: Option<mpsc::Sender<SignalMsg>>,
}

struct Inner {
    core: Arc<FsCore>,
    store: Arc<LogStore>,
    state: Mutex<Lifecycle>,
    exit: Mutex<Box<dyn Fn(i32) + Send>>,
}

/// The main filey system object: configure with [`Config`], then `mount`,
/// do something with the files in your bucket(s), and `unmount`. Files
/// you created or altered are uploaded only at unmount.
pub struct MuxFys {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MuxFys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxFys").finish_non_exhaustive()
    }
}

impl MuxFys {
    /// Validate the configuration, prepare the mount point and cache
    /// directories, and build a client for every target.
    pub fn new(config: &Config) -> Result<Self, MountError> {
        if config.targets.is_empty() {
            return Err(MountError::NoTargets);
        }

        let mount = if config.mount.is_empty() {
            "mnt"
        } else {
            config.mount.as_str()
        };
        let mount_point = std::path::absolute(config::expand_tilde(mount)?)?;
        create_private_dirs(&mount_point)?;
        if std::fs::read_dir(&mount_point)?.next().is_some() {
            return Err(MountError::MountNotEmpty(
                mount_point.display().to_string(),
            ));
        }

        let cache_base = if config.cache_base.is_empty() {
            std::env::current_dir()?
        } else {
            std::path::absolute(config::expand_tilde(&config.cache_base)?)?
        };

        let store = Arc::new(LogStore::new());
        let logger = Logger::new(Arc::clone(&store), config.verbose)
            .child("mount", mount_point.display().to_string());

        let mut remotes = Vec::new();
        let mut write_remote: Option<Arc<Remote>> = None;
        for target in &config.targets {
            let cache_data = target.effective_cache_data();
            let (cache_dir, cache_is_tmp) = if !target.cache_dir.is_empty() {
                let dir = std::path::absolute(config::expand_tilde(&target.cache_dir)?)?;
                create_private_dirs(&dir)?;
                (Some(dir), false)
            } else if cache_data {
                (Some(create_tmp_cache_dir(&cache_base)?), true)
            } else {
                (None, false)
            };

            let accessor: Arc<dyn RemoteAccessor> = match &target.accessor {
                Some(accessor) => Arc::clone(accessor),
                None => Arc::new(
                    crate::accessor::S3Accessor::new(target)
                        .map_err(|e| MountError::BadTarget(e.to_string()))?,
                ),
            };

            let remote = Arc::new(Remote::new(RemoteOptions {
                logger: logger.child("target", accessor.target()),
                accessor,
                cache_data,
                cache_dir,
                cache_is_tmp,
                write: target.write,
                max_attempts: config.retries + 1,
            }));
            if remote.write {
                if write_remote.is_some() {
                    return Err(MountError::MultipleWriteTargets);
                }
                write_remote = Some(Arc::clone(&remote));
            }
            remotes.push(remote);
        }

        let core = Arc::new(FsCore {
            mount_point,
            remotes,
            write_remote,
            namespace: RwLock::new(Namespace::default()),
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
            mount_time: unix_now(),
            logger,
        });

        Ok(Self {
            inner: Arc::new(Inner {
                core,
                store,
                state: Mutex::new(Lifecycle::default()),
                exit: Mutex::new(Box::new(|code| std::process::exit(code))),
            }),
        })
    }

    /// Mount the configured targets. On return the files in your buckets
    /// are accessible. Once mounted, you can't mount again until you
    /// [`MuxFys::unmount`].
    pub fn mount(&self) -> Result<(), MountError> {
        let mut state = self.inner.state.lock().unwrap();
        if state.mounted {
            return Err(MountError::AlreadyMounted);
        }

        self.inner.core.seed_root();

        let adapter = crate::fuse::MuxFuse::new(Arc::clone(&self.inner.core));
        let options = [
            fuser::MountOption::FSName("muxfys".to_string()),
            fuser::MountOption::AllowOther,
        ];
        let session = fuser::spawn_mount2(adapter, &self.inner.core.mount_point, &options)?;
        state.session = Some(session);
        state.mounted = true;
        Ok(())
    }

    /// Unmount and upload everything created or altered during the mount.
    /// Be sure to close any open file handles first. Uploads can take a
    /// while; failures are counted, not fatal to the rest of the list.
    pub fn unmount(&self) -> Result<(), MountError> {
        self.inner.do_unmount(false)
    }

    /// Unmount without uploading anything.
    pub fn unmount_skip_uploads(&self) -> Result<(), MountError> {
        self.inner.do_unmount(true)
    }

    /// Capture SIGINT and SIGTERM, unmount when one arrives, then exit the
    /// process with status 1 (or 2 if the unmount failed). Manually
    /// calling [`MuxFys::unmount`] after this cancels the capture. Does
    /// not block; repeat calls are no-ops.
    pub fn unmount_on_death(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if !state.mounted || state.handling_signals {
            return;
        }

        let (tx, rx) = mpsc::channel();
        install_signal_handler();
        *death_sender().lock().unwrap() = Some(tx.clone());
        state.watcher_tx = Some(tx);
        state.handling_signals = true;
        drop(state);

        let inner = Arc::clone(&self.inner);
        std::thread::spawn(move || match rx.recv() {
            Ok(SignalMsg::Death) => {
                {
                    let mut state = inner.state.lock().unwrap();
                    state.handling_signals = false;
                    state.watcher_tx = None;
                }
                *death_sender().lock().unwrap() = None;
                let code = match inner.do_unmount(false) {
                    Ok(()) => 1,
                    Err(err) => {
                        inner
                            .core
                            .logger
                            .error("Failed to unmount on death", &[("err", err.to_string())]);
                        2
                    }
                };
                let exit = inner.exit.lock().unwrap();
                (*exit)(code);
            }
            Ok(SignalMsg::Ignore) | Err(_) => {
                *death_sender().lock().unwrap() = None;
                inner.state.lock().unwrap().handling_signals = false;
            }
        });
    }

    /// Messages generated while mounted; by default only errors, or
    /// informational messages too when configured verbose.
    pub fn logs(&self) -> Vec<String> {
        self.inner.store.logs()
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<FsCore> {
        &self.inner.core
    }

    #[cfg(test)]
    pub(crate) fn set_exit_handler(&self, exit: Box<dyn Fn(i32) + Send>) {
        *self.inner.exit.lock().unwrap() = exit;
    }

    #[cfg(test)]
    pub(crate) fn handling_signals(&self) -> bool {
        self.inner.state.lock().unwrap().handling_signals
    }

    #[cfg(test)]
    pub(crate) fn pretend_mounted(&self) {
        self.inner.core.seed_root();
        self.inner.state.lock().unwrap().mounted = true;
    }

    #[cfg(test)]
    pub(crate) fn is_mounted(&self) -> bool {
        self.inner.state.lock().unwrap().mounted
    }

    #[cfg(test)]
    pub(crate) fn trigger_death_signal() {
        if let Some(tx) = death_sender().lock().unwrap().as_ref() {
            let _ = tx.send(SignalMsg::Death);
        }
    }
}

impl Inner {
    fn do_unmount(&self, skip_uploads: bool) -> Result<(), MountError> {
        let mut state = self.state.lock().unwrap();

        if state.handling_signals {
            if let Some(tx) = state.watcher_tx.take() {
                let _ = tx.send(SignalMsg::Ignore);
            }
            *death_sender().lock().unwrap() = None;
            state.handling_signals = false;
        }

        let mut kernel_err: Option<io::Error> = None;
        if state.mounted {
            if state.session.is_some() {
                match kernel_unmount(&self.core.mount_point) {
                    Ok(()) => {
                        state.session.take();
                        state.mounted = false;
                    }
                    Err(err) => kernel_err = Some(err),
                }
            } else {
                state.mounted = false;
            }
        }

        let upload_err = if skip_uploads {
            None
        } else {
            self.upload_created().err()
        };

        for remote in &self.core.remotes {
            if remote.cache_is_tmp {
                remote.delete_cache();
            }
        }

        // clean out the namespace; one reason to unmount is to force
        // recognition of new remote files on the next mount
        self.core.namespace.write().unwrap().wipe();
        self.core.handles.lock().unwrap().clear();
        for remote in &self.core.remotes {
            remote.tracker.cache_wipe();
        }

        match (kernel_err, upload_err) {
            (None, None) => Ok(()),
            (Some(k), None) => Err(MountError::Io(k)),
            (None, Some(u)) => Err(u),
            (Some(k), Some(u)) => Err(MountError::Combined(format!("{k}; {u}"))),
        }
    }

    /// Upload everything in the created set, oldest mtime first so the
    /// remote's upload-time-as-mtime roughly preserves logical order.
    fn upload_created(&self) -> Result<(), MountError> {
        let Some(write_remote) = &self.core.write_remote else {
            return Ok(());
        };
        if !write_remote.cache_data {
            return Ok(());
        }

        let mut created: Vec<(String, u64)> = {
            let ns = self.core.namespace.read().unwrap();
            ns.created_files
                .iter()
                .map(|name| {
                    let mtime = ns
                        .files
                        .get(name)
                        .map(|attr| attr.lock().unwrap().mtime)
                        .unwrap_or(0);
                    (name.clone(), mtime)
                })
                .collect()
        };
        created.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut fails = 0;
        let mut uploaded = Vec::new();
        for (name, _) in created {
            let remote_path = write_remote.get_remote_path(&name);
            let local_path = write_remote.get_local_path(&remote_path);
            match write_remote.upload_file(&local_path, &remote_path) {
                Ok(()) => uploaded.push(name),
                Err(_) => fails += 1,
            }
        }

        if !uploaded.is_empty() {
            let mut ns = self.core.namespace.write().unwrap();
            for name in uploaded {
                ns.created_files.remove(&name);
            }
        }

        if fails > 0 {
            Err(MountError::UploadFailed(fails))
        } else {
            Ok(())
        }
    }
}

/// Ask the kernel to release the mount. Run out of process so an EBUSY
/// (open file handles) is observable; only then is the FUSE session
/// dropped.
fn kernel_unmount(mount_point: &Path) -> io::Result<()> {
    for program in ["fusermount3", "fusermount"] {
        match Command::new(program).arg("-u").arg(mount_point).output() {
            Ok(out) if out.status.success() => return Ok(()),
            Ok(out) => {
                return Err(io::Error::other(format!(
                    "{program} -u failed: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                )))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        }
    }
    let out = Command::new("umount").arg(mount_point).output()?;
    if out.status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "umount failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        )))
    }
}

fn create_tmp_cache_dir(base: &Path) -> io::Result<PathBuf> {
    use rand::Rng;
    loop {
        let suffix: u32 = rand::thread_rng().gen();
        let dir = base.join(format!(".muxfys_cache_{suffix:08x}"));
        match DirBuilder::new().mode(DIR_MODE).create(&dir) {
            Ok(()) => return Ok(dir),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

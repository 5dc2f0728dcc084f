//! End-to-end tests of the namespace state machine over a local-directory
//! accessor, covering the full mount lifecycle without needing a kernel.

use super::*;
use crate::accessor::{AccessorError, LocalAccessor, ObjectStream, RemoteEntry};
use crate::config::Target;
use crate::interval::Interval;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Accessor wrapper used to observe and sabotage remote calls.
struct TestAccessor {
    inner: LocalAccessor,
    fail_uploads: AtomicBool,
    opens: AtomicU32,
}

impl TestAccessor {
    fn new(root: &Path) -> Self {
        Self {
            inner: LocalAccessor::new(root),
            fail_uploads: AtomicBool::new(false),
            opens: AtomicU32::new(0),
        }
    }
}

impl RemoteAccessor for TestAccessor {
    fn list_entries(&self, dir: &str) -> Result<Vec<RemoteEntry>, AccessorError> {
        self.inner.list_entries(dir)
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn ObjectStream>, AccessorError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open_file(path)
    }

    fn download_file(&self, source: &str, dest: &Path) -> Result<(), AccessorError> {
        self.inner.download_file(source, dest)
    }

    fn upload_file(
        &self,
        source: &Path,
        dest: &str,
        content_type: &str,
    ) -> Result<(), AccessorError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(AccessorError::Store("upload failed".to_string()));
        }
        self.inner.upload_file(source, dest, content_type)
    }

    fn copy_file(&self, source: &str, dest: &str) -> Result<(), AccessorError> {
        self.inner.copy_file(source, dest)
    }

    fn delete_file(&self, path: &str) -> Result<(), AccessorError> {
        self.inner.delete_file(path)
    }

    fn target(&self) -> String {
        self.inner.target()
    }

    fn remote_path(&self, rel_path: &str) -> String {
        self.inner.remote_path(rel_path)
    }

    fn local_path(&self, base_dir: &Path, remote_path: &str) -> std::path::PathBuf {
        self.inner.local_path(base_dir, remote_path)
    }
}

fn write_source_file(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

struct Harness {
    tmp: tempfile::TempDir,
    source: std::path::PathBuf,
    accessor: Arc<TestAccessor>,
    fs: MuxFys,
}

impl Harness {
    /// A mount of one source directory: cached and writeable, or bare.
    fn new(write: bool, cache: bool) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        let accessor = Arc::new(TestAccessor::new(&source));
        let mut target = Target::with_accessor(Arc::clone(&accessor) as Arc<dyn RemoteAccessor>);
        target.write = write;
        target.cache_data = cache;
        let fs = Self::make_fs(tmp.path(), vec![target], true);
        fs.pretend_mounted();
        Self {
            tmp,
            source,
            accessor,
            fs,
        }
    }

    fn make_fs(tmp: &Path, targets: Vec<Target>, verbose: bool) -> MuxFys {
        let config = Config {
            mount: tmp.join("mnt").display().to_string(),
            cache_base: tmp.join("cache_base").display().to_string(),
            verbose,
            targets,
            ..Default::default()
        };
        std::fs::create_dir_all(tmp.join("cache_base")).unwrap();
        MuxFys::new(&config).unwrap()
    }

    fn core(&self) -> &Arc<FsCore> {
        self.fs.core()
    }

    fn remote(&self) -> Arc<crate::remote::Remote> {
        Arc::clone(&self.core().remotes[0])
    }
}

#[test]
fn test_read_only_uncached_mount() {
    let h = Harness::new(false, false);
    write_source_file(&h.source, "a/b.txt", b"hello");

    let attr = h.core().get_attr("a").unwrap();
    assert_eq!(attr.kind, EntryKind::Directory);

    let attr = h.core().get_attr("a/b.txt").unwrap();
    assert_eq!(attr.kind, EntryKind::Regular);
    assert_eq!(attr.size, 5);

    let fh = h.core().open("a/b.txt", libc::O_RDONLY).unwrap();
    assert_eq!(h.core().read(fh, 0, 5).unwrap(), b"hello");
    h.core().release(fh);

    // no cache directory is created for an uncached target
    assert!(h.remote().cache_dir().is_none());
    assert!(std::fs::read_dir(h.tmp.path().join("cache_base"))
        .unwrap()
        .next()
        .is_none());

    h.fs.unmount().unwrap();
    // the namespace is wiped at unmount
    assert!(matches!(
        h.core().get_attr("a/b.txt"),
        Err(FsError::NotFound)
    ));
}

#[test]
fn test_stat_of_sibling_is_free_after_first_stat() {
    let h = Harness::new(false, false);
    write_source_file(&h.source, "a/one.txt", b"1");
    write_source_file(&h.source, "a/two.txt", b"22");

    h.core().get_attr("a").unwrap();
    h.core().get_attr("a/one.txt").unwrap();
    // the sibling must already be known without another listing
    let ns = h.core().namespace.read().unwrap();
    assert!(ns.files.contains_key("a/two.txt"));
}

#[test]
fn test_mount_twice_fails() {
    let h = Harness::new(false, false);
    let err = h.fs.mount().unwrap_err();
    assert_eq!(err.to_string(), "Can't mount more that once at a time");
}

#[test]
fn test_double_unmount_is_ok() {
    let h = Harness::new(false, false);
    h.fs.unmount().unwrap();
    h.fs.unmount().unwrap();
}

#[test]
fn test_create_and_deferred_upload() {
    let h = Harness::new(true, true);

    let (fh1, attr) = h.core().create("created1.file", libc::O_RDWR | libc::O_CREAT).unwrap();
    assert_eq!(attr.size, 0);
    let (fh2, _) = h.core().create("created2.file", libc::O_RDWR | libc::O_CREAT).unwrap();
    h.core().release(fh1);
    h.core().release(fh2);

    // nothing reaches the remote before unmount
    assert!(!h.source.join("created1.file").exists());
    assert!(!h.source.join("created2.file").exists());

    h.fs.unmount().unwrap();

    assert!(h.source.join("created1.file").is_file());
    assert!(h.source.join("created2.file").is_file());
}

#[test]
fn test_upload_failure_reported() {
    let h = Harness::new(true, true);

    let (fh, _) = h.core().create("created.file", libc::O_RDWR | libc::O_CREAT).unwrap();
    h.core().write(fh, 0, b"payload").unwrap();
    h.core().release(fh);

    h.accessor.fail_uploads.store(true, Ordering::SeqCst);
    let err = h.fs.unmount().unwrap_err();
    assert_eq!(err.to_string(), "failed to upload 1 files");

    let logs = h.fs.logs();
    let line = logs
        .iter()
        .find(|l| l.contains("lvl=eror") && l.contains("call=UploadFile"))
        .unwrap();
    assert!(line.contains("pkg=muxfys"));
    assert!(line.contains("err=\"upload failed\""));
    assert!(line.contains("walltime="));
    assert!(line.contains("retries=0"));
}

#[test]
fn test_two_writeable_targets_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    std::fs::create_dir_all(&source).unwrap();

    let mut targets = Vec::new();
    for _ in 0..2 {
        let accessor: Arc<dyn RemoteAccessor> = Arc::new(TestAccessor::new(&source));
        let mut target = Target::with_accessor(accessor);
        target.write = true;
        targets.push(target);
    }
    let config = Config {
        mount: tmp.path().join("mnt").display().to_string(),
        cache_base: tmp.path().display().to_string(),
        targets,
        ..Default::default()
    };
    let err = MuxFys::new(&config).unwrap_err();
    assert_eq!(
        err.to_string(),
        "you can't have more than one writeable target"
    );
}

#[test]
fn test_mount_dir_not_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let mount = tmp.path().join("mnt");
    std::fs::create_dir_all(&mount).unwrap();
    std::fs::write(mount.join("occupied"), b"x").unwrap();

    let accessor: Arc<dyn RemoteAccessor> = Arc::new(TestAccessor::new(tmp.path()));
    let config = Config {
        mount: mount.display().to_string(),
        targets: vec![Target::with_accessor(accessor)],
        ..Default::default()
    };
    let err = MuxFys::new(&config).unwrap_err();
    assert!(err.to_string().contains("was not empty"));
}

#[test]
fn test_no_targets_rejected() {
    let err = MuxFys::new(&Config::default()).unwrap_err();
    assert_eq!(err.to_string(), "no targets provided");
}

#[test]
fn test_range_downloads_tracked() {
    let h = Harness::new(false, true);
    let body: Vec<u8> = (0..=255u16)
        .cycle()
        .take(1024 * 1024)
        .map(|b| b as u8)
        .collect();
    write_source_file(&h.source, "big.bin", &body);

    h.core().get_attr("big.bin").unwrap();
    let fh = h.core().open("big.bin", libc::O_RDONLY).unwrap();

    assert_eq!(h.core().read(fh, 512, 1024).unwrap(), &body[512..1536]);
    assert_eq!(h.accessor.opens.load(Ordering::SeqCst), 1);

    let remote = h.remote();
    let local = remote.get_local_path(&remote.get_remote_path("big.bin"));
    assert!(remote
        .tracker
        .uncached(&local, Interval::new(512, 1536))
        .is_empty());
    assert_eq!(
        remote.tracker.uncached(&local, Interval::new(0, 2048)),
        vec![Interval::new(0, 512), Interval::new(1536, 2048)]
    );

    // two more range requests fill the gaps, leaving one merged interval
    assert_eq!(h.core().read(fh, 0, 2048).unwrap(), &body[..2048]);
    assert_eq!(h.accessor.opens.load(Ordering::SeqCst), 3);
    assert!(remote
        .tracker
        .uncached(&local, Interval::new(0, 2048))
        .is_empty());
    assert_eq!(
        remote.tracker.uncached(&local, Interval::new(0, 4096)),
        vec![Interval::new(2048, 4096)]
    );

    h.core().release(fh);
}

#[test]
fn test_write_read_roundtrip_and_remount() {
    let h = Harness::new(true, true);

    let (fh, _) = h.core().create("out.bin", libc::O_RDWR | libc::O_CREAT).unwrap();
    assert_eq!(h.core().write(fh, 0, b"hello world").unwrap(), 11);
    assert_eq!(h.core().read(fh, 0, 11).unwrap(), b"hello world");
    h.core().flush(fh).unwrap();
    h.core().release(fh);
    h.fs.unmount().unwrap();

    assert_eq!(std::fs::read(h.source.join("out.bin")).unwrap(), b"hello world");

    // a fresh mount of the same target sees the uploaded bytes
    let accessor: Arc<dyn RemoteAccessor> = Arc::new(TestAccessor::new(&h.source));
    let mut target = Target::with_accessor(accessor);
    target.cache_data = true;
    let tmp2 = tempfile::tempdir().unwrap();
    let fs2 = Harness::make_fs(tmp2.path(), vec![target], false);
    fs2.pretend_mounted();

    let attr = fs2.core().get_attr("out.bin").unwrap();
    assert_eq!(attr.size, 11);
    let fh = fs2.core().open("out.bin", libc::O_RDONLY).unwrap();
    assert_eq!(fs2.core().read(fh, 0, 11).unwrap(), b"hello world");
    fs2.core().release(fh);
    fs2.unmount().unwrap();
}

#[test]
fn test_multiplex_union_first_remote_wins() {
    let tmp = tempfile::tempdir().unwrap();
    let source_a = tmp.path().join("a");
    let source_b = tmp.path().join("b");
    write_source_file(&source_a, "shared.txt", b"from A");
    write_source_file(&source_a, "only_a.txt", b"a");
    write_source_file(&source_b, "shared.txt", b"from B");
    write_source_file(&source_b, "only_b.txt", b"b");

    let ta: Arc<dyn RemoteAccessor> = Arc::new(TestAccessor::new(&source_a));
    let tb: Arc<dyn RemoteAccessor> = Arc::new(TestAccessor::new(&source_b));
    let fs = Harness::make_fs(
        tmp.path(),
        vec![Target::with_accessor(ta), Target::with_accessor(tb)],
        false,
    );
    fs.pretend_mounted();

    let entries = fs.core().open_dir("").unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, vec!["only_a.txt", "shared.txt", "only_b.txt"]);

    // the duplicate name is served by the first configured remote
    let fh = fs.core().open("shared.txt", libc::O_RDONLY).unwrap();
    assert_eq!(fs.core().read(fh, 0, 6).unwrap(), b"from A");
    fs.core().release(fh);
    fs.unmount().unwrap();
}

#[test]
fn test_empty_root_is_legal_but_empty_subdir_is_not_found() {
    let h = Harness::new(false, false);
    std::fs::create_dir_all(h.source.join("hollow")).unwrap();

    assert!(h.core().get_attr("hollow").is_ok());
    assert!(matches!(h.core().open_dir("hollow"), Err(FsError::NotFound)));

    // the root itself may list empty
    let other = Harness::new(false, false);
    assert!(other.core().open_dir("").unwrap().is_empty());
}

#[test]
fn test_open_with_write_flag_needs_write_remote() {
    let h = Harness::new(false, false);
    write_source_file(&h.source, "f.txt", b"data");
    h.core().get_attr("f.txt").unwrap();

    assert!(matches!(
        h.core().open("f.txt", libc::O_WRONLY),
        Err(FsError::Permission)
    ));
    assert!(matches!(
        h.core().open("f.txt", libc::O_RDWR),
        Err(FsError::Permission)
    ));
    assert!(h.core().open("f.txt", libc::O_RDONLY).is_ok());
}

#[test]
fn test_unlink_scrubs_remote_and_namespace() {
    let h = Harness::new(true, true);
    write_source_file(&h.source, "doomed.txt", b"bye");
    h.core().get_attr("doomed.txt").unwrap();

    h.core().unlink("doomed.txt").unwrap();

    assert!(!h.source.join("doomed.txt").exists());
    assert!(matches!(
        h.core().get_attr("doomed.txt"),
        Err(FsError::NotFound)
    ));
    let entries = h.core().open_dir("").unwrap();
    assert!(entries.iter().all(|e| e.name != "doomed.txt"));
}

#[test]
fn test_mkdir_and_rmdir() {
    let h = Harness::new(true, true);

    h.core().mkdir("newdir").unwrap();
    assert_eq!(h.core().get_attr("newdir").unwrap().kind, EntryKind::Directory);
    {
        let ns = h.core().namespace.read().unwrap();
        assert!(ns.created_dirs.contains("newdir"));
    }
    let entries = h.core().open_dir("").unwrap();
    assert!(entries.iter().any(|e| e.name == "newdir"));

    // the local shadow directory exists in the cache tree
    let remote = h.remote();
    let local = remote.get_local_path(&remote.get_remote_path("newdir"));
    assert!(local.is_dir());

    h.core().rmdir("newdir").unwrap();
    assert!(!local.exists());
    assert!(matches!(h.core().get_attr("newdir"), Err(FsError::NotFound)));
}

#[test]
fn test_mkdir_requires_existing_parent() {
    let h = Harness::new(true, true);
    assert!(matches!(
        h.core().mkdir("no/such/parent"),
        Err(FsError::NotFound)
    ));
}

#[test]
fn test_rename_file_copies_then_deletes() {
    let h = Harness::new(true, true);
    write_source_file(&h.source, "old.txt", b"payload");
    h.core().get_attr("old.txt").unwrap();

    h.core().rename("old.txt", "new.txt").unwrap();

    assert!(!h.source.join("old.txt").exists());
    assert_eq!(std::fs::read(h.source.join("new.txt")).unwrap(), b"payload");
    assert!(matches!(h.core().get_attr("old.txt"), Err(FsError::NotFound)));
    assert_eq!(h.core().get_attr("new.txt").unwrap().size, 7);
}

#[test]
fn test_rename_modified_file_stays_eligible_for_upload() {
    let h = Harness::new(true, true);
    write_source_file(&h.source, "tmp.txt", b"abc");
    h.core().get_attr("tmp.txt").unwrap();

    // opening an existing remote file for writing marks it created
    let fh = h.core().open("tmp.txt", libc::O_RDWR).unwrap();
    h.core().write(fh, 0, b"xyz").unwrap();
    h.core().release(fh);

    h.core().rename("tmp.txt", "kept.txt").unwrap();
    {
        let ns = h.core().namespace.read().unwrap();
        assert!(ns.created_files.contains("kept.txt"));
        assert!(!ns.created_files.contains("tmp.txt"));
    }
    assert!(!h.source.join("tmp.txt").exists());

    h.fs.unmount().unwrap();
    assert_eq!(std::fs::read(h.source.join("kept.txt")).unwrap(), b"xyz");
}

#[test]
fn test_rename_of_never_uploaded_file_fails() {
    // the remote copy comes first, and there is nothing remote to copy
    let h = Harness::new(true, true);
    let (fh, _) = h.core().create("fresh.txt", libc::O_RDWR | libc::O_CREAT).unwrap();
    h.core().release(fh);

    assert!(matches!(
        h.core().rename("fresh.txt", "other.txt"),
        Err(FsError::NotFound)
    ));
    // no side effects: the file is still there under its old name
    let ns = h.core().namespace.read().unwrap();
    assert!(ns.created_files.contains("fresh.txt"));
}

#[test]
fn test_rename_dir_only_for_created_dirs() {
    let h = Harness::new(true, true);
    write_source_file(&h.source, "listed/file.txt", b"x");
    h.core().get_attr("listed").unwrap();

    assert!(matches!(
        h.core().rename("listed", "moved"),
        Err(FsError::NotSupported)
    ));

    h.core().mkdir("mine").unwrap();
    h.core().rename("mine", "yours").unwrap();
    assert!(matches!(h.core().get_attr("mine"), Err(FsError::NotFound)));
    assert_eq!(h.core().get_attr("yours").unwrap().kind, EntryKind::Directory);
}

#[test]
fn test_symlink_is_mount_local() {
    let h = Harness::new(true, true);
    write_source_file(&h.source, "target.txt", b"content");
    h.core().get_attr("target.txt").unwrap();

    h.core().symlink("target.txt", "link").unwrap();

    let attr = h.core().get_attr("link").unwrap();
    assert_eq!(attr.kind, EntryKind::Symlink);
    assert_eq!(attr.size, SYMLINK_SIZE);
    assert_eq!(h.core().read_link("link").unwrap(), "target.txt");
    {
        let ns = h.core().namespace.read().unwrap();
        assert!(!ns.created_files.contains("link"));
    }

    h.fs.unmount().unwrap();
    // symlinks are ephemeral: never uploaded
    assert!(!h.source.join("link").exists());
}

#[test]
fn test_truncate_cached_file() {
    let h = Harness::new(true, true);
    write_source_file(&h.source, "t.txt", b"0123456789");
    h.core().get_attr("t.txt").unwrap();

    // read to populate the cache, then shrink
    let fh = h.core().open("t.txt", libc::O_RDONLY).unwrap();
    assert_eq!(h.core().read(fh, 0, 10).unwrap(), b"0123456789");
    h.core().release(fh);

    h.core().truncate("t.txt", 4).unwrap();
    assert_eq!(h.core().get_attr("t.txt").unwrap().size, 4);
    {
        let ns = h.core().namespace.read().unwrap();
        assert!(ns.created_files.contains("t.txt"));
    }

    let remote = h.remote();
    let local = remote.get_local_path(&remote.get_remote_path("t.txt"));
    assert_eq!(std::fs::metadata(&local).unwrap().len(), 4);
    assert!(remote
        .tracker
        .uncached(&local, Interval::new(0, 4))
        .is_empty());

    // truncate at or past the size is a no-op
    h.core().truncate("t.txt", 4).unwrap();
    h.core().truncate("t.txt", 100).unwrap();
    assert_eq!(h.core().get_attr("t.txt").unwrap().size, 4);

    h.fs.unmount().unwrap();
    assert_eq!(std::fs::read(h.source.join("t.txt")).unwrap(), b"0123");
}

#[test]
fn test_truncate_through_read_only_remote_denied() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    write_source_file(&source, "f.txt", b"data");

    let accessor: Arc<dyn RemoteAccessor> = Arc::new(TestAccessor::new(&source));
    let fs = Harness::make_fs(tmp.path(), vec![Target::with_accessor(accessor)], false);
    fs.pretend_mounted();
    fs.core().get_attr("f.txt").unwrap();
    assert!(matches!(
        fs.core().truncate("f.txt", 1),
        Err(FsError::Permission)
    ));
    fs.unmount().unwrap();
}

#[test]
fn test_silent_mutations_and_utimens() {
    let h = Harness::new(true, true);
    write_source_file(&h.source, "f.txt", b"data");
    h.core().get_attr("f.txt").unwrap();

    h.core().silent_mutation("f.txt").unwrap();
    h.core().silent_mutation("").unwrap();
    assert!(matches!(
        h.core().silent_mutation("missing"),
        Err(FsError::NotFound)
    ));

    // with a local copy present, times update the attr too
    let fh = h.core().open("f.txt", libc::O_RDONLY).unwrap();
    h.core().read(fh, 0, 4).unwrap();
    h.core().release(fh);
    h.core().utimens("f.txt", 1000, 2000).unwrap();
    let attr = h.core().get_attr("f.txt").unwrap();
    assert_eq!(attr.atime, 1000);
    assert_eq!(attr.mtime, 2000);
}

#[test]
fn test_namespace_invariants_hold() {
    let h = Harness::new(true, true);
    write_source_file(&h.source, "a/one.txt", b"1");
    h.core().get_attr("a").unwrap();
    h.core().get_attr("a/one.txt").unwrap();
    let (fh, _) = h.core().create("fresh.txt", libc::O_RDWR | libc::O_CREAT).unwrap();
    h.core().write(fh, 0, b"x").unwrap();
    h.core().release(fh);

    let ns = h.core().namespace.read().unwrap();
    for path in ns.files.keys() {
        assert!(ns.file_to_remote.contains_key(path), "no remote for {path}");
    }
    for path in &ns.created_files {
        assert!(ns.files.contains_key(path), "created but unknown: {path}");
        assert!(ns.file_to_remote[path].write);
    }
    let writeable = h
        .core()
        .remotes
        .iter()
        .filter(|remote| remote.write)
        .count();
    assert!(writeable <= 1);
}

#[test]
fn test_ephemeral_cache_dir_removed_on_unmount() {
    let h = Harness::new(true, true);
    write_source_file(&h.source, "f.txt", b"data");
    h.core().get_attr("f.txt").unwrap();
    let fh = h.core().open("f.txt", libc::O_RDONLY).unwrap();
    h.core().read(fh, 0, 4).unwrap();
    h.core().release(fh);

    let cache_dir = h.remote().cache_dir().unwrap().to_path_buf();
    assert!(cache_dir.exists());
    h.fs.unmount().unwrap();
    assert!(!cache_dir.exists());
}

// The signal tests share the process-wide death-signal slot; run them one
// at a time.
static SIGNAL_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn test_unmount_on_death_exits_one_on_success() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    let h = Harness::new(true, true);
    let (tx, rx) = mpsc::channel();
    h.fs.set_exit_handler(Box::new(move |code| {
        let _ = tx.send(code);
    }));

    assert!(!h.fs.handling_signals());
    h.fs.unmount_on_death();
    assert!(h.fs.handling_signals());
    // doing it again is harmless
    h.fs.unmount_on_death();

    MuxFys::trigger_death_signal();
    let code = rx.recv_timeout(Duration::from_millis(500)).unwrap();
    assert_eq!(code, 1);
    assert!(!h.fs.is_mounted());
    assert!(!h.fs.handling_signals());
}

#[test]
fn test_unmount_on_death_exits_two_on_failure() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    let h = Harness::new(true, true);
    let (fh, _) = h.core().create("created.file", libc::O_RDWR | libc::O_CREAT).unwrap();
    h.core().release(fh);
    h.accessor.fail_uploads.store(true, Ordering::SeqCst);

    let (tx, rx) = mpsc::channel();
    h.fs.set_exit_handler(Box::new(move |code| {
        let _ = tx.send(code);
    }));
    h.fs.unmount_on_death();

    MuxFys::trigger_death_signal();
    let code = rx.recv_timeout(Duration::from_millis(500)).unwrap();
    assert_eq!(code, 2);
}

#[test]
fn test_explicit_unmount_disarms_death_handler() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    let h = Harness::new(true, true);
    let (tx, rx) = mpsc::channel();
    h.fs.set_exit_handler(Box::new(move |code| {
        let _ = tx.send(code);
    }));

    h.fs.unmount_on_death();
    h.fs.unmount().unwrap();
    assert!(!h.fs.handling_signals());

    MuxFys::trigger_death_signal();
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn test_unmount_on_death_before_mount_does_nothing() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    let accessor: Arc<dyn RemoteAccessor> = Arc::new(TestAccessor::new(&source));
    let fs = Harness::make_fs(tmp.path(), vec![Target::with_accessor(accessor)], false);

    fs.unmount_on_death();
    assert!(!fs.handling_signals());
}

#[test]
fn test_verbose_logs_every_remote_call() {
    let h = Harness::new(false, false);
    write_source_file(&h.source, "f.txt", b"data");
    h.core().get_attr("f.txt").unwrap();

    let logs = h.fs.logs();
    assert!(logs.iter().any(|l| l.contains("call=ListEntries")));
}

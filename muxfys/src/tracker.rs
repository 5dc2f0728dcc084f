//! Bookkeeping of which byte ranges of which cache files are on disk.

use crate::interval::{Interval, Intervals};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Tracks the cached byte ranges of local sparse files, keyed by absolute
/// cache path. Shared between every open handle of a mount; one internal
/// mutex covers the whole map.
#[derive(Debug, Default)]
pub struct CacheTracker {
    cached: Mutex<HashMap<PathBuf, Intervals>>,
}

impl CacheTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the bytes of `iv` are now present in `path`. Call after
    /// every successful range download or local write.
    pub fn cached(&self, path: &Path, iv: Interval) {
        let mut map = self.cached.lock().unwrap();
        map.entry(path.to_path_buf()).or_default().merge(iv);
    }

    /// The parts of `iv` not yet present in `path`. Download each returned
    /// interval, then report it with [`CacheTracker::cached`].
    pub fn uncached(&self, path: &Path, iv: Interval) -> Vec<Interval> {
        let map = self.cached.lock().unwrap();
        match map.get(path) {
            Some(set) => set.difference(iv),
            None => Intervals::new().difference(iv),
        }
    }

    /// Forget everything past `offset` for `path`, mirroring a truncate of
    /// the file itself.
    pub fn cache_truncate(&self, path: &Path, offset: i64) {
        let mut map = self.cached.lock().unwrap();
        if let Some(set) = map.get_mut(path) {
            set.truncate(offset);
        }
    }

    /// Replace everything known about `path` with the single range `iv`.
    /// Used when a cache file is recreated from scratch, e.g. after a full
    /// download.
    pub fn cache_override(&self, path: &Path, iv: Interval) {
        let mut map = self.cached.lock().unwrap();
        map.insert(path.to_path_buf(), Intervals::from(iv));
    }

    /// Atomically move the interval set from `old` to `new` after renaming
    /// the cache file on disk.
    pub fn cache_rename(&self, old: &Path, new: &Path) {
        let mut map = self.cached.lock().unwrap();
        if let Some(set) = map.remove(old) {
            map.insert(new.to_path_buf(), set);
        }
    }

    /// Drop all knowledge of `path` after deleting the cache file.
    pub fn cache_delete(&self, path: &Path) {
        let mut map = self.cached.lock().unwrap();
        map.remove(path);
    }

    /// Drop all knowledge of every file, e.g. when the cache directory is
    /// deleted wholesale.
    pub fn cache_wipe(&self) {
        let mut map = self.cached.lock().unwrap();
        map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn test_cached_then_uncached() {
        let t = CacheTracker::new();
        t.cached(&p("/c/a"), Interval::new(512, 1536));

        let missing = t.uncached(&p("/c/a"), Interval::new(0, 2048));
        assert_eq!(
            missing,
            vec![Interval::new(0, 512), Interval::new(1536, 2048)]
        );
    }

    #[test]
    fn test_unknown_path_is_fully_uncached() {
        let t = CacheTracker::new();
        assert_eq!(
            t.uncached(&p("/c/missing"), Interval::new(0, 10)),
            vec![Interval::new(0, 10)]
        );
    }

    #[test]
    fn test_ranges_merge_across_calls() {
        let t = CacheTracker::new();
        t.cached(&p("/c/a"), Interval::new(0, 512));
        t.cached(&p("/c/a"), Interval::new(512, 1536));
        t.cached(&p("/c/a"), Interval::new(1536, 2048));
        assert!(t.uncached(&p("/c/a"), Interval::new(0, 2048)).is_empty());
    }

    #[test]
    fn test_cache_truncate() {
        let t = CacheTracker::new();
        t.cached(&p("/c/a"), Interval::new(0, 100));
        t.cache_truncate(&p("/c/a"), 40);
        assert_eq!(
            t.uncached(&p("/c/a"), Interval::new(0, 100)),
            vec![Interval::new(40, 100)]
        );
    }

    #[test]
    fn test_cache_override_replaces() {
        let t = CacheTracker::new();
        t.cached(&p("/c/a"), Interval::new(0, 100));
        t.cache_override(&p("/c/a"), Interval::new(50, 60));
        assert_eq!(
            t.uncached(&p("/c/a"), Interval::new(0, 100)),
            vec![Interval::new(0, 50), Interval::new(60, 100)]
        );
    }

    #[test]
    fn test_cache_rename_moves_set() {
        let t = CacheTracker::new();
        t.cached(&p("/c/old"), Interval::new(0, 10));
        t.cache_rename(&p("/c/old"), &p("/c/new"));
        assert!(t.uncached(&p("/c/new"), Interval::new(0, 10)).is_empty());
        assert_eq!(
            t.uncached(&p("/c/old"), Interval::new(0, 10)),
            vec![Interval::new(0, 10)]
        );
    }

    #[test]
    fn test_cache_delete_and_wipe() {
        let t = CacheTracker::new();
        t.cached(&p("/c/a"), Interval::new(0, 10));
        t.cached(&p("/c/b"), Interval::new(0, 10));
        t.cache_delete(&p("/c/a"));
        assert_eq!(
            t.uncached(&p("/c/a"), Interval::new(0, 10)),
            vec![Interval::new(0, 10)]
        );
        t.cache_wipe();
        assert_eq!(
            t.uncached(&p("/c/b"), Interval::new(0, 10)),
            vec![Interval::new(0, 10)]
        );
    }
}

//! Inode ↔ path bookkeeping for the kernel adapter.

use std::collections::HashMap;

pub(crate) const ROOT_INODE: u64 = 1;

/// Bidirectional inode/path table. The namespace itself is keyed by path;
/// inodes exist only because the kernel speaks them.
pub(crate) struct InodeTable {
    paths: HashMap<u64, String>,
    inodes: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    pub(crate) fn new() -> Self {
        let mut table = Self {
            paths: HashMap::new(),
            inodes: HashMap::new(),
            next: ROOT_INODE + 1,
        };
        table.paths.insert(ROOT_INODE, String::new());
        table.inodes.insert(String::new(), ROOT_INODE);
        table
    }

    pub(crate) fn get_or_insert(&mut self, path: &str) -> u64 {
        if let Some(ino) = self.inodes.get(path) {
            return *ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_string());
        self.inodes.insert(path.to_string(), ino);
        ino
    }

    pub(crate) fn path_of(&self, ino: u64) -> Option<String> {
        self.paths.get(&ino).cloned()
    }

    pub(crate) fn remove(&mut self, path: &str) {
        if let Some(ino) = self.inodes.remove(path) {
            self.paths.remove(&ino);
        }
    }

    /// Re-key `old` and everything beneath it to live under `new`.
    pub(crate) fn rename(&mut self, old: &str, new: &str) {
        let prefix = format!("{old}/");
        let moved: Vec<(String, u64)> = self
            .inodes
            .iter()
            .filter(|(path, _)| path.as_str() == old || path.starts_with(&prefix))
            .map(|(path, ino)| (path.clone(), *ino))
            .collect();
        for (path, ino) in moved {
            self.inodes.remove(&path);
            let renamed = if path == old {
                new.to_string()
            } else {
                format!("{new}{}", &path[old.len()..])
            };
            self.paths.insert(ino, renamed.clone());
            self.inodes.insert(renamed, ino);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_inode_one() {
        let table = InodeTable::new();
        assert_eq!(table.path_of(ROOT_INODE), Some(String::new()));
    }

    #[test]
    fn test_get_or_insert_is_stable() {
        let mut table = InodeTable::new();
        let a = table.get_or_insert("a/b.txt");
        let b = table.get_or_insert("a/b.txt");
        assert_eq!(a, b);
        assert_eq!(table.path_of(a), Some("a/b.txt".to_string()));
    }

    #[test]
    fn test_remove_forgets_both_directions() {
        let mut table = InodeTable::new();
        let ino = table.get_or_insert("gone.txt");
        table.remove("gone.txt");
        assert_eq!(table.path_of(ino), None);
        assert_ne!(table.get_or_insert("gone.txt"), ino);
    }

    #[test]
    fn test_rename_moves_descendants() {
        let mut table = InodeTable::new();
        let dir = table.get_or_insert("old");
        let child = table.get_or_insert("old/child.txt");
        let other = table.get_or_insert("older/file.txt");

        table.rename("old", "new");
        assert_eq!(table.path_of(dir), Some("new".to_string()));
        assert_eq!(table.path_of(child), Some("new/child.txt".to_string()));
        assert_eq!(table.path_of(other), Some("older/file.txt".to_string()));
    }
}

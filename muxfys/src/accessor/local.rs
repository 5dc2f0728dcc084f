//! Accessor over a plain local directory.
//!
//! Useful for mounting a directory tree the same way a bucket would be,
//! and as the test double for everything above the accessor seam.

use super::{AccessorError, ObjectStream, RemoteAccessor, RemoteEntry};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Serves a local directory as if it were a remote target. Paths handed to
/// the trait methods are absolute, produced by [`LocalAccessor::remote_path`]
/// from the configured root.
#[derive(Debug)]
pub struct LocalAccessor {
    target: PathBuf,
}

impl LocalAccessor {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }

    fn copy(&self, source: &Path, dest: &Path) -> Result<(), AccessorError> {
        let mut reader = File::open(source)?;
        let mut writer = File::create(dest)?;
        io::copy(&mut reader, &mut writer)?;
        writer.sync_all()?;
        Ok(())
    }
}

struct LocalStream {
    file: File,
}

impl Read for LocalStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl ObjectStream for LocalStream {
    fn seek_to(&mut self, offset: u64) -> Result<(), AccessorError> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

impl RemoteAccessor for LocalAccessor {
    fn list_entries(&self, dir: &str) -> Result<Vec<RemoteEntry>, AccessorError> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            let mut name = format!("{}{}", dir, entry.file_name().to_string_lossy());
            if meta.is_dir() {
                name.push('/');
            }
            entries.push(RemoteEntry {
                name,
                size: meta.len() as i64,
                mtime: meta.modified()?,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn ObjectStream>, AccessorError> {
        let file = File::open(path)?;
        Ok(Box::new(LocalStream { file }))
    }

    fn download_file(&self, source: &str, dest: &Path) -> Result<(), AccessorError> {
        self.copy(Path::new(source), dest)
    }

    fn upload_file(
        &self,
        source: &Path,
        dest: &str,
        _content_type: &str,
    ) -> Result<(), AccessorError> {
        self.copy(source, Path::new(dest))
    }

    fn copy_file(&self, source: &str, dest: &str) -> Result<(), AccessorError> {
        self.copy(Path::new(source), Path::new(dest))
    }

    fn delete_file(&self, path: &str) -> Result<(), AccessorError> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn target(&self) -> String {
        self.target.display().to_string()
    }

    fn remote_path(&self, rel_path: &str) -> String {
        if rel_path.is_empty() {
            return self.target.display().to_string();
        }
        self.target.join(rel_path).display().to_string()
    }

    fn local_path(&self, base_dir: &Path, remote_path: &str) -> PathBuf {
        base_dir.join(remote_path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(path: &Path, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }

    #[test]
    fn test_list_entries_marks_directories() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a/b.txt"), b"hello").unwrap();
        write_file(&dir.path().join("top.txt"), b"12345678").unwrap();
        let accessor = LocalAccessor::new(dir.path());

        let prefix = format!("{}/", dir.path().display());
        let entries = accessor.list_entries(&prefix).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
        assert_eq!(
            names,
            vec![format!("{prefix}a/"), format!("{prefix}top.txt")]
        );
        assert_eq!(entries[1].size, 8);
    }

    #[test]
    fn test_list_missing_dir_is_not_exists() {
        let dir = tempfile::tempdir().unwrap();
        let accessor = LocalAccessor::new(dir.path());
        let err = accessor
            .list_entries(&format!("{}/nope/", dir.path().display()))
            .unwrap_err();
        assert!(err.is_not_exists());
    }

    #[test]
    fn test_open_and_seek() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("f"), b"0123456789").unwrap();
        let accessor = LocalAccessor::new(dir.path());

        let mut stream = accessor
            .open_file(&format!("{}/f", dir.path().display()))
            .unwrap();
        stream.seek_to(4).unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"456");
    }

    #[test]
    fn test_remote_and_local_path_composition() {
        let accessor = LocalAccessor::new("/data/source");
        assert_eq!(accessor.remote_path("a/b.txt"), "/data/source/a/b.txt");
        assert_eq!(
            accessor.local_path(Path::new("/cache"), "/data/source/a/b.txt"),
            PathBuf::from("/cache/data/source/a/b.txt")
        );
    }
}

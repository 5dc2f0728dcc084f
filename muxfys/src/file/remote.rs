//! Handle that streams straight from the remote, without disk caching.

use super::FileHandle;
use crate::accessor::ObjectStream;
use crate::fs::{Attr, FsError};
use crate::remote::Remote;
use std::io::Read;
use std::sync::{Arc, Mutex};

/// Reads at offsets a little ahead of the stream position are cheaper to
/// satisfy by reading and discarding the gap than by a fresh range
/// request.
const SKIP_WINDOW: i64 = 1024 * 1024;

/// Serves reads by holding one open body stream and following the
/// caller's offsets: sequential reads continue the stream, short forward
/// jumps skip through it, anything else seeks (which re-opens the object
/// at the new offset under the hood). Writes are not supported without a
/// cache.
pub(crate) struct RemoteFile {
    remote: Arc<Remote>,
    name: String,
    remote_path: String,
    attr: Arc<Mutex<Attr>>,
    stream: Option<Box<dyn ObjectStream>>,
    position: i64,
}

impl RemoteFile {
    pub(crate) fn new(
        remote: Arc<Remote>,
        name: &str,
        remote_path: String,
        attr: Arc<Mutex<Attr>>,
    ) -> Self {
        Self {
            remote,
            name: name.to_string(),
            remote_path,
            attr,
            stream: None,
            position: 0,
        }
    }

}

fn skip_forward(stream: &mut dyn ObjectStream, gap: u64) -> Result<(), FsError> {
    let mut remaining = gap;
    let mut scratch = vec![0u8; 64 * 1024];
    while remaining > 0 {
        let want = scratch.len().min(remaining as usize);
        let got = stream.read(&mut scratch[..want])?;
        if got == 0 {
            return Err(FsError::Io);
        }
        remaining -= got as u64;
    }
    Ok(())
}

fn read_full(stream: &mut dyn ObjectStream, buf: &mut [u8]) -> Result<usize, FsError> {
    let mut filled = 0;
    while filled < buf.len() {
        let got = stream.read(&mut buf[filled..])?;
        if got == 0 {
            break;
        }
        filled += got;
    }
    Ok(filled)
}

impl FileHandle for RemoteFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn writeable(&self) -> bool {
        false
    }

    fn read(&mut self, offset: i64, size: u32) -> Result<Vec<u8>, FsError> {
        let file_size = self.attr.lock().unwrap().size as i64;
        if offset >= file_size {
            return Ok(Vec::new());
        }
        let end = (offset + size as i64).min(file_size);

        if self.stream.is_none() {
            self.stream = Some(self.remote.open_object(&self.remote_path, offset as u64)?);
            self.position = offset;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(FsError::Io);
        };
        if offset > self.position && offset - self.position <= SKIP_WINDOW {
            skip_forward(stream.as_mut(), (offset - self.position) as u64)?;
            self.position = offset;
        } else if offset != self.position {
            self.remote
                .seek_object(&self.remote_path, stream.as_mut(), offset as u64)?;
            self.position = offset;
        }

        let mut buf = vec![0u8; (end - offset) as usize];
        let filled = read_full(stream.as_mut(), &mut buf)?;
        buf.truncate(filled);
        self.position += filled as i64;
        Ok(buf)
    }

    fn write(&mut self, _offset: i64, _data: &[u8]) -> Result<u32, FsError> {
        // writing without a cache to stage into is not supported
        Err(FsError::NotSupported)
    }

    fn flush(&mut self) -> Result<(), FsError> {
        Ok(())
    }

    fn release(&mut self) {
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::LocalAccessor;
    use crate::fs::unix_now;
    use crate::log::{LogStore, Logger};
    use crate::remote::RemoteOptions;

    fn remote_file(contents: &[u8]) -> (tempfile::TempDir, RemoteFile) {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("obj"), contents).unwrap();
        let logger = Logger::new(Arc::new(LogStore::new()), false);
        let remote = Arc::new(Remote::new(RemoteOptions {
            accessor: Arc::new(LocalAccessor::new(source.path())),
            cache_data: false,
            cache_dir: None,
            cache_is_tmp: false,
            write: false,
            max_attempts: 1,
            logger,
        }));
        let remote_path = remote.get_remote_path("obj");
        let attr = Arc::new(Mutex::new(Attr::regular(contents.len() as u64, unix_now())));
        let file = RemoteFile::new(remote, "obj", remote_path, attr);
        (source, file)
    }

    #[test]
    fn test_sequential_reads() {
        let (_source, mut file) = remote_file(b"0123456789");
        assert_eq!(file.read(0, 4).unwrap(), b"0123");
        assert_eq!(file.read(4, 4).unwrap(), b"4567");
        assert_eq!(file.read(8, 4).unwrap(), b"89");
    }

    #[test]
    fn test_forward_jump_within_window_skips() {
        let (_source, mut file) = remote_file(b"0123456789abcdef");
        assert_eq!(file.read(0, 2).unwrap(), b"01");
        assert_eq!(file.read(10, 4).unwrap(), b"abcd");
    }

    #[test]
    fn test_backward_jump_seeks() {
        let (_source, mut file) = remote_file(b"0123456789");
        assert_eq!(file.read(6, 4).unwrap(), b"6789");
        assert_eq!(file.read(0, 4).unwrap(), b"0123");
    }

    #[test]
    fn test_far_forward_jump_seeks() {
        let body: Vec<u8> = (0..=255u16)
            .cycle()
            .take(3 * 1024 * 1024)
            .map(|b| b as u8)
            .collect();
        let (_source, mut file) = remote_file(&body);
        assert_eq!(file.read(0, 4).unwrap(), &body[..4]);
        let offset = 2 * 1024 * 1024;
        assert_eq!(file.read(offset, 4).unwrap(), &body[offset as usize..offset as usize + 4]);
    }

    #[test]
    fn test_reads_clip_at_object_size() {
        let (_source, mut file) = remote_file(b"hello");
        assert_eq!(file.read(3, 100).unwrap(), b"lo");
        assert!(file.read(5, 1).unwrap().is_empty());
    }

    #[test]
    fn test_writes_not_supported() {
        let (_source, mut file) = remote_file(b"hello");
        assert!(matches!(file.write(0, b"x"), Err(FsError::NotSupported)));
    }
}

//! Accessor over S3-compatible object stores.
//!
//! Built on `object_store`'s AWS client, which speaks to anything
//! S3-shaped (AWS, MinIO, Ceph). The client is async; the accessor owns a
//! small tokio runtime and blocks on it, because callers live inside
//! synchronous kernel callbacks.

use super::{AccessorError, ObjectStream, RemoteAccessor, RemoteEntry};
use crate::config::Target;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, GetOptions, GetRange, ObjectStore, PutOptions};
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::runtime::Runtime;

/// Accessor for one bucket (and optional sub-path) on one S3-compatible
/// host.
#[derive(Debug)]
pub struct S3Accessor {
    store: Arc<dyn ObjectStore>,
    runtime: Arc<Runtime>,
    target: String,
    host: String,
    bucket: String,
    base_path: String,
}

impl S3Accessor {
    /// Build a client for the given target. The first path component of
    /// the target URL is the bucket, the remainder the base path; `https`
    /// enables TLS. Missing credentials mean unsigned requests (public
    /// buckets).
    pub fn new(target: &Target) -> Result<Self, AccessorError> {
        if target.target.is_empty() {
            return Err(AccessorError::Store("no Target defined".to_string()));
        }
        let url = url::Url::parse(&target.target)
            .map_err(|e| AccessorError::Store(format!("bad target [{}]: {}", target.target, e)))?;
        let secure = url.scheme() == "https";
        if !secure && url.scheme() != "http" {
            return Err(AccessorError::Store(format!(
                "bad target [{}]: scheme must be http or https",
                target.target
            )));
        }
        let host = url
            .host_str()
            .map(|h| match url.port() {
                Some(port) => format!("{h}:{port}"),
                None => h.to_string(),
            })
            .ok_or_else(|| {
                AccessorError::Store(format!("bad target [{}]: no host", target.target))
            })?;

        let mut segments = url
            .path()
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty());
        let bucket = segments.next().map(str::to_string).ok_or_else(|| {
            AccessorError::Store(format!(
                "no bucket could be determined from [{}]",
                target.target
            ))
        })?;
        let base_path = segments.collect::<Vec<_>>().join("/");

        let scheme = if secure { "https" } else { "http" };
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(format!("{scheme}://{host}"))
            .with_bucket_name(&bucket)
            .with_region(if target.region.is_empty() {
                "us-east-1"
            } else {
                target.region.as_str()
            })
            .with_allow_http(!secure);
        if target.access_key.is_empty() && target.secret_key.is_empty() {
            builder = builder.with_skip_signature(true);
        } else {
            builder = builder
                .with_access_key_id(&target.access_key)
                .with_secret_access_key(&target.secret_key);
        }
        let store: Arc<dyn ObjectStore> = Arc::new(
            builder
                .build()
                .map_err(|e| AccessorError::Store(e.to_string()))?,
        );

        let runtime = Runtime::new().map_err(AccessorError::Io)?;
        Ok(Self {
            store,
            runtime: Arc::new(runtime),
            target: target.target.clone(),
            host,
            bucket,
            base_path,
        })
    }

    fn object_path(key: &str) -> ObjectPath {
        ObjectPath::from(key.trim_matches('/'))
    }
}

fn store_err(err: object_store::Error) -> AccessorError {
    match err {
        object_store::Error::NotFound { path, .. } => AccessorError::NotFound(path),
        other => AccessorError::Store(other.to_string()),
    }
}

impl RemoteAccessor for S3Accessor {
    fn list_entries(&self, dir: &str) -> Result<Vec<RemoteEntry>, AccessorError> {
        let trimmed = dir.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            None
        } else {
            Some(ObjectPath::from(trimmed))
        };
        let listing = self
            .runtime
            .block_on(self.store.list_with_delimiter(prefix.as_ref()))
            .map_err(store_err)?;

        let mut entries = Vec::new();
        for prefix in listing.common_prefixes {
            entries.push(RemoteEntry {
                name: format!("{prefix}/"),
                size: 0,
                mtime: SystemTime::UNIX_EPOCH,
            });
        }
        for object in listing.objects {
            entries.push(RemoteEntry {
                name: object.location.to_string(),
                size: object.size as i64,
                mtime: SystemTime::from(object.last_modified),
            });
        }
        Ok(entries)
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn ObjectStream>, AccessorError> {
        let stream = S3Stream::open(
            Arc::clone(&self.store),
            Arc::clone(&self.runtime),
            Self::object_path(path),
            0,
        )?;
        Ok(Box::new(stream))
    }

    fn download_file(&self, source: &str, dest: &Path) -> Result<(), AccessorError> {
        let path = Self::object_path(source);
        let result = self
            .runtime
            .block_on(self.store.get(&path))
            .map_err(store_err)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(crate::lock::FILE_MODE)
            .open(dest)?;
        self.runtime.block_on(async {
            let mut body = result.into_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(store_err)?;
                file.write_all(&chunk)?;
            }
            Ok::<(), AccessorError>(())
        })?;
        file.sync_all()?;
        Ok(())
    }

    fn upload_file(
        &self,
        source: &Path,
        dest: &str,
        content_type: &str,
    ) -> Result<(), AccessorError> {
        let body = std::fs::read(source)?;
        let path = Self::object_path(dest);
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        self.runtime
            .block_on(self.store.put_opts(&path, Bytes::from(body).into(), opts))
            .map_err(store_err)?;
        Ok(())
    }

    fn copy_file(&self, source: &str, dest: &str) -> Result<(), AccessorError> {
        self.runtime
            .block_on(
                self.store
                    .copy(&Self::object_path(source), &Self::object_path(dest)),
            )
            .map_err(store_err)
    }

    fn delete_file(&self, path: &str) -> Result<(), AccessorError> {
        match self
            .runtime
            .block_on(self.store.delete(&Self::object_path(path)))
        {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(store_err(e)),
        }
    }

    fn target(&self) -> String {
        self.target.clone()
    }

    fn remote_path(&self, rel_path: &str) -> String {
        match (self.base_path.is_empty(), rel_path.is_empty()) {
            (true, _) => rel_path.to_string(),
            (false, true) => self.base_path.clone(),
            (false, false) => format!("{}/{}", self.base_path, rel_path),
        }
    }

    fn local_path(&self, base_dir: &Path, remote_path: &str) -> PathBuf {
        base_dir
            .join(&self.host)
            .join(&self.bucket)
            .join(remote_path.trim_start_matches('/'))
    }
}

/// A body stream positioned at an offset. Seeking re-opens the object with
/// a range request starting at the new offset.
struct S3Stream {
    store: Arc<dyn ObjectStore>,
    runtime: Arc<Runtime>,
    path: ObjectPath,
    body: BoxStream<'static, object_store::Result<Bytes>>,
    buffer: Bytes,
}

impl S3Stream {
    fn open(
        store: Arc<dyn ObjectStore>,
        runtime: Arc<Runtime>,
        path: ObjectPath,
        offset: u64,
    ) -> Result<Self, AccessorError> {
        let body = Self::open_body(&store, &runtime, &path, offset)?;
        Ok(Self {
            store,
            runtime,
            path,
            body,
            buffer: Bytes::new(),
        })
    }

    fn open_body(
        store: &Arc<dyn ObjectStore>,
        runtime: &Runtime,
        path: &ObjectPath,
        offset: u64,
    ) -> Result<BoxStream<'static, object_store::Result<Bytes>>, AccessorError> {
        let options = if offset == 0 {
            GetOptions::default()
        } else {
            GetOptions {
                range: Some(GetRange::Offset(offset as _)),
                ..Default::default()
            }
        };
        let result = runtime
            .block_on(store.get_opts(path, options))
            .map_err(store_err)?;
        Ok(result.into_stream())
    }
}

impl Read for S3Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.buffer.is_empty() {
            match self.runtime.block_on(self.body.next()) {
                Some(Ok(chunk)) => self.buffer = chunk,
                Some(Err(e)) => return Err(io::Error::other(e)),
                None => return Ok(0),
            }
        }
        let n = self.buffer.len().min(buf.len());
        buf[..n].copy_from_slice(&self.buffer.split_to(n));
        Ok(n)
    }
}

impl ObjectStream for S3Stream {
    fn seek_to(&mut self, offset: u64) -> Result<(), AccessorError> {
        self.body = Self::open_body(&self.store, &self.runtime, &self.path, offset)?;
        self.buffer = Bytes::new();
        Ok(())
    }
}

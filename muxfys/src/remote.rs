//! One configured remote target bound to its cache policy and retry
//! behaviour.
//!
//! Every accessor call goes through the retry wrapper here: transient
//! failures are retried up to the configured attempt count under
//! exponential backoff, not-found is surfaced immediately, and each
//! outcome is logged in logfmt with call, path, retries and walltime.

use crate::accessor::{AccessorError, ObjectStream, RemoteAccessor, RemoteEntry};
use crate::interval::Interval;
use crate::lock::FILE_MODE;
use crate::log::Logger;
use crate::tracker::CacheTracker;
use rand::Rng;
use std::fs::OpenOptions;
use std::io::{self, Read};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";
const COPY_BUFFER: usize = 128 * 1024;

/// Errors from remote operations, after retries have been exhausted.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{call} failed after {attempts} attempts: {message}")]
    CallFailed {
        call: &'static str,
        attempts: u32,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Exponential backoff between retry attempts: 100 ms growing by a factor
/// of 3 up to 10 s, with full jitter below the computed ceiling.
#[derive(Debug, Clone)]
struct Backoff {
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 3.0,
            jitter: true,
        }
    }
}

impl Backoff {
    fn for_attempt(&self, attempt: u32) -> Duration {
        let min = self.min.as_secs_f64();
        let ceiling = (min * self.factor.powi(attempt as i32)).min(self.max.as_secs_f64());
        let secs = if self.jitter {
            min + (ceiling - min) * rand::thread_rng().gen::<f64>()
        } else {
            ceiling
        };
        Duration::from_secs_f64(secs)
    }
}

pub(crate) struct RemoteOptions {
    pub accessor: Arc<dyn RemoteAccessor>,
    pub cache_data: bool,
    pub cache_dir: Option<PathBuf>,
    pub cache_is_tmp: bool,
    pub write: bool,
    pub max_attempts: u32,
    pub logger: Logger,
}

/// A remote target bound to its cache directory, tracker and retry policy.
pub(crate) struct Remote {
    accessor: Arc<dyn RemoteAccessor>,
    pub(crate) cache_data: bool,
    cache_dir: Option<PathBuf>,
    pub(crate) cache_is_tmp: bool,
    pub(crate) write: bool,
    max_attempts: u32,
    backoff: Backoff,
    pub(crate) tracker: CacheTracker,
    pub(crate) logger: Logger,
}

impl Remote {
    pub(crate) fn new(opts: RemoteOptions) -> Self {
        Self {
            accessor: opts.accessor,
            cache_data: opts.cache_data,
            cache_dir: opts.cache_dir,
            cache_is_tmp: opts.cache_is_tmp,
            write: opts.write,
            max_attempts: opts.max_attempts.max(1),
            backoff: Backoff::default(),
            tracker: CacheTracker::new(),
            logger: opts.logger,
        }
    }

    /// The remote key for a mount-relative path.
    pub(crate) fn get_remote_path(&self, rel_path: &str) -> String {
        self.accessor.remote_path(rel_path)
    }

    /// The cache file for a remote key. Only meaningful in cached mode;
    /// the config layer guarantees a cache dir exists whenever
    /// `cache_data` is set.
    pub(crate) fn get_local_path(&self, remote_path: &str) -> PathBuf {
        let base = self
            .cache_dir
            .as_deref()
            .expect("cache_dir is always set when cache_data is");
        self.accessor.local_path(base, remote_path)
    }

    pub(crate) fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Run an accessor call under the retry policy. Not-found is never
    /// retried; other failures sleep under backoff and try again up to
    /// `max_attempts` total attempts.
    fn call<T>(
        &self,
        call: &'static str,
        path: &str,
        mut f: impl FnMut() -> Result<T, AccessorError>,
    ) -> Result<T, RemoteError> {
        let started = Instant::now();
        let mut previous: Option<AccessorError> = None;
        let mut failures = 0u32;
        loop {
            match f() {
                Ok(value) => {
                    let walltime = format!("{:.1?}", started.elapsed());
                    if failures > 0 {
                        self.logger.info(
                            "Remote call succeeded after retries",
                            &[
                                ("call", call.to_string()),
                                ("path", path.to_string()),
                                ("retries", failures.to_string()),
                                ("walltime", walltime),
                                (
                                    "previous_err",
                                    previous
                                        .as_ref()
                                        .map(ToString::to_string)
                                        .unwrap_or_default(),
                                ),
                            ],
                        );
                    } else {
                        self.logger.info(
                            "Remote call",
                            &[
                                ("call", call.to_string()),
                                ("path", path.to_string()),
                                ("walltime", walltime),
                            ],
                        );
                    }
                    return Ok(value);
                }
                Err(err) if err.is_not_exists() => {
                    return Err(RemoteError::NotFound(path.to_string()));
                }
                Err(err) => {
                    failures += 1;
                    if failures >= self.max_attempts {
                        self.logger.error(
                            "Remote call failed",
                            &[
                                ("call", call.to_string()),
                                ("path", path.to_string()),
                                ("retries", (failures - 1).to_string()),
                                ("walltime", format!("{:.1?}", started.elapsed())),
                                ("err", err.to_string()),
                            ],
                        );
                        return Err(RemoteError::CallFailed {
                            call,
                            attempts: failures,
                            message: err.to_string(),
                        });
                    }
                    std::thread::sleep(self.backoff.for_attempt(failures - 1));
                    previous = Some(err);
                }
            }
        }
    }

    /// Non-recursive listing of a remote prefix. A prefix that does not
    /// exist lists as empty: the root of a bucket is allowed to have
    /// nothing in it.
    pub(crate) fn find_objects(&self, prefix: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        match self.call("ListEntries", prefix, || self.accessor.list_entries(prefix)) {
            Ok(entries) => Ok(entries),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Open the object body positioned at `offset`.
    pub(crate) fn open_object(
        &self,
        remote_path: &str,
        offset: u64,
    ) -> Result<Box<dyn ObjectStream>, RemoteError> {
        self.call("OpenFile", remote_path, || {
            let mut stream = self.accessor.open_file(remote_path)?;
            if offset > 0 {
                stream.seek_to(offset)?;
            }
            Ok(stream)
        })
    }

    /// Reposition an already-open body; retried because remote backends
    /// satisfy this with a fresh range request.
    pub(crate) fn seek_object(
        &self,
        remote_path: &str,
        stream: &mut dyn ObjectStream,
        offset: u64,
    ) -> Result<(), RemoteError> {
        self.call("Seek", remote_path, || stream.seek_to(offset))
    }

    /// Fetch exactly the bytes of `iv` into the sparse file at
    /// `local_path`, recording the range as cached on success. A failure
    /// mid-transfer records nothing, so a later read retries the range.
    pub(crate) fn download_range(
        &self,
        remote_path: &str,
        local_path: &Path,
        iv: Interval,
    ) -> Result<(), RemoteError> {
        let mut stream = self.open_object(remote_path, iv.start as u64)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .mode(FILE_MODE)
            .open(local_path)?;

        let mut buf = vec![0u8; COPY_BUFFER];
        let mut offset = iv.start;
        let mut remaining = iv.length();
        while remaining > 0 {
            let want = buf.len().min(remaining as usize);
            let got = stream.read(&mut buf[..want])?;
            if got == 0 {
                self.logger.error(
                    "Remote object body ended early",
                    &[
                        ("path", remote_path.to_string()),
                        ("offset", offset.to_string()),
                        ("wanted", remaining.to_string()),
                    ],
                );
                return Err(RemoteError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "short body",
                )));
            }
            file.write_all_at(&buf[..got], offset as u64)?;
            offset += got as i64;
            remaining -= got as i64;
        }

        self.tracker.cached(local_path, iv);
        Ok(())
    }

    /// Whole-body download into a fresh cache file; afterwards the tracker
    /// knows the entire object is present.
    pub(crate) fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<(), RemoteError> {
        self.call("DownloadFile", remote_path, || {
            self.accessor.download_file(remote_path, local_path)
        })?;
        let size = std::fs::metadata(local_path)?.len();
        self.tracker
            .cache_override(local_path, Interval::new(0, size as i64));
        Ok(())
    }

    pub(crate) fn upload_file(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), RemoteError> {
        self.call("UploadFile", &local_path.display().to_string(), || {
            self.accessor
                .upload_file(local_path, remote_path, UPLOAD_CONTENT_TYPE)
        })
    }

    pub(crate) fn copy_file(&self, source: &str, dest: &str) -> Result<(), RemoteError> {
        self.call("CopyFile", source, || self.accessor.copy_file(source, dest))
    }

    /// Delete a remote object; deleting something already gone succeeds.
    pub(crate) fn delete_file(&self, remote_path: &str) -> Result<(), RemoteError> {
        match self.call("DeleteFile", remote_path, || {
            self.accessor.delete_file(remote_path)
        }) {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Remove an auto-created cache directory at unmount.
    pub(crate) fn delete_cache(&self) {
        if let Some(dir) = &self.cache_dir {
            if let Err(err) = std::fs::remove_dir_all(dir) {
                self.logger.error(
                    "Could not delete cache directory",
                    &[
                        ("path", dir.display().to_string()),
                        ("err", err.to_string()),
                    ],
                );
            }
        }
        self.tracker.cache_wipe();
    }
}

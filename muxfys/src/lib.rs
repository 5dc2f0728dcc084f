//! muxfys lets you in-process temporarily fuse-mount remote object stores
//! as a "filey" system: POSIX-like enough for reading and staged writing,
//! while the remote itself only ever sees whole objects.
//!
//! It allows "multiplexing": multiple buckets (or sub-directories of the
//! same bucket) can be mounted on the same local directory, so commands
//! you want to run against files in several buckets can use simple
//! relative paths. At most one of the multiplexed targets may accept
//! writes, and anything you create or alter is uploaded only at unmount.
//!
//! Reads can be cached on local disk as sparse files, fetched range by
//! range on demand, so repeated and partial reads of large objects are
//! cheap. Cache directories may be shared between processes; per-file
//! advisory locks keep them consistent.
//!
//! # Usage
//!
//! ```no_run
//! use muxfys::{Config, MuxFys, Target};
//!
//! // fully manual target configuration
//! let target1 = Target {
//!     target: "https://s3.amazonaws.com/mybucket/subdir".to_string(),
//!     region: "us-east-1".to_string(),
//!     access_key: std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
//!     secret_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
//!     cache_dir: "/tmp/muxfys/cache".to_string(),
//!     write: true,
//!     ..Default::default()
//! };
//!
//! // or read standard AWS S3 config files and environment variables
//! let mut target2 = Target {
//!     cache_data: true,
//!     ..Default::default()
//! };
//! target2.read_environment("default", "myotherbucket/another/subdir")?;
//!
//! let config = Config {
//!     mount: "/tmp/muxfys/mount".to_string(),
//!     cache_base: "/tmp".to_string(),
//!     retries: 3,
//!     verbose: true,
//!     targets: vec![target1, target2],
//! };
//!
//! let fs = MuxFys::new(&config)?;
//! fs.mount()?;
//! fs.unmount_on_death();
//!
//! // read from and write to files under /tmp/muxfys/mount; writes get
//! // uploaded to mybucket/subdir when you unmount
//!
//! fs.unmount()?;
//! let logs = fs.logs();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod accessor;
mod config;
mod file;
mod fs;
mod fuse;
mod interval;
mod lock;
mod log;
mod remote;
mod tracker;

pub use accessor::{AccessorError, LocalAccessor, ObjectStream, RemoteAccessor, RemoteEntry, S3Accessor};
pub use config::{Config, ConfigError, Target};
pub use fs::{MountError, MuxFys};
pub use interval::{Interval, Intervals};
pub use lock::FileMutex;
pub use log::{set_log_handler, LogLevel, LogSink, StderrSink, TracingSink};
pub use tracker::CacheTracker;

/// Version of the muxfys library, synchronized across the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Logging for mounted filey systems.
//!
//! Every mount keeps its messages in an in-memory [`LogStore`] so callers
//! can inspect what happened after the fact via `MuxFys::logs()`. A process
//! wide [`LogSink`] can additionally be installed with [`set_log_handler`]
//! to see messages as they are emitted; by default they are discarded.
//!
//! Lines are rendered in logfmt, e.g.
//! `t=... lvl=eror msg="Remote call failed" pkg=muxfys mount=/mnt
//! target=s3://bucket call=UploadFile path=... retries=0 walltime=12.3ms
//! err="..." caller=remote.rs:210`.

use std::fmt::Write as _;
use std::panic::Location;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

/// Message severity. Rendered in logfmt with four-character names
/// (`dbug`, `info`, `warn`, `eror`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_logfmt(self) -> &'static str {
        match self {
            LogLevel::Debug => "dbug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "eror",
        }
    }
}

/// Destination for rendered log lines, installed with [`set_log_handler`].
pub trait LogSink: Send + Sync {
    fn handle(&self, level: LogLevel, line: &str);
}

/// Sink that writes every line to standard error.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn handle(&self, _level: LogLevel, line: &str) {
        eprintln!("{line}");
    }
}

/// Sink that forwards lines to the `tracing` ecosystem at the matching
/// level, for applications that already have a subscriber installed.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn handle(&self, level: LogLevel, line: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "muxfys", "{line}"),
            LogLevel::Info => tracing::info!(target: "muxfys", "{line}"),
            LogLevel::Warn => tracing::warn!(target: "muxfys", "{line}"),
            LogLevel::Error => tracing::error!(target: "muxfys", "{line}"),
        }
    }
}

fn global_handler() -> &'static RwLock<Option<Arc<dyn LogSink>>> {
    static HANDLER: OnceLock<RwLock<Option<Arc<dyn LogSink>>>> = OnceLock::new();
    HANDLER.get_or_init(|| RwLock::new(None))
}

/// Define how log messages (globally for this crate) are handled as they
/// are emitted. Messages are always retrievable per mount from
/// `MuxFys::logs()`, but otherwise by default are discarded.
pub fn set_log_handler(sink: Arc<dyn LogSink>) {
    *global_handler().write().unwrap() = Some(sink);
}

/// In-memory store of rendered lines for one mount.
#[derive(Debug, Default)]
pub struct LogStore {
    lines: Mutex<Vec<String>>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }

    pub fn logs(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

/// A logger carrying ordered key=value context. Child loggers extend the
/// context, so a `Remote` logs with both its mount and its target attached.
#[derive(Clone)]
pub struct Logger {
    context: Vec<(String, String)>,
    store: Arc<LogStore>,
    store_level: LogLevel,
}

impl Logger {
    /// Root logger for a mount. When `verbose`, informational messages are
    /// stored as well as errors.
    pub fn new(store: Arc<LogStore>, verbose: bool) -> Self {
        let store_level = if verbose {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        Self {
            context: vec![("pkg".to_string(), "muxfys".to_string())],
            store,
            store_level,
        }
    }

    /// A logger with one more context pair appended.
    pub fn child(&self, key: &str, value: impl Into<String>) -> Self {
        let mut context = self.context.clone();
        context.push((key.to_string(), value.into()));
        Self {
            context,
            store: Arc::clone(&self.store),
            store_level: self.store_level,
        }
    }

    #[track_caller]
    pub fn debug(&self, msg: &str, fields: &[(&str, String)]) {
        self.log(LogLevel::Debug, msg, fields, Location::caller());
    }

    #[track_caller]
    pub fn info(&self, msg: &str, fields: &[(&str, String)]) {
        self.log(LogLevel::Info, msg, fields, Location::caller());
    }

    #[track_caller]
    pub fn warn(&self, msg: &str, fields: &[(&str, String)]) {
        self.log(LogLevel::Warn, msg, fields, Location::caller());
    }

    #[track_caller]
    pub fn error(&self, msg: &str, fields: &[(&str, String)]) {
        self.log(LogLevel::Error, msg, fields, Location::caller());
    }

    fn log(&self, level: LogLevel, msg: &str, fields: &[(&str, String)], loc: &Location) {
        let line = self.render(level, msg, fields, loc);
        if level >= self.store_level {
            self.store.append(line.clone());
        }
        if let Some(sink) = global_handler().read().unwrap().as_ref() {
            sink.handle(level, &line);
        }
    }

    fn render(&self, level: LogLevel, msg: &str, fields: &[(&str, String)], loc: &Location) -> String {
        let mut line = String::with_capacity(128);
        let t = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%z");
        write!(
            line,
            "t={} lvl={} msg={}",
            t,
            level.as_logfmt(),
            quote(msg)
        )
        .ok();
        for (k, v) in &self.context {
            write!(line, " {}={}", k, quote(v)).ok();
        }
        for (k, v) in fields {
            write!(line, " {}={}", k, quote(v)).ok();
        }
        let file = loc
            .file()
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_else(|| loc.file());
        write!(line, " caller={}:{}", file, loc.line()).ok();
        line
    }
}

fn quote(value: &str) -> String {
    if value.is_empty() || value.contains([' ', '=', '"']) {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_always_stored() {
        let store = Arc::new(LogStore::new());
        let logger = Logger::new(Arc::clone(&store), false);
        logger.error("Remote call failed", &[("call", "UploadFile".to_string())]);

        let logs = store.logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].contains("lvl=eror"));
        assert!(logs[0].contains("msg=\"Remote call failed\""));
        assert!(logs[0].contains("call=UploadFile"));
        assert!(logs[0].contains("pkg=muxfys"));
        assert!(logs[0].contains("caller=log.rs:"));
    }

    #[test]
    fn test_info_only_stored_when_verbose() {
        let store = Arc::new(LogStore::new());
        let quiet = Logger::new(Arc::clone(&store), false);
        quiet.info("Remote call", &[]);
        assert!(store.logs().is_empty());

        let store = Arc::new(LogStore::new());
        let verbose = Logger::new(Arc::clone(&store), true);
        verbose.info("Remote call", &[]);
        assert_eq!(store.logs().len(), 1);
    }

    #[test]
    fn test_child_context_appended_in_order() {
        let store = Arc::new(LogStore::new());
        let logger = Logger::new(Arc::clone(&store), true)
            .child("mount", "/mnt")
            .child("target", "s3://bucket/sub");
        logger.info("hi", &[]);

        let line = &store.logs()[0];
        let mount_at = line.find("mount=/mnt").unwrap();
        let target_at = line.find("target=s3://bucket/sub").unwrap();
        assert!(mount_at < target_at);
    }

    #[test]
    fn test_values_with_spaces_are_quoted() {
        assert_eq!(quote("upload failed"), "\"upload failed\"");
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote(""), "\"\"");
    }
}

//! Log emission for the reconciler and task runner.
//!
//! The core never calls the global logger directly. Every message goes through a
//! [`LogSink`] handed down from `main`, which keeps the runner testable and lets
//! the binary decide where lines end up. [`TracingSink`] forwards to `tracing`,
//! and [`init_subscriber`] installs the process-wide subscriber once at startup.

use std::fmt;
use std::io::IsTerminal;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Severity attached to every emitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Receiver for leveled, already formatted messages.
pub trait LogSink {
    fn emit(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.emit(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.emit(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.emit(LogLevel::Warn, message);
    }
}

/// Sink that forwards every message to the installed `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }
}

/// Build the filter: an explicit directive wins, then `RUST_LOG`, then `info`.
pub fn build_filter(directive: Option<&str>) -> EnvFilter {
    match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Install the global subscriber.
///
/// When `log_file` is set, output is duplicated into that file through a
/// non-blocking writer. The returned guard must be held until exit so buffered
/// lines are flushed.
pub fn init_subscriber(
    directive: Option<&str>,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(directive))
        .compact()
        .with_target(false);

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let file_name = path
                .file_name()
                .with_context(|| format!("log file path has no file name: {}", path.display()))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            builder
                .with_ansi(false)
                .with_writer(std::io::stdout.and(file_writer))
                .try_init()
                .map_err(|e| anyhow::anyhow!("install log subscriber: {e}"))?;
            Ok(Some(guard))
        }
        None => {
            builder
                .with_ansi(std::io::stdout().is_terminal())
                .try_init()
                .map_err(|e| anyhow::anyhow!("install log subscriber: {e}"))?;
            Ok(None)
        }
    }
}

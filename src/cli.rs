//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::logging::LogLevel;

/// Minimum level written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Verbosity {
    Debug,
    Info,
    #[value(alias = "warn")]
    Warning,
}

impl Verbosity {
    /// `tracing_subscriber` filter directive.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
        }
    }
}

/// Level used for output lines that are neither updates nor statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PlainLevel {
    Debug,
    #[default]
    Info,
}

impl From<PlainLevel> for LogLevel {
    fn from(level: PlainLevel) -> Self {
        match level {
            PlainLevel::Debug => LogLevel::Debug,
            PlainLevel::Info => LogLevel::Info,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "backup-runner",
    version,
    about = "Make rclone remotes match the config, then run the backup tasks"
)]
pub struct Cli {
    /// Configuration file (JSON, or TOML with a .toml extension).
    /// Defaults to ./backupconf.json, then the user config directory.
    #[arg(short, long, env = "BACKUP_RUNNER_CONFIG")]
    pub config: Option<PathBuf>,

    /// rclone executable; looked up on PATH when omitted.
    #[arg(long, env = "RCLONE_BINARY")]
    pub rclone: Option<PathBuf>,

    /// Minimum log level. RUST_LOG is used when this is not given.
    #[arg(short, long, value_enum)]
    pub log_level: Option<Verbosity>,

    /// Also write the log to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Level for unrecognised rclone output lines.
    #[arg(long, value_enum, default_value_t = PlainLevel::Info)]
    pub plain_level: PlainLevel,

    /// Abort the remaining tasks after the first failure.
    #[arg(long)]
    pub stop_on_failure: bool,

    /// Do not touch rclone remotes, only run tasks.
    #[arg(long)]
    pub skip_remotes: bool,

    /// Log the rclone commands that would run without running them.
    #[arg(long)]
    pub dry_run: bool,
}

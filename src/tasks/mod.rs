//! Task execution and output normalization.
//!
//! - **runner**: runs the declared tasks one by one through rclone
//! - **output**: classifies each output line and formats it for the log
//!
//! # Example
//!
//! ```rust,ignore
//! use backup_runner::logging::TracingSink;
//! use backup_runner::rclone::Rclone;
//! use backup_runner::tasks::TaskRunner;
//!
//! let rclone = Rclone::locate(None)?;
//! let report = TaskRunner::new(&rclone, &TracingSink).run(&config.tasks);
//! println!("{} of {} tasks succeeded", report.succeeded(), report.results.len());
//! ```

pub mod output;
pub mod runner;

pub use output::{Classifier, LineCategory, LogLine, StreamDecodeError, decode_line};
pub use runner::{RunReport, TaskResult, TaskRunner, TaskStatus, ensure_verbosity, task_args};

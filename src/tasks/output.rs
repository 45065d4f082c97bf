//! Classification and reformatting of rclone output lines.
//!
//! rclone run with `-v` prints three kinds of lines that matter here:
//!
//! ```text
//! 2023/05/01 10:00:00 INFO  : photos/a.jpg: Copied (new)     timestamped update
//! Transferred:        1.234 MiB / 1.234 MiB, 100%            summary statistic
//! anything else                                              plain
//! ```
//!
//! Timestamped updates lose the stamp and the severity tag and become
//! `Modified     : <body>` at debug level. Summary lines get a fixed-width
//! label. Everything else is passed through. Blank results are dropped.

use std::fmt;

use thiserror::Error;

use crate::logging::LogLevel;

/// Length of `YYYY/MM/DD HH:MM:SS`.
const TIMESTAMP_LEN: usize = 19;

/// rclone's message when a run had nothing to copy.
const NOTHING_TO_TRANSFER: &str = "There was nothing to transfer";

const MODIFIED_PREFIX: &str = "Modified     : ";

/// Width of the label column for summary statistics.
const LABEL_WIDTH: usize = 14;

/// Prefixes of the end-of-run statistics block.
const SUMMARY_PREFIXES: [&str; 4] = ["Transferred", "Checks", "Elapsed time", "Deleted"];

/// What kind of line rclone printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCategory {
    TimestampedUpdate,
    SummaryStat,
    Plain,
}

/// A classified output line, attributed to the task that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub raw: String,
    pub category: LineCategory,
    pub level: LogLevel,
    pub text: String,
    pub task_index: usize,
    pub task_name: String,
}

impl LogLine {
    /// The message handed to the log sink.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task {} ({}): {}", self.task_index, self.task_name, self.text)
    }
}

/// A line of output that is not valid UTF-8.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("output line is not valid UTF-8 (valid up to byte {valid_up_to})")]
pub struct StreamDecodeError {
    pub valid_up_to: usize,
    /// Lossy rendering with U+FFFD in place of invalid sequences.
    pub lossy: String,
}

/// Decode one raw line, dropping a trailing `\r`.
pub fn decode_line(bytes: &[u8]) -> Result<String, StreamDecodeError> {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok(s.to_string()),
        Err(e) => Err(StreamDecodeError {
            valid_up_to: e.valid_up_to(),
            lossy: String::from_utf8_lossy(bytes).into_owned(),
        }),
    }
}

/// True when `line` starts with `YYYY/MM/DD HH:MM:SS`.
pub fn has_timestamp(line: &str) -> bool {
    const PATTERN: &[u8; TIMESTAMP_LEN] = b"dddd/dd/dd dd:dd:dd";

    let bytes = line.as_bytes();
    bytes.len() >= TIMESTAMP_LEN
        && PATTERN
            .iter()
            .zip(bytes)
            .all(|(&p, &b)| if p == b'd' { b.is_ascii_digit() } else { p == b })
}

/// Stateless line classifier.
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    plain_level: LogLevel,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            plain_level: LogLevel::Info,
        }
    }
}

impl Classifier {
    /// Level for lines that match neither known shape.
    pub fn with_plain_level(mut self, level: LogLevel) -> Self {
        self.plain_level = level;
        self
    }

    /// Classify and reformat one line. `None` means the line is suppressed.
    pub fn classify(&self, line: &str) -> Option<(LineCategory, LogLevel, String)> {
        let (category, level, text) = if has_timestamp(line) {
            let body = update_body(&line[TIMESTAMP_LEN..]);
            if body.is_empty() || body == NOTHING_TO_TRANSFER {
                return None;
            }
            (
                LineCategory::TimestampedUpdate,
                LogLevel::Debug,
                format!("{MODIFIED_PREFIX}{body}"),
            )
        } else if let Some(text) = summary_stat(line) {
            (LineCategory::SummaryStat, LogLevel::Info, text)
        } else {
            (LineCategory::Plain, self.plain_level, line.to_string())
        };

        if text.trim().is_empty() {
            None
        } else {
            Some((category, level, text))
        }
    }

    /// Classify a line on behalf of task `task_index`.
    pub fn log_line(&self, task_index: usize, task_name: &str, raw: &str) -> Option<LogLine> {
        let (category, level, text) = self.classify(raw)?;
        Some(LogLine {
            raw: raw.to_string(),
            category,
            level,
            text,
            task_index,
            task_name: task_name.to_string(),
        })
    }
}

/// Drop the severity tag (`INFO  :`, `NOTICE:`) and return the trimmed body.
///
/// Segments after the tag are joined back, so colons inside the message
/// (`file.txt: Copied (new)`) survive.
fn update_body(rest: &str) -> &str {
    match rest.split_once(':') {
        Some((_tag, body)) => body.trim(),
        None => rest.trim(),
    }
}

/// Reformat a summary statistic line, or `None` if `line` is not one.
fn summary_stat(line: &str) -> Option<String> {
    if !SUMMARY_PREFIXES.iter().any(|p| line.starts_with(p)) {
        return None;
    }
    let (label, value) = line.split_once(':')?;
    Some(format!(
        "{:<width$.width$}: {}",
        label,
        value.trim(),
        width = LABEL_WIDTH
    ))
}

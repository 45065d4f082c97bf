//! Thin wrapper around the rclone binary.
//!
//! Three command forms are used:
//!
//! - `rclone config dump` to read the registered remotes as JSON
//! - `rclone config create <name> <type> [<key> <value>]...`
//! - `rclone <operation> <source> <destination> [flags]...`, streamed
//!
//! Every command is built as an argument array. Nothing is ever joined into a
//! shell string and split again.
//!
//! The streamed form points stdout and stderr at the write end of a single
//! pipe, so the child's writes land in one byte stream in the order they were
//! made. One reader thread pushes raw lines into a channel, and the caller
//! drains it while the process is still running.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use serde_json::Value;
use thiserror::Error;

use crate::config::scalar_to_string;

/// Default executable name looked up on `PATH`.
pub const DEFAULT_BINARY: &str = "rclone";

/// Errors from invoking rclone.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("could not locate '{name}' on PATH: {message}")]
    NotFound { name: String, message: String },

    #[error("failed to execute {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}{}", display_code(.code), display_detail(.detail))]
    ExitStatus {
        command: String,
        code: Option<i32>,
        detail: String,
    },

    #[error("unexpected `config dump` output: {0}")]
    DumpFormat(String),

    #[error("I/O error while reading rclone output: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Exit code carried by an [`ToolError::ExitStatus`], if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitStatus { code, .. } => *code,
            _ => None,
        }
    }
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

fn display_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {detail}")
    }
}

/// Remote name to property mapping as reported by `config dump`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteState {
    remotes: BTreeMap<String, BTreeMap<String, String>>,
}

impl RemoteState {
    pub fn new(remotes: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self { remotes }
    }

    /// Parse the JSON object printed by `rclone config dump`.
    pub fn from_dump(output: &str) -> Result<Self, ToolError> {
        // An empty rclone config prints nothing on some versions.
        if output.trim().is_empty() {
            return Ok(Self::default());
        }

        let root: BTreeMap<String, BTreeMap<String, Value>> =
            serde_json::from_str(output).map_err(|e| ToolError::DumpFormat(e.to_string()))?;

        let mut remotes = BTreeMap::new();
        for (name, props) in root {
            let mut properties = BTreeMap::new();
            for (key, value) in props {
                let value = scalar_to_string(&value).ok_or_else(|| {
                    ToolError::DumpFormat(format!("remote '{name}' key '{key}' is not a scalar"))
                })?;
                properties.insert(key, value);
            }
            remotes.insert(name, properties);
        }
        Ok(Self { remotes })
    }

    /// Registered properties for `name`, or `None` when rclone does not know it.
    pub fn get(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.remotes.get(name)
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }
}

/// Captured result of a short-lived rclone command.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded. rclone prints notices here even on
    /// success.
    pub stderr: String,
}

/// Handle to the rclone executable.
#[derive(Debug, Clone)]
pub struct Rclone {
    program: PathBuf,
}

impl Rclone {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use `explicit` when given, otherwise search `PATH` for `rclone`.
    pub fn locate(explicit: Option<&Path>) -> Result<Self, ToolError> {
        match explicit {
            Some(path) => Ok(Self::new(path)),
            None => which::which(DEFAULT_BINARY)
                .map(Self::new)
                .map_err(|e| ToolError::NotFound {
                    name: DEFAULT_BINARY.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Human-readable command line, for logs only.
    pub fn display_command(&self, args: &[String]) -> String {
        let name = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string());
        std::iter::once(name)
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).stdin(Stdio::null());
        cmd
    }

    /// Run to completion and capture output; a non-zero exit is an error.
    pub fn output(&self, args: &[String]) -> Result<ToolOutput, ToolError> {
        let output = self
            .command(args)
            .output()
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ToolError::ExitStatus {
                command: self.display_command(args),
                code: output.status.code(),
                detail: stderr.trim().to_string(),
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }

    /// `rclone config dump`, parsed.
    pub fn dump_config(&self) -> Result<RemoteState, ToolError> {
        let output = self.output(&["config".to_string(), "dump".to_string()])?;
        RemoteState::from_dump(&output.stdout)
    }

    /// `rclone config create <args>`.
    pub fn create_remote(&self, create_args: &[String]) -> Result<ToolOutput, ToolError> {
        let mut args = Vec::with_capacity(create_args.len() + 2);
        args.push("config".to_string());
        args.push("create".to_string());
        args.extend_from_slice(create_args);
        self.output(&args)
    }

    /// Spawn a long-running command and expose its merged output.
    pub fn stream(&self, args: &[String]) -> Result<OutputStream, ToolError> {
        let (reader, writer) = std::io::pipe()?;

        let mut cmd = self.command(args);
        cmd.stdout(writer.try_clone()?).stderr(writer);
        let spawned = cmd.spawn();
        // The command still owns both write handles; the reader only sees
        // end-of-file once they are gone and the child has exited.
        drop(cmd);
        let child = spawned.map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let reader = spawn_reader(reader, tx);

        Ok(OutputStream {
            command: self.display_command(args),
            child,
            lines: rx,
            reader: Some(reader),
        })
    }
}

/// Forward raw lines from the pipe, newline stripped.
fn spawn_reader<R: Read + Send + 'static>(
    pipe: R,
    tx: Sender<std::io::Result<Vec<u8>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        loop {
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                    }
                    if tx.send(Ok(buf)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    })
}

/// Merged stdout/stderr of a running rclone process.
///
/// Iterating blocks until the next line arrives and ends when every write end
/// of the pipe is closed. Call [`OutputStream::wait`] afterwards to reap the process.
pub struct OutputStream {
    command: String,
    child: Child,
    lines: Receiver<std::io::Result<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl OutputStream {
    /// Join the reader thread and the child, returning its exit status.
    pub fn wait(mut self) -> Result<ExitStatus, ToolError> {
        // Drain anything still buffered so the reader can finish.
        while self.lines.recv().is_ok() {}
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        Ok(self.child.wait()?)
    }

    /// Like [`OutputStream::wait`], but a non-zero exit becomes an error.
    pub fn finish(self) -> Result<ExitStatus, ToolError> {
        let command = self.command.clone();
        let status = self.wait()?;
        if status.success() {
            Ok(status)
        } else {
            Err(ToolError::ExitStatus {
                command,
                code: status.code(),
                detail: String::new(),
            })
        }
    }
}

impl Iterator for OutputStream {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.recv().ok()
    }
}

//! Backup configuration: desired remotes and the ordered task list.
//!
//! The file is JSON (the historical `backupconf.json`) or TOML when the
//! extension is `.toml`:
//!
//! ```json
//! {
//!   "remotes": {
//!     "b2": { "type": "b2", "account": "abc", "key": "secret" }
//!   },
//!   "tasks": [
//!     { "name": "photos", "task": "sync", "src": "/srv/photos", "dest": "b2:photos", "args": "--fast-list" }
//!   ]
//! }
//! ```
//!
//! `args` may be a single string (split with shell-word rules) or a list of
//! tokens. Everything is validated up front so a broken file fails before any
//! rclone invocation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// File names probed when no explicit path is given.
pub const DEFAULT_FILE_NAMES: [&str; 2] = ["backupconf.json", "backupconf.toml"];

/// Property key holding the backend kind of a remote.
pub const TYPE_KEY: &str = "type";

/// Errors raised while loading or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no configuration file found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("remote '{remote}' has no type")]
    MissingRemoteType { remote: String },

    #[error("remote '{remote}' option '{key}' must be a string, number or boolean")]
    InvalidOption { remote: String, key: String },

    #[error("task '{task}' has no operation")]
    MissingOperation { task: String },

    #[error("task '{task}' has malformed args: {message}")]
    InvalidArgs { task: String, message: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A desired rclone remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub name: String,
    /// All properties, `type` included, keyed in sorted order.
    pub properties: BTreeMap<String, String>,
}

impl RemoteSpec {
    pub fn new(name: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    /// Backend kind; a missing or blank `type` is a configuration error.
    pub fn kind(&self) -> Result<&str, ConfigError> {
        self.properties
            .get(TYPE_KEY)
            .map(String::as_str)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRemoteType {
                remote: self.name.clone(),
            })
    }

    /// Backend-specific options, everything except `type`.
    pub fn options(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .filter(|(k, _)| k.as_str() != TYPE_KEY)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Properties as rclone would store them: entries with an empty key or
    /// value are never passed to `config create`, so they are left out here too.
    pub fn stored_properties(&self) -> BTreeMap<String, String> {
        self.properties
            .iter()
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// One declared rclone operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub operation: String,
    pub source: String,
    pub destination: String,
    pub args: Vec<String>,
}

/// Whole-run configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupConfig {
    pub remotes: Vec<RemoteSpec>,
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    remotes: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    name: String,
    #[serde(alias = "task")]
    operation: String,
    #[serde(alias = "src", default)]
    source: String,
    #[serde(alias = "dest", default)]
    destination: String,
    #[serde(default)]
    args: RawArgs,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawArgs {
    Line(String),
    List(Vec<String>),
}

impl Default for RawArgs {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

/// Render a scalar property value the way rclone stores it.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

impl BackupConfig {
    /// Locate the configuration file.
    ///
    /// An explicit path is used as-is. Otherwise the working directory is
    /// probed first, then the user configuration directory.
    pub fn discover(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        let mut searched = Vec::new();
        let mut dirs = vec![PathBuf::from(".")];
        if let Some(project) = directories::ProjectDirs::from("", "", "backup-runner") {
            dirs.push(project.config_dir().to_path_buf());
        }

        for dir in dirs {
            for name in DEFAULT_FILE_NAMES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
                searched.push(candidate);
            }
        }

        Err(ConfigError::NotFound { searched })
    }

    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let parsed = if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        };

        // Attach the path to parse errors raised without one.
        parsed.map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        Self::from_raw(raw)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut remotes = Vec::with_capacity(raw.remotes.len());
        for (name, props) in raw.remotes {
            let mut properties = BTreeMap::new();
            for (key, value) in props {
                let value = scalar_to_string(&value).ok_or_else(|| ConfigError::InvalidOption {
                    remote: name.clone(),
                    key: key.clone(),
                })?;
                properties.insert(key, value);
            }
            remotes.push(RemoteSpec::new(name, properties));
        }

        let mut tasks = Vec::with_capacity(raw.tasks.len());
        for task in raw.tasks {
            let args = match task.args {
                RawArgs::List(tokens) => tokens,
                RawArgs::Line(line) => {
                    shell_words::split(&line).map_err(|e| ConfigError::InvalidArgs {
                        task: task.name.clone(),
                        message: e.to_string(),
                    })?
                }
            };
            tasks.push(TaskSpec {
                name: task.name,
                operation: task.operation,
                source: task.source,
                destination: task.destination,
                args,
            });
        }

        let config = Self { remotes, tasks };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the reconciler and runner rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for remote in &self.remotes {
            remote.kind()?;
        }
        for task in &self.tasks {
            if task.operation.trim().is_empty() {
                return Err(ConfigError::MissingOperation {
                    task: task.name.clone(),
                });
            }
        }
        Ok(())
    }
}

//! Remote reconciliation.
//!
//! Desired remotes from the configuration are compared with what
//! `rclone config dump` reports. An exact match (all properties, `type`
//! included, order ignored) needs nothing. Anything else, a missing remote or
//! any differing property, is recreated with `rclone config create`; there is
//! no incremental update.
//!
//! Remotes are processed one at a time and independently: a failure on one
//! is recorded in the [`ReconcileReport`] and the loop moves on.

use thiserror::Error;

use crate::config::{ConfigError, RemoteSpec};
use crate::logging::LogSink;
use crate::rclone::{Rclone, RemoteState, ToolError, ToolOutput};

/// Source of truth for registered remotes, and the way to register one.
pub trait RemoteRegistry {
    /// Current remotes as known to the tool.
    fn dump_remotes(&self) -> Result<RemoteState, ToolError>;

    /// Create (or overwrite) a remote from `[name, type, k, v, ...]`.
    /// Returns whatever the tool printed.
    fn register_remote(&self, args: &[String]) -> Result<ToolOutput, ToolError>;
}

impl RemoteRegistry for Rclone {
    fn dump_remotes(&self) -> Result<RemoteState, ToolError> {
        self.dump_config()
    }

    fn register_remote(&self, args: &[String]) -> Result<ToolOutput, ToolError> {
        self.create_remote(args)
    }
}

/// Why a single remote could not be reconciled.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("registered remotes unavailable: {0}")]
    StateUnavailable(String),
}

/// What happened to one desired remote.
#[derive(Debug)]
pub enum RemoteOutcome {
    /// Already registered with identical properties.
    Matched,
    /// Create command issued and succeeded.
    Created,
    /// Dry run: the create command that would have been issued.
    Planned(Vec<String>),
    /// Validation, the create command, or the state dump failed.
    Failed(ReconcileError),
}

impl RemoteOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Per-remote results of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Remote name and outcome, in processing order.
    pub outcomes: Vec<(String, RemoteOutcome)>,
}

impl ReconcileReport {
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, RemoteOutcome::Created))
    }

    pub fn matched(&self) -> usize {
        self.count(|o| matches!(o, RemoteOutcome::Matched))
    }

    pub fn failed(&self) -> usize {
        self.count(RemoteOutcome::is_failure)
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, name: &str) -> Option<&RemoteOutcome> {
        self.outcomes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| o)
    }

    fn count(&self, pred: impl Fn(&RemoteOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Positional arguments for `rclone config create`: name, type, then each
/// option as key and value.
///
/// Options with an empty key or value are left out so that no empty token is
/// ever passed to the tool.
pub fn create_args(remote: &RemoteSpec) -> Result<Vec<String>, ConfigError> {
    let kind = remote.kind()?;
    let mut args = vec![remote.name.clone(), kind.to_string()];
    for (key, value) in remote.options() {
        if key.is_empty() || value.is_empty() {
            continue;
        }
        args.push(key.to_string());
        args.push(value.to_string());
    }
    Ok(args)
}

/// Drives one reconciliation pass.
pub struct RemoteReconciler<'a, R: RemoteRegistry> {
    registry: &'a R,
    sink: &'a dyn LogSink,
    dry_run: bool,
}

impl<'a, R: RemoteRegistry> RemoteReconciler<'a, R> {
    pub fn new(registry: &'a R, sink: &'a dyn LogSink) -> Self {
        Self {
            registry,
            sink,
            dry_run: false,
        }
    }

    /// Log create commands instead of running them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn reconcile(&self, desired: &[RemoteSpec]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let actual = match self.registry.dump_remotes() {
            Ok(state) => {
                self.sink
                    .debug(&format!("rclone reports {} registered remote(s)", state.len()));
                state
            }
            Err(e) => {
                // Without the current state every remote would look missing;
                // recreating all of them blindly is worse than doing nothing.
                self.sink
                    .warn(&format!("Could not read rclone configuration: {e}"));
                let reason = e.to_string();
                for remote in desired {
                    report.outcomes.push((
                        remote.name.clone(),
                        RemoteOutcome::Failed(ReconcileError::StateUnavailable(reason.clone())),
                    ));
                }
                return report;
            }
        };

        for remote in desired {
            let outcome = self.reconcile_one(remote, &actual);
            if let RemoteOutcome::Failed(e) = &outcome {
                self.sink
                    .warn(&format!("Failed to reconcile remote {}: {e}", remote.name));
            }
            report.outcomes.push((remote.name.clone(), outcome));
        }
        report
    }

    fn reconcile_one(&self, remote: &RemoteSpec, actual: &RemoteState) -> RemoteOutcome {
        self.sink
            .debug(&format!("Matching config to {}", remote.name));

        // Validate before touching the tool.
        let args = match create_args(remote) {
            Ok(args) => args,
            Err(e) => return RemoteOutcome::Failed(e.into()),
        };

        match actual.get(&remote.name) {
            Some(registered) if *registered == remote.stored_properties() => {
                self.sink.debug(&format!(
                    "{} already exists and matches config",
                    remote.name
                ));
                return RemoteOutcome::Matched;
            }
            Some(_) => self
                .sink
                .debug(&format!("{} differs from config, recreating", remote.name)),
            None => self
                .sink
                .debug(&format!("{} is not registered, creating", remote.name)),
        }

        if self.dry_run {
            self.sink
                .info(&format!("Would run: rclone config create {}", args.join(" ")));
            return RemoteOutcome::Planned(args);
        }

        match self.registry.register_remote(&args) {
            Ok(output) => {
                for text in [&output.stdout, &output.stderr] {
                    let text = text.trim();
                    if !text.is_empty() {
                        self.sink.debug(text);
                    }
                }
                self.sink.debug(&format!("Remote {} created", remote.name));
                RemoteOutcome::Created
            }
            Err(e) => RemoteOutcome::Failed(e.into()),
        }
    }
}

pub mod cli;
pub mod config;
pub mod logging;
pub mod rclone;
pub mod remotes;
pub mod tasks;

use anyhow::{Context, Result};

use crate::cli::Cli;
use crate::config::BackupConfig;
use crate::logging::LogSink;
use crate::rclone::Rclone;
use crate::remotes::{ReconcileReport, RemoteReconciler};
use crate::tasks::{Classifier, RunReport, TaskRunner};

/// Outcome of one invocation.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub remotes: ReconcileReport,
    pub tasks: RunReport,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.remotes.all_succeeded() && self.tasks.all_succeeded()
    }
}

/// Library entrypoint: load config, reconcile remotes, run tasks.
///
/// Errors returned here are fatal (configuration, locating rclone). Failures of
/// individual remotes or tasks are reported in the [`RunSummary`].
pub fn run(cli: &Cli, sink: &dyn LogSink) -> Result<RunSummary> {
    let path = BackupConfig::discover(cli.config.as_deref())?;
    sink.info(&format!("Reading configuration from {}", path.display()));
    let config = BackupConfig::load(&path)?;
    sink.info(&format!(
        "Loaded {} remote(s) and {} task(s)",
        config.remotes.len(),
        config.tasks.len()
    ));

    let rclone = Rclone::locate(cli.rclone.as_deref()).context("resolve rclone executable")?;
    sink.debug(&format!("Using {}", rclone.program().display()));

    let mut summary = RunSummary::default();

    if cli.skip_remotes {
        sink.info("Skipping remote checks");
    } else {
        sink.info("Checking remotes...");
        summary.remotes = RemoteReconciler::new(&rclone, sink)
            .with_dry_run(cli.dry_run)
            .reconcile(&config.remotes);
        sink.info(&format!(
            "Remotes done: {} matched, {} created, {} failed",
            summary.remotes.matched(),
            summary.remotes.created(),
            summary.remotes.failed()
        ));
    }

    sink.info("Starting tasks");
    summary.tasks = TaskRunner::new(&rclone, sink)
        .with_classifier(Classifier::default().with_plain_level(cli.plain_level.into()))
        .with_stop_on_failure(cli.stop_on_failure)
        .with_dry_run(cli.dry_run)
        .run(&config.tasks);

    for failed in summary.tasks.failures() {
        if let tasks::TaskStatus::Failed(e) = &failed.status {
            sink.warn(&format!("Failed task {} ({}): {e}", failed.index, failed.name));
        }
    }
    sink.info(&format!(
        "Tasks complete: {} succeeded, {} failed, {} skipped",
        summary.tasks.succeeded(),
        summary.tasks.failed(),
        summary.tasks.skipped()
    ));

    Ok(summary)
}

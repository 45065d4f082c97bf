//! Sequential task execution.
//!
//! Tasks run strictly in declared order; later tasks often depend on earlier
//! ones finishing against the same destination. Each task is one rclone
//! process whose merged output is classified line by line while it runs.
//!
//! A task fails when rclone cannot be spawned or exits non-zero. By default the
//! remaining tasks still run; [`TaskRunner::with_stop_on_failure`] aborts the
//! queue instead and marks the rest as skipped.

use std::time::Instant;

use crate::config::TaskSpec;
use crate::logging::LogSink;
use crate::rclone::{Rclone, ToolError};

use super::output::{Classifier, decode_line};

/// Flag appended when a task's args carry no verbosity flag.
pub const DEFAULT_VERBOSITY_FLAG: &str = "-v";

/// Whether `arg` already raises rclone's verbosity.
///
/// Recognises `-v`, `-vv`, `-vvv`..., `--verbose` and `--verbose=<n>`.
pub fn is_verbosity_flag(arg: &str) -> bool {
    if let Some(vs) = arg.strip_prefix('-')
        && !vs.is_empty()
        && vs.chars().all(|c| c == 'v')
    {
        return true;
    }
    arg == "--verbose" || arg.starts_with("--verbose=")
}

/// Copy of `args` with a verbosity flag appended if none is present.
///
/// The input is never modified, so a configuration shared between runs keeps
/// its original args.
pub fn ensure_verbosity(args: &[String]) -> Vec<String> {
    let mut out = args.to_vec();
    if !args.iter().any(|a| is_verbosity_flag(a)) {
        out.push(DEFAULT_VERBOSITY_FLAG.to_string());
    }
    out
}

/// Full rclone argument list for a task, with empty tokens removed.
pub fn task_args(task: &TaskSpec) -> Vec<String> {
    [
        task.operation.clone(),
        task.source.clone(),
        task.destination.clone(),
    ]
    .into_iter()
    .chain(ensure_verbosity(&task.args))
    .filter(|a| !a.is_empty())
    .collect()
}

/// Outcome of one task.
#[derive(Debug)]
pub enum TaskStatus {
    Succeeded,
    Failed(ToolError),
    /// Not started because an earlier task failed with stop-on-failure set.
    Skipped,
    /// Dry run: the command was only logged.
    Planned,
}

/// Result of a single task.
#[derive(Debug)]
pub struct TaskResult {
    /// 1-based position in the task list.
    pub index: usize,
    /// Task name from the configuration.
    pub name: String,
    /// How the task ended.
    pub status: TaskStatus,
    /// Number of classified lines that were emitted.
    pub lines_emitted: usize,
    /// Exit code of the rclone process; `None` if it never started, was
    /// killed by a signal, or the task was not run.
    pub exit_code: Option<i32>,
    /// Wall-clock time spent on the task.
    pub duration_ms: u64,
}

impl TaskResult {
    fn new(index: usize, name: &str, status: TaskStatus) -> Self {
        Self {
            index,
            name: name.to_string(),
            status,
            lines_emitted: 0,
            exit_code: None,
            duration_ms: 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, TaskStatus::Failed(_))
    }
}

/// Results of a whole task run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// One entry per configured task, in run order.
    pub results: Vec<TaskResult>,
    /// Wall-clock time for the whole run.
    pub total_duration_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Succeeded))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failure()).count()
    }

    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Skipped))
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| r.is_failure())
    }
}

/// Runs tasks one after another through rclone.
pub struct TaskRunner<'a> {
    rclone: &'a Rclone,
    sink: &'a dyn LogSink,
    classifier: Classifier,
    stop_on_failure: bool,
    dry_run: bool,
}

impl<'a> TaskRunner<'a> {
    pub fn new(rclone: &'a Rclone, sink: &'a dyn LogSink) -> Self {
        Self {
            rclone,
            sink,
            classifier: Classifier::default(),
            stop_on_failure: false,
            dry_run: false,
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn run(&self, tasks: &[TaskSpec]) -> RunReport {
        let overall_start = Instant::now();
        let total = tasks.len();
        let mut report = RunReport::default();
        let mut aborted = false;

        for (offset, task) in tasks.iter().enumerate() {
            let index = offset + 1;
            if aborted {
                self.sink
                    .info(&format!("Skipping task {index} of {total}: {}", task.name));
                report
                    .results
                    .push(TaskResult::new(index, &task.name, TaskStatus::Skipped));
                continue;
            }

            self.sink
                .info(&format!("Starting task {index} of {total}: {}", task.name));
            let result = self.run_task(index, task);

            if let TaskStatus::Failed(e) = &result.status {
                self.sink
                    .warn(&format!("Task {index} ({}) failed: {e}", task.name));
                aborted = self.stop_on_failure;
            }
            self.sink
                .info(&format!("Completed task {index}: {}", task.name));
            report.results.push(result);
        }

        report.total_duration_ms = overall_start.elapsed().as_millis() as u64;
        report
    }

    fn run_task(&self, index: usize, task: &TaskSpec) -> TaskResult {
        let start = Instant::now();
        let args = task_args(task);

        if self.dry_run {
            self.sink.info(&format!(
                "Would run: {}",
                self.rclone.display_command(&args)
            ));
            return TaskResult::new(index, &task.name, TaskStatus::Planned);
        }

        self.sink
            .debug(&format!("Running {}", self.rclone.display_command(&args)));

        let mut stream = match self.rclone.stream(&args) {
            Ok(stream) => stream,
            Err(e) => {
                let mut result = TaskResult::new(index, &task.name, TaskStatus::Failed(e));
                result.duration_ms = start.elapsed().as_millis() as u64;
                return result;
            }
        };

        let mut lines_emitted = 0;
        let mut read_error = None;
        for raw in stream.by_ref() {
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => {
                    read_error = Some(e);
                    continue;
                }
            };
            let text = match decode_line(&raw) {
                Ok(text) => text,
                Err(e) => {
                    self.sink
                        .debug(&format!("Task {index} ({}): {e}", task.name));
                    e.lossy
                }
            };
            if let Some(line) = self.classifier.log_line(index, &task.name, &text) {
                self.sink.emit(line.level, &line.message());
                lines_emitted += 1;
            }
        }

        let (exit_code, status) = match (stream.finish(), read_error) {
            (Err(e), _) => (e.exit_code(), TaskStatus::Failed(e)),
            (Ok(exit), Some(e)) => (exit.code(), TaskStatus::Failed(ToolError::Io(e))),
            (Ok(exit), None) => (exit.code(), TaskStatus::Succeeded),
        };

        TaskResult {
            index,
            name: task.name.clone(),
            status,
            lines_emitted,
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use crate::logging::testing::RecordingSink;

    fn task(name: &str, args: &[&str]) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            operation: "copy".to_string(),
            source: "/src".to_string(),
            destination: "remote:dst".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_verbosity_not_duplicated() {
        assert_eq!(ensure_verbosity(&strings(&["-v"])), strings(&["-v"]));
        assert_eq!(ensure_verbosity(&strings(&["-vv"])), strings(&["-vv"]));
        assert_eq!(
            ensure_verbosity(&strings(&["--fast-list", "--verbose"])),
            strings(&["--fast-list", "--verbose"])
        );
        assert_eq!(
            ensure_verbosity(&strings(&["--verbose=2"])),
            strings(&["--verbose=2"])
        );
    }

    #[test]
    fn test_verbosity_appended_once() {
        assert_eq!(ensure_verbosity(&[]), strings(&["-v"]));
        assert_eq!(
            ensure_verbosity(&strings(&["--fast-list"])),
            strings(&["--fast-list", "-v"])
        );
    }

    #[test]
    fn test_is_verbosity_flag() {
        assert!(is_verbosity_flag("-v"));
        assert!(is_verbosity_flag("-vvv"));
        assert!(is_verbosity_flag("--verbose"));
        assert!(!is_verbosity_flag("-"));
        assert!(!is_verbosity_flag("-vx"));
        assert!(!is_verbosity_flag("--verbosely"));
        assert!(!is_verbosity_flag("--vfs-cache-mode"));
    }

    #[test]
    fn test_task_args_order_and_filtering() {
        let mut spec = task("t", &["--checksum", ""]);
        spec.source = String::new();
        assert_eq!(
            task_args(&spec),
            strings(&["copy", "remote:dst", "--checksum", "-v"])
        );
    }

    #[test]
    fn test_task_args_do_not_mutate_config() {
        let spec = task("t", &[]);
        let first = task_args(&spec);
        let second = task_args(&spec);

        assert!(spec.args.is_empty());
        assert_eq!(first, second);
        assert_eq!(first.iter().filter(|a| a.as_str() == "-v").count(), 1);
    }

    #[test]
    fn test_spawn_failure_marks_task_failed_and_continues() {
        let rclone = Rclone::new("/nonexistent/rclone-binary");
        let sink = RecordingSink::default();

        let report = TaskRunner::new(&rclone, &sink).run(&[task("a", &[]), task("b", &[])]);

        assert_eq!(report.failed(), 2);
        assert!(report.results.iter().all(|r| r.exit_code.is_none()));
        assert!(sink.position("Starting task 2 of 2: b").is_some());
        assert!(
            sink.records()
                .iter()
                .any(|(l, m)| *l == LogLevel::Warn && m.starts_with("Task 1 (a) failed"))
        );
    }

    #[test]
    fn test_dry_run_does_not_spawn() {
        let rclone = Rclone::new("/nonexistent/rclone-binary");
        let sink = RecordingSink::default();

        let report = TaskRunner::new(&rclone, &sink)
            .with_dry_run(true)
            .run(&[task("a", &["--checksum"])]);

        assert!(report.all_succeeded());
        assert!(matches!(report.results[0].status, TaskStatus::Planned));
        assert!(
            sink.position("Would run: rclone-binary copy /src remote:dst --checksum -v")
                .is_some()
        );
    }

    #[cfg(unix)]
    mod unix {
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        use super::*;

        fn fake_tool(dir: &Path, body: &str) -> Rclone {
            let path = dir.join("rclone");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            Rclone::new(path)
        }

        #[test]
        fn test_tasks_run_in_strict_order() {
            let dir = tempfile::TempDir::new().unwrap();
            let rclone = fake_tool(dir.path(), r#"echo "running $3""#);
            let sink = RecordingSink::default();

            let tasks: Vec<TaskSpec> = ["one", "two", "three"]
                .iter()
                .map(|n| {
                    let mut t = task(n, &[]);
                    t.destination = format!("dst-{n}");
                    t
                })
                .collect();
            let report = TaskRunner::new(&rclone, &sink).run(&tasks);

            assert_eq!(report.succeeded(), 3);
            let pos = |needle: &str| sink.position(needle).unwrap();
            for (i, name) in ["one", "two", "three"].iter().enumerate() {
                let i = i + 1;
                let start = pos(&format!("Starting task {i} of 3: {name}"));
                let line = pos(&format!("Task {i} ({name}): running dst-{name}"));
                let done = pos(&format!("Completed task {i}: {name}"));
                assert!(start < line && line < done);
                if i < 3 {
                    let next = ["one", "two", "three"][i];
                    assert!(done < pos(&format!("Starting task {} of 3: {next}", i + 1)));
                }
            }
        }

        #[test]
        fn test_output_is_classified_and_attributed() {
            let dir = tempfile::TempDir::new().unwrap();
            let rclone = fake_tool(
                dir.path(),
                r#"echo "2023/05/01 10:00:00 INFO  : a.txt: Copied (new)"
echo "2023/05/01 10:00:00 NOTICE: There was nothing to transfer"
echo ""
echo "Transferred:   1.234 MiB"
echo "oops from stderr" >&2"#,
            );
            let sink = RecordingSink::default();

            let report = TaskRunner::new(&rclone, &sink).run(&[task("docs", &[])]);

            assert_eq!(report.results[0].lines_emitted, 3);
            let records = sink.records();
            assert!(records.contains(&(
                LogLevel::Debug,
                "Task 1 (docs): Modified     : a.txt: Copied (new)".to_string()
            )));
            assert!(records.contains(&(
                LogLevel::Info,
                "Task 1 (docs): Transferred   : 1.234 MiB".to_string()
            )));
            assert!(records.contains(&(
                LogLevel::Info,
                "Task 1 (docs): oops from stderr".to_string()
            )));
            assert!(!records.iter().any(|(_, m)| m.contains("nothing to transfer")));
        }

        #[test]
        fn test_verbosity_flag_reaches_tool() {
            let dir = tempfile::TempDir::new().unwrap();
            let rclone = fake_tool(dir.path(), r#"echo "args: $*""#);
            let sink = RecordingSink::default();

            TaskRunner::new(&rclone, &sink).run(&[task("t", &["-vv"]), task("u", &[])]);

            assert!(sink.position("Task 1 (t): args: copy /src remote:dst -vv").is_some());
            assert!(sink.position("Task 2 (u): args: copy /src remote:dst -v").is_some());
        }

        #[test]
        fn test_non_zero_exit_fails_task_but_continues() {
            let dir = tempfile::TempDir::new().unwrap();
            let rclone = fake_tool(dir.path(), r#"[ "$3" = "bad" ] && exit 3; exit 0"#);
            let sink = RecordingSink::default();

            let mut bad = task("bad", &[]);
            bad.destination = "bad".to_string();
            let report = TaskRunner::new(&rclone, &sink).run(&[bad, task("good", &[])]);

            assert_eq!(report.failed(), 1);
            assert_eq!(report.succeeded(), 1);
            assert!(matches!(
                report.results[0].status,
                TaskStatus::Failed(ToolError::ExitStatus { code: Some(3), .. })
            ));
            assert_eq!(report.results[0].exit_code, Some(3));
            assert_eq!(report.results[1].exit_code, Some(0));
            assert_eq!(report.failures().next().unwrap().name, "bad");
            assert!(sink.position("Completed task 1: bad").is_some());
        }

        #[test]
        fn test_stop_on_failure_skips_remaining() {
            let dir = tempfile::TempDir::new().unwrap();
            let rclone = fake_tool(dir.path(), "exit 1");
            let sink = RecordingSink::default();

            let report = TaskRunner::new(&rclone, &sink)
                .with_stop_on_failure(true)
                .run(&[task("a", &[]), task("b", &[]), task("c", &[])]);

            assert_eq!(report.failed(), 1);
            assert_eq!(report.skipped(), 2);
            assert!(sink.position("Starting task 2 of 3: b").is_none());
            assert!(sink.position("Skipping task 3 of 3: c").is_some());
        }

        #[test]
        fn test_invalid_utf8_is_replaced_not_fatal() {
            let dir = tempfile::TempDir::new().unwrap();
            let rclone = fake_tool(dir.path(), r#"printf 'bad \377 byte\n'"#);
            let sink = RecordingSink::default();

            let report = TaskRunner::new(&rclone, &sink).run(&[task("t", &[])]);

            assert!(report.all_succeeded());
            assert!(sink.position("Task 1 (t): bad \u{fffd} byte").is_some());
        }

        #[test]
        fn test_plain_level_applies_to_unclassified_lines() {
            let dir = tempfile::TempDir::new().unwrap();
            let rclone = fake_tool(dir.path(), "echo hello");
            let sink = RecordingSink::default();

            TaskRunner::new(&rclone, &sink)
                .with_classifier(Classifier::default().with_plain_level(LogLevel::Debug))
                .run(&[task("t", &[])]);

            assert!(
                sink.records()
                    .contains(&(LogLevel::Debug, "Task 1 (t): hello".to_string()))
            );
        }
    }
}

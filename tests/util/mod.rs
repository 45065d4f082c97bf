#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Scratch directory holding a config file and a fake `rclone`.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_config(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    /// File where the fake tool appends one line per invocation.
    pub fn calls_path(&self) -> PathBuf {
        self.path().join("calls.log")
    }

    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.calls_path())
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Install a shell script standing in for rclone. Every invocation is
    /// recorded before `body` runs.
    #[cfg(unix)]
    pub fn fake_rclone(&self, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.path().join("rclone");
        let script = format!(
            "#!/bin/sh\necho \"$*\" >> '{}'\n{body}\n",
            self.calls_path().display()
        );
        fs::write(&path, script).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }
}

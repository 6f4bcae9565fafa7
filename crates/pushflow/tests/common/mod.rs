#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! once assert_cmd 2.1 is the minimum

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("index.html"), "<h1>hello</h1>").unwrap();
        Self { root }
    }

    pub fn write_manifest(&self, content: &str) {
        fs::write(self.root.path().join("manifest.yml"), content).unwrap();
    }

    #[allow(dead_code)]
    pub fn write_file(&self, name: &str, content: &str) {
        fs::write(self.root.path().join(name), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// `pushflow` running in the project, isolated from the user's target
    /// file and environment.
    pub fn pushflow(&self) -> Command {
        let mut cmd = Command::cargo_bin("pushflow").unwrap();
        cmd.current_dir(self.path())
            .env("XDG_CONFIG_HOME", self.path().join(".config"))
            .env("PUSHFLOW_POLL_INTERVAL_MS", "10")
            .env_remove("PUSHFLOW_MANIFEST")
            .env_remove("PUSHFLOW_API")
            .env_remove("PUSHFLOW_TOKEN")
            .env_remove("PUSHFLOW_ORG")
            .env_remove("PUSHFLOW_SPACE")
            .env_remove("CF_DOCKER_PASSWORD")
            .env_remove("CF_STAGING_TIMEOUT")
            .env_remove("CF_STARTUP_TIMEOUT")
            .env_remove("RUST_LOG");
        cmd
    }
}

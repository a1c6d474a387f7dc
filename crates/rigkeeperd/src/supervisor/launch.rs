//! Worker launch description and the pre-launch script step

use anyhow::{Context, Result};
use rigkeeper_common::WorkerConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Everything needed to start one worker run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub working_dir: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    /// Script body executed to completion before the worker starts
    pub prelaunch_script: Option<String>,
    /// Transient file name for the script, inside `working_dir`
    pub prelaunch_file: String,
}

impl LaunchSpec {
    pub fn from_config(worker: &WorkerConfig) -> Self {
        Self {
            working_dir: worker.directory.clone(),
            program: worker.program.clone(),
            args: worker.args.clone(),
            prelaunch_script: worker.prelaunch_script.clone(),
            prelaunch_file: worker.prelaunch_file.clone(),
        }
    }

    pub fn prelaunch_path(&self) -> PathBuf {
        self.working_dir.join(&self.prelaunch_file)
    }

    /// Run the pre-launch script, if any, and remove its file afterwards
    pub async fn run_prelaunch(&self) -> Result<()> {
        let path = self.prelaunch_path();
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&path).await;
        }

        let script = match self.prelaunch_script.as_deref() {
            Some(script) if !script.trim().is_empty() => script,
            _ => return Ok(()),
        };

        let result = self.execute_script(&path, script).await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("[!] Could not remove {}: {}", path.display(), e);
        }
        result
    }

    async fn execute_script(&self, path: &Path, script: &str) -> Result<()> {
        tokio::fs::write(path, script)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
                .await
                .with_context(|| format!("Failed to mark {} executable", path.display()))?;
        }

        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(path);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg(path);
            c
        };

        info!("Running pre-launch script {}", path.display());
        let status = command
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to run {}", path.display()))?;

        if !status.success() {
            warn!("[!] Pre-launch script exited with {}", status);
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn spec(dir: &std::path::Path, script: Option<&str>) -> LaunchSpec {
        LaunchSpec {
            working_dir: dir.to_path_buf(),
            program: "true".to_string(),
            args: Vec::new(),
            prelaunch_script: script.map(str::to_string),
            prelaunch_file: "prelaunch.sh".to_string(),
        }
    }

    #[tokio::test]
    async fn test_prelaunch_runs_in_worker_dir_and_is_removed() {
        let dir = tempdir().unwrap();
        let spec = spec(dir.path(), Some("echo ready > marker.txt\n"));

        spec.run_prelaunch().await.unwrap();

        let marker = std::fs::read_to_string(dir.path().join("marker.txt")).unwrap();
        assert_eq!(marker.trim(), "ready");
        assert!(!spec.prelaunch_path().exists());
    }

    #[tokio::test]
    async fn test_failing_script_still_removed() {
        let dir = tempdir().unwrap();
        let spec = spec(dir.path(), Some("exit 3\n"));

        spec.run_prelaunch().await.unwrap();
        assert!(!spec.prelaunch_path().exists());
    }

    #[tokio::test]
    async fn test_stale_script_removed_without_new_one() {
        let dir = tempdir().unwrap();
        let spec = spec(dir.path(), None);
        std::fs::write(spec.prelaunch_path(), "echo stale").unwrap();

        spec.run_prelaunch().await.unwrap();
        assert!(!spec.prelaunch_path().exists());
    }
}

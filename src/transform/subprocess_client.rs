//! Transformation CLI subprocess client

use crate::core::config::TransformConfig;
use crate::transform::{InvokeError, ProcessOutput};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs `<executable> run --project-dir <project_dir>` as a child process
#[derive(Debug, Clone)]
pub struct TransformSubprocess {
    config: TransformConfig,
}

impl TransformSubprocess {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Arguments passed to the executable
    pub fn args(&self) -> Vec<String> {
        vec![
            "run".to_string(),
            "--project-dir".to_string(),
            self.config.project_dir.display().to_string(),
        ]
    }

    /// Spawn the process and wait for it to exit.
    ///
    /// The child runs in `project_dir` with the caller's environment plus
    /// `profiles_env=profiles_dir`. Stdout and stderr are captured as text.
    ///
    /// # Errors
    /// Returns `InvokeError` if:
    /// - The executable cannot be spawned
    /// - The process does not exit within `timeout_secs` (it is killed)
    ///
    /// A non-zero exit code is not an error; it is reported in `ProcessOutput`.
    pub async fn execute(&self) -> Result<ProcessOutput, InvokeError> {
        let timeout_secs = self.config.timeout_secs;
        let args = self.args();
        debug!(
            "Spawning {} {} in {}",
            self.config.executable,
            args.join(" "),
            self.config.project_dir.display()
        );

        let mut command = Command::new(&self.config.executable);
        command
            .args(&args)
            .current_dir(&self.config.project_dir)
            .env(&self.config.profiles_env, &self.config.profiles_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let result = timeout(Duration::from_secs(timeout_secs), command.output())
            .await
            .map_err(|_| {
                warn!("{} did not exit within {}s, killing it", self.config.executable, timeout_secs);
                InvokeError::Timeout(timeout_secs)
            })?;

        let output = result.map_err(|e| {
            InvokeError::Spawn(format!("{}: {}", self.config.executable, e))
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        debug!(
            "{} exited with code {} ({} bytes stdout, {} bytes stderr)",
            self.config.executable,
            exit_code,
            stdout.len(),
            stderr.len()
        );

        Ok(ProcessOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

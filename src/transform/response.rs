//! Transformation process results

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for invoking the transformation process
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Failed to spawn transformation process: {0}")]
    Spawn(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Captured result of a process that ran to exit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// Exit code; -1 when the process was terminated by a signal
    pub exit_code: i32,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,
}

impl ProcessOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_output_success() {
        assert!(ProcessOutput::new(0, "done", "").success());
        assert!(!ProcessOutput::new(1, "", "boom").success());
        assert!(!ProcessOutput::new(-1, "", "").success());
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(InvokeError::Timeout(300).to_string(), "Timed out after 300 seconds");
    }
}

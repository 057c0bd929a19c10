//! Command runner trait and types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{CommandConfig, RunConfig};
use crate::error::{RunnerError, RunnerResult};

/// Result of a command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code of the process (-1 when killed by a signal)
    pub exit_code: i64,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Execution start time
    pub started_at: DateTime<Utc>,
    /// Execution end time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Check if execution was successful (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Parse stdout as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> RunnerResult<T> {
        let trimmed = self.stdout.trim();
        if trimmed.is_empty() {
            return Err(RunnerError::InvalidOutput("empty output".to_string()));
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    /// Last non-empty stderr line, for short error messages.
    pub fn error_line(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("Unknown error")
    }
}

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Check if a program can be executed.
    async fn is_available(&self, program: &str) -> RunnerResult<bool>;

    /// Get version information for a program.
    async fn version(&self, program: &str) -> RunnerResult<String>;

    /// Run a command to completion.
    async fn run(&self, command: &CommandConfig, run_config: &RunConfig) -> RunnerResult<ExecutionResult>;
}

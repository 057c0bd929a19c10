//! Process-based command runner.
//!
//! Runs the provider tool as a child process, capturing stdout and stderr
//! line by line with optional streaming and a hard timeout.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::{CommandConfig, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Log output from command execution.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: chrono::DateTime<Utc>,
    pub stream: LogStream,
    pub message: String,
}

/// Log stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Log handler callback type.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

/// CLI runner options.
#[derive(Debug, Clone)]
pub struct CliRunnerOptions {
    /// Dry-run mode (log commands without executing)
    pub dry_run: bool,
    /// CI mode (prefix streamed lines with timestamps)
    pub ci_mode: bool,
}

impl Default for CliRunnerOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            ci_mode: std::env::var("CI").is_ok(),
        }
    }
}

impl CliRunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn ci_mode(mut self) -> Self {
        self.ci_mode = true;
        self
    }
}

/// Runs commands as child processes.
#[derive(Clone, Default)]
pub struct CliRunner {
    options: CliRunnerOptions,
    log_handler: Option<LogHandler>,
}

impl CliRunner {
    pub fn new(options: CliRunnerOptions) -> Self {
        Self {
            options,
            log_handler: None,
        }
    }

    /// Send streamed lines to `handler` instead of the console.
    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log_handler = Some(handler);
        self
    }

    pub fn options(&self) -> &CliRunnerOptions {
        &self.options
    }

    /// Check if dry-run mode is enabled.
    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    fn build_command(&self, config: &CommandConfig) -> Command {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.workdir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Collect lines from one output stream, streaming them when asked.
    ///
    /// Streamed lines go to the handler when one is set, otherwise to the
    /// console.
    async fn collect<R>(
        reader: R,
        stream: LogStream,
        echo: bool,
        ci_mode: bool,
        handler: Option<LogHandler>,
    ) -> String
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        let mut output = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            output.push_str(&line);
            output.push('\n');
            if !echo {
                continue;
            }
            let log_line = LogLine {
                timestamp: Utc::now(),
                stream,
                message: line,
            };
            if let Some(handler) = &handler {
                handler(log_line);
            } else if ci_mode {
                println!(
                    "[{}] [{}] {}",
                    log_line.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                    stream,
                    log_line.message
                );
            } else {
                match stream {
                    LogStream::Stdout => println!("{}", log_line.message),
                    LogStream::Stderr => eprintln!("{}", log_line.message),
                }
            }
        }
        output
    }

    async fn execute(
        &self,
        config: &CommandConfig,
        run_config: &RunConfig,
    ) -> RunnerResult<(i64, String, String)> {
        let mut child = self.build_command(config).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunnerError::NotAvailable(config.program.clone())
            } else {
                RunnerError::ExecutionFailed(format!("Failed to spawn {}: {}", config.program, e))
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::ExecutionFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::ExecutionFailed("stderr not captured".to_string()))?;

        let stdout_task = tokio::spawn(Self::collect(
            stdout,
            LogStream::Stdout,
            run_config.stream_logs,
            self.options.ci_mode,
            self.log_handler.clone(),
        ));
        let stderr_task = tokio::spawn(Self::collect(
            stderr,
            LogStream::Stderr,
            run_config.stream_logs,
            self.options.ci_mode,
            self.log_handler.clone(),
        ));

        let waited = if run_config.timeout_seconds > 0 {
            let limit = Duration::from_secs(run_config.timeout_seconds);
            let outcome = tokio::time::timeout(limit, child.wait()).await;
            match outcome {
                Ok(waited) => waited,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(RunnerError::Timeout(run_config.timeout_seconds));
                }
            }
        } else {
            child.wait().await
        };
        let status = waited
            .map_err(|e| RunnerError::ExecutionFailed(format!("Failed to wait for process: {}", e)))?;

        let stdout_output = stdout_task.await.unwrap_or_default();
        let stderr_output = stderr_task.await.unwrap_or_default();
        let exit_code = status.code().unwrap_or(-1) as i64;

        Ok((exit_code, stdout_output, stderr_output))
    }
}

#[async_trait]
impl CommandRunner for CliRunner {
    async fn is_available(&self, program: &str) -> RunnerResult<bool> {
        let status = Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        Ok(status.map(|s| s.success()).unwrap_or(false))
    }

    async fn version(&self, program: &str) -> RunnerResult<String> {
        let config = CommandConfig::new(program).arg("--version");
        let (exit_code, stdout, stderr) = self.execute(&config, &RunConfig::default()).await?;
        if exit_code != 0 {
            return Err(RunnerError::ExecutionFailed(stderr.trim().to_string()));
        }
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }

    async fn run(&self, config: &CommandConfig, run_config: &RunConfig) -> RunnerResult<ExecutionResult> {
        let cmd_str = config.display();
        debug!("Command: {}", cmd_str);

        if self.options.dry_run {
            info!("[DRY-RUN] Would execute: {}", cmd_str);
            let now = Utc::now();
            return Ok(ExecutionResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                started_at: now,
                finished_at: now,
                duration_ms: 0,
            });
        }

        let started_at = Utc::now();
        let (exit_code, stdout, stderr) = self.execute(config, run_config).await?;
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        let result = ExecutionResult {
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at,
            duration_ms,
        };

        if result.success() {
            debug!("{} completed in {}ms", config.program, duration_ms);
        } else {
            error!(
                "{} failed with exit code {} after {}ms: {}",
                config.program,
                exit_code,
                duration_ms,
                result.error_line()
            );
        }

        Ok(result)
    }
}

impl std::fmt::Debug for CliRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliRunner")
            .field("options", &self.options)
            .field("log_handler", &self.log_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let options = CliRunnerOptions::new().dry_run().ci_mode();
        assert!(options.dry_run);
        assert!(options.ci_mode);
    }

    #[tokio::test]
    async fn test_dry_run_mode() {
        let runner = CliRunner::new(CliRunnerOptions::new().dry_run());
        assert!(runner.is_dry_run());

        let config = CommandConfig::new("definitely-not-a-real-program").arg("create");
        let result = runner.run(&config, &RunConfig::default()).await.unwrap();
        assert!(result.success());
        assert!(result.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = CliRunner::default();
        let config = CommandConfig::new("definitely-not-a-real-program");

        let err = runner.run(&config, &RunConfig::default()).await.unwrap_err();
        assert!(matches!(err, RunnerError::NotAvailable(_)));
        assert!(!runner.is_available("definitely-not-a-real-program").await.unwrap());
    }
}

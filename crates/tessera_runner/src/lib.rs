//! # tessera_runner
//!
//! Process execution wrapper for the provider tool.
//!
//! Provisioning collaborators never spawn processes themselves; they build a
//! [`CommandConfig`] and hand it to a [`CommandRunner`].
//!
//! # Features
//!
//! - **Process Runner**: async child processes with captured output ([`CliRunner`])
//! - **Timeouts**: hard per-command limit, the child is killed on expiry
//! - **Dry-Run Mode**: log commands without executing them
//! - **CI Integration**: timestamped log streaming for CI systems
//! - **Mock Runner**: scripted responses and captured calls for tests ([`MockRunner`])
//!
//! # Example
//!
//! ```rust,no_run
//! use tessera_runner::{CliRunner, CliRunnerOptions, CommandConfig, CommandRunner, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = CliRunner::new(CliRunnerOptions::default());
//!
//!     let command = CommandConfig::new("az")
//!         .args(["group", "show", "--name", "rg-dev", "--output", "json"]);
//!
//!     let result = runner.run(&command, &RunConfig::default().timeout(60)).await?;
//!     println!("Exit code: {}", result.exit_code);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod mock;
pub mod runner;

pub use cli::{CliRunner, CliRunnerOptions, LogHandler, LogLine, LogStream};
pub use config::{CommandConfig, RunConfig, MASKED};
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockResponse, MockRunner};
pub use runner::{CommandRunner, ExecutionResult};

//! Mock command runner for testing.
//!
//! Provides a configurable mock implementation of the CommandRunner trait
//! for use in tests without requiring the provider tool to be installed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;

use crate::config::{CommandConfig, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Predefined mock response for a command execution.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 100,
        }
    }

    /// Successful response with a JSON document on stdout.
    pub fn json(value: &Value) -> Self {
        Self::success(value.to_string())
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 100,
        }
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    fn into_result(self) -> ExecutionResult {
        let started_at = Utc::now();
        ExecutionResult {
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            started_at,
            finished_at: started_at + chrono::Duration::milliseconds(self.duration_ms as i64),
            duration_ms: self.duration_ms,
        }
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout_seconds: u64,
}

impl CapturedCall {
    /// Value following `flag` in the captured arguments.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Whether every needle appears among the arguments.
    pub fn has_args(&self, needles: &[&str]) -> bool {
        needles.iter().all(|n| self.args.iter().any(|a| a == n))
    }
}

/// A response returned when all `needles` appear in the arguments.
#[derive(Debug, Clone)]
struct Rule {
    needles: Vec<String>,
    response: MockResponse,
}

impl Rule {
    fn matches(&self, args: &[String]) -> bool {
        self.needles.iter().all(|n| args.iter().any(|a| a == n))
    }
}

/// Mock command runner for testing.
///
/// This runner captures all calls and returns predefined responses. Rules
/// matched against the arguments take precedence over the sequential list,
/// which keeps responses stable when calls arrive concurrently.
#[derive(Clone)]
pub struct MockRunner {
    /// Whether the runner should report programs as available.
    available: Arc<RwLock<bool>>,
    /// Version string to return.
    version: Arc<RwLock<String>>,
    /// Argument-matched responses, first match wins.
    rules: Arc<RwLock<Vec<Rule>>>,
    /// Sequential responses for calls no rule matches.
    responses: Arc<RwLock<Vec<MockResponse>>>,
    /// Index of next sequential response.
    response_index: Arc<AtomicUsize>,
    /// Captured calls for verification.
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    /// Simulated failure to return (as a string message for ExecutionFailed).
    simulate_failure: Arc<RwLock<Option<String>>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    /// Create a new mock runner.
    pub fn new() -> Self {
        Self {
            available: Arc::new(RwLock::new(true)),
            version: Arc::new(RwLock::new("mock-runner 1.0.0".to_string())),
            rules: Arc::new(RwLock::new(Vec::new())),
            responses: Arc::new(RwLock::new(Vec::new())),
            response_index: Arc::new(AtomicUsize::new(0)),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            simulate_failure: Arc::new(RwLock::new(None)),
        }
    }

    /// Set whether programs are reported as available.
    pub fn set_available(self, available: bool) -> Self {
        *self.available.write() = available;
        self
    }

    /// Set the version string.
    pub fn set_version(self, version: impl Into<String>) -> Self {
        *self.version.write() = version.into();
        self
    }

    /// Respond with `response` to any call whose arguments contain all `needles`.
    pub fn when(self, needles: &[&str], response: MockResponse) -> Self {
        self.rules.write().push(Rule {
            needles: needles.iter().map(|n| n.to_string()).collect(),
            response,
        });
        self
    }

    /// Add a mock response for the next unmatched call.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.write().push(response);
        self
    }

    /// Set multiple responses.
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        *self.responses.write() = responses;
        self
    }

    /// Set a failure to simulate.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    /// Clear all captured calls.
    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Check if a specific method was called.
    pub fn was_called(&self, method: &str) -> bool {
        self.captured_calls
            .read()
            .iter()
            .any(|c| c.method == method)
    }

    /// Get calls to a specific method.
    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Calls whose arguments contain all `needles`.
    pub fn calls_with(&self, needles: &[&str]) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.has_args(needles))
            .cloned()
            .collect()
    }

    /// Record a call.
    fn record_call(&self, call: CapturedCall) {
        self.captured_calls.write().push(call);
    }

    /// Get the response for a call.
    fn next_response(&self, args: &[String]) -> MockResponse {
        if let Some(rule) = self.rules.read().iter().find(|r| r.matches(args)) {
            return rule.response.clone();
        }

        let responses = self.responses.read();
        if responses.is_empty() {
            return MockResponse::success("");
        }
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        responses
            .get(index % responses.len())
            .cloned()
            .unwrap_or_else(|| MockResponse::success(""))
    }

    /// Check for simulated failure.
    fn check_failure(&self) -> RunnerResult<()> {
        if let Some(msg) = self.simulate_failure.read().clone() {
            return Err(RunnerError::ExecutionFailed(msg));
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn is_available(&self, program: &str) -> RunnerResult<bool> {
        self.record_call(CapturedCall {
            method: "is_available".to_string(),
            program: program.to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout_seconds: 0,
        });
        Ok(*self.available.read())
    }

    async fn version(&self, program: &str) -> RunnerResult<String> {
        self.record_call(CapturedCall {
            method: "version".to_string(),
            program: program.to_string(),
            args: vec!["--version".to_string()],
            env: BTreeMap::new(),
            timeout_seconds: 0,
        });
        if !*self.available.read() {
            return Err(RunnerError::NotAvailable(program.to_string()));
        }
        Ok(self.version.read().clone())
    }

    async fn run(&self, command: &CommandConfig, run_config: &RunConfig) -> RunnerResult<ExecutionResult> {
        self.record_call(CapturedCall {
            method: "run".to_string(),
            program: command.program.clone(),
            args: command.args.clone(),
            env: command.env.clone(),
            timeout_seconds: run_config.timeout_seconds,
        });

        self.check_failure()?;
        if !*self.available.read() {
            return Err(RunnerError::NotAvailable(command.program.clone()));
        }

        Ok(self.next_response(&command.args).into_result())
    }
}

impl std::fmt::Debug for MockRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRunner")
            .field("rules", &self.rules.read().len())
            .field("responses", &self.responses.read().len())
            .field("calls", &self.captured_calls.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequential_responses_cycle() {
        let runner = MockRunner::new().with_responses(vec![
            MockResponse::success("one"),
            MockResponse::failure(1, "two"),
        ]);
        let config = CommandConfig::new("az").arg("version");

        let r1 = runner.run(&config, &RunConfig::default()).await.unwrap();
        let r2 = runner.run(&config, &RunConfig::default()).await.unwrap();
        let r3 = runner.run(&config, &RunConfig::default()).await.unwrap();

        assert_eq!(r1.stdout, "one");
        assert_eq!(r2.stderr, "two");
        assert!(!r2.success());
        assert_eq!(r3.stdout, "one");
        assert_eq!(runner.call_count(), 3);
    }

    #[tokio::test]
    async fn test_rules_take_precedence() {
        let runner = MockRunner::new()
            .add_response(MockResponse::success("fallback"))
            .when(&["what-if"], MockResponse::success("diff"))
            .when(&["create", "vault-0"], MockResponse::failure(1, "conflict"));

        let diff = CommandConfig::new("az").args(["deployment", "group", "what-if"]);
        let create = CommandConfig::new("az").args(["deployment", "group", "create", "--name", "vault-0"]);
        let other = CommandConfig::new("az").args(["deployment", "group", "create", "--name", "db-0"]);

        let run = RunConfig::default();
        assert_eq!(runner.run(&diff, &run).await.unwrap().stdout, "diff");
        assert_eq!(runner.run(&create, &run).await.unwrap().stderr, "conflict");
        assert_eq!(runner.run(&other, &run).await.unwrap().stdout, "fallback");

        let creates = runner.calls_with(&["create"]);
        assert_eq!(creates.len(), 2);
        assert_eq!(creates[0].flag_value("--name"), Some("vault-0"));
    }

    #[tokio::test]
    async fn test_unavailable_and_simulated_failure() {
        let runner = MockRunner::new().set_available(false);
        assert!(!runner.is_available("az").await.unwrap());
        assert!(matches!(
            runner.version("az").await,
            Err(RunnerError::NotAvailable(_))
        ));

        let runner = MockRunner::new().simulate_failure("boom");
        let err = runner
            .run(&CommandConfig::new("az"), &RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::ExecutionFailed(msg) if msg == "boom"));
        assert!(runner.was_called("run"));
    }
}

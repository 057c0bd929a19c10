//! Integration tests for the process execution layer.
//!
//! Real-process tests use `sh` and only run on Unix; the mock runner tests
//! run everywhere.

use std::sync::Arc;

use parking_lot::Mutex;
use tessera_runner::{
    CliRunner, CliRunnerOptions, CommandConfig, CommandRunner, LogLine, LogStream, MockResponse,
    MockRunner, RunConfig, RunnerError,
};

fn sh(script: &str) -> CommandConfig {
    CommandConfig::new("sh").arg("-c").arg(script)
}

#[cfg(unix)]
#[tokio::test]
async fn test_captures_stdout_stderr_and_exit_code() {
    let runner = CliRunner::new(CliRunnerOptions::new());

    let result = runner
        .run(&sh("echo out; echo err >&2; exit 3"), &RunConfig::default())
        .await
        .unwrap();

    assert_eq!(result.exit_code, 3);
    assert!(!result.success());
    assert_eq!(result.stdout, "out\n");
    assert_eq!(result.stderr, "err\n");
    assert_eq!(result.error_line(), "err");
}

#[cfg(unix)]
#[tokio::test]
async fn test_env_and_workdir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "present").unwrap();

    let runner = CliRunner::new(CliRunnerOptions::new());
    let command = sh("cat marker.txt; printf ' %s' \"$TESSERA_TEST_VALUE\"")
        .env("TESSERA_TEST_VALUE", "42")
        .workdir(dir.path());

    let result = runner.run(&command, &RunConfig::default()).await.unwrap();
    assert!(result.success());
    assert_eq!(result.stdout.trim(), "present 42");
}

#[cfg(unix)]
#[tokio::test]
async fn test_timeout_kills_process() {
    let runner = CliRunner::new(CliRunnerOptions::new());

    let err = runner
        .run(&sh("sleep 5"), &RunConfig::default().timeout(1))
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::Timeout(1)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_streaming_invokes_log_handler() {
    let seen: Arc<Mutex<Vec<LogLine>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let runner = CliRunner::new(CliRunnerOptions::new())
        .with_log_handler(Arc::new(move |line| sink.lock().push(line)));

    runner
        .run(&sh("echo first; echo second >&2"), &RunConfig::default().stream())
        .await
        .unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert!(seen
        .iter()
        .any(|l| l.stream == LogStream::Stdout && l.message == "first"));
    assert!(seen
        .iter()
        .any(|l| l.stream == LogStream::Stderr && l.message == "second"));
}

#[tokio::test]
async fn test_mock_runner_captures_command() {
    let runner = MockRunner::new().add_response(MockResponse::json(&serde_json::json!({
        "properties": { "provisioningState": "Succeeded" }
    })));

    let command = CommandConfig::new("az")
        .args(["deployment", "group", "create"])
        .opt_arg("--resource-group", Some("rg-dev"))
        .env("AZURE_CORE_ONLY_SHOW_ERRORS", "true");

    let result = runner
        .run(&command, &RunConfig::default().timeout(120))
        .await
        .unwrap();
    let body: serde_json::Value = result.json().unwrap();
    assert_eq!(body["properties"]["provisioningState"], "Succeeded");

    let calls = runner.get_method_calls("run");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, "az");
    assert_eq!(calls[0].flag_value("--resource-group"), Some("rg-dev"));
    assert_eq!(calls[0].timeout_seconds, 120);
    assert_eq!(
        calls[0].env.get("AZURE_CORE_ONLY_SHOW_ERRORS"),
        Some(&"true".to_string())
    );
}

#[tokio::test]
async fn test_mock_runner_through_trait_object() {
    let runner: Arc<dyn CommandRunner> =
        Arc::new(MockRunner::new().set_version("azure-cli 2.61.0"));

    assert!(runner.is_available("az").await.unwrap());
    assert_eq!(runner.version("az").await.unwrap(), "azure-cli 2.61.0");
}

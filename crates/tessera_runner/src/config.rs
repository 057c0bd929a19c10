//! Command configuration types.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Shown in place of secret arguments.
pub const MASKED: &str = "***";

/// A single external command invocation.
///
/// Arguments added with [`CommandConfig::secret_arg`] are passed to the
/// process unchanged but never rendered by `display`, `Display` or `Debug`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Program to execute, looked up on `PATH`
    pub program: String,
    /// Arguments in order
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Working directory for the process
    pub workdir: Option<PathBuf>,
    /// Positions in `args` that must not be logged
    #[serde(default)]
    pub secret_args: BTreeSet<usize>,
}

impl CommandConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            workdir: None,
            secret_args: BTreeSet::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append an argument that is masked whenever the command is rendered.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.insert(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Append `flag value` when `value` is set.
    pub fn opt_arg(self, flag: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.arg(flag).arg(value),
            None => self,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Value following `flag`, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in self.rendered_args() {
            if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('"') {
                cmd.push_str(&format!(" '{}'", arg.replace('\'', "'\\''")));
            } else {
                cmd.push(' ');
                cmd.push_str(arg);
            }
        }
        cmd
    }

    fn rendered_args(&self) -> impl Iterator<Item = &str> {
        self.args.iter().enumerate().map(|(i, arg)| {
            if self.secret_args.contains(&i) {
                MASKED
            } else {
                arg.as_str()
            }
        })
    }
}

impl std::fmt::Debug for CommandConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandConfig")
            .field("program", &self.program)
            .field("args", &self.rendered_args().collect::<Vec<_>>())
            .field("env", &self.env)
            .field("workdir", &self.workdir)
            .finish()
    }
}

impl std::fmt::Display for CommandConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Run configuration with timeouts and output handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Timeout in seconds (0 = no timeout)
    pub timeout_seconds: u64,
    /// Whether to echo output lines as they arrive
    pub stream_logs: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 0,
            stream_logs: false,
        }
    }
}

impl RunConfig {
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn stream(mut self) -> Self {
        self.stream_logs = true;
        self
    }

    /// Enable or disable log streaming.
    pub fn stream_logs(mut self, enabled: bool) -> Self {
        self.stream_logs = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_config_builder() {
        let config = CommandConfig::new("az")
            .args(["deployment", "group", "create"])
            .opt_arg("--resource-group", Some("rg-dev"))
            .opt_arg("--subscription", None)
            .env("AZURE_CORE_OUTPUT", "json");

        assert_eq!(config.args.len(), 5);
        assert_eq!(config.flag_value("--resource-group"), Some("rg-dev"));
        assert_eq!(config.flag_value("--subscription"), None);
        assert_eq!(config.env.get("AZURE_CORE_OUTPUT"), Some(&"json".to_string()));
    }

    #[test]
    fn test_display_quotes_arguments() {
        let config = CommandConfig::new("az")
            .arg("--parameters")
            .arg(r#"{"name":{"value":"kv dev"}}"#)
            .arg("it's");

        assert_eq!(
            config.display(),
            r#"az --parameters '{"name":{"value":"kv dev"}}' it's"#
        );

        let spaced = CommandConfig::new("sh").arg("-c").arg("echo it's here");
        assert_eq!(spaced.display(), r#"sh -c 'echo it'\''s here'"#);
    }

    #[test]
    fn test_secret_args_are_masked() {
        let config = CommandConfig::new("az")
            .arg("--parameters")
            .secret_arg(r#"{"adminObjectId":{"value":"0b1c-secret"}}"#)
            .args(["--output", "json"]);

        assert_eq!(
            config.flag_value("--parameters"),
            Some(r#"{"adminObjectId":{"value":"0b1c-secret"}}"#)
        );
        assert_eq!(config.display(), "az --parameters *** --output json");
        assert_eq!(config.to_string(), config.display());
        let debug = format!("{:?}", config);
        assert!(debug.contains(MASKED));
        assert!(!debug.contains("0b1c-secret"));
    }

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.timeout_seconds, 0);
        assert!(!config.stream_logs);
        assert_eq!(RunConfig::default().timeout(30).stream().timeout_seconds, 30);
    }
}

//! Provisioner backed by the Azure CLI.
//!
//! Every engine call becomes one `az deployment` invocation of the kind's
//! compiled module, run through a [`CommandRunner`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tessera_core::{
    ChangeSet, Outputs, ProvisionError, ProvisionRequest, Provisioner, ValidationIssue,
};
use tessera_runner::{CommandConfig, CommandRunner, ExecutionResult, RunConfig, RunnerError};
use tracing::{debug, info, warn};

use crate::catalog::ModuleCatalog;
use crate::deployment::{
    deployment_name, issues_from_error, parse_changes, parse_error_output, parse_outputs,
    summarize_error, AzureTarget, DeploymentCommand, DeploymentOp,
};
use crate::error::{IacError, IacResult};

/// Default provider tool binary.
pub const DEFAULT_PROGRAM: &str = "az";

/// Default prefix of deployment names.
pub const DEFAULT_DEPLOYMENT_PREFIX: &str = "tessera";

/// Provisioner that deploys compiled modules with `az deployment`.
pub struct AzCliProvisioner {
    runner: Arc<dyn CommandRunner>,
    catalog: Arc<ModuleCatalog>,
    target: AzureTarget,
    program: String,
    prefix: String,
    command_timeout: u64,
    stream_logs: bool,
}

impl AzCliProvisioner {
    pub fn new(runner: Arc<dyn CommandRunner>, catalog: Arc<ModuleCatalog>, target: AzureTarget) -> Self {
        Self {
            runner,
            catalog,
            target,
            program: DEFAULT_PROGRAM.to_string(),
            prefix: DEFAULT_DEPLOYMENT_PREFIX.to_string(),
            command_timeout: 0,
            stream_logs: false,
        }
    }

    /// Use a different provider tool binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Prefix for deployment names, usually including the environment.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Hard limit for each tool process, in seconds (0 = none).
    pub fn with_command_timeout(mut self, seconds: u64) -> Self {
        self.command_timeout = seconds;
        self
    }

    pub fn with_stream_logs(mut self, enabled: bool) -> Self {
        self.stream_logs = enabled;
        self
    }

    pub fn target(&self) -> &AzureTarget {
        &self.target
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// Check that the tool can be run and return its version.
    pub async fn ensure_available(&self) -> IacResult<String> {
        if !self.runner.is_available(&self.program).await? {
            return Err(IacError::ToolNotAvailable(self.program.clone()));
        }
        let version = self.runner.version(&self.program).await?;
        info!("Using provider tool: {}", version);
        Ok(version)
    }

    /// Command line for one operation on one instance.
    pub fn command_for(&self, op: DeploymentOp, request: &ProvisionRequest) -> IacResult<CommandConfig> {
        let module = self.catalog.module_path(&request.kind)?;
        DeploymentCommand {
            program: &self.program,
            op,
            target: &self.target,
            scope: &request.scope,
            name: deployment_name(&self.prefix, &request.instance),
            module: &module,
            params: &request.params,
        }
        .build()
    }

    fn run_config(&self) -> RunConfig {
        RunConfig::default()
            .timeout(self.command_timeout)
            .stream_logs(self.stream_logs)
    }

    async fn execute(&self, op: DeploymentOp, request: &ProvisionRequest) -> Result<ExecutionResult, ProvisionError> {
        let command = self
            .command_for(op, request)
            .map_err(|e| ProvisionError::Tool(e.to_string()))?;
        debug!("{} {}: {}", op, request.instance, command);

        self.runner
            .run(&command, &self.run_config())
            .await
            .map_err(|e| match e {
                RunnerError::Timeout(seconds) => ProvisionError::Timeout(Duration::from_secs(seconds)),
                other => ProvisionError::Tool(other.to_string()),
            })
    }

    /// Body of a successful command; `Null` for empty output such as a dry run.
    fn body(result: &ExecutionResult) -> Result<Value, ProvisionError> {
        if result.stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        result
            .json()
            .map_err(|e| ProvisionError::Tool(format!("unreadable tool output: {}", e)))
    }
}

#[async_trait]
impl Provisioner for AzCliProvisioner {
    async fn validate(&self, request: &ProvisionRequest) -> Result<(), Vec<ValidationIssue>> {
        let result = self
            .execute(DeploymentOp::Validate, request)
            .await
            .map_err(|e| vec![ValidationIssue::new(e.to_string()).with_code("ToolError")])?;

        if !result.success() {
            return Err(parse_error_output(&result.combined_output()));
        }

        // Older tool versions report template errors in a successful body
        let body = Self::body(&result).map_err(|e| vec![ValidationIssue::new(e.to_string())])?;
        match body.get("error").filter(|e| !e.is_null()) {
            Some(error) => {
                let issues = issues_from_error(error);
                if issues.is_empty() {
                    Err(vec![ValidationIssue::new(error.to_string())])
                } else {
                    Err(issues)
                }
            }
            None => Ok(()),
        }
    }

    async fn apply(&self, request: &ProvisionRequest) -> Result<Outputs, ProvisionError> {
        let result = self.execute(DeploymentOp::Create, request).await?;
        if !result.success() {
            return Err(ProvisionError::Failed(summarize_error(&result.combined_output())));
        }

        let outputs = parse_outputs(&Self::body(&result)?);
        debug!("{} produced {} output(s)", request.instance, outputs.len());
        Ok(outputs)
    }

    async fn diff(&self, request: &ProvisionRequest) -> Result<ChangeSet, ProvisionError> {
        let result = self.execute(DeploymentOp::WhatIf, request).await?;
        if !result.success() {
            return Err(ProvisionError::Failed(summarize_error(&result.combined_output())));
        }

        let body = Self::body(&result)?;
        if body.is_null() {
            warn!("Empty what-if result for {}", request.instance);
            return Ok(ChangeSet::new());
        }
        parse_changes(&body).map_err(|e| ProvisionError::Tool(e.to_string()))
    }
}

impl std::fmt::Debug for AzCliProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzCliProvisioner")
            .field("program", &self.program)
            .field("prefix", &self.prefix)
            .field("target", &self.target)
            .field("catalog", &self.catalog)
            .finish()
    }
}

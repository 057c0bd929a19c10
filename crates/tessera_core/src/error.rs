//! Error types for the engine.

use std::time::Duration;

use thiserror::Error;

use crate::instance::{InstanceId, InstanceState};
use crate::provisioner::ValidationIssue;

/// Result type alias for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that abort a run.
///
/// Per-instance provisioning failures are not errors at this level; they are
/// recorded on the instance and surface in the run report.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error("Invalid state transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: InstanceId,
        from: InstanceState,
        to: InstanceState,
    },

    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("Spec error: {0}")]
    Spec(#[from] tessera_spec::SpecError),
}

impl CoreError {
    /// Whether the error was raised before any provisioner call was made.
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            CoreError::Definition(_) | CoreError::Cycle(_) | CoreError::Spec(_)
        )
    }
}

/// A template set that cannot be turned into a graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("Invalid template id '{0}': ids must start with a letter or underscore and contain only letters, digits, '_' or '-'")]
    InvalidId(String),

    #[error("Duplicate template id: {0}")]
    DuplicateId(String),

    #[error("Template '{id}' has unknown resource kind '{kind}'")]
    UnknownKind { id: String, kind: String },

    #[error("Template '{id}' declares scope '{scope}' which is not valid for kind '{kind}'")]
    UnresolvableScope {
        id: String,
        scope: String,
        kind: String,
    },

    #[error("Template '{id}' depends on nonexistent template '{dependency}'")]
    UnknownDependency { id: String, dependency: String },

    #[error("Template '{id}' references nonexistent template '{target}'")]
    UnknownReference { id: String, target: String },

    #[error("Template '{id}' references output '{output}' which '{target}' does not declare")]
    UnknownOutput {
        id: String,
        target: String,
        output: String,
    },

    #[error("Template '{id}' has an invalid expression in {field}: {message}")]
    InvalidExpression {
        id: String,
        field: String,
        message: String,
    },

    #[error("Loop source of '{id}' must evaluate to a sequence, got {found}")]
    LoopNotSequence { id: String, found: String },

    #[error("Condition of '{id}' must evaluate to a boolean, got {found}")]
    ConditionNotBoolean { id: String, found: String },

    #[error("'{id}' indexes '{target}', which is not looped")]
    IndexOnScalar { id: String, target: String },

    #[error("'{id}' references '{target}[{index}]' but '{target}' has {len} instance(s)")]
    IndexOutOfRange {
        id: String,
        target: String,
        index: usize,
        len: usize,
    },
}

impl DefinitionError {
    /// The template or instance the error was raised for.
    pub fn subject(&self) -> &str {
        match self {
            DefinitionError::InvalidId(id) | DefinitionError::DuplicateId(id) => id,
            DefinitionError::UnknownKind { id, .. }
            | DefinitionError::UnresolvableScope { id, .. }
            | DefinitionError::UnknownDependency { id, .. }
            | DefinitionError::UnknownReference { id, .. }
            | DefinitionError::UnknownOutput { id, .. }
            | DefinitionError::InvalidExpression { id, .. }
            | DefinitionError::LoopNotSequence { id, .. }
            | DefinitionError::ConditionNotBoolean { id, .. }
            | DefinitionError::IndexOnScalar { id, .. }
            | DefinitionError::IndexOutOfRange { id, .. } => id,
        }
    }
}

/// A dependency cycle among active instances.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Dependency cycle detected: {}", format_cycle(.members))]
pub struct CycleError {
    /// Instances on the cycle, in dependency order
    pub members: Vec<InstanceId>,
}

fn format_cycle(members: &[InstanceId]) -> String {
    let mut parts: Vec<String> = members.iter().map(|m| m.to_string()).collect();
    if let Some(first) = members.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

/// Aggregated pre-flight validation failures, ordered by instance.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Pre-flight validation failed for {} instance(s)", .failures.len())]
pub struct ValidationFailure {
    pub failures: Vec<(InstanceId, Vec<ValidationIssue>)>,
}

impl ValidationFailure {
    /// One line per issue, prefixed with the instance.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (id, issues) in &self.failures {
            if issues.is_empty() {
                lines.push(format!("{}: validation failed", id));
            }
            for issue in issues {
                lines.push(format!("{}: {}", id, issue));
            }
        }
        lines
    }
}

/// Failure of a single provisioner call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProvisionError {
    #[error("{0}")]
    Failed(String),

    #[error("Call timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Provider tool error: {0}")]
    Tool(String),
}

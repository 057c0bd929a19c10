//! The provisioner seam between the engine and a cloud control plane.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProvisionError;
use crate::instance::InstanceId;
use crate::registry::Scope;

/// Named outputs produced by a provisioned resource.
pub type Outputs = BTreeMap<String, Value>;

/// Everything a provisioner needs to act on one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionRequest {
    pub instance: InstanceId,
    pub kind: String,
    pub scope: Scope,
    pub params: BTreeMap<String, Value>,
}

/// A single problem reported by pre-flight validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Kind of change a what-if preview predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
    Deploy,
    NoChange,
    Ignore,
    Unsupported,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Modify => "modify",
            ChangeType::Delete => "delete",
            ChangeType::Deploy => "deploy",
            ChangeType::NoChange => "no_change",
            ChangeType::Ignore => "ignore",
            ChangeType::Unsupported => "unsupported",
        }
    }

    /// Parse either the snake_case form or the control plane's PascalCase form.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "").as_str() {
            "create" => Some(ChangeType::Create),
            "modify" => Some(ChangeType::Modify),
            "delete" => Some(ChangeType::Delete),
            "deploy" => Some(ChangeType::Deploy),
            "nochange" => Some(ChangeType::NoChange),
            "ignore" => Some(ChangeType::Ignore),
            "unsupported" => Some(ChangeType::Unsupported),
            _ => None,
        }
    }

    /// Whether the change would modify live infrastructure.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ChangeType::Create | ChangeType::Modify | ChangeType::Delete | ChangeType::Deploy
        )
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One predicted change to a single cloud resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub change_type: ChangeType,
    pub resource_id: String,
}

/// Result of a what-if preview for one instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub changes: Vec<ResourceChange>,
    /// Outputs the control plane can already predict
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub predicted_outputs: Outputs,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_change(mut self, change_type: ChangeType, resource_id: impl Into<String>) -> Self {
        self.changes.push(ResourceChange {
            change_type,
            resource_id: resource_id.into(),
        });
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, value: Value) -> Self {
        self.predicted_outputs.insert(name.into(), value);
        self
    }

    pub fn has_mutations(&self) -> bool {
        self.changes.iter().any(|c| c.change_type.is_mutation())
    }
}

/// Performs validation, deployment and preview of single instances.
///
/// Implementations must tolerate concurrent calls for different instances.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Pre-flight check without side effects.
    async fn validate(&self, request: &ProvisionRequest) -> Result<(), Vec<ValidationIssue>>;

    /// Create or update the resource and return its outputs.
    async fn apply(&self, request: &ProvisionRequest) -> Result<Outputs, ProvisionError>;

    /// Preview the changes an apply would make.
    async fn diff(&self, request: &ProvisionRequest) -> Result<ChangeSet, ProvisionError>;
}

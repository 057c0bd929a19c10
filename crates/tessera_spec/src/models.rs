//! Data models for template documents.
//!
//! These are the raw, untyped definitions as they appear on disk. Expressions
//! inside `params`, `loop` and `condition` stay as JSON values here; the
//! graph builder in `tessera_core` turns them into typed templates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SpecError, SpecResult};

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Test,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Test => "test",
            Environment::Prod => "prod",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dev" => Some(Environment::Dev),
            "test" => Some(Environment::Test),
            "prod" => Some(Environment::Prod),
            _ => None,
        }
    }

    pub fn all() -> Vec<Self> {
        vec![Environment::Dev, Environment::Test, Environment::Prod]
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declared type of a template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Int,
    Bool,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Int => "int",
            ParameterType::Bool => "bool",
            ParameterType::Array => "array",
            ParameterType::Object => "object",
        }
    }

    /// Check whether a JSON value fits this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Int => value.is_i64() || value.is_u64(),
            ParameterType::Bool => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Object => value.is_object(),
        }
    }
}

/// Declaration of a global template parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    #[serde(rename = "type", default)]
    pub param_type: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<Value>,
    /// Secure values are passed through opaquely and redacted in logs
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterDecl {
    pub fn new(param_type: ParameterType) -> Self {
        Self {
            param_type,
            ..Default::default()
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_allowed(mut self, allowed: Vec<Value>) -> Self {
        self.allowed = allowed;
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }
}

/// Raw definition of one resource template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Unique template identifier
    pub id: String,
    /// Resource kind (must be known to the kind registry)
    pub kind: String,
    /// Target scope, `resource_group` when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Parameter expressions
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Loop source expression; must evaluate to a sequence
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_source: Option<Value>,
    /// Activation condition expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
    /// Explicit dependencies by template id
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Declared output names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
}

impl ResourceDefinition {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            scope: None,
            params: BTreeMap::new(),
            loop_source: None,
            condition: None,
            depends_on: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn loop_over(mut self, source: Value) -> Self {
        self.loop_source = Some(source);
        self
    }

    pub fn condition(mut self, condition: Value) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn outputs(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for name in names {
            self.outputs.push(name.into());
        }
        self
    }
}

/// A complete template document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterDecl>,
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
    /// Document-level output expressions, evaluated after a run
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

impl TemplateDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, decl: ParameterDecl) -> Self {
        self.parameters.insert(name.into(), decl);
        self
    }

    pub fn resource(mut self, resource: ResourceDefinition) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn output(mut self, name: impl Into<String>, expr: Value) -> Self {
        self.outputs.insert(name.into(), expr);
        self
    }

    /// Merge another document into this one.
    ///
    /// Resources are appended in order. Parameters and outputs must not be
    /// declared twice; duplicate resource ids are left for the graph builder.
    pub fn merge(&mut self, other: TemplateDocument) -> SpecResult<()> {
        if self.name.is_none() {
            self.name = other.name;
        }
        for (name, decl) in other.parameters {
            if self.parameters.contains_key(&name) {
                return Err(SpecError::Conflict(format!("parameter {}", name)));
            }
            self.parameters.insert(name, decl);
        }
        for (name, expr) in other.outputs {
            if self.outputs.contains_key(&name) {
                return Err(SpecError::Conflict(format!("output {}", name)));
            }
            self.outputs.insert(name, expr);
        }
        self.resources.extend(other.resources);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::from_str("PROD"), Some(Environment::Prod));
        assert_eq!(Environment::from_str("staging"), None);
        assert_eq!(Environment::all().len(), 3);
    }

    #[test]
    fn test_parameter_type_accepts() {
        assert!(ParameterType::Int.accepts(&json!(3)));
        assert!(!ParameterType::Int.accepts(&json!(3.5)));
        assert!(ParameterType::Array.accepts(&json!([])));
        assert!(!ParameterType::Bool.accepts(&json!("true")));
    }

    #[test]
    fn test_resource_definition_from_yaml() {
        let yaml = r#"
id: containers
kind: cosmos_sql_container
loop: { $param: containers }
depends_on: [database]
params:
  name: "{{ item.name }}"
outputs: [name]
"#;
        let def: ResourceDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.id, "containers");
        assert_eq!(def.loop_source, Some(json!({"$param": "containers"})));
        assert_eq!(def.depends_on, vec!["database".to_string()]);
        assert!(def.scope.is_none());
    }

    #[test]
    fn test_merge_rejects_duplicate_parameter() {
        let mut first = TemplateDocument::new()
            .parameter("location", ParameterDecl::new(ParameterType::String));
        let second = TemplateDocument::new()
            .parameter("location", ParameterDecl::new(ParameterType::String));

        assert!(matches!(first.merge(second), Err(SpecError::Conflict(_))));
    }

    #[test]
    fn test_merge_appends_resources() {
        let mut first = TemplateDocument::new().resource(ResourceDefinition::new("vault", "key_vault"));
        let second = TemplateDocument::new()
            .with_name("second")
            .resource(ResourceDefinition::new("account", "cosmos_account"));

        first.merge(second).unwrap();
        assert_eq!(first.resources.len(), 2);
        assert_eq!(first.name.as_deref(), Some("second"));
    }
}

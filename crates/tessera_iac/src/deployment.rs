//! `az deployment` command lines and response parsing.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tessera_core::{ChangeSet, ChangeType, InstanceId, Outputs, Scope, ValidationIssue};
use tessera_runner::CommandConfig;
use tracing::debug;

use crate::error::{IacError, IacResult};

/// Longest deployment name the control plane accepts.
pub const MAX_DEPLOYMENT_NAME: usize = 64;

/// Hex digits of the instance hash appended to ambiguous names.
const NAME_HASH_LEN: usize = 8;

/// Deployment sub-command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentOp {
    Validate,
    Create,
    WhatIf,
}

impl DeploymentOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentOp::Validate => "validate",
            DeploymentOp::Create => "create",
            DeploymentOp::WhatIf => "what-if",
        }
    }
}

impl std::fmt::Display for DeploymentOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where deployments land.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureTarget {
    /// Default resource group for resource-group scoped instances
    pub resource_group: Option<String>,
    /// Subscription passed to every command; the tool's default when unset
    pub subscription: Option<String>,
    /// Location of subscription-level deployments
    pub location: String,
}

impl AzureTarget {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }

    pub fn resource_group(mut self, name: impl Into<String>) -> Self {
        self.resource_group = Some(name.into());
        self
    }

    pub fn subscription(mut self, id: impl Into<String>) -> Self {
        self.subscription = Some(id.into());
        self
    }
}

fn invalid_name_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.()-]+").expect("valid regex"))
}

fn error_line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:ERROR:\s*)?\((?P<code>[^)]+)\)\s*(?P<message>.+)$").expect("valid regex")
    })
}

/// Deployment name for an instance, e.g. `tessera-dev-containers-1`.
///
/// Distinct instances always get distinct names. When the plain form could
/// be read back two ways (a template id containing `-`, which `t[1]` and a
/// template `t-1` would share) or exceeds [`MAX_DEPLOYMENT_NAME`], a short
/// hash of the instance id is appended and only the prefix and template part
/// are shortened; the `-<index>` suffix is kept intact.
pub fn deployment_name(prefix: &str, instance: &InstanceId) -> String {
    let head = format!("{}-{}", prefix, instance.template);
    let head = invalid_name_chars().replace_all(&head, "-").into_owned();
    let suffix = instance
        .index
        .map(|index| format!("-{}", index))
        .unwrap_or_default();

    let plain = format!("{}{}", head, suffix);
    if !instance.template.contains('-') && plain.len() <= MAX_DEPLOYMENT_NAME {
        return plain;
    }

    let hash = blake3::hash(instance.to_string().as_bytes()).to_hex();
    let tail = format!("{}-{}", suffix, &hash.as_str()[..NAME_HASH_LEN]);
    let mut head = head;
    // Sanitized names are ASCII, so byte truncation is safe
    head.truncate(MAX_DEPLOYMENT_NAME.saturating_sub(tail.len()));
    format!("{}{}", head, tail)
}

/// Inline ARM parameters: `{"name": {"value": ...}}`.
pub fn parameters_json(params: &BTreeMap<String, Value>) -> Value {
    let wrapped: Map<String, Value> = params
        .iter()
        .map(|(name, value)| (name.clone(), json!({ "value": value })))
        .collect();
    Value::Object(wrapped)
}

/// Everything needed to render one deployment command.
#[derive(Debug, Clone)]
pub struct DeploymentCommand<'a> {
    pub program: &'a str,
    pub op: DeploymentOp,
    pub target: &'a AzureTarget,
    pub scope: &'a Scope,
    pub name: String,
    pub module: &'a Path,
    pub params: &'a BTreeMap<String, Value>,
}

impl DeploymentCommand<'_> {
    pub fn build(&self) -> IacResult<CommandConfig> {
        let mut command = CommandConfig::new(self.program).arg("deployment");

        command = match self.scope {
            Scope::ResourceGroup(explicit) => {
                let group = explicit
                    .as_deref()
                    .or(self.target.resource_group.as_deref())
                    .ok_or_else(|| IacError::MissingResourceGroup(self.name.clone()))?;
                command
                    .args(["group", self.op.as_str()])
                    .args(["--resource-group", group])
            }
            Scope::Subscription => command
                .args(["sub", self.op.as_str()])
                .args(["--location", self.target.location.as_str()]),
        };

        command = command
            .args(["--name", self.name.as_str()])
            .arg("--template-file")
            .arg(self.module.to_string_lossy())
            .arg("--parameters")
            .secret_arg(parameters_json(self.params).to_string())
            .opt_arg("--subscription", self.target.subscription.as_deref());

        if self.op == DeploymentOp::WhatIf {
            command = command.arg("--no-pretty-print");
        }

        Ok(command.args(["--output", "json", "--only-show-errors"]))
    }
}

/// Outputs of a finished deployment, from `properties.outputs.<name>.value`.
pub fn parse_outputs(body: &Value) -> Outputs {
    body.pointer("/properties/outputs")
        .and_then(Value::as_object)
        .map(|outputs| {
            outputs
                .iter()
                .map(|(name, output)| {
                    let value = output.get("value").cloned().unwrap_or(Value::Null);
                    (name.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Change set of a what-if preview.
///
/// Accepts the result either at the top level or under `properties`.
pub fn parse_changes(body: &Value) -> IacResult<ChangeSet> {
    let changes = body
        .get("changes")
        .or_else(|| body.pointer("/properties/changes"))
        .and_then(Value::as_array)
        .ok_or_else(|| IacError::InvalidResponse("what-if result has no changes".to_string()))?;

    let mut set = ChangeSet::new();
    for change in changes {
        let raw_type = change
            .get("changeType")
            .and_then(Value::as_str)
            .unwrap_or("Unsupported");
        let change_type = ChangeType::from_str(raw_type).unwrap_or_else(|| {
            debug!("Unrecognized change type '{}'", raw_type);
            ChangeType::Unsupported
        });
        let resource_id = change
            .get("resourceId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        set = set.with_change(change_type, resource_id);
    }
    Ok(set)
}

/// Issues from an ARM error object, one per detail when details exist.
pub fn issues_from_error(error: &Value) -> Vec<ValidationIssue> {
    let error = error.get("error").unwrap_or(error);
    let details = error
        .get("details")
        .and_then(Value::as_array)
        .filter(|d| !d.is_empty());

    if let Some(details) = details {
        return details.iter().flat_map(issues_from_error).collect();
    }

    match error.get("message").and_then(Value::as_str) {
        Some(message) => {
            let issue = ValidationIssue::new(message);
            vec![match error.get("code").and_then(Value::as_str) {
                Some(code) => issue.with_code(code),
                None => issue,
            }]
        }
        None => Vec::new(),
    }
}

/// Issues from the tool's error output.
///
/// Tries an embedded JSON error object first, then `(Code) message` lines,
/// then falls back to the raw text.
pub fn parse_error_output(text: &str) -> Vec<ValidationIssue> {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                let issues = issues_from_error(&value);
                if !issues.is_empty() {
                    return issues;
                }
            }
        }
    }

    let coded: Vec<ValidationIssue> = text
        .lines()
        .filter_map(|line| error_line_pattern().captures(line.trim()))
        .map(|caps| ValidationIssue::new(caps["message"].trim()).with_code(&caps["code"]))
        .collect();
    if !coded.is_empty() {
        return coded;
    }

    let trimmed = text.trim();
    let message = trimmed.strip_prefix("ERROR:").unwrap_or(trimmed).trim();
    if message.is_empty() {
        vec![ValidationIssue::new("provider tool reported a failure without details")]
    } else {
        vec![ValidationIssue::new(message)]
    }
}

/// One-line summary of the tool's error output.
pub fn summarize_error(text: &str) -> String {
    parse_error_output(text)
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn params() -> BTreeMap<String, Value> {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), json!("kv-dev"));
        params.insert("softDelete".to_string(), json!(true));
        params
    }

    #[test]
    fn test_deployment_name() {
        assert_eq!(
            deployment_name("tessera-dev", &InstanceId::indexed("containers", 1)),
            "tessera-dev-containers-1"
        );
        assert_eq!(
            deployment_name("tessera dev", &InstanceId::scalar("vault")),
            "tessera-dev-vault"
        );

        let long = "x".repeat(80);
        assert_eq!(
            deployment_name(&long, &InstanceId::scalar("vault")).len(),
            MAX_DEPLOYMENT_NAME
        );
    }

    #[test]
    fn test_deployment_names_are_distinct() {
        let looped = deployment_name("tessera-dev", &InstanceId::indexed("containers", 1));
        let dashed = deployment_name("tessera-dev", &InstanceId::scalar("containers-1"));
        assert_ne!(looped, dashed);
        assert!(dashed.starts_with("tessera-dev-containers-1-"));
        assert_eq!(dashed.len(), "tessera-dev-containers-1-".len() + NAME_HASH_LEN);

        let template = "c".repeat(60);
        let first = deployment_name("tessera-prod", &InstanceId::indexed(&template, 0));
        let second = deployment_name("tessera-prod", &InstanceId::indexed(&template, 1));
        assert_ne!(first, second);
        assert_eq!(first.len(), MAX_DEPLOYMENT_NAME);
        assert_eq!(second.len(), MAX_DEPLOYMENT_NAME);
        assert!(first.contains("-0-"));
        assert!(second.contains("-1-"));

        // Stable across calls
        assert_eq!(
            deployment_name("tessera-prod", &InstanceId::indexed(&template, 1)),
            second
        );
    }

    #[test]
    fn test_parameters_json() {
        let wrapped = parameters_json(&params());
        assert_eq!(
            wrapped,
            json!({ "name": { "value": "kv-dev" }, "softDelete": { "value": true } })
        );
    }

    #[test]
    fn test_group_create_command() {
        let target = AzureTarget::new("westeurope")
            .resource_group("rg-dev")
            .subscription("sub-1");
        let module = PathBuf::from("modules/key_vault.json");
        let params = params();

        let command = DeploymentCommand {
            program: "az",
            op: DeploymentOp::Create,
            target: &target,
            scope: &Scope::ResourceGroup(None),
            name: "tessera-dev-vault".to_string(),
            module: &module,
            params: &params,
        }
        .build()
        .unwrap();

        assert_eq!(&command.args[..3], ["deployment", "group", "create"]);
        assert_eq!(command.flag_value("--resource-group"), Some("rg-dev"));
        assert_eq!(command.flag_value("--name"), Some("tessera-dev-vault"));
        assert_eq!(command.flag_value("--subscription"), Some("sub-1"));
        assert_eq!(command.flag_value("--template-file"), Some("modules/key_vault.json"));
        let inline: Value = serde_json::from_str(command.flag_value("--parameters").unwrap()).unwrap();
        assert_eq!(inline["name"]["value"], "kv-dev");

        let rendered = command.to_string();
        assert!(rendered.contains("--parameters *** "));
        assert!(!rendered.contains("kv-dev"));
        assert!(!command.args.contains(&"--no-pretty-print".to_string()));
    }

    #[test]
    fn test_subscription_what_if_command() {
        let target = AzureTarget::new("westeurope");
        let module = PathBuf::from("modules/role_assignment.json");
        let params = BTreeMap::new();

        let command = DeploymentCommand {
            program: "az",
            op: DeploymentOp::WhatIf,
            target: &target,
            scope: &Scope::Subscription,
            name: "tessera-grant".to_string(),
            module: &module,
            params: &params,
        }
        .build()
        .unwrap();

        assert_eq!(&command.args[..3], ["deployment", "sub", "what-if"]);
        assert_eq!(command.flag_value("--location"), Some("westeurope"));
        assert_eq!(command.flag_value("--resource-group"), None);
        assert!(command.args.contains(&"--no-pretty-print".to_string()));
    }

    #[test]
    fn test_explicit_group_and_missing_group() {
        let target = AzureTarget::new("westeurope");
        let module = PathBuf::from("m.json");
        let params = BTreeMap::new();
        let scope = Scope::ResourceGroup(Some("rg-shared".to_string()));

        let mut command = DeploymentCommand {
            program: "az",
            op: DeploymentOp::Validate,
            target: &target,
            scope: &scope,
            name: "n".to_string(),
            module: &module,
            params: &params,
        };
        assert_eq!(
            command.build().unwrap().flag_value("--resource-group"),
            Some("rg-shared")
        );

        let default_scope = Scope::ResourceGroup(None);
        command.scope = &default_scope;
        assert!(matches!(command.build(), Err(IacError::MissingResourceGroup(_))));
    }

    #[test]
    fn test_parse_outputs() {
        let body = json!({
            "properties": {
                "provisioningState": "Succeeded",
                "outputs": {
                    "name": { "type": "String", "value": "kv-dev" },
                    "uri": { "type": "String", "value": "https://kv-dev.vault.azure.net/" }
                }
            }
        });
        let outputs = parse_outputs(&body);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["uri"], json!("https://kv-dev.vault.azure.net/"));
        assert!(parse_outputs(&json!({ "properties": {} })).is_empty());
    }

    #[test]
    fn test_parse_changes() {
        let body = json!({
            "status": "Succeeded",
            "changes": [
                { "changeType": "Create", "resourceId": "/subscriptions/s/rg/vaults/kv-dev" },
                { "changeType": "NoChange", "resourceId": "/subscriptions/s/rg/accounts/acc" },
                { "changeType": "Teleport", "resourceId": "/x" }
            ]
        });
        let set = parse_changes(&body).unwrap();
        assert_eq!(set.changes.len(), 3);
        assert_eq!(set.changes[0].change_type, ChangeType::Create);
        assert_eq!(set.changes[1].change_type, ChangeType::NoChange);
        assert_eq!(set.changes[2].change_type, ChangeType::Unsupported);
        assert!(set.has_mutations());

        assert!(parse_changes(&json!({ "status": "Failed" })).is_err());
    }

    #[test]
    fn test_parse_error_output_json_details() {
        let stderr = r#"ERROR: {"code": "InvalidTemplateDeployment", "message": "The template deployment is not valid.", "details": [{"code": "SkuNotAvailable", "message": "SKU S9 is not available"}, {"code": "InvalidName", "message": "Name too long"}]}"#;
        let issues = parse_error_output(stderr);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].code.as_deref(), Some("SkuNotAvailable"));
        assert_eq!(issues[1].to_string(), "[InvalidName] Name too long");
    }

    #[test]
    fn test_parse_error_output_fallbacks() {
        let coded = parse_error_output("ERROR: (AuthorizationFailed) The client does not have access\nCode: AuthorizationFailed");
        assert_eq!(coded.len(), 1);
        assert_eq!(coded[0].code.as_deref(), Some("AuthorizationFailed"));
        assert_eq!(coded[0].message, "The client does not have access");

        let raw = parse_error_output("ERROR: Please run 'az login' to setup account.\n");
        assert_eq!(raw, vec![ValidationIssue::new("Please run 'az login' to setup account.")]);

        assert_eq!(parse_error_output("").len(), 1);
    }

    #[test]
    fn test_summarize_error() {
        let stderr = r#"{"error": {"code": "Conflict", "message": "Operation in progress"}}"#;
        assert_eq!(summarize_error(stderr), "[Conflict] Operation in progress");
    }
}

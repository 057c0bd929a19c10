//! Resource instances and their lifecycle.
//!
//! An instance is one concrete resource produced from a template: exactly one
//! for a non-looped template, one per loop element otherwise. Instances move
//! forward through their lifecycle only; once terminal they never change.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::expr::concat_piece;
use crate::options::RunMode;
use crate::provisioner::{ChangeSet, Outputs, ProvisionRequest};
use crate::registry::Scope;

/// Identity of an instance: template id plus loop index for looped templates.
///
/// Ordering is by template id, then index, which is the deterministic order
/// used for batches, reports and validation results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId {
    pub template: String,
    pub index: Option<usize>,
}

impl InstanceId {
    pub fn scalar(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            index: None,
        }
    }

    pub fn indexed(template: impl Into<String>, index: usize) -> Self {
        Self {
            template: template.into(),
            index: Some(index),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{}]", self.template, index),
            None => write!(f, "{}", self.template),
        }
    }
}

impl FromStr for InstanceId {
    type Err = String;

    /// Parse `template` or `template[index]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_suffix(']').and_then(|rest| rest.split_once('[')) {
            Some((template, index)) => {
                let index = index
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid instance index in '{}'", s))?;
                Ok(InstanceId::indexed(template, index))
            }
            None if !s.is_empty() && !s.contains('[') => Ok(InstanceId::scalar(s)),
            None => Err(format!("invalid instance id '{}'", s)),
        }
    }
}

impl Serialize for InstanceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InstanceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Validating,
    Applying,
    /// Condition evaluated false; never provisioned
    Skipped,
    /// A transitive dependency failed
    Blocked,
    Applied,
    /// What-if preview completed
    Planned,
    Failed,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Validating => "validating",
            InstanceState::Applying => "applying",
            InstanceState::Skipped => "skipped",
            InstanceState::Blocked => "blocked",
            InstanceState::Applied => "applied",
            InstanceState::Planned => "planned",
            InstanceState::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            InstanceState::Pending => 0,
            InstanceState::Validating => 1,
            InstanceState::Applying => 2,
            _ => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    /// Whether outputs of an instance in this state are available to dependents.
    pub fn has_outputs(&self) -> bool {
        matches!(self, InstanceState::Applied | InstanceState::Planned)
    }

    /// Transitions only move forward.
    pub fn can_transition_to(&self, next: InstanceState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named output of a specific instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub target: InstanceId,
    pub output: String,
}

impl Reference {
    pub fn new(target: InstanceId, output: impl Into<String>) -> Self {
        Self {
            target,
            output: output.into(),
        }
    }

    /// Stand-in value used when the referenced output is not known yet.
    pub fn placeholder(&self) -> Value {
        Value::String(format!("(known after apply: {})", self))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.output)
    }
}

/// A bound parameter value, possibly still waiting on other instances.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Literal(Value),
    Reference(Reference),
    Concat(Vec<ParamValue>),
    List(Vec<ParamValue>),
    Object(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// True when no reference is left inside the value.
    pub fn is_resolved(&self) -> bool {
        match self {
            ParamValue::Literal(_) => true,
            ParamValue::Reference(_) => false,
            ParamValue::Concat(parts) | ParamValue::List(parts) => {
                parts.iter().all(|p| p.is_resolved())
            }
            ParamValue::Object(fields) => fields.values().all(|p| p.is_resolved()),
        }
    }

    /// Every reference inside the value, depth first.
    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a Reference>) {
        match self {
            ParamValue::Literal(_) => {}
            ParamValue::Reference(r) => found.push(r),
            ParamValue::Concat(parts) | ParamValue::List(parts) => {
                for part in parts {
                    part.collect_references(found);
                }
            }
            ParamValue::Object(fields) => {
                for field in fields.values() {
                    field.collect_references(found);
                }
            }
        }
    }

    /// Replace every reference with the value produced by `f`.
    pub fn try_map_references<E, F>(self, f: &mut F) -> Result<ParamValue, E>
    where
        F: FnMut(Reference) -> Result<ParamValue, E>,
    {
        Ok(match self {
            ParamValue::Reference(r) => f(r)?,
            ParamValue::Concat(parts) => {
                let mut mapped = Vec::with_capacity(parts.len());
                for part in parts {
                    mapped.push(part.try_map_references(f)?);
                }
                ParamValue::Concat(mapped)
            }
            ParamValue::List(items) => {
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    mapped.push(item.try_map_references(f)?);
                }
                ParamValue::List(mapped)
            }
            ParamValue::Object(fields) => {
                let mut mapped = BTreeMap::new();
                for (key, field) in fields {
                    mapped.insert(key, field.try_map_references(f)?);
                }
                ParamValue::Object(mapped)
            }
            literal @ ParamValue::Literal(_) => literal,
        })
    }

    /// Produce a concrete value, substituting references through `lookup`.
    pub fn render(&self, lookup: &dyn Fn(&Reference) -> Value) -> Value {
        match self {
            ParamValue::Literal(v) => v.clone(),
            ParamValue::Reference(r) => lookup(r),
            ParamValue::Concat(parts) => Value::String(
                parts
                    .iter()
                    .map(|p| concat_piece(&p.render(lookup)))
                    .collect(),
            ),
            ParamValue::List(items) => Value::Array(items.iter().map(|i| i.render(lookup)).collect()),
            ParamValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.render(lookup)))
                    .collect(),
            ),
        }
    }
}

/// Loop element an instance was expanded from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopBinding {
    pub index: usize,
    pub item: Value,
}

/// One concrete resource to provision.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: InstanceId,
    pub kind: String,
    pub scope: Scope,
    pub params: BTreeMap<String, ParamValue>,
    pub binding: Option<LoopBinding>,
    state: InstanceState,
    outputs: Option<Outputs>,
    error: Option<String>,
    blocked_by: Option<InstanceId>,
    change_set: Option<ChangeSet>,
}

impl Instance {
    pub fn new(id: InstanceId, kind: impl Into<String>, scope: Scope) -> Self {
        Self {
            id,
            kind: kind.into(),
            scope,
            params: BTreeMap::new(),
            binding: None,
            state: InstanceState::Pending,
            outputs: None,
            error: None,
            blocked_by: None,
            change_set: None,
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, ParamValue>) -> Self {
        self.params = params;
        self
    }

    pub fn with_binding(mut self, binding: LoopBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Skipped instances take no part in the graph.
    pub fn is_active(&self) -> bool {
        self.state != InstanceState::Skipped
    }

    pub fn outputs(&self) -> Option<&Outputs> {
        self.outputs.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn blocked_by(&self) -> Option<&InstanceId> {
        self.blocked_by.as_ref()
    }

    pub fn change_set(&self) -> Option<&ChangeSet> {
        self.change_set.as_ref()
    }

    /// Names of parameters still holding references.
    pub fn unresolved_params(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|(_, v)| !v.is_resolved())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    fn transition(&mut self, next: InstanceState) -> CoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        debug!("{}: {} -> {}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }

    pub fn skip(&mut self) -> CoreResult<()> {
        self.transition(InstanceState::Skipped)
    }

    pub fn begin_validation(&mut self) -> CoreResult<()> {
        self.transition(InstanceState::Validating)
    }

    pub fn begin_apply(&mut self) -> CoreResult<()> {
        self.transition(InstanceState::Applying)
    }

    /// Record a successful apply. Outputs are written exactly once.
    pub fn complete(&mut self, outputs: Outputs) -> CoreResult<()> {
        self.transition(InstanceState::Applied)?;
        self.outputs = Some(outputs);
        Ok(())
    }

    /// Record a what-if preview with its predicted outputs.
    pub fn plan(&mut self, change_set: ChangeSet, outputs: Outputs) -> CoreResult<()> {
        self.transition(InstanceState::Planned)?;
        self.outputs = Some(outputs);
        self.change_set = Some(change_set);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> CoreResult<()> {
        self.transition(InstanceState::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn block(&mut self, upstream: InstanceId, reason: impl Into<String>) -> CoreResult<()> {
        self.transition(InstanceState::Blocked)?;
        self.blocked_by = Some(upstream);
        self.error = Some(reason.into());
        Ok(())
    }
}

/// All instances of a run, keyed and iterated in id order.
#[derive(Debug, Clone, Default)]
pub struct InstanceStore {
    instances: BTreeMap<InstanceId, Instance>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an instance; ids must be unique.
    pub fn insert(&mut self, instance: Instance) -> bool {
        if self.instances.contains_key(&instance.id) {
            return false;
        }
        self.instances.insert(instance.id.clone(), instance);
        true
    }

    pub fn get(&self, id: &InstanceId) -> Option<&Instance> {
        self.instances.get(id)
    }

    pub fn require(&self, id: &InstanceId) -> CoreResult<&Instance> {
        self.instances
            .get(id)
            .ok_or_else(|| CoreError::InstanceNotFound(id.clone()))
    }

    pub fn require_mut(&mut self, id: &InstanceId) -> CoreResult<&mut Instance> {
        self.instances
            .get_mut(id)
            .ok_or_else(|| CoreError::InstanceNotFound(id.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    pub fn ids(&self) -> Vec<InstanceId> {
        self.instances.keys().cloned().collect()
    }

    /// Ids of every non-skipped instance, sorted.
    pub fn active_ids(&self) -> Vec<InstanceId> {
        self.instances
            .values()
            .filter(|i| i.is_active())
            .map(|i| i.id.clone())
            .collect()
    }

    /// Instances expanded from one template, in loop order.
    pub fn instances_of<'a>(&'a self, template: &'a str) -> impl Iterator<Item = &'a Instance> + 'a {
        self.instances
            .values()
            .filter(move |i| i.id.template == template)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Value of a referenced output as seen by a dependent.
    ///
    /// In what-if mode, outputs that are not known yet become placeholders.
    pub fn lookup(&self, reference: &Reference, mode: RunMode) -> Value {
        let known = self
            .get(&reference.target)
            .filter(|target| target.state().has_outputs())
            .and_then(|target| target.outputs());

        match known {
            Some(outputs) => match outputs.get(&reference.output) {
                Some(value) => value.clone(),
                None if mode == RunMode::WhatIf => reference.placeholder(),
                None => Value::Null,
            },
            None if mode == RunMode::WhatIf => reference.placeholder(),
            None => Value::Null,
        }
    }

    /// Build the provisioner request for an instance with its references rendered.
    pub fn request_for(&self, id: &InstanceId, mode: RunMode) -> CoreResult<ProvisionRequest> {
        let instance = self.require(id)?;
        let lookup = |r: &Reference| self.lookup(r, mode);
        let params = instance
            .params
            .iter()
            .map(|(name, value)| (name.clone(), value.render(&lookup)))
            .collect();

        Ok(ProvisionRequest {
            instance: instance.id.clone(),
            kind: instance.kind.clone(),
            scope: instance.scope.clone(),
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(id: InstanceId) -> Instance {
        Instance::new(id, "key_vault", Scope::default())
    }

    #[test]
    fn test_instance_id_order_and_display() {
        let mut ids = vec![
            InstanceId::indexed("containers", 1),
            InstanceId::scalar("account"),
            InstanceId::indexed("containers", 0),
        ];
        ids.sort();
        assert_eq!(ids[0], InstanceId::scalar("account"));
        assert_eq!(ids[1].to_string(), "containers[0]");
        assert_eq!(ids[2].to_string(), "containers[1]");
    }

    #[test]
    fn test_instance_id_parse_and_serde() {
        assert_eq!("vault".parse::<InstanceId>().unwrap(), InstanceId::scalar("vault"));
        assert_eq!(
            "containers[2]".parse::<InstanceId>().unwrap(),
            InstanceId::indexed("containers", 2)
        );
        assert!("containers[x]".parse::<InstanceId>().is_err());
        assert!("".parse::<InstanceId>().is_err());

        let json = serde_json::to_string(&InstanceId::indexed("containers", 1)).unwrap();
        assert_eq!(json, "\"containers[1]\"");
        let back: InstanceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, InstanceId::indexed("containers", 1));
    }

    #[test]
    fn test_forward_only_transitions() {
        let mut vault = instance(InstanceId::scalar("vault"));
        vault.begin_validation().unwrap();
        vault.begin_apply().unwrap();
        assert!(vault.begin_validation().is_err());

        vault.complete(Outputs::new()).unwrap();
        assert_eq!(vault.state(), InstanceState::Applied);

        // terminal states never change
        assert!(vault.fail("late").is_err());
        assert!(vault.complete(Outputs::new()).is_err());
    }

    #[test]
    fn test_block_records_upstream() {
        let mut db = instance(InstanceId::scalar("database"));
        db.block(InstanceId::scalar("account"), "dependency 'account' failed")
            .unwrap();
        assert_eq!(db.state(), InstanceState::Blocked);
        assert_eq!(db.blocked_by(), Some(&InstanceId::scalar("account")));
        assert!(db.outputs().is_none());
    }

    #[test]
    fn test_param_value_render_and_references() {
        let reference = Reference::new(InstanceId::scalar("vault"), "name");
        let value = ParamValue::Concat(vec![
            ParamValue::Literal(json!("uri-")),
            ParamValue::Reference(reference.clone()),
        ]);
        assert!(!value.is_resolved());
        assert_eq!(value.references(), vec![&reference]);

        let rendered = value.render(&|_| json!("kv-dev"));
        assert_eq!(rendered, json!("uri-kv-dev"));
    }

    #[test]
    fn test_lookup_placeholder_in_what_if() {
        let mut store = InstanceStore::new();
        store.insert(instance(InstanceId::scalar("vault")));
        let reference = Reference::new(InstanceId::scalar("vault"), "uri");

        assert_eq!(store.lookup(&reference, RunMode::Apply), Value::Null);
        assert_eq!(
            store.lookup(&reference, RunMode::WhatIf),
            json!("(known after apply: vault.uri)")
        );

        let vault = store.require_mut(&InstanceId::scalar("vault")).unwrap();
        vault.begin_apply().unwrap();
        let mut outputs = Outputs::new();
        outputs.insert("uri".to_string(), json!("https://kv"));
        vault.complete(outputs).unwrap();

        assert_eq!(store.lookup(&reference, RunMode::Apply), json!("https://kv"));
    }

    #[test]
    fn test_store_rejects_duplicate() {
        let mut store = InstanceStore::new();
        assert!(store.insert(instance(InstanceId::scalar("vault"))));
        assert!(!store.insert(instance(InstanceId::scalar("vault"))));
        assert_eq!(store.len(), 1);
    }
}

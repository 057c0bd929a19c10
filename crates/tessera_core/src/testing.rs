//! In-memory provisioner for tests and dry runs.
//!
//! [`RecordingProvisioner`] records every call and answers deterministically.
//! Applied outputs echo the request parameters plus `id` and `name`; failures,
//! validation issues and delays can be scripted per instance.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::error::ProvisionError;
use crate::instance::InstanceId;
use crate::provisioner::{
    ChangeSet, ChangeType, Outputs, ProvisionRequest, Provisioner, ValidationIssue,
};

/// Which provisioner operation was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Validate,
    Apply,
    Diff,
}

/// A recorded provisioner call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub instance: InstanceId,
    pub resource_kind: String,
    pub params: BTreeMap<String, Value>,
}

#[derive(Default)]
struct Script {
    apply_failures: HashMap<String, String>,
    diff_failures: HashMap<String, String>,
    rejections: HashMap<String, Vec<ValidationIssue>>,
    outputs: HashMap<String, Outputs>,
    delays: HashMap<String, Duration>,
}

/// Deterministic provisioner that records calls.
#[derive(Clone, Default)]
pub struct RecordingProvisioner {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    script: Arc<RwLock<Script>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl RecordingProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `apply` fail for an instance, given as `template` or `template[i]`.
    pub fn fail_apply(self, instance: &str, message: impl Into<String>) -> Self {
        self.script
            .write()
            .apply_failures
            .insert(instance.to_string(), message.into());
        self
    }

    pub fn fail_diff(self, instance: &str, message: impl Into<String>) -> Self {
        self.script
            .write()
            .diff_failures
            .insert(instance.to_string(), message.into());
        self
    }

    /// Make validation report an issue for an instance.
    pub fn reject(self, instance: &str, issue: ValidationIssue) -> Self {
        self.script
            .write()
            .rejections
            .entry(instance.to_string())
            .or_default()
            .push(issue);
        self
    }

    /// Extra outputs returned for an instance.
    pub fn with_outputs(self, instance: &str, outputs: Outputs) -> Self {
        self.script.write().outputs.insert(instance.to_string(), outputs);
        self
    }

    /// Delay every call for an instance; `*` applies to all instances.
    pub fn delay(self, instance: &str, delay: Duration) -> Self {
        self.script.write().delays.insert(instance.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Instances called with `kind`, in call order.
    pub fn calls_of(&self, kind: CallKind) -> Vec<InstanceId> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.instance.clone())
            .collect()
    }

    pub fn params_for(&self, kind: CallKind, instance: &str) -> Option<BTreeMap<String, Value>> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|c| c.kind == kind && c.instance.to_string() == instance)
            .map(|c| c.params.clone())
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
        self.peak.store(0, Ordering::SeqCst);
    }

    /// Outputs `apply` returns for a request.
    pub fn outputs_for(&self, request: &ProvisionRequest) -> Outputs {
        let key = request.instance.to_string();
        let mut outputs = request.params.clone();
        outputs.insert("id".to_string(), Value::String(resource_id(&request.instance)));
        outputs
            .entry("name".to_string())
            .or_insert_with(|| Value::String(key.clone()));
        if let Some(extra) = self.script.read().outputs.get(&key) {
            outputs.extend(extra.clone());
        }
        outputs
    }

    async fn enter(&self, kind: CallKind, request: &ProvisionRequest) {
        self.calls.lock().push(RecordedCall {
            kind,
            instance: request.instance.clone(),
            resource_kind: request.kind.clone(),
            params: request.params.clone(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = {
            let script = self.script.read();
            script
                .delays
                .get(&request.instance.to_string())
                .or_else(|| script.delays.get("*"))
                .copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn resource_id(instance: &InstanceId) -> String {
    match instance.index {
        Some(index) => format!("/resources/{}/{}", instance.template, index),
        None => format!("/resources/{}", instance.template),
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn validate(&self, request: &ProvisionRequest) -> Result<(), Vec<ValidationIssue>> {
        self.enter(CallKind::Validate, request).await;
        let issues = self
            .script
            .read()
            .rejections
            .get(&request.instance.to_string())
            .cloned();
        self.leave();
        match issues {
            Some(issues) => Err(issues),
            None => Ok(()),
        }
    }

    async fn apply(&self, request: &ProvisionRequest) -> Result<Outputs, ProvisionError> {
        self.enter(CallKind::Apply, request).await;
        let failure = self
            .script
            .read()
            .apply_failures
            .get(&request.instance.to_string())
            .cloned();
        self.leave();
        match failure {
            Some(message) => Err(ProvisionError::Failed(message)),
            None => Ok(self.outputs_for(request)),
        }
    }

    async fn diff(&self, request: &ProvisionRequest) -> Result<ChangeSet, ProvisionError> {
        self.enter(CallKind::Diff, request).await;
        let failure = self
            .script
            .read()
            .diff_failures
            .get(&request.instance.to_string())
            .cloned();
        self.leave();
        if let Some(message) = failure {
            return Err(ProvisionError::Failed(message));
        }

        let id = resource_id(&request.instance);
        Ok(ChangeSet::new()
            .with_change(ChangeType::Create, id.clone())
            .with_output("id", Value::String(id)))
    }
}

impl std::fmt::Debug for RecordingProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingProvisioner")
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Scope;
    use serde_json::json;

    fn request(instance: InstanceId) -> ProvisionRequest {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), json!("kv-dev"));
        ProvisionRequest {
            instance,
            kind: "key_vault".into(),
            scope: Scope::default(),
            params,
        }
    }

    #[tokio::test]
    async fn test_records_and_echoes() {
        let provisioner = RecordingProvisioner::new();
        let outputs = provisioner
            .apply(&request(InstanceId::scalar("vault")))
            .await
            .unwrap();

        assert_eq!(outputs["name"], json!("kv-dev"));
        assert_eq!(outputs["id"], json!("/resources/vault"));
        assert_eq!(provisioner.calls_of(CallKind::Apply), vec![InstanceId::scalar("vault")]);
        assert_eq!(provisioner.peak_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let provisioner = RecordingProvisioner::new()
            .fail_apply("containers[1]", "conflict")
            .reject("vault", ValidationIssue::new("bad sku"));

        let result = provisioner
            .apply(&request(InstanceId::indexed("containers", 1)))
            .await;
        assert_eq!(result, Err(ProvisionError::Failed("conflict".into())));

        let result = provisioner.validate(&request(InstanceId::scalar("vault"))).await;
        assert!(result.is_err());
        assert!(provisioner
            .validate(&request(InstanceId::scalar("account")))
            .await
            .is_ok());
    }
}

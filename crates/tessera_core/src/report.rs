//! Run reports.
//!
//! A report captures the final state of every instance, the per-template
//! output projection and the evaluated document outputs. Looped templates
//! project to a sequence in loop order; entries for instances without outputs
//! are empty objects so that positions keep matching loop indices.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::instance::{Instance, InstanceId, InstanceState, InstanceStore, ParamValue};
use crate::options::{Interruption, RunMode};
use crate::provisioner::{ChangeSet, Outputs};
use crate::schedule::Plan;
use crate::template::TemplateSet;

/// Final status of an instance as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Applied,
    Planned,
    Skipped,
    Failed,
    Blocked,
    /// The run stopped before the instance was started
    NotAttempted,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Applied => "applied",
            InstanceStatus::Planned => "planned",
            InstanceStatus::Skipped => "skipped",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Blocked => "blocked",
            InstanceStatus::NotAttempted => "not attempted",
        }
    }

    fn from_state(state: InstanceState) -> Self {
        match state {
            InstanceState::Applied => InstanceStatus::Applied,
            InstanceState::Planned => InstanceStatus::Planned,
            InstanceState::Skipped => InstanceStatus::Skipped,
            InstanceState::Failed => InstanceStatus::Failed,
            InstanceState::Blocked => InstanceStatus::Blocked,
            InstanceState::Pending | InstanceState::Validating | InstanceState::Applying => {
                InstanceStatus::NotAttempted
            }
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome for one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceReport {
    pub id: InstanceId,
    pub kind: String,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: Outputs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<InstanceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_set: Option<ChangeSet>,
}

impl InstanceReport {
    fn from_instance(instance: &Instance, plan: &Plan) -> Self {
        Self {
            id: instance.id.clone(),
            kind: instance.kind.clone(),
            status: InstanceStatus::from_state(instance.state()),
            batch: plan.batch_of(&instance.id),
            outputs: instance.outputs().cloned().unwrap_or_default(),
            error: instance.error().map(str::to_string),
            blocked_by: instance.blocked_by().cloned(),
            change_set: instance.change_set().cloned(),
        }
    }
}

/// Inputs for assembling a report.
pub struct ReportInput<'a> {
    pub run_id: Uuid,
    pub name: Option<String>,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub templates: &'a TemplateSet,
    pub store: &'a InstanceStore,
    pub plan: &'a Plan,
    pub outputs: &'a BTreeMap<String, ParamValue>,
    pub interruption: Option<Interruption>,
}

/// Consolidated result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub plan: Plan,
    pub instances: Vec<InstanceReport>,
    pub template_outputs: BTreeMap<String, Value>,
    pub outputs: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interruption: Option<Interruption>,
    pub success: bool,
}

impl RunReport {
    pub fn assemble(input: ReportInput<'_>) -> Self {
        let ReportInput {
            run_id,
            name,
            mode,
            started_at,
            templates,
            store,
            plan,
            outputs,
            interruption,
        } = input;

        let instances: Vec<InstanceReport> = store
            .iter()
            .map(|i| InstanceReport::from_instance(i, plan))
            .collect();

        let template_outputs = templates
            .iter()
            .map(|template| {
                let projected = if template.is_looped() {
                    Value::Array(
                        store
                            .instances_of(&template.id)
                            .map(outputs_object)
                            .collect(),
                    )
                } else {
                    store
                        .get(&InstanceId::scalar(&template.id))
                        .map(outputs_object)
                        .unwrap_or_else(|| Value::Object(Map::new()))
                };
                (template.id.clone(), projected)
            })
            .collect();

        let lookup = |r: &crate::instance::Reference| store.lookup(r, mode);
        let outputs = outputs
            .iter()
            .map(|(name, value)| (name.clone(), value.render(&lookup)))
            .collect();

        let success = interruption.is_none()
            && instances.iter().all(|i| {
                matches!(
                    i.status,
                    InstanceStatus::Applied | InstanceStatus::Planned | InstanceStatus::Skipped
                )
            });

        Self {
            run_id,
            name,
            mode,
            started_at,
            finished_at: Utc::now(),
            plan: plan.clone(),
            instances,
            template_outputs,
            outputs,
            interruption,
            success,
        }
    }

    pub fn instance(&self, id: &InstanceId) -> Option<&InstanceReport> {
        self.instances.iter().find(|i| &i.id == id)
    }

    /// Status of an instance given as `template` or `template[index]`.
    pub fn status_of(&self, id: &str) -> Option<InstanceStatus> {
        let id: InstanceId = id.parse().ok()?;
        self.instance(&id).map(|i| i.status)
    }

    pub fn with_status(&self, status: InstanceStatus) -> impl Iterator<Item = &InstanceReport> {
        self.instances.iter().filter(move |i| i.status == status)
    }

    pub fn count(&self, status: InstanceStatus) -> usize {
        self.with_status(status).count()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Human-readable summary of the run.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let verdict = match (self.success, self.interruption) {
            (true, _) => "SUCCEEDED".to_string(),
            (false, Some(interruption)) => format!("INTERRUPTED ({})", interruption),
            (false, None) => "FAILED".to_string(),
        };
        let _ = writeln!(out, "Run {} ({}): {}", self.run_id, self.mode, verdict);
        if let Some(name) = &self.name {
            let _ = writeln!(out, "Template: {}", name);
        }
        let _ = writeln!(
            out,
            "{} instance(s) in {} batch(es), {:.1}s",
            self.instances.len(),
            self.plan.len(),
            self.duration().num_milliseconds() as f64 / 1000.0
        );

        let width = self
            .instances
            .iter()
            .map(|i| i.id.to_string().len())
            .max()
            .unwrap_or(0);

        for (number, batch) in self.plan.batches.iter().enumerate() {
            let _ = writeln!(out, "\nBatch {}:", number + 1);
            for id in batch {
                if let Some(instance) = self.instance(id) {
                    let _ = writeln!(out, "  {}", Self::instance_line(instance, width));
                }
            }
        }

        let skipped: Vec<&InstanceReport> = self.with_status(InstanceStatus::Skipped).collect();
        if !skipped.is_empty() {
            let _ = writeln!(out, "\nSkipped:");
            for instance in skipped {
                let _ = writeln!(out, "  {}", instance.id);
            }
        }

        let failed: Vec<&InstanceReport> = self
            .instances
            .iter()
            .filter(|i| matches!(i.status, InstanceStatus::Failed | InstanceStatus::Blocked))
            .collect();
        if !failed.is_empty() {
            let _ = writeln!(out, "\nFailures:");
            for instance in failed {
                let _ = writeln!(
                    out,
                    "  {} ({}): {}",
                    instance.id,
                    instance.status,
                    instance.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        if !self.outputs.is_empty() {
            let _ = writeln!(out, "\nOutputs:");
            for (name, value) in &self.outputs {
                let _ = writeln!(out, "  {} = {}", name, value);
            }
        }

        out
    }

    fn instance_line(instance: &InstanceReport, width: usize) -> String {
        let id = instance.id.to_string();
        let mut line = format!("{:<width$}  {}", id, instance.status, width = width);
        if let Some(change_set) = &instance.change_set {
            for change in &change_set.changes {
                let _ = write!(line, "\n    {} {}", change.change_type, change.resource_id);
            }
        }
        if let Some(upstream) = &instance.blocked_by {
            let _ = write!(line, " (by {})", upstream);
        }
        line
    }
}

fn outputs_object(instance: &Instance) -> Value {
    match instance.outputs() {
        Some(outputs) if instance.state().has_outputs() => Value::Object(
            outputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        _ => Value::Object(Map::new()),
    }
}

//! Run coordination.
//!
//! A run goes through build, expand, condition, resolve and schedule before
//! any provisioner call is made. Any failure in those phases aborts the run
//! with zero calls. Validation comes next unless skipped, then execution.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tessera_spec::{ParameterSet, TemplateDocument};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::condition::ConditionEvaluator;
use crate::error::{CoreResult, DefinitionError};
use crate::executor::{ExecutionSummary, Executor};
use crate::expand::LoopExpander;
use crate::expr::EvalContext;
use crate::instance::{InstanceStore, ParamValue};
use crate::options::{CancelHandle, Interruption, RunOptions};
use crate::provisioner::Provisioner;
use crate::registry::KindRegistry;
use crate::report::{ReportInput, RunReport};
use crate::resolve::{DependencyEdge, ReferenceResolver};
use crate::schedule::{DependencyGraph, Plan};
use crate::template::{GraphBuilder, TemplateSet};

/// A fully resolved and scheduled run, ready to execute.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub name: Option<String>,
    pub templates: TemplateSet,
    pub store: InstanceStore,
    pub edges: Vec<DependencyEdge>,
    pub graph: DependencyGraph,
    pub plan: Plan,
    /// Document outputs with references pinned
    pub outputs: BTreeMap<String, ParamValue>,
}

/// Run every phase that precedes execution.
pub fn prepare(
    registry: &KindRegistry,
    document: &TemplateDocument,
    params: &ParameterSet,
) -> CoreResult<PreparedRun> {
    let builder = GraphBuilder::new(registry);
    let templates = builder.build(&document.resources)?;
    let output_exprs = builder.build_outputs(&document.outputs, &templates)?;

    let mut store = LoopExpander::new(params).expand(&templates)?;
    ConditionEvaluator::new(params).evaluate(&templates, &mut store)?;

    let resolver = ReferenceResolver::new(&templates);
    let edges = resolver.resolve(&mut store)?;

    let ctx = EvalContext::new(params);
    let mut outputs = BTreeMap::new();
    for (name, expr) in output_exprs {
        let bound = expr.bind(&ctx).map_err(|e| DefinitionError::InvalidExpression {
            id: "outputs".to_string(),
            field: name.clone(),
            message: e.to_string(),
        })?;
        let (pinned, _) = resolver.resolve_value("outputs", bound, &store)?;
        outputs.insert(name, pinned);
    }

    let graph = DependencyGraph::new(store.active_ids(), &edges);
    let plan = graph.plan()?;

    info!(
        "Prepared {} instance(s) ({} active) in {} batch(es)",
        store.len(),
        graph.len(),
        plan.len()
    );

    Ok(PreparedRun {
        name: document.name.clone(),
        templates,
        store,
        edges,
        graph,
        plan,
        outputs,
    })
}

/// Drives a run from document to report.
pub struct RunCoordinator {
    registry: Arc<KindRegistry>,
    provisioner: Arc<dyn Provisioner>,
    options: RunOptions,
    cancel: CancelHandle,
}

impl RunCoordinator {
    pub fn new(registry: Arc<KindRegistry>, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            registry,
            provisioner,
            options: RunOptions::default(),
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Handle for requesting that the run stop before its next batch.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn prepare(&self, document: &TemplateDocument, params: &ParameterSet) -> CoreResult<PreparedRun> {
        prepare(&self.registry, document, params)
    }

    /// Prepare and validate without applying anything.
    pub async fn validate(&self, document: &TemplateDocument, params: &ParameterSet) -> CoreResult<PreparedRun> {
        let mut prepared = self.prepare(document, params)?;
        let executor = Executor::new(self.provisioner.as_ref(), &self.options, &prepared.templates);
        executor.validate_all(&mut prepared.store).await?;
        Ok(prepared)
    }

    /// Execute a full run.
    ///
    /// Definition errors, cycles and validation failures are returned as
    /// errors. Provisioning failures are reported per instance.
    pub async fn run(&self, document: &TemplateDocument, params: &ParameterSet) -> CoreResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let deadline = self.options.run_timeout.map(|limit| Instant::now() + limit);

        info!("Starting {} run {}", self.options.mode, run_id);
        debug!("Parameters: {:?}", params.redacted());

        let mut prepared = self.prepare(document, params)?;
        let executor = Executor::new(self.provisioner.as_ref(), &self.options, &prepared.templates);

        let mut interruption = Interruption::check(&self.cancel, deadline);
        if interruption.is_none() {
            if self.options.skip_validate {
                warn!("Skipping pre-flight validation");
            } else {
                interruption = validate_within(&executor, &mut prepared.store, deadline).await?;
            }
        }

        let summary = match interruption {
            Some(interruption) => {
                warn!("Run {} stopped before any deployment: {}", run_id, interruption);
                ExecutionSummary {
                    batches_run: 0,
                    interruption: Some(interruption),
                }
            }
            None => {
                executor
                    .execute(
                        &mut prepared.store,
                        &prepared.graph,
                        &prepared.plan,
                        &self.cancel,
                        deadline,
                    )
                    .await?
            }
        };

        let report = RunReport::assemble(ReportInput {
            run_id,
            name: prepared.name.clone(),
            mode: self.options.mode,
            started_at,
            templates: &prepared.templates,
            store: &prepared.store,
            plan: &prepared.plan,
            outputs: &prepared.outputs,
            interruption: summary.interruption,
        });

        if report.success {
            info!("Run {} succeeded", run_id);
        } else {
            warn!("Run {} finished with failures", run_id);
        }
        Ok(report)
    }
}

/// Validation bounded by the run deadline.
///
/// Validation has no side effects, so it is abandoned when the deadline
/// passes and the run reports the deadline instead.
async fn validate_within(
    executor: &Executor<'_>,
    store: &mut InstanceStore,
    deadline: Option<Instant>,
) -> CoreResult<Option<Interruption>> {
    let Some(deadline) = deadline else {
        executor.validate_all(store).await?;
        return Ok(None);
    };
    match tokio::time::timeout_at(deadline, executor.validate_all(store)).await {
        Ok(result) => result.map(|()| None),
        Err(_) => Ok(Some(Interruption::DeadlineExceeded)),
    }
}

impl std::fmt::Debug for RunCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCoordinator")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish()
    }
}

//! Batch executor.
//!
//! Runs the validate phase and then the planned batches against a
//! [`Provisioner`]. Calls within a batch run concurrently up to the
//! configured limit; the next batch starts only once every call of the
//! current one has settled. Provisioner tasks never touch the instance store:
//! results are collected, sorted by instance id and applied afterwards.

use std::future::Future;

use futures::stream::{self, StreamExt};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{CoreResult, ProvisionError, ValidationFailure};
use crate::instance::{InstanceId, InstanceState, InstanceStore, Reference};
use crate::options::{CancelHandle, Interruption, RunMode, RunOptions};
use crate::provisioner::{ChangeSet, Outputs, Provisioner, ValidationIssue};
use crate::schedule::{DependencyGraph, Plan};
use crate::template::TemplateSet;

/// Result of one provisioner call.
#[derive(Debug)]
enum CallOutcome {
    Applied(Outputs),
    Planned(ChangeSet),
}

/// Summary of an execution pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionSummary {
    pub batches_run: usize,
    pub interruption: Option<Interruption>,
}

/// Executes a plan against a provisioner.
pub struct Executor<'a> {
    provisioner: &'a dyn Provisioner,
    options: &'a RunOptions,
    templates: &'a TemplateSet,
}

impl<'a> Executor<'a> {
    pub fn new(provisioner: &'a dyn Provisioner, options: &'a RunOptions, templates: &'a TemplateSet) -> Self {
        Self {
            provisioner,
            options,
            templates,
        }
    }

    fn concurrency(&self) -> usize {
        self.options.max_concurrency.max(1)
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, ProvisionError>
    where
        F: Future<Output = Result<T, ProvisionError>>,
    {
        match self.options.call_timeout {
            Some(limit) => timeout(limit, call)
                .await
                .unwrap_or(Err(ProvisionError::Timeout(limit))),
            None => call.await,
        }
    }

    /// Validate every active instance before anything is applied.
    ///
    /// All instances are validated even when some fail, so the error carries
    /// every issue found, ordered by instance.
    pub async fn validate_all(&self, store: &mut InstanceStore) -> CoreResult<()> {
        let mut requests = Vec::new();
        for id in store.active_ids() {
            // outputs are unknown before apply; validate against placeholders
            requests.push(store.request_for(&id, RunMode::WhatIf)?);
            store.require_mut(&id)?.begin_validation()?;
        }

        if requests.is_empty() {
            return Ok(());
        }
        info!("Validating {} instance(s)", requests.len());

        let provisioner = self.provisioner;
        let call_timeout = self.options.call_timeout;
        let results: Vec<(InstanceId, Result<(), Vec<ValidationIssue>>)> = stream::iter(requests)
            .map(move |request| async move {
                let result = match call_timeout {
                    Some(limit) => timeout(limit, provisioner.validate(&request))
                        .await
                        .unwrap_or_else(|_| {
                            Err(vec![ValidationIssue::new(format!(
                                "validation timed out after {}s",
                                limit.as_secs_f64()
                            ))
                            .with_code("Timeout")])
                        }),
                    None => provisioner.validate(&request).await,
                };
                (request.instance, result)
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        let mut failures: Vec<(InstanceId, Vec<ValidationIssue>)> = results
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|issues| (id, issues)))
            .collect();

        if failures.is_empty() {
            info!("Validation passed");
            return Ok(());
        }

        failures.sort_by(|a, b| a.0.cmp(&b.0));
        let failure = ValidationFailure { failures };
        for line in failure.lines() {
            error!("Validation: {}", line);
        }
        Err(failure.into())
    }

    /// Run the plan batch by batch.
    ///
    /// Cancellation and the run deadline are checked before each batch and
    /// before each call starts; calls already in flight are allowed to
    /// finish. Instances whose call never started are left unsettled and
    /// reported as not attempted.
    pub async fn execute(
        &self,
        store: &mut InstanceStore,
        graph: &DependencyGraph,
        plan: &Plan,
        cancel: &CancelHandle,
        deadline: Option<Instant>,
    ) -> CoreResult<ExecutionSummary> {
        let mut summary = ExecutionSummary::default();
        let mode = self.options.mode;

        for (number, batch) in plan.batches.iter().enumerate() {
            if let Some(interruption) = Interruption::check(cancel, deadline) {
                warn!("Stopping before batch {}/{}: {}", number + 1, plan.len(), interruption);
                summary.interruption = Some(interruption);
                break;
            }

            let mut requests = Vec::with_capacity(batch.len());
            for id in batch {
                if store.require(id)?.state() == InstanceState::Blocked {
                    debug!("{} is blocked, not starting", id);
                    continue;
                }
                requests.push(store.request_for(id, mode)?);
                store.require_mut(id)?.begin_apply()?;
            }

            info!(
                "Batch {}/{}: {} instance(s)",
                number + 1,
                plan.len(),
                requests.len()
            );

            let this = self;
            let started: Vec<(InstanceId, Option<Result<CallOutcome, ProvisionError>>)> = stream::iter(requests)
                .map(move |request| async move {
                    if Interruption::check(cancel, deadline).is_some() {
                        debug!("{} not started", request.instance);
                        return (request.instance, None);
                    }
                    let outcome = match mode {
                        RunMode::Apply => this
                            .bounded(this.provisioner.apply(&request))
                            .await
                            .map(CallOutcome::Applied),
                        RunMode::WhatIf => this
                            .bounded(this.provisioner.diff(&request))
                            .await
                            .map(CallOutcome::Planned),
                    };
                    (request.instance, Some(outcome))
                })
                .buffer_unordered(self.concurrency())
                .collect()
                .await;

            let not_started = started.iter().filter(|(_, outcome)| outcome.is_none()).count();
            let mut outcomes: Vec<(InstanceId, Result<CallOutcome, ProvisionError>)> = started
                .into_iter()
                .filter_map(|(id, outcome)| outcome.map(|outcome| (id, outcome)))
                .collect();
            outcomes.sort_by(|a, b| a.0.cmp(&b.0));

            for (id, outcome) in outcomes {
                self.record(store, graph, id, outcome)?;
            }
            summary.batches_run += 1;

            if not_started > 0 {
                let interruption =
                    Interruption::check(cancel, deadline).unwrap_or(Interruption::Cancelled);
                warn!(
                    "Stopping during batch {}/{}: {}, {} call(s) not started",
                    number + 1,
                    plan.len(),
                    interruption,
                    not_started
                );
                summary.interruption = Some(interruption);
                break;
            }
        }

        Ok(summary)
    }

    fn record(
        &self,
        store: &mut InstanceStore,
        graph: &DependencyGraph,
        id: InstanceId,
        outcome: Result<CallOutcome, ProvisionError>,
    ) -> CoreResult<()> {
        match outcome {
            Ok(CallOutcome::Applied(outputs)) => {
                info!("{} applied", id);
                store.require_mut(&id)?.complete(outputs)
            }
            Ok(CallOutcome::Planned(change_set)) => {
                info!("{} planned: {} change(s)", id, change_set.changes.len());
                let outputs = self.planned_outputs(&id, &change_set);
                store.require_mut(&id)?.plan(change_set, outputs)
            }
            Err(failure) => {
                error!("{} failed: {}", id, failure);
                store.require_mut(&id)?.fail(failure.to_string())?;

                // a failed preview leaves dependents to plan against placeholders
                if self.options.mode == RunMode::WhatIf {
                    return Ok(());
                }

                let reason = format!("dependency '{}' failed: {}", id, failure);
                for dependent in graph.transitive_dependents(&id) {
                    let instance = store.require_mut(&dependent)?;
                    if instance.state().is_terminal() {
                        continue;
                    }
                    warn!("{} blocked by {}", dependent, id);
                    instance.block(id.clone(), reason.clone())?;
                }
                Ok(())
            }
        }
    }

    /// Predicted outputs, with placeholders for declared outputs not predicted.
    fn planned_outputs(&self, id: &InstanceId, change_set: &ChangeSet) -> Outputs {
        let mut outputs = change_set.predicted_outputs.clone();
        if let Some(template) = self.templates.get(&id.template) {
            for name in &template.outputs {
                outputs
                    .entry(name.clone())
                    .or_insert_with(|| Reference::new(id.clone(), name.clone()).placeholder());
            }
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{Instance, ParamValue};
    use crate::provisioner::MockProvisioner;
    use crate::registry::Scope;
    use crate::resolve::{DependencyEdge, EdgeKind};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn store_with(ids: &[&str]) -> InstanceStore {
        let mut store = InstanceStore::new();
        for id in ids {
            let mut params = BTreeMap::new();
            params.insert("name".to_string(), ParamValue::Literal(json!(id)));
            store.insert(
                Instance::new(InstanceId::scalar(*id), "key_vault", Scope::default()).with_params(params),
            );
        }
        store
    }

    fn chain() -> (DependencyGraph, Plan) {
        let edges = [DependencyEdge::new(
            InstanceId::scalar("b"),
            InstanceId::scalar("a"),
            EdgeKind::Explicit,
        )];
        let graph = DependencyGraph::new([InstanceId::scalar("a"), InstanceId::scalar("b")], &edges);
        let plan = graph.plan().unwrap();
        (graph, plan)
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents() {
        let mut mock = MockProvisioner::new();
        mock.expect_apply()
            .times(1)
            .returning(|_| Err(ProvisionError::Failed("quota exceeded".into())));

        let options = RunOptions::new();
        let templates = TemplateSet::default();
        let executor = Executor::new(&mock, &options, &templates);
        let mut store = store_with(&["a", "b"]);
        let (graph, plan) = chain();

        let summary = executor
            .execute(&mut store, &graph, &plan, &CancelHandle::new(), None)
            .await
            .unwrap();

        assert_eq!(summary.batches_run, 2);
        let a = store.require(&InstanceId::scalar("a")).unwrap();
        assert_eq!(a.state(), InstanceState::Failed);
        assert_eq!(a.error(), Some("quota exceeded"));

        let b = store.require(&InstanceId::scalar("b")).unwrap();
        assert_eq!(b.state(), InstanceState::Blocked);
        assert_eq!(b.blocked_by(), Some(&InstanceId::scalar("a")));
    }

    #[tokio::test]
    async fn test_what_if_failure_does_not_block() {
        let mut mock = MockProvisioner::new();
        mock.expect_diff()
            .times(2)
            .returning(|request| {
                if request.instance.template == "a" {
                    Err(ProvisionError::Failed("preview unavailable".into()))
                } else {
                    Ok(ChangeSet::new().with_change(crate::provisioner::ChangeType::Create, "/b"))
                }
            });
        mock.expect_apply().never();

        let options = RunOptions::new().mode(RunMode::WhatIf);
        let templates = TemplateSet::default();
        let executor = Executor::new(&mock, &options, &templates);
        let mut store = store_with(&["a", "b"]);
        let (graph, plan) = chain();

        executor
            .execute(&mut store, &graph, &plan, &CancelHandle::new(), None)
            .await
            .unwrap();

        assert_eq!(store.require(&InstanceId::scalar("a")).unwrap().state(), InstanceState::Failed);
        assert_eq!(store.require(&InstanceId::scalar("b")).unwrap().state(), InstanceState::Planned);
    }

    #[tokio::test]
    async fn test_validation_collects_all_issues() {
        let mut mock = MockProvisioner::new();
        mock.expect_validate().times(3).returning(|request| {
            if request.instance.template == "b" {
                Ok(())
            } else {
                Err(vec![ValidationIssue::new(format!("{} is invalid", request.instance))])
            }
        });
        mock.expect_apply().never();

        let options = RunOptions::new();
        let templates = TemplateSet::default();
        let executor = Executor::new(&mock, &options, &templates);
        let mut store = store_with(&["c", "a", "b"]);

        let err = executor.validate_all(&mut store).await.unwrap_err();
        match err {
            crate::CoreError::Validation(failure) => {
                let ids: Vec<String> = failure.failures.iter().map(|(id, _)| id.to_string()).collect();
                assert_eq!(ids, vec!["a", "c"]);
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_timeout() {
        struct Slow;

        #[async_trait::async_trait]
        impl Provisioner for Slow {
            async fn validate(&self, _: &crate::provisioner::ProvisionRequest) -> Result<(), Vec<ValidationIssue>> {
                Ok(())
            }
            async fn apply(&self, _: &crate::provisioner::ProvisionRequest) -> Result<Outputs, ProvisionError> {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(Outputs::new())
            }
            async fn diff(&self, _: &crate::provisioner::ProvisionRequest) -> Result<ChangeSet, ProvisionError> {
                Ok(ChangeSet::new())
            }
        }

        let options = RunOptions::new().call_timeout(std::time::Duration::from_millis(20));
        let templates = TemplateSet::default();
        let executor = Executor::new(&Slow, &options, &templates);
        let mut store = store_with(&["a"]);
        let graph = DependencyGraph::new([InstanceId::scalar("a")], &[]);
        let plan = graph.plan().unwrap();

        executor
            .execute(&mut store, &graph, &plan, &CancelHandle::new(), None)
            .await
            .unwrap();

        let a = store.require(&InstanceId::scalar("a")).unwrap();
        assert_eq!(a.state(), InstanceState::Failed);
        assert!(a.error().unwrap_or_default().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut mock = MockProvisioner::new();
        mock.expect_apply().never();

        let options = RunOptions::new();
        let templates = TemplateSet::default();
        let executor = Executor::new(&mock, &options, &templates);
        let mut store = store_with(&["a", "b"]);
        let (graph, plan) = chain();

        let cancel = CancelHandle::new();
        cancel.cancel();
        let summary = executor
            .execute(&mut store, &graph, &plan, &cancel, None)
            .await
            .unwrap();

        assert_eq!(summary.interruption, Some(Interruption::Cancelled));
        assert_eq!(summary.batches_run, 0);
        assert_eq!(store.require(&InstanceId::scalar("a")).unwrap().state(), InstanceState::Pending);
    }
}

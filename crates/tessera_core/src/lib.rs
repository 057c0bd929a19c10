//! # tessera_core
//!
//! Dependency graph and execution engine for declarative cloud resources.
//!
//! A template document is turned into a run in phases:
//!
//! - **Build**: raw definitions become typed templates ([`GraphBuilder`])
//! - **Expand**: looped templates become one instance per element ([`LoopExpander`])
//! - **Condition**: instances whose condition is false are skipped ([`ConditionEvaluator`])
//! - **Resolve**: references are pinned to instances and become edges ([`ReferenceResolver`])
//! - **Schedule**: edges become ordered batches ([`DependencyGraph`])
//! - **Execute**: batches run against a [`Provisioner`] ([`Executor`])
//!
//! [`RunCoordinator`] drives all of them and produces a [`RunReport`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera_core::{KindRegistry, KindSpec, RunCoordinator, RunOptions, RunMode};
//!
//! let registry = KindRegistry::new().with(KindSpec::new("key_vault"));
//! let coordinator = RunCoordinator::new(Arc::new(registry), Arc::new(my_provisioner))
//!     .with_options(RunOptions::new().mode(RunMode::WhatIf));
//!
//! let report = coordinator.run(&document, &params).await?;
//! println!("{}", report.render_text());
//! ```

pub mod condition;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod expand;
pub mod expr;
pub mod instance;
pub mod options;
pub mod provisioner;
pub mod registry;
pub mod report;
pub mod resolve;
pub mod schedule;
pub mod template;
pub mod testing;

pub use condition::ConditionEvaluator;
pub use coordinator::{prepare, PreparedRun, RunCoordinator};
pub use error::{CoreError, CoreResult, CycleError, DefinitionError, ProvisionError, ValidationFailure};
pub use executor::{ExecutionSummary, Executor};
pub use expand::LoopExpander;
pub use expr::{EvalContext, Expr, ExprError, RefExpr};
pub use instance::{
    Instance, InstanceId, InstanceState, InstanceStore, LoopBinding, ParamValue, Reference,
};
pub use options::{CancelHandle, Interruption, RunMode, RunOptions, DEFAULT_MAX_CONCURRENCY};
pub use provisioner::{
    ChangeSet, ChangeType, Outputs, ProvisionRequest, Provisioner, ResourceChange, ValidationIssue,
};
pub use registry::{KindRegistry, KindSpec, Scope, ScopeKind};
pub use report::{InstanceReport, InstanceStatus, ReportInput, RunReport};
pub use resolve::{DependencyEdge, EdgeKind, ReferenceResolver};
pub use schedule::{DependencyGraph, Plan};
pub use template::{GraphBuilder, Repetition, ResourceTemplate, TemplateSet};

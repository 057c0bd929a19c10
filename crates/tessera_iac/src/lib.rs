//! # tessera_iac
//!
//! Azure provisioning collaborator for the tessera engine.
//!
//! ## Features
//!
//! - Catalog of deployable kinds and their compiled ARM modules
//! - `az deployment` validate, create and what-if through a [`tessera_runner::CommandRunner`]
//! - ARM output, what-if change and error parsing
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tessera_iac::{AzCliProvisioner, AzureTarget, ModuleCatalog};
//! use tessera_runner::{CliRunner, CliRunnerOptions};
//!
//! let catalog = Arc::new(ModuleCatalog::azure("infra/modules"));
//! let registry = catalog.registry();
//! let provisioner = AzCliProvisioner::new(
//!     Arc::new(CliRunner::new(CliRunnerOptions::default())),
//!     catalog,
//!     AzureTarget::new("westeurope").resource_group("rg-data-dev"),
//! )
//! .with_prefix("tessera-dev");
//! ```

pub mod catalog;
pub mod deployment;
pub mod error;
pub mod provisioner;

pub use catalog::{CatalogEntry, ModuleCatalog};
pub use deployment::{deployment_name, parameters_json, AzureTarget, DeploymentCommand, DeploymentOp};
pub use error::{IacError, IacResult};
pub use provisioner::{AzCliProvisioner, DEFAULT_DEPLOYMENT_PREFIX, DEFAULT_PROGRAM};

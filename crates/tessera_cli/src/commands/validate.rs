//! Validate command - Build the graph and run pre-flight validation.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use tessera_core::RunCoordinator;

use super::shared::{self, ProviderArgs, TemplateArgs};
use super::Outcome;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub template: TemplateArgs,

    #[command(flatten)]
    pub provider: ProviderArgs,
}

pub async fn execute(args: ValidateArgs) -> Result<Outcome> {
    let loaded = shared::load(&args.template)?;
    info!("Validating {:?} for {}", loaded.path, args.template.env);

    let catalog = Arc::new(shared::catalog(&args.provider, &loaded.path));
    shared::check_modules(&catalog, &loaded.document)?;
    let registry = Arc::new(catalog.registry());
    let provisioner = shared::provisioner(&args.provider, &args.template, catalog).await?;

    let coordinator = RunCoordinator::new(registry, Arc::new(provisioner));
    let prepared = coordinator.validate(&loaded.document, &loaded.params).await?;

    let active = prepared.graph.len();
    let skipped = prepared.store.len() - active;
    println!(
        "Validation passed: {} instance(s) in {} batch(es), {} skipped",
        active,
        prepared.plan.len(),
        skipped
    );

    Ok(Outcome::Succeeded)
}

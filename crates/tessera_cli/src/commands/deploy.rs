//! Deploy command - Apply or preview a template.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use tessera_core::{RunCoordinator, RunMode, RunOptions, DEFAULT_MAX_CONCURRENCY};

use super::shared::{self, ProviderArgs, TemplateArgs};
use super::{Outcome, OutputFormat};

#[derive(Args, Debug)]
pub struct DeployArgs {
    #[command(flatten)]
    pub template: TemplateArgs,

    #[command(flatten)]
    pub provider: ProviderArgs,

    /// apply deploys, what-if only previews changes
    #[arg(short, long, value_parser = parse_mode, default_value = "apply")]
    pub mode: RunMode,

    /// Skip pre-flight validation
    #[arg(long)]
    pub skip_validate: bool,

    /// Maximum concurrent provider calls within a batch
    #[arg(long, env = "TESSERA_MAX_CONCURRENCY", default_value_t = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,

    /// Limit for a single provider call, in seconds
    #[arg(long, env = "TESSERA_CALL_TIMEOUT", value_name = "SECONDS")]
    pub call_timeout: Option<u64>,

    /// Limit for the whole run, in seconds; checked before each batch
    #[arg(long, env = "TESSERA_RUN_TIMEOUT", value_name = "SECONDS")]
    pub run_timeout: Option<u64>,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

fn parse_mode(s: &str) -> Result<RunMode, String> {
    RunMode::from_str(s).ok_or_else(|| format!("unknown mode '{}' (expected apply or what-if)", s))
}

impl DeployArgs {
    pub fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::new()
            .mode(self.mode)
            .skip_validate(self.skip_validate)
            .max_concurrency(self.max_concurrency);
        if let Some(seconds) = self.call_timeout {
            options = options.call_timeout(Duration::from_secs(seconds));
        }
        if let Some(seconds) = self.run_timeout {
            options = options.run_timeout(Duration::from_secs(seconds));
        }
        options
    }
}

pub async fn execute(args: DeployArgs) -> Result<Outcome> {
    let loaded = shared::load(&args.template)?;
    info!(
        "Deploying {:?} to {} ({}) in {} mode",
        loaded.path, args.template.env, args.template.location, args.mode
    );

    let catalog = Arc::new(shared::catalog(&args.provider, &loaded.path));
    shared::check_modules(&catalog, &loaded.document)?;
    let registry = Arc::new(catalog.registry());
    let provisioner = shared::provisioner(&args.provider, &args.template, catalog).await?;

    let coordinator =
        RunCoordinator::new(registry, Arc::new(provisioner)).with_options(args.run_options());

    let cancel = coordinator.cancel_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, no new batches will start");
            cancel.cancel();
        }
    });

    let result = coordinator.run(&loaded.document, &loaded.params).await;
    watcher.abort();
    let report = result?;

    match args.output {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
            println!("{}", json);
        }
        OutputFormat::Text => println!("{}", report.render_text()),
    }

    Ok(Outcome::from_success(report.success))
}

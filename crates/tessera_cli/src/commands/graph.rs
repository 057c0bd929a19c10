//! Graph command - Print the batch plan without calling the provider.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use tessera_core::{prepare, EdgeKind, PreparedRun};
use tessera_iac::ModuleCatalog;

use super::shared::{self, TemplateArgs};
use super::{Outcome, OutputFormat};

#[derive(Args, Debug)]
pub struct GraphArgs {
    #[command(flatten)]
    pub template: TemplateArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

pub async fn execute(args: GraphArgs) -> Result<Outcome> {
    let loaded = shared::load(&args.template)?;

    // Only kinds and scopes matter here, not module files
    let registry = ModuleCatalog::azure(shared::template_dir(&loaded.path)).registry();
    let prepared = prepare(&registry, &loaded.document, &loaded.params)?;

    match args.output {
        OutputFormat::Json => {
            let skipped: Vec<String> = skipped(&prepared);
            let body = json!({
                "name": prepared.name,
                "plan": prepared.plan,
                "edges": prepared.edges,
                "skipped": skipped,
            });
            let text = serde_json::to_string_pretty(&body).context("Failed to serialize graph")?;
            println!("{}", text);
        }
        OutputFormat::Text => print!("{}", render_text(&prepared)),
    }

    Ok(Outcome::Succeeded)
}

fn skipped(prepared: &PreparedRun) -> Vec<String> {
    prepared
        .store
        .iter()
        .filter(|i| !i.is_active())
        .map(|i| i.id.to_string())
        .collect()
}

fn render_text(prepared: &PreparedRun) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Plan{}: {} instance(s) in {} batch(es)\n",
        prepared
            .name
            .as_ref()
            .map(|n| format!(" for {}", n))
            .unwrap_or_default(),
        prepared.plan.instance_count(),
        prepared.plan.len()
    ));

    for (i, batch) in prepared.plan.batches.iter().enumerate() {
        let ids: Vec<String> = batch.iter().map(ToString::to_string).collect();
        out.push_str(&format!("  Batch {}: {}\n", i + 1, ids.join(", ")));
    }

    if !prepared.edges.is_empty() {
        out.push_str("Edges:\n");
        for edge in &prepared.edges {
            let kind = match edge.kind {
                EdgeKind::Explicit => "depends_on",
                EdgeKind::Implicit => "reference",
            };
            out.push_str(&format!("  {} -> {} ({})\n", edge.from, edge.to, kind));
        }
    }

    let skipped = skipped(prepared);
    if !skipped.is_empty() {
        out.push_str(&format!("Skipped: {}\n", skipped.join(", ")));
    }
    out
}

//! CLI command definitions.
//!
//! Every command reads a template document and layers parameters the same
//! way; they differ in how far through a run they go.

use clap::{Parser, Subcommand, ValueEnum};

pub mod deploy;
pub mod graph;
pub mod shared;
pub mod validate;

/// tessera - dependency-ordered deployments of declarative cloud resources
#[derive(Parser)]
#[command(name = "tessera")]
#[command(version, about = "tessera - dependency-ordered deployments of declarative cloud resources")]
#[command(long_about = r#"
tessera expands a template document into resource instances, orders them by
their references and deploys them batch by batch through the Azure CLI.

COMMANDS:
  deploy    → Validate, then apply or preview (what-if) every instance
  validate  → Build the graph and run pre-flight validation only
  graph     → Build the graph and print batches and edges

EXIT CODES:
  0 - Success
  1 - Definition, cycle, validation or input error (nothing deployed)
  2 - Instances failed or were blocked, or the run was interrupted
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy or preview a template
    Deploy(deploy::DeployArgs),

    /// Run pre-flight validation without deploying
    Validate(validate::ValidateArgs),

    /// Print the dependency graph and batch plan
    Graph(graph::GraphArgs),
}

/// Format of log lines on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Format of the report on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// How a command finished when it did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn from_success(success: bool) -> Self {
        if success {
            Outcome::Succeeded
        } else {
            Outcome::Failed
        }
    }
}

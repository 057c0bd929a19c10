//! tessera CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: Definition, cycle, validation or input error (nothing was deployed)
//! - 2: One or more instances failed or were blocked, or the run was interrupted

use std::process::ExitCode;

use clap::Parser;
use tessera_core::CoreError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands, LogFormat, Outcome};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const BUILD_FAILURE: u8 = 1;
    pub const RUN_FAILURE: u8 = 2;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match cli.command {
        Commands::Deploy(args) => commands::deploy::execute(args).await,
        Commands::Validate(args) => commands::validate::execute(args).await,
        Commands::Graph(args) => commands::graph::execute(args).await,
    };

    match result {
        Ok(Outcome::Succeeded) => ExitCode::from(ExitCodes::SUCCESS),
        Ok(Outcome::Failed) => ExitCode::from(ExitCodes::RUN_FAILURE),
        Err(e) => {
            report_error(&e);
            ExitCode::from(ExitCodes::BUILD_FAILURE)
        }
    }
}

fn init_logging(cli: &Cli) {
    let default_directive = if cli.verbose {
        "warn,tessera=debug"
    } else if cli.quiet {
        "warn"
    } else {
        "warn,tessera=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    // Logs go to stderr so a JSON report on stdout stays parseable
    let registry = tracing_subscriber::registry().with(filter);
    let log_result = match cli.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

fn report_error(e: &anyhow::Error) {
    match e.downcast_ref::<CoreError>() {
        Some(CoreError::Validation(failure)) => {
            eprintln!("Error: pre-flight validation failed, nothing was deployed");
            for line in failure.lines() {
                eprintln!("  {}", line);
            }
        }
        Some(core) if core.is_pre_execution() => {
            eprintln!("Error: {}", core);
            eprintln!("Nothing was deployed.");
        }
        _ => eprintln!("Error: {:#}", e),
    }
}

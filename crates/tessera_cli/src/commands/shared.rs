//! Inputs shared by every command.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use tessera_iac::{AzCliProvisioner, AzureTarget, IacError, ModuleCatalog, DEFAULT_PROGRAM};
use tessera_runner::{CliRunner, CliRunnerOptions, LogLine, LogStream};
use tessera_spec::{DocumentReader, Environment, ParameterOverride, ParameterSet, TemplateDocument};

/// Template location and parameter sources.
#[derive(Args, Debug, Clone)]
pub struct TemplateArgs {
    /// Target environment (dev, test, prod)
    #[arg(short, long, value_parser = parse_environment)]
    pub env: Environment,

    /// Azure location, also passed to the template as `location`
    #[arg(short, long)]
    pub location: String,

    /// Template file or directory of template files
    #[arg(short, long, default_value = "infra")]
    pub template: PathBuf,

    /// Parameter override as key=value (JSON values accepted), repeatable
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<ParameterOverride>,

    /// Parameter file; defaults to parameters/<env>.yaml next to the template
    #[arg(long)]
    pub parameters_file: Option<PathBuf>,

    /// Only accept pre-compiled JSON templates
    #[arg(long)]
    pub precompiled: bool,
}

/// Where and how the provider tool deploys.
#[derive(Args, Debug, Clone)]
pub struct ProviderArgs {
    /// Default resource group for resource-group scoped instances
    #[arg(short = 'g', long, env = "TESSERA_RESOURCE_GROUP")]
    pub resource_group: Option<String>,

    /// Subscription to deploy into (the tool's default when unset)
    #[arg(long, env = "TESSERA_SUBSCRIPTION")]
    pub subscription: Option<String>,

    /// Directory of compiled modules; defaults to modules/ next to the template
    #[arg(long, env = "TESSERA_MODULES_DIR")]
    pub modules_dir: Option<PathBuf>,

    /// Provider tool binary
    #[arg(long = "az", env = "TESSERA_AZ", default_value = DEFAULT_PROGRAM)]
    pub program: String,

    /// Prefix of deployment names; defaults to tessera-<env>
    #[arg(long)]
    pub deployment_prefix: Option<String>,

    /// Log provider commands instead of running them
    #[arg(long)]
    pub dry_run: bool,

    /// Log provider tool output while it runs
    #[arg(long)]
    pub stream: bool,

    /// Kill a provider tool process after this many seconds
    #[arg(long, env = "TESSERA_COMMAND_TIMEOUT", value_name = "SECONDS")]
    pub command_timeout: Option<u64>,
}

fn parse_environment(s: &str) -> Result<Environment, String> {
    Environment::from_str(s).ok_or_else(|| {
        let allowed: Vec<&str> = Environment::all().iter().map(|e| e.as_str()).collect();
        format!("unknown environment '{}' (expected one of: {})", s, allowed.join(", "))
    })
}

/// A template document with its resolved parameters.
#[derive(Debug)]
pub struct LoadedTemplate {
    pub path: PathBuf,
    pub document: TemplateDocument,
    pub params: ParameterSet,
}

/// Directory the template lives in.
pub fn template_dir(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Read the template and layer its parameters.
pub fn load(args: &TemplateArgs) -> Result<LoadedTemplate> {
    let document = DocumentReader::read(&args.template, args.precompiled)
        .with_context(|| format!("Failed to read template {:?}", args.template))?;

    let parameters_file = args
        .parameters_file
        .clone()
        .or_else(|| DocumentReader::find_parameter_file(&args.template, args.env));

    let file_values = match &parameters_file {
        Some(path) => {
            info!("Using parameter file {:?}", path);
            DocumentReader::read_parameter_file(path)
                .with_context(|| format!("Failed to read parameter file {:?}", path))?
        }
        None => BTreeMap::new(),
    };

    let params = ParameterSet::builder(&document.parameters)
        .file_values(file_values)
        .overrides(args.params.iter().cloned())
        .set("environment", json!(args.env.as_str()))
        .set("location", Value::String(args.location.clone()))
        .build()
        .context("Failed to resolve template parameters")?;

    debug!("Resolved parameters: {:?}", params.redacted());

    Ok(LoadedTemplate {
        path: args.template.clone(),
        document,
        params,
    })
}

/// Module catalog for a template.
pub fn catalog(provider: &ProviderArgs, template: &Path) -> ModuleCatalog {
    let modules_dir = provider
        .modules_dir
        .clone()
        .unwrap_or_else(|| template_dir(template).join("modules"));
    ModuleCatalog::azure(modules_dir)
}

/// Fail early when a kind used by the document has no compiled module.
pub fn check_modules(catalog: &ModuleCatalog, document: &TemplateDocument) -> Result<()> {
    for resource in &document.resources {
        // Unknown kinds are reported by the graph builder
        let Ok(path) = catalog.module_path(&resource.kind) else {
            continue;
        };
        if !path.is_file() {
            return Err(IacError::ModuleNotFound {
                kind: resource.kind.clone(),
                path,
            }
            .into());
        }
    }
    Ok(())
}

/// Provisioner for the given inputs.
pub async fn provisioner(
    provider: &ProviderArgs,
    template: &TemplateArgs,
    catalog: Arc<ModuleCatalog>,
) -> Result<AzCliProvisioner> {
    let mut target = AzureTarget::new(template.location.clone());
    if let Some(group) = &provider.resource_group {
        target = target.resource_group(group.clone());
    }
    if let Some(subscription) = &provider.subscription {
        target = target.subscription(subscription.clone());
    }

    let mut options = CliRunnerOptions::new();
    if provider.dry_run {
        options = options.dry_run();
    }
    // Tool output goes through the log stack so stdout stays a clean report
    let runner = CliRunner::new(options).with_log_handler(Arc::new(log_tool_line));

    let prefix = provider
        .deployment_prefix
        .clone()
        .unwrap_or_else(|| format!("tessera-{}", template.env));

    let provisioner = AzCliProvisioner::new(Arc::new(runner), catalog, target)
        .with_program(provider.program.clone())
        .with_prefix(prefix)
        .with_stream_logs(provider.stream)
        .with_command_timeout(provider.command_timeout.unwrap_or(0));

    if !provider.dry_run {
        provisioner
            .ensure_available()
            .await
            .context("The provider tool is required; install it or pass --az")?;
    }

    Ok(provisioner)
}

fn log_tool_line(line: LogLine) {
    match line.stream {
        LogStream::Stdout => info!(target: "tessera::az", "{}", line.message),
        LogStream::Stderr => warn!(target: "tessera::az", "{}", line.message),
    }
}

//! mcpany - command-line front end for the gateway core.
//!
//! Loads declarative tool definitions, registers them (compiling policies
//! and verifying integrity on the way in), and either validates, lists, or
//! executes a call through the full pipeline. The MCP server itself is a
//! separate binary; this CLI exists for operators and CI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcpany_core::policy::PolicySpec;
use mcpany_core::registry::{ExportSpec, ProfileSelector, ServicePolicy};
use mcpany_core::secrets::StaticSecretResolver;
use mcpany_core::{ExecutionRequest, Gateway, ToolDefinition, ToolRegistry};

#[derive(Parser)]
#[command(name = "mcpany", version, about = "Tool-invocation gateway", long_about = None)]
struct Cli {
    /// Tool configuration files (JSON or TOML).
    #[arg(short = 'f', long = "file", global = true)]
    files: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and register every tool, reporting configuration errors.
    Validate,
    /// List registered tools after profile and export filtering.
    List {
        /// Only tools the export policy advertises downstream.
        #[arg(long)]
        exported: bool,
    },
    /// Execute one tool call through the pipeline.
    Call {
        /// Fully-qualified tool name (`service.method`).
        tool: String,
        /// JSON arguments.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Materialize the request without touching the backend.
        #[arg(long)]
        dry_run: bool,
        /// Call id used by call-scoped policy rules.
        #[arg(long, default_value = "cli")]
        call_id: String,
    },
}

/// On-disk configuration shape.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    tools: Vec<ToolEntry>,
    #[serde(default)]
    profiles: Vec<ProfileSelector>,
    #[serde(default)]
    service_policy: Option<ServicePolicy>,
    #[serde(default)]
    export: Option<ExportSpec>,
    /// Inline secrets for local use; production deployments resolve from the
    /// environment or a secret store instead.
    #[serde(default)]
    secrets: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ToolEntry {
    #[serde(flatten)]
    definition: ToolDefinition,
    #[serde(default)]
    policies: Vec<PolicySpec>,
}

fn load_config(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&raw)
            .with_context(|| format!("failed to parse {} as TOML", path.display()))?,
        _ => serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {} as JSON", path.display()))?,
    };
    Ok(config)
}

async fn build_gateway(files: &[PathBuf]) -> Result<(Gateway, usize)> {
    if files.is_empty() {
        bail!("no configuration files given; pass at least one --file");
    }

    let registry = Arc::new(ToolRegistry::new());
    let mut secrets = StaticSecretResolver::default();
    let mut count = 0usize;

    for path in files {
        let config = load_config(path)?;
        for (key, value) in config.secrets {
            secrets = secrets.with(key, value);
        }
        if !config.profiles.is_empty() {
            registry.set_profiles(config.profiles);
        }
        if let Some(policy) = config.service_policy {
            registry.set_service_policy(policy);
        }
        if let Some(export) = &config.export {
            registry.set_export_policy(Some(export))?;
        }
        for entry in config.tools {
            let name = entry.definition.qualified_name();
            registry
                .add_tool(entry.definition, entry.policies)
                .await
                .with_context(|| format!("failed to register {name} from {}", path.display()))?;
            count += 1;
        }
        info!(file = %path.display(), "configuration loaded");
    }

    let gateway = Gateway::new(registry).with_secret_resolver(Arc::new(secrets));
    Ok((gateway, count))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate => {
            let (_, count) = build_gateway(&cli.files).await?;
            println!("ok: {count} tool(s) registered");
        }
        Commands::List { exported } => {
            let (gateway, _) = build_gateway(&cli.files).await?;
            let tools = if exported {
                gateway.registry().exported_tools()
            } else {
                gateway.registry().list_tools()
            };
            for tool in tools {
                println!(
                    "{}\t{}\t{}",
                    tool.qualified_name(),
                    tool.definition().backend.kind_name(),
                    tool.definition().description
                );
            }
        }
        Commands::Call {
            tool,
            args,
            dry_run,
            call_id,
        } => {
            let (gateway, _) = build_gateway(&cli.files).await?;
            let mut request =
                ExecutionRequest::new(tool, args.into_bytes()).with_call_id(call_id);
            if dry_run {
                request = request.dry_run();
            }
            let result = gateway.execute(request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

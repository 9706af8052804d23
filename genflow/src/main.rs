//! Genflow CLI
//!
//! The `genflow` command drives a generator DAG against a resource registry.
//!
//! ## Commands
//!
//! - `run`: execute every incomplete stage up to a target
//! - `plan`: show the resolved stages and which of them would execute

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};

use genflow::core::ResourceId;
use genflow::errors::GenflowError;
use genflow::events::LoggingEventSink;
use genflow::pipeline::{DagDefinition, GeneratorDag, DEFAULT_TARGET};
use genflow::registry::FileRegistry;
use genflow::settings::EngineSettings;
use genflow::variants::VariantCatalog;
use genflow::workflow::GenerationWorkflow;

#[derive(Parser)]
#[command(name = "genflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generator dependency and completion engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every incomplete stage up to the target
    Run {
        #[command(flatten)]
        sources: Sources,

        /// Root of the per-stage working directories
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Only reuse activities recorded by this execution
        #[arg(long)]
        isolated: bool,

        /// SLURM account for allocations
        #[arg(long, env = "GENFLOW_ACCOUNT")]
        account: Option<String>,
    },

    /// Show the resolved stages without executing anything
    Plan {
        #[command(flatten)]
        sources: Sources,
    },
}

/// Inputs shared by every command.
#[derive(Args)]
struct Sources {
    /// Model-building config resource id
    #[arg(short, long)]
    config: String,

    /// Target stage
    #[arg(short, long, default_value = DEFAULT_TARGET)]
    target: String,

    /// Registry file
    #[arg(long, env = "GENFLOW_REGISTRY", default_value = "genflow-registry.json")]
    registry: PathBuf,

    /// Variant catalogue file (JSON list of variant definitions)
    #[arg(long)]
    variants: Option<PathBuf>,

    /// DAG definition file (default: the built-in circuit-building DAG)
    #[arg(long)]
    dag: Option<PathBuf>,

    /// Engine settings file
    #[arg(long, env = "GENFLOW_SETTINGS")]
    settings: Option<PathBuf>,
}

impl Sources {
    async fn workflow(&self, settings: EngineSettings) -> Result<GenerationWorkflow> {
        let dag = match &self.dag {
            Some(path) => DagDefinition::from_file(path)
                .and_then(DagDefinition::into_dag)
                .with_context(|| format!("Failed to load DAG from {}", path.display()))?,
            None => GeneratorDag::circuit_building().context("Failed to build circuit DAG")?,
        };
        let catalog = match &self.variants {
            Some(path) => VariantCatalog::from_file(path)
                .with_context(|| format!("Failed to load variants from {}", path.display()))?,
            None => VariantCatalog::new(),
        };
        let registry = FileRegistry::open(&self.registry)
            .await
            .with_context(|| format!("Failed to open registry {}", self.registry.display()))?;

        info!(
            dag = dag.name(),
            stages = dag.len(),
            variants = catalog.len(),
            registry = %self.registry.display(),
            "Loaded workflow inputs"
        );
        let executor = settings.build_executor();
        Ok(
            GenerationWorkflow::new(dag, Arc::new(registry), catalog, executor)
                .with_settings(settings)
                .with_event_sink(Arc::new(LoggingEventSink::default())),
        )
    }

    fn settings(&self) -> Result<EngineSettings> {
        match &self.settings {
            Some(path) => EngineSettings::from_file(path)
                .with_context(|| format!("Failed to read settings from {}", path.display())),
            None => Ok(EngineSettings::default()),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    genflow::init_tracing(cli.json, level);

    match dispatch(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(genflow_err) = err.downcast_ref::<GenflowError>() {
                if let Some(stage) = genflow_err.failing_stage() {
                    eprintln!("failing stage: {stage}");
                }
                eprintln!("error: {genflow_err}");
                if let Some(info) = genflow_err.error_info() {
                    eprintln!("code: {}", info.code);
                    if let Some(hint) = info.fix_hint {
                        eprintln!("hint: {hint}");
                    }
                }
            } else {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            sources,
            output_dir,
            isolated,
            account,
        } => {
            let mut settings = sources.settings()?;
            if let Some(dir) = output_dir {
                settings = settings.with_output_dir(dir);
            }
            if let Some(account) = account {
                settings = settings.with_account(account);
            }
            if isolated {
                settings = settings.with_isolated(true);
            }
            cmd_run(&sources, settings).await
        }
        Commands::Plan { sources } => {
            let settings = sources.settings()?;
            cmd_plan(&sources, settings).await
        }
    }
}

async fn cmd_run(sources: &Sources, settings: EngineSettings) -> Result<()> {
    let workflow = sources.workflow(settings).await?;
    let report = workflow
        .run(&ResourceId::new(sources.config.as_str()), &sources.target)
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_plan(sources: &Sources, settings: EngineSettings) -> Result<()> {
    let workflow = sources.workflow(settings).await?;
    let previews = workflow
        .preview(&ResourceId::new(sources.config.as_str()), &sources.target)
        .await?;

    println!("{:<24} {:<14} {:<44} STATE", "STAGE", "KIND", "CONFIG");
    for preview in &previews {
        let state = preview
            .reusable
            .as_ref()
            .map_or_else(|| "execute".to_string(), |id| format!("reuse {id}"));
        println!(
            "{:<24} {:<14} {:<44} {state}",
            preview.stage,
            preview.kind.to_string(),
            preview.config.as_str(),
        );
    }
    Ok(())
}

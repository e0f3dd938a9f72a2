// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow command implementations
//!
//! # Commands
//!
//! - `guardian workflow validate <file>` - Parse the manifest and build every block
//! - `guardian workflow wiring <file>` - Show the resolved event routes
//! - `guardian workflow run <file> --event <file>` - Dispatch one event against
//!   the in-memory store and ledger and print what happened

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use guardian_engine_core::application::{
    BlockRegistry, BlockServices, DispatchReport, EngineSettings, WorkflowEngine,
};
use guardian_engine_core::domain::block::BlockId;
use guardian_engine_core::domain::document::Document;
use guardian_engine_core::domain::engine_config::EngineConfigManifest;
use guardian_engine_core::domain::events::Event;
use guardian_engine_core::domain::workflow::WorkflowDefinition;
use guardian_engine_core::infrastructure::event_bus::RoutingError;
use guardian_engine_core::infrastructure::ledger::{InMemoryLedger, PublishedMessage};
use guardian_engine_core::infrastructure::repositories::InMemoryDocumentStore;
use guardian_engine_core::infrastructure::workflow_parser::WorkflowParser;

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Validate a workflow manifest file
    Validate {
        /// Path to workflow manifest YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show the event routes a workflow resolves to
    Wiring {
        /// Path to workflow manifest YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Dispatch one event through a workflow with in-memory storage
    Run {
        /// Path to workflow manifest YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Path to the event JSON file
        #[arg(long, short = 'e', value_name = "FILE")]
        event: PathBuf,

        /// Deliver to this block instead of resolving entry blocks
        #[arg(long, short = 't', value_name = "BLOCK")]
        target: Option<String>,

        /// Output format
        #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub async fn handle_command(command: WorkflowCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        WorkflowCommand::Validate { file } => validate_workflow(&file),
        WorkflowCommand::Wiring { file } => show_wiring(&file),
        WorkflowCommand::Run {
            file,
            event,
            target,
            output,
        } => run_workflow(&file, &event, target, output, config_path).await,
    }
}

/// In-memory collaborators for local runs
struct LocalRuntime {
    store: InMemoryDocumentStore,
    ledger: InMemoryLedger,
    services: BlockServices,
}

impl LocalRuntime {
    fn new(settings: EngineSettings) -> Self {
        let store = InMemoryDocumentStore::new();
        let ledger = InMemoryLedger::new();
        let services = BlockServices::new(Arc::new(store.clone()), Arc::new(ledger.clone()), settings);
        Self {
            store,
            ledger,
            services,
        }
    }
}

fn load_engine(file: &Path, runtime: &LocalRuntime) -> Result<WorkflowEngine> {
    let workflow = WorkflowParser::parse_file(file).context("Failed to parse workflow manifest")?;
    WorkflowEngine::load(workflow, &BlockRegistry::with_defaults(), runtime.services.clone())
        .context("Workflow failed to load")
}

/// Validate a workflow manifest file
fn validate_workflow(file: &Path) -> Result<()> {
    println!("{}", "Validating workflow manifest...".cyan());
    println!("   File: {}", file.display());
    println!();

    let runtime = LocalRuntime::new(EngineSettings::default());
    let engine = load_engine(file, &runtime)?;
    let workflow = engine.workflow();

    println!("{}", "✓ Workflow is valid!".green().bold());
    println!();
    println!("Workflow Details:");
    println!("  Name:        {}", workflow.metadata.name);
    if let Some(version) = &workflow.metadata.version {
        println!("  Version:     {}", version);
    }
    if let Some(description) = &workflow.metadata.description {
        println!("  Description: {}", description);
    }
    println!("  Blocks:      {}", workflow.blocks.len());
    println!("  Links:       {}", workflow.links.len());
    println!();

    for block in &workflow.blocks {
        println!("  {} ({})", block.id.as_str().bold(), block.block_type);
        println!("    Inputs:  {}", join(&block.inputs));
        println!("    Outputs: {}", join(&block.outputs));
    }

    Ok(())
}

fn show_wiring(file: &Path) -> Result<()> {
    let runtime = LocalRuntime::new(EngineSettings::default());
    let engine = load_engine(file, &runtime)?;
    let lines = wiring_lines(engine.workflow());

    if lines.is_empty() {
        println!("{}", "No routes: every block is an entry point".yellow());
        return Ok(());
    }

    println!("{}", "Routes:".bold());
    for line in lines {
        println!("  {}", line);
    }
    Ok(())
}

fn wiring_lines(workflow: &WorkflowDefinition) -> Vec<String> {
    let wiring = WorkflowEngine::build_wiring(workflow);
    let mut lines = Vec::new();
    for block in &workflow.blocks {
        let mut outputs = block.outputs.clone();
        for link in workflow.enabled_links().filter(|l| l.source == block.id) {
            if !outputs.contains(&link.output) {
                outputs.push(link.output.clone());
            }
        }
        for output in outputs {
            for route in wiring.routes(&block.id, &output) {
                lines.push(format!("{}.{} -> {}.{}", block.id, output, route.target, route.input));
            }
        }
    }
    lines
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunOutput {
    events: Vec<Event>,
    diagnostics: Vec<RoutingError>,
    truncated: bool,
    documents: Vec<Document>,
    messages: Vec<PublishedMessage>,
}

async fn run_workflow(
    file: &Path,
    event_file: &Path,
    target: Option<String>,
    output: OutputFormat,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = EngineConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    let runtime = LocalRuntime::new(EngineSettings::from(&config));
    let engine = load_engine(file, &runtime)?;

    let raw = std::fs::read_to_string(event_file)
        .with_context(|| format!("Failed to read event file {:?}", event_file))?;
    let mut event: Event = serde_json::from_str(&raw).context("Event file is not a valid event")?;
    if let Some(target) = target {
        event = event.with_target(BlockId::new(target));
    }

    let report = engine.dispatch(event).await.context("Event could not enter the workflow")?;

    let result = RunOutput {
        events: report.events.clone(),
        diagnostics: report.diagnostics.clone(),
        truncated: report.truncated,
        documents: runtime.store.list_all(),
        messages: runtime.ledger.messages(),
    };

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_run(&report, &result),
    }

    if report.errors().next().is_some() {
        std::process::exit(2);
    }
    Ok(())
}

fn print_run(report: &DispatchReport, result: &RunOutput) {
    println!("{}", "Events:".bold());
    for (i, event) in result.events.iter().enumerate() {
        let target = event
            .target_block_id
            .as_ref()
            .map(|t| format!(" -> {}", t))
            .unwrap_or_default();
        let line = format!("  {:>3}. {} from {}{}", i + 1, event.event_type, event.source_block_id, target);
        if event.is_error() {
            println!("{}", line.red());
        } else {
            println!("{}", line);
        }
    }
    println!();

    let errors = report.error_data();
    if !errors.is_empty() {
        println!("{}", "Errors:".bold().red());
        for error in &errors {
            println!("  [{}] {}: {}", error.kind, error.block_id, error.reason);
        }
        println!();
    }

    if !result.diagnostics.is_empty() {
        println!("{}", "Unroutable:".bold().yellow());
        for diagnostic in &result.diagnostics {
            println!("  {}", diagnostic);
        }
        println!();
    }

    if result.truncated {
        println!("{}", "⚠ Dispatch stopped at the hop limit".yellow());
        println!();
    }

    println!("{}", "Documents:".bold());
    if result.documents.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for document in &result.documents {
        println!(
            "  {} v{} {} {} hash={} message={}",
            document.id,
            document.version,
            document.kind,
            document.status,
            document.content_hash,
            document.external_message_id.as_deref().unwrap_or("-")
        );
    }
    println!();

    println!("{}", "Ledger messages:".bold());
    if result.messages.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for message in &result.messages {
        println!(
            "  {} on {} ({:?})",
            message.receipt.external_message_id, message.topic, message.message.action
        );
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "-".to_string();
    }
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

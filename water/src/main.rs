//! Water - guideline-update propagation coordinator
//!
//! CLI entry point for running and inspecting propagation runs.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::*;
use eyre::{Context, Result, bail};
use tracing::{debug, info};

use water::cli::{Cli, Command, OutputFormat, generate_after_help, get_log_path, load_change};
use water::collaborator::{CollaboratorRegistry, GuidelineComponent};
use water::config::{Config, OracleMode};
use water::domain::{PropagationRecord, RunStatus};
use water::events::{create_event_bus, spawn_event_logger};
use water::graph::{DependencyGraph, StaticGraph};
use water::oracle::create_oracle;
use water::propagation::Coordinator;
use water::state::StateManager;

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    setup_logging(cli.verbose).context("Failed to setup logging")?;
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run { change, offline, format } => cmd_run(config, &change, offline, format).await,
        Command::Show { request_id, format } => cmd_show(&config, &request_id, format).await,
        Command::Graph { component } => cmd_graph(&config, &component),
    }
}

/// Propagate one change and print the record
async fn cmd_run(mut config: Config, change_path: &Path, offline: bool, format: OutputFormat) -> Result<()> {
    debug!(?change_path, offline, ?format, "cmd_run: called");
    let change = load_change(change_path)?;
    if offline {
        config.oracle.mode = OracleMode::Offline;
    }

    if let Some(parent) = config.storage.path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let state = StateManager::spawn_sqlite(&config.storage.path).context("Failed to open state store")?;
    let bus = create_event_bus();
    let logger = spawn_event_logger(bus.clone(), &config.storage.events_dir);

    let graph = StaticGraph::from_config(&config.graph);
    let mut collaborators = CollaboratorRegistry::new();
    for component in graph.static_order() {
        collaborators.register(Arc::new(GuidelineComponent::new(component, state.clone())));
    }

    let coordinator = Coordinator::new(
        &config,
        Arc::new(graph),
        create_oracle(&config),
        state.clone(),
        bus.clone(),
        collaborators,
    );
    let record = coordinator.coordinate(&change).await.context("Propagation run failed")?;

    // Closing the bus lets the logger flush and exit
    drop(coordinator);
    drop(bus);
    logger.await.context("Event logger task failed")?;
    state.shutdown().await.context("Failed to shut down state store")?;

    print_record(&record, format)
}

/// Print a persisted run record
async fn cmd_show(config: &Config, request_id: &str, format: OutputFormat) -> Result<()> {
    debug!(%request_id, ?format, "cmd_show: called");
    if !config.storage.path.exists() {
        bail!("No state store at {}. Has anything run?", config.storage.path.display());
    }

    let state = StateManager::spawn_sqlite(&config.storage.path).context("Failed to open state store")?;
    let record: Option<PropagationRecord> = state
        .get_json(&water::state::keys::result(request_id))
        .await
        .context("Failed to read record")?;
    state.shutdown().await.context("Failed to shut down state store")?;

    match record {
        Some(record) => print_record(&record, format),
        None => bail!("No record for request {}", request_id),
    }
}

/// Print who a change to `component` would reach
fn cmd_graph(config: &Config, component: &str) -> Result<()> {
    debug!(%component, "cmd_graph: called");
    let graph = StaticGraph::from_config(&config.graph);
    if !graph.contains(component) {
        bail!("Unknown component: {}", component);
    }

    let dependents = graph.transitive_dependents(component);
    println!("{} {}", "Origin:".bold(), component.cyan());
    if dependents.is_empty() {
        println!("  {}", "no dependents".dimmed());
    }
    for dependent in &dependents {
        let depth = graph.dependency_depth(component, std::slice::from_ref(dependent));
        println!("  {} {} {}", "->".dimmed(), dependent, format!("(depth {})", depth).dimmed());
    }
    println!("{} {}", "Static order:".bold(), graph.static_order().join(", "));
    Ok(())
}

fn print_record(record: &PropagationRecord, format: OutputFormat) -> Result<()> {
    debug!(request_id = %record.request_id, ?format, "print_record: called");
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    let status = match record.status {
        RunStatus::Succeeded => record.status.to_string().green(),
        RunStatus::Failed => record.status.to_string().red(),
        RunStatus::Rejected => record.status.to_string().yellow(),
        RunStatus::Cancelled => record.status.to_string().magenta(),
    };
    println!("{} {} [{}]", "Request:".bold(), record.request_id.cyan(), status);
    println!("  origin:   {} (change {})", record.origin_id, record.change_id);
    println!("  affected: {}", record.affected.join(", "));
    println!("  impact:   {:.2}", record.impact_score);
    for target in record.outcomes.keys() {
        println!("  {} {}", "✓".green(), target);
    }
    for failure in &record.failures {
        println!("  {} {} ({:?}): {}", "✗".red(), failure.target, failure.stage, failure.reason);
        for concern in &failure.concerns {
            println!("      - {}", concern.description.dimmed());
        }
    }
    for target in &record.skipped {
        println!("  {} {}", "-".dimmed(), target.dimmed());
    }
    println!("  took {} ms", record.metrics.propagation_time_ms);
    Ok(())
}

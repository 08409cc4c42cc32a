//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::data_dir;
use crate::domain::{Change, ValidationResult};

/// Water - guideline-update propagation coordinator
#[derive(Parser)]
#[command(
    name = "water",
    about = "Propagate validated guideline changes to dependent components",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true, help = "Log at debug level")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Propagate a validated change and print the resulting record
    Run {
        /// Change file (JSON or YAML)
        #[arg(long, value_name = "FILE")]
        change: PathBuf,

        /// Never call the LLM; use deterministic fallbacks only
        #[arg(long)]
        offline: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the persisted record of a run
    Show {
        /// Request id printed by `water run`
        request_id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show which components a change to COMPONENT would reach
    Graph {
        /// Origin component id
        component: String,
    },
}

/// On-disk form of a change handed to `water run`
///
/// `change_id` may be omitted; it is then taken from `payload.update_id` or generated.
#[derive(Debug, Deserialize)]
pub struct ChangeFile {
    pub origin_id: String,
    #[serde(default)]
    pub change_id: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub validation_result: ValidationResult,
}

impl ChangeFile {
    pub fn into_change(self) -> Change {
        let mut change = Change::new(self.origin_id, self.payload, self.validation_result);
        if let Some(id) = self.change_id {
            change.change_id = id;
        }
        change
    }
}

/// Load a change from a JSON or YAML file
pub fn load_change(path: &Path) -> Result<Change> {
    debug!(?path, "load_change: called");
    let content = fs::read_to_string(path).context(format!("Failed to read change file {}", path.display()))?;
    let file: ChangeFile = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content).context("Failed to parse change file as JSON")?
    } else {
        serde_yaml::from_str(&content).context("Failed to parse change file as YAML")?
    };
    Ok(file.into_change())
}

/// Get the path to the log file
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = data_dir().join("logs").join("water.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Generate the after_help text
pub fn generate_after_help() -> String {
    format!("Logs are written to: {}\n", get_log_path().display())
}

/// Output format for run/show commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text, json", s)),
        }
    }
}

//! Water configuration types and loading

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main Water configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Protocol limits and timeouts
    pub coordinator: CoordinatorConfig,

    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Oracle selection
    pub oracle: OracleConfig,

    /// Component dependency graph
    pub graph: GraphConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .water.yml
        let local_config = PathBuf::from(".water.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/water/water.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("water").join("water.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Protocol limits and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Revision calls allowed per reflection/revision loop
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Targets whose context is generated at the same time
    #[serde(rename = "context-concurrency")]
    pub context_concurrency: usize,

    #[serde(rename = "oracle-timeout-ms")]
    pub oracle_timeout_ms: u64,

    /// Timeout for each readiness, apply and verify call
    #[serde(rename = "collaborator-timeout-ms")]
    pub collaborator_timeout_ms: u64,

    /// Deadline for a whole run; unset means no deadline
    #[serde(rename = "run-deadline-ms")]
    pub run_deadline_ms: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            context_concurrency: 4,
            oracle_timeout_ms: 120_000,
            collaborator_timeout_ms: 30_000,
            run_deadline_ms: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_ms.map(Duration::from_millis)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "anthropic" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 8192,
            timeout_ms: 300_000,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).context(format!(
            "LLM API key not found. Set the {} environment variable.",
            self.api_key_env
        ))
    }
}

/// How oracle requests are answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleMode {
    /// Ask the configured LLM
    #[default]
    Llm,
    /// Never ask; every call site takes its deterministic fallback
    Offline,
}

/// Oracle selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub mode: OracleMode,

    /// Directory holding `<kind>.pmt` prompt overrides
    #[serde(rename = "prompts-dir")]
    pub prompts_dir: Option<PathBuf>,
}

/// Component dependency graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Component id -> ids that directly depend on it
    pub dependents: BTreeMap<String, Vec<String>>,

    /// Explicit fallback order; derived from `dependents` when unset
    #[serde(rename = "static-order")]
    pub static_order: Option<Vec<String>>,

    /// Foundational components; changes touching them weigh double
    #[serde(rename = "core-components")]
    pub core_components: Vec<String>,

    /// Component id -> role description handed to the oracle
    pub roles: BTreeMap<String, String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        let dependents = [
            (
                "garden_planner",
                vec!["environmental_analysis", "root_system", "tree_placement"],
            ),
            ("environmental_analysis", vec!["root_system", "tree_placement"]),
            ("root_system", vec!["tree_placement"]),
            ("tree_placement", vec![]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into_iter().map(str::to_string).collect()))
        .collect();

        let roles = [
            (
                "garden_planner",
                "High-level planning and coordination of garden components",
            ),
            (
                "environmental_analysis",
                "Analysis of environmental conditions and constraints",
            ),
            ("root_system", "Design and implementation of underlying root systems"),
            ("tree_placement", "Spatial arrangement and configuration of trees"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            dependents,
            static_order: None,
            core_components: vec!["garden_planner".to_string()],
            roles,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding run state
    pub path: PathBuf,

    /// Directory for per-run JSONL event logs
    #[serde(rename = "events-dir")]
    pub events_dir: PathBuf,
}

/// Base directory for Water data (~/.local/share/water on Linux)
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("water"))
        .unwrap_or_else(|| PathBuf::from(".water"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = data_dir();
        Self {
            path: base.join("state.db"),
            events_dir: base.join("runs"),
        }
    }
}

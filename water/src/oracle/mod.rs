//! Oracle capability
//!
//! An oracle turns a prompt kind plus a JSON context into a structured JSON
//! artifact. It is unreliable by contract: every call site in the protocol
//! has a deterministic fallback for when it fails, times out, or answers
//! with something unusable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, OracleMode};
use crate::llm::{LlmError, create_client};
use crate::prompts::PromptLoader;

mod llm;

pub use llm::LlmOracle;

/// What the oracle is being asked to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Relevance filter, impact hint and ordering hint for a change
    PropagationAnalysis,
    /// Rich explanation of a change for one target
    ContextGeneration,
    /// Concrete adaptation steps for one target
    AdaptationGuidance,
    Reflection,
    Revision,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PropagationAnalysis => "propagation_analysis",
            Self::ContextGeneration => "context_generation",
            Self::AdaptationGuidance => "adaptation_guidance",
            Self::Reflection => "reflection",
            Self::Revision => "revision",
        }
    }
}

impl std::fmt::Display for PromptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Oracle failures
///
/// Never fatal to a run; each call site documents its fallback.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Oracle unavailable")]
    Unavailable,

    #[error("Oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed oracle output: {0}")]
    Malformed(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Structured-generation capability
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Produce an artifact of the given kind from a JSON context
    ///
    /// The context's top-level `origin_id`, `target_id`, `phase` and
    /// `iteration` fields are available to prompt templates.
    async fn generate(&self, kind: PromptKind, context: &Value) -> Result<Value, OracleError>;
}

/// Ask the oracle with a deadline
pub async fn ask(
    oracle: &dyn Oracle,
    kind: PromptKind,
    context: &Value,
    timeout: Duration,
) -> Result<Value, OracleError> {
    debug!(%kind, ?timeout, "ask: called");
    match tokio::time::timeout(timeout, oracle.generate(kind, context)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%kind, "ask: timed out");
            Err(OracleError::Timeout(timeout))
        }
    }
}

/// Oracle that never answers
///
/// Every call site takes its deterministic fallback, which makes runs fully
/// reproducible.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineOracle;

#[async_trait]
impl Oracle for OfflineOracle {
    async fn generate(&self, kind: PromptKind, _context: &Value) -> Result<Value, OracleError> {
        debug!(%kind, "OfflineOracle::generate: called");
        Err(OracleError::Unavailable)
    }
}

/// Build the oracle selected by config
///
/// If the LLM client cannot be built (unknown provider, missing API key)
/// the offline oracle is used instead.
pub fn create_oracle(config: &Config) -> Arc<dyn Oracle> {
    debug!(mode = ?config.oracle.mode, "create_oracle: called");
    match config.oracle.mode {
        OracleMode::Offline => Arc::new(OfflineOracle),
        OracleMode::Llm => match create_client(&config.llm) {
            Ok(client) => {
                let prompts = PromptLoader::new(config.oracle.prompts_dir.clone());
                Arc::new(LlmOracle::new(client, prompts, config.llm.max_tokens))
            }
            Err(e) => {
                warn!(error = %e, "create_oracle: LLM unavailable, running offline");
                Arc::new(OfflineOracle)
            }
        },
    }
}

/// Reduce model output to its outermost JSON object
///
/// Tolerates surrounding prose and Markdown code fences.
pub fn extract_json(text: &str) -> Result<Value, OracleError> {
    let start = text
        .find('{')
        .ok_or_else(|| OracleError::Malformed("no JSON object in output".to_string()))?;
    let end = text
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| OracleError::Malformed("unterminated JSON object".to_string()))?;

    let value: Value =
        serde_json::from_str(&text[start..=end]).map_err(|e| OracleError::Malformed(e.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(OracleError::Malformed("output is not a JSON object".to_string()))
    }
}

/// The value under `key`, or the whole artifact if a revision dropped the wrapper
pub fn section<'a>(artifact: &'a Value, key: &str) -> &'a Value {
    artifact.get(key).unwrap_or(artifact)
}

/// Read a numeric field that models sometimes emit as a string
pub fn number_at(value: &Value, path: &[&str]) -> Option<f64> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    match current {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Oracle that hands out scripted replies per prompt kind
    ///
    /// An exhausted script answers `Unavailable`; a scripted `None` answers
    /// `Malformed`. Every context it is asked with is kept for inspection.
    #[derive(Default)]
    pub struct ScriptedOracle {
        replies: Mutex<HashMap<PromptKind, VecDeque<Option<Value>>>>,
        calls: Mutex<Vec<(PromptKind, Value)>>,
    }

    impl ScriptedOracle {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, kind: PromptKind, value: Value) -> Self {
            self.push(kind, Some(value));
            self
        }

        pub fn malformed(self, kind: PromptKind) -> Self {
            self.push(kind, None);
            self
        }

        fn push(&self, kind: PromptKind, reply: Option<Value>) {
            self.replies.lock().unwrap().entry(kind).or_default().push_back(reply);
        }

        pub fn calls(&self, kind: PromptKind) -> usize {
            self.calls.lock().unwrap().iter().filter(|(k, _)| *k == kind).count()
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn contexts(&self, kind: PromptKind) -> Vec<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, c)| c.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Oracle for ScriptedOracle {
        async fn generate(&self, kind: PromptKind, context: &Value) -> Result<Value, OracleError> {
            self.calls.lock().unwrap().push((kind, context.clone()));
            let next = self.replies.lock().unwrap().get_mut(&kind).and_then(VecDeque::pop_front);
            match next {
                Some(Some(value)) => Ok(value),
                Some(None) => Err(OracleError::Malformed("scripted".to_string())),
                None => Err(OracleError::Unavailable),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_section() {
        let wrapped = json!({"rich_context": {"a": 1}});
        assert_eq!(section(&wrapped, "rich_context"), &json!({"a": 1}));
        let bare = json!({"a": 1});
        assert_eq!(section(&bare, "rich_context"), &bare);
    }

    #[test]
    fn test_extract_json_plain() {
        let value = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_extract_json_fenced_with_prose() {
        let text = concat!(
            "Here is the analysis:\n```json\n",
            "{\"propagation_analysis\": {\"propagation_order\": [\"b\"]}}",
            "\n```\nDone."
        );
        let value = extract_json(text).unwrap();
        assert_eq!(value["propagation_analysis"]["propagation_order"][0], "b");
    }

    #[test]
    fn test_extract_json_rejects_garbage() {
        assert!(matches!(extract_json("no json here"), Err(OracleError::Malformed(_))));
        assert!(matches!(extract_json("} backwards {"), Err(OracleError::Malformed(_))));
        assert!(matches!(extract_json("{not: json}"), Err(OracleError::Malformed(_))));
    }

    #[test]
    fn test_number_at() {
        let value = json!({"a": {"b": 7, "c": "8.5", "d": "high"}});
        assert_eq!(number_at(&value, &["a", "b"]), Some(7.0));
        assert_eq!(number_at(&value, &["a", "c"]), Some(8.5));
        assert_eq!(number_at(&value, &["a", "d"]), None);
        assert_eq!(number_at(&value, &["missing"]), None);
    }

    #[test]
    fn test_prompt_kind_names_match_templates() {
        for kind in [
            PromptKind::PropagationAnalysis,
            PromptKind::ContextGeneration,
            PromptKind::AdaptationGuidance,
            PromptKind::Reflection,
            PromptKind::Revision,
        ] {
            assert!(crate::prompts::embedded::get_embedded(kind.as_str()).is_some());
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
    }

    #[tokio::test]
    async fn test_offline_oracle_unavailable() {
        let result = OfflineOracle.generate(PromptKind::Reflection, &json!({})).await;
        assert!(matches!(result, Err(OracleError::Unavailable)));
    }

    struct SlowOracle;

    #[async_trait]
    impl Oracle for SlowOracle {
        async fn generate(&self, _kind: PromptKind, _context: &Value) -> Result<Value, OracleError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({}))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ask_times_out() {
        let result = ask(&SlowOracle, PromptKind::Revision, &json!({}), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(OracleError::Timeout(_))));
    }

    #[test]
    fn test_create_oracle_offline_mode() {
        let mut config = Config::default();
        config.oracle.mode = OracleMode::Offline;
        // Just needs to build without touching the network
        let _oracle = create_oracle(&config);
    }
}

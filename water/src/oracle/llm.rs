//! LLM-backed oracle

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::{Oracle, OracleError, PromptKind, extract_json};
use crate::llm::{CompletionRequest, LlmClient, Message};
use crate::prompts::{PromptContext, PromptLoader};

/// Oracle that answers through an [`LlmClient`]
///
/// The system prompt is the template for the prompt kind; the user message
/// is the pretty-printed JSON context.
pub struct LlmOracle {
    client: Arc<dyn LlmClient>,
    prompts: PromptLoader,
    max_tokens: u32,
}

impl LlmOracle {
    pub fn new(client: Arc<dyn LlmClient>, prompts: PromptLoader, max_tokens: u32) -> Self {
        Self {
            client,
            prompts,
            max_tokens,
        }
    }

    fn prompt_context(context: &Value) -> PromptContext {
        let text = |key: &str| context.get(key).and_then(Value::as_str).map(str::to_string);
        PromptContext {
            origin_id: text("origin_id").unwrap_or_default(),
            target_id: text("target_id"),
            phase: text("phase"),
            iteration: context
                .get("iteration")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
        }
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn generate(&self, kind: PromptKind, context: &Value) -> Result<Value, OracleError> {
        debug!(%kind, "LlmOracle::generate: called");
        let system_prompt = self
            .prompts
            .render(kind.as_str(), &Self::prompt_context(context))
            .map_err(|e| OracleError::Prompt(e.to_string()))?;
        let body = serde_json::to_string_pretty(context).map_err(|e| OracleError::Prompt(e.to_string()))?;

        let response = self
            .client
            .complete(CompletionRequest {
                system_prompt,
                messages: vec![Message::user(body)],
                max_tokens: self.max_tokens,
            })
            .await?;
        info!(
            %kind,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "oracle call completed"
        );

        let text = response
            .content
            .ok_or_else(|| OracleError::Malformed("empty response".to_string()))?;
        extract_json(&text)
    }
}

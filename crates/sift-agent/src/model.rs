//! The model seam: one turn in, raw text out.
//!
//! Parsing the text is the orchestrator's job, so a stub model in tests and a
//! hosted LLM go through exactly the same decode path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sift_discovery::ToolSpec;
use serde_json::json;
use sift_query::query::structured_query_json_schema;
use sift_query::CandidateQuery;
use tracing::warn;

use crate::llm::{CompletionRequest, FinishReason, LLMError, LLMProvider, Message};
use crate::prompt::{render_user_prompt, HistoryItem, Reminder, UserPromptParts, SYSTEM_PROMPT};
use crate::TranslationRequest;

/// Everything a model gets to see for one step.
#[derive(Debug, Clone, Copy)]
pub struct ModelTurn<'a> {
    pub request: &'a TranslationRequest,
    pub tools: &'a [ToolSpec],
    /// Already bounded for the prompt.
    pub history: &'a [HistoryItem],
    pub reminder: Option<&'a Reminder>,
    /// 1-based.
    pub step: usize,
    pub max_steps: usize,
    pub now: DateTime<Utc>,
}

impl ModelTurn<'_> {
    pub fn user_prompt(&self) -> String {
        render_user_prompt(&UserPromptParts {
            request: self.request,
            tools: self.tools,
            history: self.history,
            reminder: self.reminder,
            step: self.step,
            max_steps: self.max_steps,
            now: self.now,
        })
    }
}

#[async_trait]
pub trait QueryModel: Send + Sync {
    async fn respond(&self, turn: &ModelTurn<'_>) -> Result<String, LLMError>;

    fn name(&self) -> String;
}

// ============================================================================
// Response decode
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelAction {
    ToolCalls(Vec<ToolCallRequest>),
    Final(CandidateQuery),
    Refused(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ModelResponse {
    ToolCall(ToolCallRequest),
    ToolCalls(Vec<ToolCallRequest>),
    FinalQuery(Value),
    Error(String),
}

/// JSON schema of one model reply: exactly one of the four protocol shapes.
pub fn model_response_json_schema() -> Value {
    let call = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "name": { "type": "string" },
            "args": { "type": "object" }
        },
        "required": ["name"]
    });
    let single = |key: &str, schema: Value| {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": { key: schema },
            "required": [key]
        })
    };
    json!({
        "oneOf": [
            single("tool_call", call.clone()),
            single("tool_calls", json!({ "type": "array", "items": call, "minItems": 1 })),
            single("final_query", structured_query_json_schema()),
            single("error", json!({ "type": "string" })),
        ]
    })
}

/// Decode one model reply. `Err` carries a reason fit for a repair prompt.
pub fn parse_model_response(text: &str) -> Result<ModelAction, String> {
    let value = extract_json_object(text)?;
    let response: ModelResponse = serde_json::from_value(value).map_err(|e| {
        format!("expected exactly one of `tool_call`, `tool_calls`, `final_query`, `error`: {e}")
    })?;
    match response {
        ModelResponse::ToolCall(call) => Ok(ModelAction::ToolCalls(vec![call])),
        ModelResponse::ToolCalls(calls) if calls.is_empty() => {
            Err("`tool_calls` must not be empty".to_string())
        }
        ModelResponse::ToolCalls(calls) => Ok(ModelAction::ToolCalls(calls)),
        ModelResponse::FinalQuery(v) => CandidateQuery::from_value(v)
            .map(ModelAction::Final)
            .map_err(|e| format!("final_query: {e}")),
        ModelResponse::Error(msg) => Ok(ModelAction::Refused(msg)),
    }
}

/// The whole text as JSON, else the first brace-balanced object in it.
pub fn extract_json_object(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }

    let Some(start) = trimmed.find('{') else {
        return Err("response is not JSON (no '{' found)".to_string());
    };

    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;
    let mut end: Option<usize> = None;

    for (idx, ch) in trimmed.char_indices().skip_while(|(i, _)| *i < start) {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(idx);
                    break;
                }
            }
            _ => {}
        }
    }

    let candidate = match end {
        Some(end) => &trimmed[start..=end],
        None => {
            let Some(end) = trimmed[start..].rfind('}').map(|i| start + i) else {
                return Err("response is not JSON (no '}' after the first '{')".to_string());
            };
            &trimmed[start..=end]
        }
    };

    match serde_json::from_str::<Value>(candidate) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(_) => Err("response is not a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

// ============================================================================
// Hosted model
// ============================================================================

/// A [`QueryModel`] backed by an LLM provider.
pub struct ProviderModel {
    provider: Box<dyn LLMProvider>,
    max_output_tokens: usize,
}

impl ProviderModel {
    pub fn new(provider: Box<dyn LLMProvider>) -> Self {
        Self {
            provider,
            max_output_tokens: crate::config::DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: usize) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }
}

#[async_trait]
impl QueryModel for ProviderModel {
    async fn respond(&self, turn: &ModelTurn<'_>) -> Result<String, LLMError> {
        let request = CompletionRequest {
            messages: vec![Message::system(SYSTEM_PROMPT), Message::user(turn.user_prompt())],
            max_tokens: Some(self.max_output_tokens),
            temperature: Some(0.0),
            json_schema: Some(model_response_json_schema()),
            stop_sequences: Vec::new(),
        };
        let response = self.provider.complete(&request).await?;
        match response.finish_reason {
            FinishReason::Stop => {}
            FinishReason::Length => warn!(
                model = %response.model,
                max_tokens = self.max_output_tokens,
                "completion hit the output token limit"
            ),
            FinishReason::ContentFilter => {
                return Err(LLMError::InvalidResponse(
                    "completion stopped by the provider's content filter".to_string(),
                ))
            }
        }
        Ok(response.content)
    }

    fn name(&self) -> String {
        let info = self.provider.model_info();
        format!("{}:{}", info.provider.as_str(), info.name)
    }
}

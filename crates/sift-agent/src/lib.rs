//! Sift agent: natural language in, structured search query out.
//!
//! A run hands the request and the discovery tool schemas to a language
//! model, executes whatever lookups it asks for, and validates its final
//! answer before returning it together with the trace of every lookup.
//!
//! ```text
//!   TranslationRequest
//!          │
//!          ▼
//!   Orchestrator ◄──► QueryModel (hosted LLM or HeuristicModel)
//!          │
//!          ├──► DiscoveryToolset ──► SearchBackend
//!          │
//!          └──► validate() ──► AgentRunResult { result, toolCalls }
//! ```
//!
//! Failure policy: tool errors and validation problems are absorbed into the
//! run (recorded in the trace, reported to the model, returned as
//! `violations`); only budget exhaustion, repeated malformed output, model
//! refusals and provider errors end a run with an [`AgentError`].

use serde::{Deserialize, Serialize};
use sift_discovery::SearchScope;
use sift_query::{DatasetKind, StructuredQuery};

pub mod config;
pub mod llm;
pub mod mock;
pub mod model;
pub mod orchestrator;
pub mod prompt;
pub mod trace;

pub use config::{AgentConfig, ConfigError};
pub use llm::{LLMError, LLMProvider};
pub use mock::HeuristicModel;
pub use model::{parse_model_response, ModelAction, ModelTurn, ProviderModel, QueryModel, ToolCallRequest};
pub use orchestrator::Orchestrator;
pub use trace::{ToolCallRecord, TraceRecorder};

/// Input to one translation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    pub natural_language_text: String,
    pub organization_scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_hint: Option<DatasetKind>,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            natural_language_text: text.into(),
            organization_scope: organization.into(),
            project_scope: None,
            dataset_hint: None,
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project_scope = Some(project.into());
        self
    }

    pub fn with_dataset_hint(mut self, dataset: DatasetKind) -> Self {
        self.dataset_hint = Some(dataset);
        self
    }

    pub fn scope(&self) -> SearchScope {
        SearchScope::new(self.organization_scope.clone()).with_project(self.project_scope.clone())
    }
}

/// What a successful run returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunResult {
    pub result: StructuredQuery,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Repairs the validator applied to the accepted candidate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed: Vec<String>,
    /// Residual problems of a last-resort candidate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
    #[serde(skip)]
    pub model_turns: usize,
}

impl AgentRunResult {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("step budget of {max_steps} model turns exhausted before a query was produced")]
    StepBudgetExceeded { max_steps: usize },
    #[error("model output could not be decoded: {reason}")]
    MalformedModelOutput { reason: String },
    #[error("query failed validation: {}", .violations.join("; "))]
    ValidationUnfixable {
        query: StructuredQuery,
        violations: Vec<String>,
    },
    #[error("model declined the request: {0}")]
    ModelRefused(String),
    #[error(transparent)]
    Llm(#[from] LLMError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

//! The bounded tool loop.
//!
//! One run is an explicit state machine:
//!
//! ```text
//!   AwaitingModel ──tool calls──► ExecutingTools ──► AwaitingModel
//!        │
//!        └──final query──► Validating ──valid──► Done
//!                              │
//!                              └──violations──► AwaitingModel (once, with a reminder)
//! ```
//!
//! Every transition out of `AwaitingModel` spends one step. Running out of
//! steps with no candidate in hand is fatal; running out after the
//! correction re-prompt accepts the last candidate.

use chrono::{DateTime, Utc};
use sift_discovery::{DiscoveryCall, DiscoveryToolset, SearchBackend, ToolSpec};
use sift_query::{validate, CandidateQuery, FieldCatalog, ValidationContext, ValidationReport};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::model::{parse_model_response, ModelAction, ModelTurn, QueryModel, ToolCallRequest};
use crate::prompt::{compact_history, truncate_for_prompt, HistoryItem, Reminder};
use crate::trace::{ToolCallRecord, TraceRecorder};
use crate::{AgentError, AgentRunResult, TranslationRequest};

const MALFORMED_PREVIEW_CHARS: usize = 2_000;

enum RunState {
    AwaitingModel,
    ExecutingTools(Vec<ToolCallRequest>),
    Validating(CandidateQuery),
    Done(AgentRunResult),
    Fatal(AgentError),
}

/// Mutable state owned by one run.
struct Run<'a> {
    request: &'a TranslationRequest,
    toolset: &'a DiscoveryToolset,
    specs: Vec<ToolSpec>,
    now: DateTime<Utc>,
    catalog: FieldCatalog,
    trace: TraceRecorder,
    history: Vec<HistoryItem>,
    reminder: Option<Reminder>,
    turns: usize,
    malformed_streak: usize,
    /// Set once the validation re-prompt has been spent; holds the report it was sent for.
    correction: Option<ValidationReport>,
}

impl Run<'_> {
    fn finish(&mut self, report: ValidationReport) -> AgentRunResult {
        AgentRunResult {
            result: report.query,
            tool_calls: std::mem::take(&mut self.trace).into_records(),
            fixed: report.fixed,
            violations: report.violations,
            model_turns: self.turns,
        }
    }
}

pub struct Orchestrator {
    model: Arc<dyn QueryModel>,
    config: AgentConfig,
    clock: Option<DateTime<Utc>>,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn QueryModel>, config: AgentConfig) -> Self {
        Self {
            model,
            config,
            clock: None,
        }
    }

    /// Pin "now" for every run (relative dates in requests resolve against it).
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.clock = Some(now);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Build a toolset scoped to the request and translate.
    pub async fn translate_with_backend(
        &self,
        request: &TranslationRequest,
        backend: Arc<dyn SearchBackend>,
    ) -> Result<AgentRunResult, AgentError> {
        let toolset = DiscoveryToolset::new(backend, request.scope());
        self.translate(request, &toolset).await
    }

    pub async fn translate(
        &self,
        request: &TranslationRequest,
        toolset: &DiscoveryToolset,
    ) -> Result<AgentRunResult, AgentError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "translate",
            %run_id,
            org = %request.organization_scope,
            model = %self.model.name()
        );
        self.run(request, toolset).instrument(span).await
    }

    async fn run(
        &self,
        request: &TranslationRequest,
        toolset: &DiscoveryToolset,
    ) -> Result<AgentRunResult, AgentError> {
        let mut run = Run {
            request,
            toolset,
            specs: toolset.specs(),
            now: self.clock.unwrap_or_else(Utc::now),
            catalog: FieldCatalog::new(),
            trace: TraceRecorder::new(),
            history: Vec::new(),
            reminder: None,
            turns: 0,
            malformed_streak: 0,
            correction: None,
        };

        let mut state = RunState::AwaitingModel;
        loop {
            state = match state {
                RunState::AwaitingModel => self.await_model(&mut run).await,
                RunState::ExecutingTools(calls) => {
                    execute_tools(&mut run, calls).await;
                    RunState::AwaitingModel
                }
                RunState::Validating(candidate) => self.validate_candidate(&mut run, candidate),
                RunState::Done(result) => {
                    info!(
                        turns = result.model_turns,
                        tool_calls = result.tool_calls.len(),
                        fixed = result.fixed.len(),
                        violations = result.violations.len(),
                        "translation finished"
                    );
                    return Ok(result);
                }
                RunState::Fatal(err) => {
                    warn!(error = %err, turns = run.turns, "translation failed");
                    return Err(err);
                }
            };
        }
    }

    async fn await_model(&self, run: &mut Run<'_>) -> RunState {
        if run.turns >= self.config.max_steps {
            return match run.correction.take() {
                Some(report) => self.accept_last_resort(run, report),
                None => RunState::Fatal(AgentError::StepBudgetExceeded {
                    max_steps: self.config.max_steps,
                }),
            };
        }
        run.turns += 1;

        let history = compact_history(&run.history, self.config.prompt_limits);
        let reminder = run.reminder.take();
        let turn = ModelTurn {
            request: run.request,
            tools: &run.specs,
            history: &history,
            reminder: reminder.as_ref(),
            step: run.turns,
            max_steps: self.config.max_steps,
            now: run.now,
        };
        debug!(step = run.turns, history = history.len(), "model turn");

        let text = match self.model.respond(&turn).await {
            Ok(text) => text,
            Err(e) => return RunState::Fatal(e.into()),
        };

        match parse_model_response(&text) {
            Ok(action) => {
                run.malformed_streak = 0;
                match action {
                    ModelAction::ToolCalls(calls) => RunState::ExecutingTools(calls),
                    ModelAction::Final(candidate) => RunState::Validating(candidate),
                    ModelAction::Refused(message) => {
                        RunState::Fatal(AgentError::ModelRefused(message))
                    }
                }
            }
            Err(reason) => {
                run.malformed_streak += 1;
                warn!(step = run.turns, reason = %reason, "malformed model output");
                if run.malformed_streak >= 2 {
                    return RunState::Fatal(AgentError::MalformedModelOutput { reason });
                }
                run.reminder = Some(Reminder::MalformedOutput {
                    error: reason,
                    preview: truncate_for_prompt(&text, MALFORMED_PREVIEW_CHARS),
                });
                RunState::AwaitingModel
            }
        }
    }

    fn validate_candidate(&self, run: &mut Run<'_>, candidate: CandidateQuery) -> RunState {
        let ctx = ValidationContext::new(&run.catalog).with_dataset_hint(run.request.dataset_hint);
        let report = validate(&candidate, &ctx);
        for fix in &report.fixed {
            debug!(fix = %fix, "validator repaired candidate");
        }
        if report.is_valid() {
            return RunState::Done(run.finish(report));
        }

        if run.correction.is_none() {
            warn!(
                violations = ?report.violations,
                "candidate failed validation; re-prompting once"
            );
            run.reminder = Some(Reminder::Violations {
                candidate: serde_json::to_value(&report.query).unwrap_or_default(),
                violations: report.violations.clone(),
            });
            run.correction = Some(report);
            return RunState::AwaitingModel;
        }

        run.correction = None;
        self.accept_last_resort(run, report)
    }

    fn accept_last_resort(&self, run: &mut Run<'_>, report: ValidationReport) -> RunState {
        if self.config.strict_validation {
            return RunState::Fatal(AgentError::ValidationUnfixable {
                query: report.query,
                violations: report.violations,
            });
        }
        warn!(
            violations = ?report.violations,
            "accepting candidate with residual violations"
        );
        RunState::Done(run.finish(report))
    }
}

/// Run each requested call in order. Failures go to the trace and the
/// transcript; they never end the run.
async fn execute_tools(run: &mut Run<'_>, calls: Vec<ToolCallRequest>) {
    for call in calls {
        let decoded = DiscoveryCall::decode(&call.name, &call.args);
        let call = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "rejected tool call");
                record_failure(run, &call.name, call.args, e.to_string());
                continue;
            }
        };

        let name = call.name();
        let args = call.args();
        if run.trace.contains(name, &args) {
            debug!(tool = name, args = %args, "repeated discovery call");
        }

        match run.toolset.invoke(&call).await {
            Ok(output) => {
                debug!(tool = name, "discovery call succeeded");
                output.fold_into(&mut run.catalog);
                run.trace.record(ToolCallRecord::ok(name, args.clone()));
                run.history.push(HistoryItem {
                    tool: name.to_string(),
                    args,
                    result: output.to_json(),
                });
            }
            Err(e) => {
                warn!(tool = name, error = %e, "discovery call failed");
                record_failure(run, name, args, e.to_string());
            }
        }
    }
}

fn record_failure(run: &mut Run<'_>, tool: &str, args: serde_json::Value, error: String) {
    run.trace
        .record(ToolCallRecord::failed(tool, args.clone(), error.clone()));
    run.history.push(HistoryItem {
        tool: tool.to_string(),
        args,
        result: serde_json::json!({ "error": error }),
    });
}

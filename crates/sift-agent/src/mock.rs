//! Deterministic keyword model.
//!
//! Speaks the same JSON protocol as a hosted LLM, so the orchestrator, the
//! validator and the discovery tools run for real with no network access.
//! Used by the CLI's `--backend mock` and by the end-to-end tests.

use async_trait::async_trait;
use chrono::{Datelike, Duration, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use serde_json::{json, Value};
use sift_discovery::tools::{
    DATASET_ATTRIBUTES, IDENTITY_RESOLVER, ISSUE_FIELD_CATALOG, SEMANTIC_NAMESPACE,
};
use sift_discovery::SemanticCatalog;
use sift_query::{CandidateQuery, DatasetKind, TimeRange};
use std::sync::OnceLock;

use crate::llm::LLMError;
use crate::model::{ModelTurn, QueryModel, ToolCallRequest};
use crate::prompt::HistoryItem;

const TOKEN_EQUATION: &str =
    "equation|sum(gen_ai.usage.input_tokens) + sum(gen_ai.usage.output_tokens)";

/// Verbs after which "me" addresses the assistant, not the requester.
const IMPERATIVE_VERBS: &[&str] = &[
    "show", "give", "tell", "get", "find", "let", "help", "list", "send", "fetch", "pull",
];

#[derive(Debug, Clone, Default)]
pub struct HeuristicModel;

impl HeuristicModel {
    pub fn new() -> Self {
        Self
    }
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[a-z][a-z0-9_]*(?:\.[a-z0-9_]+)+\b").expect("identifier pattern is a valid regex")
    })
}

fn last_n_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:last|past)\s+(\d+)\s*(minute|min|hour|hr|day|week)s?\b")
            .expect("relative period pattern is a valid regex")
    })
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:over|above|more than|longer than|slower than)\s*(\d+)\s*(ms|s|sec|secs|seconds?|m|mins?|minutes?)\b")
            .expect("duration pattern is a valid regex")
    })
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

pub(crate) fn mentions_requester(text: &str) -> bool {
    let words = words(text);
    words.iter().enumerate().any(|(i, w)| match w.as_str() {
        "my" | "mine" | "myself" => true,
        "me" => i == 0 || !IMPERATIVE_VERBS.contains(&words[i - 1].as_str()),
        _ => false,
    })
}

fn choose_dataset(text: &str, hint: Option<DatasetKind>) -> DatasetKind {
    if let Some(hint) = hint {
        return hint;
    }
    let words = words(text);
    let has = |w: &str| words.iter().any(|x| x == w);
    let lc = text.to_ascii_lowercase();
    if has("issue") || has("issues") {
        DatasetKind::Issues
    } else if has("log") || has("logs") {
        DatasetKind::Logs
    } else if ["span", "spans", "trace", "traces", "slow", "latency", "duration", "token", "tokens", "llm"]
        .iter()
        .any(|w| has(w))
        || lc.contains("api call")
        || lc.contains("gen_ai")
    {
        DatasetKind::Spans
    } else {
        DatasetKind::Errors
    }
}

fn time_range(text: &str, now: chrono::DateTime<Utc>) -> Option<TimeRange> {
    let lc = text.to_ascii_lowercase();
    if let Some(caps) = last_n_regex().captures(&lc) {
        let n = &caps[1];
        let unit = match &caps[2] {
            "minute" | "min" => "m",
            "hour" | "hr" => "h",
            "day" => "d",
            _ => "w",
        };
        return Some(TimeRange::stats_period(format!("{n}{unit}")));
    }
    if lc.contains("yesterday") {
        let today = now.date_naive();
        let start_day = today - Duration::days(1);
        let midnight = |d: chrono::NaiveDate| {
            Utc.with_ymd_and_hms(d.year(), d.month(), d.day(), 0, 0, 0)
                .single()
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        };
        if let (Some(start), Some(end)) = (midnight(start_day), midnight(today)) {
            return Some(TimeRange::absolute(start, end));
        }
    }
    let period = if lc.contains("today") || lc.contains("24 hours") {
        "24h"
    } else if lc.contains("week") {
        "7d"
    } else if lc.contains("last hour") || lc.contains("past hour") {
        "1h"
    } else if lc.contains("month") {
        "30d"
    } else {
        return None;
    };
    Some(TimeRange::stats_period(period))
}

/// A dotted name from the request plus the value it is compared to, if any.
#[derive(Debug, Clone, PartialEq)]
struct FieldTerm {
    name: String,
    value: Option<String>,
}

fn field_terms(text: &str, dataset: DatasetKind) -> Vec<FieldTerm> {
    let mut terms: Vec<FieldTerm> = Vec::new();
    for m in identifier_regex().find_iter(text) {
        let name = m.as_str().to_string();
        if terms.iter().any(|t| t.name == name || t.value.as_deref() == Some(name.as_str())) {
            continue;
        }
        let pattern = format!(
            r#"(?i){}\s*(?:is|=|:|equals|of)\s*"?([A-Za-z0-9_.\-]+)"#,
            regex::escape(&name)
        );
        let value = Regex::new(&pattern)
            .ok()
            .and_then(|re| re.captures(text).map(|c| c[1].to_string()));
        terms.push(FieldTerm { name, value });
    }
    // Values of earlier terms (`span.op is http.client`) are not fields.
    let values: Vec<String> = terms.iter().filter_map(|t| t.value.clone()).collect();
    terms.retain(|t| !values.contains(&t.name));
    terms.retain(|t| !dataset.is_common_field(&t.name));
    terms
}

fn discovery_call_for(term: &FieldTerm, dataset: DatasetKind) -> ToolCallRequest {
    let catalog = SemanticCatalog::bundled();
    if let Some(entry) = catalog.namespace_of(&term.name) {
        if entry.datasets.contains(&dataset) {
            return ToolCallRequest::new(
                SEMANTIC_NAMESPACE,
                json!({ "namespace": entry.namespace, "dataset": dataset }),
            );
        }
    }
    if dataset == DatasetKind::Issues {
        return ToolCallRequest::new(ISSUE_FIELD_CATALOG, json!({ "includeValues": false }));
    }
    ToolCallRequest::new(DATASET_ATTRIBUTES, json!({ "dataset": dataset }))
}

fn already_called(history: &[HistoryItem], call: &ToolCallRequest) -> bool {
    history.iter().any(|h| h.tool == call.name && h.args == call.args)
}

fn resolved_identity(history: &[HistoryItem]) -> Option<String> {
    history
        .iter()
        .rev()
        .filter(|h| h.tool == IDENTITY_RESOLVER && !h.is_error())
        .find_map(|h| {
            ["email", "username", "id"]
                .iter()
                .find_map(|k| h.result.get(*k).and_then(Value::as_str).map(str::to_string))
        })
}

fn filter_value(value: &str) -> String {
    if value.contains(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

fn build_query(text: &str, dataset: DatasetKind, terms: &[FieldTerm], history: &[HistoryItem]) -> String {
    let lc = text.to_ascii_lowercase();
    let mut parts: Vec<String> = Vec::new();

    if mentions_requester(text) {
        if let Some(who) = resolved_identity(history) {
            let key = if dataset == DatasetKind::Issues {
                "assigned"
            } else {
                "user.email"
            };
            parts.push(format!("{key}:{}", filter_value(&who)));
        }
    }
    if dataset == DatasetKind::Issues && lc.contains("unresolved") {
        parts.push("is:unresolved".to_string());
    }
    if dataset == DatasetKind::Errors && lc.contains("unhandled") {
        parts.push("error.handled:false".to_string());
    }
    if dataset == DatasetKind::Spans {
        if lc.contains("api call") || lc.contains("http call") || lc.contains("api request") {
            parts.push("span.op:http.client".to_string());
        }
        if let Some(caps) = duration_regex().captures(&lc) {
            let unit = match &caps[2] {
                "ms" => "ms",
                u if u.starts_with('m') => "m",
                _ => "s",
            };
            parts.push(format!("span.duration:>{}{unit}", &caps[1]));
        }
    }
    for term in terms {
        match &term.value {
            Some(v) => parts.push(format!("{}:{}", term.name, filter_value(v))),
            None => parts.push(format!("has:{}", term.name)),
        }
    }
    parts.join(" ")
}

fn final_query(turn: &ModelTurn<'_>, dataset: DatasetKind, terms: &[FieldTerm]) -> CandidateQuery {
    let text = &turn.request.natural_language_text;
    let lc = text.to_ascii_lowercase();
    let (fields, sort) = if dataset == DatasetKind::Spans && lc.contains("token") {
        (vec![TOKEN_EQUATION.to_string()], format!("-{TOKEN_EQUATION}"))
    } else if lc.contains("how many") || words(text).iter().any(|w| w == "count") {
        (vec!["count()".to_string()], "-count()".to_string())
    } else if dataset == DatasetKind::Issues {
        (dataset.default_fields(), "-lastSeen".to_string())
    } else if lc.contains("slow") && dataset == DatasetKind::Spans {
        (dataset.default_fields(), "-span.duration".to_string())
    } else {
        (dataset.default_fields(), dataset.default_sort().to_string())
    };

    CandidateQuery {
        dataset: dataset.as_str().to_string(),
        query: build_query(text, dataset, terms, turn.history),
        fields,
        sort,
        time_range: time_range(text, turn.now),
        equations: Vec::new(),
    }
}

#[async_trait]
impl QueryModel for HeuristicModel {
    async fn respond(&self, turn: &ModelTurn<'_>) -> Result<String, LLMError> {
        let text = &turn.request.natural_language_text;
        let dataset = choose_dataset(text, turn.request.dataset_hint);
        let terms = field_terms(text, dataset);

        let mut calls: Vec<ToolCallRequest> = Vec::new();
        if mentions_requester(text) {
            let call = ToolCallRequest::new(IDENTITY_RESOLVER, json!({}));
            if !already_called(turn.history, &call) {
                calls.push(call);
            }
        }
        for term in &terms {
            let call = discovery_call_for(term, dataset);
            if !already_called(turn.history, &call) && !calls.contains(&call) {
                calls.push(call);
            }
        }

        let response = if calls.is_empty() {
            json!({ "final_query": final_query(turn, dataset, &terms) })
        } else {
            json!({ "tool_calls": calls })
        };
        serde_json::to_string(&response).map_err(|e| LLMError::InvalidResponse(e.to_string()))
    }

    fn name(&self) -> String {
        "heuristic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_person_detection_ignores_imperatives() {
        assert!(!mentions_requester("Show me all errors from today"));
        assert!(!mentions_requester("give me the slowest spans"));
        assert!(mentions_requester("Show me my errors from last week"));
        assert!(mentions_requester("issues assigned to me"));
        assert!(mentions_requester("Me: errors in checkout"));
    }

    #[test]
    fn dataset_follows_keywords_unless_hinted() {
        assert_eq!(choose_dataset("unresolved issues", None), DatasetKind::Issues);
        assert_eq!(choose_dataset("logs from the worker", None), DatasetKind::Logs);
        assert_eq!(choose_dataset("slow API calls over 5s", None), DatasetKind::Spans);
        assert_eq!(choose_dataset("login failures", None), DatasetKind::Errors);
        assert_eq!(
            choose_dataset("unresolved issues", Some(DatasetKind::Errors)),
            DatasetKind::Errors
        );
    }

    #[test]
    fn time_phrases_map_to_ranges() {
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 15, 30, 0).unwrap();
        assert_eq!(time_range("errors from today", now), Some(TimeRange::stats_period("24h")));
        assert_eq!(time_range("my errors from last week", now), Some(TimeRange::stats_period("7d")));
        assert_eq!(time_range("in the last 3 days", now), Some(TimeRange::stats_period("3d")));
        assert_eq!(time_range("past 15 minutes", now), Some(TimeRange::stats_period("15m")));
        assert_eq!(
            time_range("tokens yesterday", now),
            Some(TimeRange::absolute("2026-05-09T00:00:00Z", "2026-05-10T00:00:00Z"))
        );
        assert_eq!(time_range("all errors", now), None);
    }

    #[test]
    fn common_fields_and_values_are_not_discovery_terms() {
        let terms = field_terms("spans where span.op is http.client and checkout.step is payment", DatasetKind::Spans);
        assert_eq!(
            terms,
            vec![FieldTerm {
                name: "checkout.step".to_string(),
                value: Some("payment".to_string()),
            }]
        );
    }

    #[test]
    fn semantic_fields_use_the_namespace_tool() {
        let term = FieldTerm {
            name: "gen_ai.request.model".to_string(),
            value: None,
        };
        let call = discovery_call_for(&term, DatasetKind::Spans);
        assert_eq!(call.name, SEMANTIC_NAMESPACE);
        assert_eq!(call.args["namespace"], "gen_ai");

        let custom = FieldTerm {
            name: "customer.tier".to_string(),
            value: None,
        };
        assert_eq!(discovery_call_for(&custom, DatasetKind::Errors).name, DATASET_ATTRIBUTES);
        assert_eq!(discovery_call_for(&custom, DatasetKind::Issues).name, ISSUE_FIELD_CATALOG);
    }
}

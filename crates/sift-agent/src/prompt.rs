//! Prompt rendering for the tool loop.
//!
//! The model sees a fixed system instruction plus one user message per turn
//! carrying the request, the dataset catalogs, the tool schemas and a bounded
//! transcript of earlier tool calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sift_discovery::ToolSpec;
use sift_query::query::structured_query_json_schema;
use sift_query::DatasetKind;
use std::collections::HashSet;

use crate::TranslationRequest;

pub const SYSTEM_PROMPT: &str = r#"You translate a natural-language request into one structured search query by calling discovery tools against a search backend.

You MUST return a single JSON object with one of these shapes:
- { "tool_call": { "name": "<tool>", "args": { ... } } }
- { "tool_calls": [{ "name": "<tool>", "args": { ... } }, ...] }
- { "final_query": { "dataset": "...", "query": "...", "fields": [...], "sort": "...", "timeRange": { ... }, "equations": [...] } }
- { "error": "<why the request cannot be translated>" }

Examples:
- {"tool_call":{"name":"identityResolver","args":{}}}
- {"tool_calls":[{"name":"datasetAttributes","args":{"dataset":"errors"}}]}
- {"final_query":{"dataset":"errors","query":"","fields":["title","project","timestamp"],"sort":"-timestamp","timeRange":{"statsPeriod":"24h"}}}
- {"final_query":{"dataset":"spans","query":"span.op:http.client span.duration:>5s","fields":["span.description","span.duration","timestamp"],"sort":"-span.duration","timeRange":{"statsPeriod":"7d"}}}
- {"final_query":{"dataset":"spans","query":"","fields":["equation|sum(gen_ai.usage.input_tokens) + sum(gen_ai.usage.output_tokens)"],"sort":"-equation|sum(gen_ai.usage.input_tokens) + sum(gen_ai.usage.output_tokens)","timeRange":{"statsPeriod":"24h"}}}

Rules:
- Use common fields listed for the dataset directly. Do NOT call a tool for information you already have.
- If the request refers to the requester ("me", "my", "mine"), call `identityResolver` first and filter on the returned email (`user.email:` for events, `assigned:` for issues). Never invent an identity.
- If the request names a field that is not a common field, call `datasetAttributes` for that dataset before using it. For documented conventions (`gen_ai.*`, `db.*`, `http.*`, ...) call `semanticNamespace` instead. For issue searches use `issueFieldCatalog`.
- Tool results in the transcript may be truncated. A result with an `error` key means the lookup failed; retry with different arguments or continue without it.
- `query` is ONE filter expression (`key:value`, `!key:value`, `key:>5s`, `has:key`, `AND`/`OR`). Use "" for no filter.
- `sort` is one column, prefixed with `-` for descending. An aggregate or equation used in `sort` must also appear in `fields`.
- Equations are arithmetic over aggregate calls only, prefixed `equation|`, e.g. `equation|count_if(error.handled,equals,false) / count()`.
- `timeRange` is either {"statsPeriod": "24h"} (units s, m, h, d, w) or {"start": RFC3339, "end": RFC3339}. Omit it when the request gives no time.
- Use exactly the keys of the final query schema; no extra keys.

Return JSON only (no markdown)."#;

/// Bounds applied to the transcript before it is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptLimits {
    pub max_history_items: usize,
    pub max_depth: usize,
    pub max_string_chars: usize,
    pub max_array_len: usize,
    pub max_object_keys: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_history_items: 16,
            max_depth: 6,
            max_string_chars: 400,
            max_array_len: 40,
            max_object_keys: 24,
        }
    }
}

/// One tool call and what came back, as the model sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub tool: String,
    pub args: Value,
    pub result: Value,
}

impl HistoryItem {
    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }
}

/// Extra instruction appended to the next turn only.
#[derive(Debug, Clone, PartialEq)]
pub enum Reminder {
    MalformedOutput { error: String, preview: String },
    Violations { candidate: Value, violations: Vec<String> },
}

pub fn truncate_for_prompt(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}…")
}

fn compact_json(v: &Value, depth: usize, limits: PromptLimits) -> Value {
    match v {
        Value::Null | Value::Bool(_) | Value::Number(_) => v.clone(),
        Value::String(s) => Value::String(truncate_for_prompt(s, limits.max_string_chars)),
        Value::Array(xs) => {
            if depth >= limits.max_depth {
                return Value::Array(vec![Value::String("…".to_string())]);
            }
            let mut out: Vec<Value> = xs
                .iter()
                .take(limits.max_array_len)
                .map(|x| compact_json(x, depth + 1, limits))
                .collect();
            if xs.len() > limits.max_array_len {
                out.push(Value::String("…".to_string()));
            }
            Value::Array(out)
        }
        Value::Object(m) => {
            if depth >= limits.max_depth {
                let mut out = Map::new();
                out.insert("_truncated".to_string(), Value::Bool(true));
                return Value::Object(out);
            }

            const PRIORITY_KEYS: &[&str] = &[
                "error", "email", "id", "username", "name", "dataset", "namespace", "fields",
                "entries", "truncated",
            ];

            let mut out = Map::new();
            let mut kept: HashSet<&str> = HashSet::new();
            for &k in PRIORITY_KEYS {
                if out.len() >= limits.max_object_keys {
                    break;
                }
                if let Some(v) = m.get(k) {
                    out.insert(k.to_string(), compact_json(v, depth + 1, limits));
                    kept.insert(k);
                }
            }
            for (k, v) in m {
                if out.len() >= limits.max_object_keys {
                    break;
                }
                if !kept.contains(k.as_str()) {
                    out.insert(k.clone(), compact_json(v, depth + 1, limits));
                }
            }

            let omitted = m.len().saturating_sub(out.len());
            if omitted > 0 {
                out.insert(
                    "_omitted_keys".to_string(),
                    Value::Number(Number::from(omitted as u64)),
                );
            }
            Value::Object(out)
        }
    }
}

/// Most recent items only, with long strings and arrays cut down.
pub fn compact_history(history: &[HistoryItem], limits: PromptLimits) -> Vec<HistoryItem> {
    let start = history.len().saturating_sub(limits.max_history_items.max(1));
    history[start..]
        .iter()
        .map(|item| HistoryItem {
            tool: item.tool.clone(),
            args: compact_json(&item.args, 0, limits),
            result: compact_json(&item.result, 0, limits),
        })
        .collect()
}

fn render_dataset_catalog() -> String {
    DatasetKind::ALL
        .iter()
        .map(|ds| {
            format!(
                "- {ds}: common fields: {}; aggregates: {}; default sort: {}",
                ds.common_fields().join(", "),
                ds.aggregate_functions().join(", "),
                ds.default_sort()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_reminder(reminder: &Reminder) -> String {
    match reminder {
        Reminder::MalformedOutput { error, preview } => format!(
            r#"
---
Your previous response was NOT a valid response object and could not be used ({error}).
Return ONLY a valid JSON object with exactly one of the keys `tool_call`, `tool_calls`, `final_query`, `error`.
`final_query` must match the final query schema exactly.
Do NOT include markdown or any non-JSON text.

Invalid response (truncated):
{preview}
"#
        ),
        Reminder::Violations {
            candidate,
            violations,
        } => {
            let list = violations
                .iter()
                .map(|v| format!("- {v}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                r#"
---
Your previous final_query failed validation:
{list}

Previous final_query (after automatic fixes):
{candidate}

Return a corrected final_query. If a field is unknown, call the matching discovery tool first or drop the field.
"#,
                candidate = serde_json::to_string(candidate).unwrap_or_default()
            )
        }
    }
}

pub struct UserPromptParts<'a> {
    pub request: &'a TranslationRequest,
    pub tools: &'a [ToolSpec],
    pub history: &'a [HistoryItem],
    pub reminder: Option<&'a Reminder>,
    pub step: usize,
    pub max_steps: usize,
    pub now: DateTime<Utc>,
}

pub fn render_user_prompt(parts: &UserPromptParts<'_>) -> String {
    let request = parts.request;
    let scope = match &request.project_scope {
        Some(project) => format!("organization `{}`, project `{project}`", request.organization_scope),
        None => format!("organization `{}`", request.organization_scope),
    };
    let hint = request
        .dataset_hint
        .map(|d| format!("Dataset hint: {d} (use it unless the request clearly needs another dataset)\n"))
        .unwrap_or_default();
    let reminder = parts.reminder.map(render_reminder).unwrap_or_default();

    format!(
        r#"Request:
{text}

Scope: {scope}
Current time (UTC): {now}
{hint}Step {step} of {max_steps}.

Datasets (common fields need no discovery call):
{catalog}

Final query schema:
{schema}

Available tools (name → args schema):
{tools_json}

Transcript (recent tool calls and results; may be truncated):
{transcript_json}
{reminder}
Return ONLY the JSON object."#,
        text = request.natural_language_text.trim(),
        now = parts.now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        step = parts.step,
        max_steps = parts.max_steps,
        catalog = render_dataset_catalog(),
        schema = structured_query_json_schema(),
        tools_json = serde_json::to_string(parts.tools).unwrap_or_else(|_| "[]".to_string()),
        transcript_json = serde_json::to_string(parts.history).unwrap_or_else(|_| "[]".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn history_keeps_the_most_recent_items() {
        let history: Vec<HistoryItem> = (0..5)
            .map(|i| HistoryItem {
                tool: format!("t{i}"),
                args: json!({}),
                result: json!({}),
            })
            .collect();
        let limits = PromptLimits {
            max_history_items: 2,
            ..PromptLimits::default()
        };
        let compact = compact_history(&history, limits);
        assert_eq!(compact.len(), 2);
        assert_eq!(compact[0].tool, "t3");
        assert_eq!(compact[1].tool, "t4");
    }

    #[test]
    fn long_strings_and_arrays_are_cut() {
        let limits = PromptLimits {
            max_string_chars: 4,
            max_array_len: 2,
            ..PromptLimits::default()
        };
        let v = compact_json(&json!({ "name": "abcdefgh", "fields": [1, 2, 3] }), 0, limits);
        assert_eq!(v["name"], "abcd…");
        assert_eq!(v["fields"], json!([1, 2, "…"]));
    }

    #[test]
    fn user_prompt_carries_request_tools_and_reminder() {
        let request = TranslationRequest::new("show me my errors", "acme");
        let tools = sift_discovery::tool_specs();
        let reminder = Reminder::Violations {
            candidate: json!({ "dataset": "errors" }),
            violations: vec!["filter references unknown field `foo`".to_string()],
        };
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        let prompt = render_user_prompt(&UserPromptParts {
            request: &request,
            tools: &tools,
            history: &[],
            reminder: Some(&reminder),
            step: 2,
            max_steps: 8,
            now,
        });
        assert!(prompt.contains("show me my errors"));
        assert!(prompt.contains("identityResolver"));
        assert!(prompt.contains("2026-03-04T10:00:00Z"));
        assert!(prompt.contains("unknown field `foo`"));
        assert!(prompt.contains("Step 2 of 8"));
    }
}

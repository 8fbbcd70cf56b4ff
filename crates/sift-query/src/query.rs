//! The structured query: output contract of a translation run.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::dataset::DatasetKind;
use crate::QueryError;

/// Either a relative period (`24h`, `7d`) or an absolute RFC 3339 window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, deny_unknown_fields)]
pub enum TimeRange {
    Relative {
        #[serde(rename = "statsPeriod")]
        stats_period: String,
    },
    Absolute {
        start: String,
        end: String,
    },
}

impl TimeRange {
    pub fn stats_period(period: impl Into<String>) -> Self {
        TimeRange::Relative {
            stats_period: period.into(),
        }
    }

    pub fn absolute(start: impl Into<String>, end: impl Into<String>) -> Self {
        TimeRange::Absolute {
            start: start.into(),
            end: end.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    pub dataset: DatasetKind,
    /// A single filter expression; empty means "no filter".
    pub query: String,
    pub fields: Vec<String>,
    pub sort: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equations: Vec<String>,
}

impl StructuredQuery {
    /// The sort key without its direction marker.
    pub fn sort_key(&self) -> &str {
        strip_sort_direction(&self.sort)
    }

    pub fn sort_descending(&self) -> bool {
        self.sort.trim_start().starts_with('-')
    }

    /// True when `column` is an output field or a declared equation.
    pub fn has_column(&self, column: &str) -> bool {
        self.fields.iter().any(|f| f == column) || self.equations.iter().any(|e| e == column)
    }
}

pub fn strip_sort_direction(sort: &str) -> &str {
    let s = sort.trim();
    s.strip_prefix('-').unwrap_or(s).trim_start()
}

/// The loosely-typed decode of a model's final answer.
///
/// Keys must match the structured query shape exactly; `dataset` stays a
/// string so an unknown dataset reaches the validator as a reportable
/// violation instead of disappearing into a parse error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CandidateQuery {
    pub dataset: String,
    pub query: String,
    pub fields: Vec<String>,
    pub sort: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equations: Vec<String>,
}

impl CandidateQuery {
    pub fn from_value(value: serde_json::Value) -> Result<Self, QueryError> {
        serde_json::from_value(value).map_err(|e| QueryError::Shape(e.to_string()))
    }
}

impl From<&StructuredQuery> for CandidateQuery {
    fn from(q: &StructuredQuery) -> Self {
        Self {
            dataset: q.dataset.as_str().to_string(),
            query: q.query.clone(),
            fields: q.fields.clone(),
            sort: q.sort.clone(),
            time_range: q.time_range.clone(),
            equations: q.equations.clone(),
        }
    }
}

/// JSON schema for the `final_query` object, embedded in model prompts.
pub fn structured_query_json_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "dataset": { "type": "string", "enum": ["errors", "spans", "logs", "issues"] },
            "query": {
                "type": "string",
                "description": "Single filter expression, e.g. `level:error span.duration:>5s`. Empty string means no filter."
            },
            "fields": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Output columns: fields, aggregates like `count()`, or `equation|...` columns."
            },
            "sort": {
                "type": "string",
                "description": "Column to sort by, prefixed with `-` for descending. Aggregates and equations used here must also appear in `fields`."
            },
            "timeRange": {
                "oneOf": [
                    {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": { "statsPeriod": { "type": "string", "pattern": "^[0-9]+[smhdw]$" } },
                        "required": ["statsPeriod"]
                    },
                    {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "start": { "type": "string", "format": "date-time" },
                            "end": { "type": "string", "format": "date-time" }
                        },
                        "required": ["start", "end"]
                    }
                ]
            },
            "equations": {
                "type": "array",
                "items": { "type": "string", "pattern": "^equation\\|" },
                "description": "Arithmetic over aggregate calls only, each prefixed `equation|`."
            }
        },
        "required": ["dataset", "query", "fields", "sort"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_range_variants_decode_by_shape() {
        let rel: TimeRange = serde_json::from_str(r#"{"statsPeriod":"7d"}"#).unwrap();
        assert_eq!(rel, TimeRange::stats_period("7d"));
        let abs: TimeRange =
            serde_json::from_str(r#"{"start":"2026-01-01T00:00:00Z","end":"2026-01-02T00:00:00Z"}"#)
                .unwrap();
        assert!(matches!(abs, TimeRange::Absolute { .. }));
        assert!(serde_json::from_str::<TimeRange>(r#"{"period":"7d"}"#).is_err());
    }

    #[test]
    fn candidate_rejects_extra_and_missing_keys() {
        let extra = json!({
            "dataset": "errors", "query": "", "fields": [], "sort": "", "limit": 10
        });
        assert!(matches!(
            CandidateQuery::from_value(extra),
            Err(QueryError::Shape(_))
        ));
        let missing = json!({ "dataset": "errors", "query": "" });
        assert!(CandidateQuery::from_value(missing).is_err());
    }

    #[test]
    fn candidate_keeps_unknown_dataset_text() {
        let c = CandidateQuery::from_value(json!({
            "dataset": "transactions", "query": "", "fields": [], "sort": "-timestamp"
        }))
        .unwrap();
        assert_eq!(c.dataset, "transactions");
    }

    #[test]
    fn structured_query_serializes_camel_case_and_omits_empty() {
        let q = StructuredQuery {
            dataset: DatasetKind::Errors,
            query: String::new(),
            fields: vec!["title".into()],
            sort: "-timestamp".into(),
            time_range: Some(TimeRange::stats_period("24h")),
            equations: Vec::new(),
        };
        let v = serde_json::to_value(&q).unwrap();
        assert_eq!(v["timeRange"]["statsPeriod"], "24h");
        assert!(v.get("equations").is_none());
        assert_eq!(q.sort_key(), "timestamp");
        assert!(q.sort_descending());
    }
}

//! Datasets and their built-in catalogs.
//!
//! The built-in catalogs are the "common" fields a model may use without any
//! discovery call. Anything outside them (custom tags, vendor attributes,
//! semantic-convention fields) must come from a discovery adapter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Errors,
    Spans,
    Logs,
    Issues,
}

const ERRORS_FIELDS: &[&str] = &[
    "id",
    "issue",
    "issue.id",
    "title",
    "project",
    "project.id",
    "timestamp",
    "level",
    "message",
    "error.type",
    "error.value",
    "error.handled",
    "error.unhandled",
    "error.mechanism",
    "culprit",
    "environment",
    "release",
    "dist",
    "transaction",
    "platform",
    "event.type",
    "user.id",
    "user.email",
    "user.username",
    "user.ip",
    "user.display",
    "trace",
    "url",
    "http.method",
    "http.url",
    "http.status_code",
    "browser.name",
    "os.name",
    "device.family",
    "sdk.name",
    "sdk.version",
    "location",
    "stack.filename",
    "stack.function",
];

const SPANS_FIELDS: &[&str] = &[
    "id",
    "span.op",
    "span.description",
    "span.duration",
    "span.self_time",
    "span.status",
    "span.status_code",
    "span.domain",
    "span.action",
    "span.module",
    "span.system",
    "span.category",
    "is_transaction",
    "transaction",
    "transaction.op",
    "transaction.method",
    "timestamp",
    "project",
    "project.id",
    "trace",
    "parent_span",
    "environment",
    "release",
    "user.id",
    "user.email",
    "user.username",
    "http.method",
    "http.url",
    "http.response_status_code",
    "gen_ai.usage.input_tokens",
    "gen_ai.usage.output_tokens",
    "gen_ai.request.model",
    "sdk.name",
];

const LOGS_FIELDS: &[&str] = &[
    "id",
    "timestamp",
    "project",
    "project.id",
    "message",
    "severity",
    "severity_number",
    "severity_text",
    "trace",
    "environment",
    "release",
    "logger.name",
    "user.id",
    "user.email",
    "sdk.name",
];

const ISSUES_FIELDS: &[&str] = &[
    "issue",
    "issue.id",
    "issue.category",
    "issue.priority",
    "title",
    "project",
    "is",
    "assigned",
    "assignedTo",
    "assigned_or_suggested",
    "bookmarks",
    "firstSeen",
    "lastSeen",
    "firstRelease",
    "level",
    "message",
    "times_seen",
    "status",
    "error.type",
    "error.handled",
    "environment",
    "release",
    "platform",
    "user.id",
    "user.email",
    "timestamp",
];

const EVENT_AGGREGATES: &[&str] = &[
    "count",
    "count_unique",
    "count_if",
    "last_seen",
    "first_seen",
    "epm",
    "eps",
];

const SPAN_AGGREGATES: &[&str] = &[
    "count",
    "count_unique",
    "count_if",
    "avg",
    "sum",
    "min",
    "max",
    "p50",
    "p75",
    "p90",
    "p95",
    "p99",
    "p100",
    "epm",
    "eps",
    "failure_rate",
];

const LOG_AGGREGATES: &[&str] = &[
    "count",
    "count_unique",
    "count_if",
    "avg",
    "sum",
    "min",
    "max",
    "p50",
    "p75",
    "p90",
    "p95",
    "p99",
    "p100",
    "epm",
    "eps",
];

const ISSUE_AGGREGATES: &[&str] = &["count", "count_unique", "last_seen", "first_seen"];

const ERRORS_DEFAULT_FIELDS: &[&str] = &[
    "issue",
    "title",
    "project",
    "timestamp",
    "level",
    "message",
    "error.type",
    "culprit",
];

const SPANS_DEFAULT_FIELDS: &[&str] = &[
    "id",
    "span.op",
    "span.description",
    "span.duration",
    "transaction",
    "timestamp",
    "project",
    "trace",
];

const LOGS_DEFAULT_FIELDS: &[&str] = &["timestamp", "project", "message", "severity", "trace"];

const ISSUES_DEFAULT_FIELDS: &[&str] = &["issue", "title", "project", "lastSeen", "level"];

impl DatasetKind {
    pub const ALL: [DatasetKind; 4] = [
        DatasetKind::Errors,
        DatasetKind::Spans,
        DatasetKind::Logs,
        DatasetKind::Issues,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetKind::Errors => "errors",
            DatasetKind::Spans => "spans",
            DatasetKind::Logs => "logs",
            DatasetKind::Issues => "issues",
        }
    }

    /// Event datasets list individual events and default to newest-first.
    pub fn is_event_dataset(self) -> bool {
        !matches!(self, DatasetKind::Issues)
    }

    /// Fields usable without a discovery call.
    pub fn common_fields(self) -> &'static [&'static str] {
        match self {
            DatasetKind::Errors => ERRORS_FIELDS,
            DatasetKind::Spans => SPANS_FIELDS,
            DatasetKind::Logs => LOGS_FIELDS,
            DatasetKind::Issues => ISSUES_FIELDS,
        }
    }

    pub fn aggregate_functions(self) -> &'static [&'static str] {
        match self {
            DatasetKind::Errors => EVENT_AGGREGATES,
            DatasetKind::Spans => SPAN_AGGREGATES,
            DatasetKind::Logs => LOG_AGGREGATES,
            DatasetKind::Issues => ISSUE_AGGREGATES,
        }
    }

    pub fn supports_aggregate(self, function: &str) -> bool {
        self.aggregate_functions().contains(&function)
    }

    pub fn is_common_field(self, name: &str) -> bool {
        self.common_fields().contains(&name)
    }

    /// Output columns used when the candidate leaves `fields` empty.
    pub fn default_fields(self) -> Vec<String> {
        let fields = match self {
            DatasetKind::Errors => ERRORS_DEFAULT_FIELDS,
            DatasetKind::Spans => SPANS_DEFAULT_FIELDS,
            DatasetKind::Logs => LOGS_DEFAULT_FIELDS,
            DatasetKind::Issues => ISSUES_DEFAULT_FIELDS,
        };
        fields.iter().map(|f| f.to_string()).collect()
    }

    /// Canonical sort for a non-aggregate listing of this dataset.
    pub fn default_sort(self) -> &'static str {
        match self {
            DatasetKind::Issues => "-count()",
            _ => "-timestamp",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "errors" => Ok(DatasetKind::Errors),
            "spans" => Ok(DatasetKind::Spans),
            "logs" => Ok(DatasetKind::Logs),
            "issues" => Ok(DatasetKind::Issues),
            _ => Err(QueryError::UnknownDataset(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_aggregates_are_span_aggregates_without_failure_rate() {
        let expected: Vec<&str> = SPAN_AGGREGATES
            .iter()
            .copied()
            .filter(|a| *a != "failure_rate")
            .collect();
        assert_eq!(LOG_AGGREGATES, expected.as_slice());
        assert!(DatasetKind::Logs.supports_aggregate("p100"));
        assert!(!DatasetKind::Logs.supports_aggregate("failure_rate"));
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Spans".parse::<DatasetKind>().unwrap(), DatasetKind::Spans);
        assert!(matches!(
            "transactions".parse::<DatasetKind>(),
            Err(QueryError::UnknownDataset(_))
        ));
    }

    #[test]
    fn default_sorts_match_listing_kind() {
        for ds in DatasetKind::ALL {
            if ds.is_event_dataset() {
                assert_eq!(ds.default_sort(), "-timestamp");
                assert!(ds.is_common_field("timestamp"));
            }
        }
        assert_eq!(DatasetKind::Issues.default_sort(), "-count()");
        assert!(DatasetKind::Issues.supports_aggregate("count"));
    }

    #[test]
    fn span_aggregates_are_a_superset_of_issue_aggregates() {
        for f in DatasetKind::Issues.aggregate_functions() {
            assert!(DatasetKind::Spans.supports_aggregate(f), "{f}");
        }
        assert!(!DatasetKind::Errors.supports_aggregate("p95"));
    }

    #[test]
    fn serializes_lowercase() {
        let v = serde_json::to_value(DatasetKind::Logs).unwrap();
        assert_eq!(v, serde_json::json!("logs"));
    }
}

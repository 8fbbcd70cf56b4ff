//! Ordered record of every discovery call made during one run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallRecord {
    pub fn ok(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            error: None,
        }
    }

    pub fn failed(tool_name: impl Into<String>, arguments: Value, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Append-only: records are never rewritten or removed.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    records: Vec<ToolCallRecord>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: ToolCallRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[ToolCallRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ToolCallRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count(&self, tool_name: &str) -> usize {
        self.records.iter().filter(|r| r.tool_name == tool_name).count()
    }

    /// A previous call with the same tool and arguments, successful or not.
    pub fn contains(&self, tool_name: &str, arguments: &Value) -> bool {
        self.records
            .iter()
            .any(|r| r.tool_name == tool_name && &r.arguments == arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_keep_invocation_order_and_errors() {
        let mut trace = TraceRecorder::new();
        trace.record(ToolCallRecord::ok("identityResolver", json!({})));
        trace.record(ToolCallRecord::failed(
            "datasetAttributes",
            json!({ "dataset": "spans" }),
            "backend returned HTTP 503",
        ));
        trace.record(ToolCallRecord::ok("datasetAttributes", json!({ "dataset": "spans" })));

        assert_eq!(trace.len(), 3);
        assert_eq!(trace.count("datasetAttributes"), 2);
        assert!(trace.records()[1].is_error());
        assert!(trace.contains("datasetAttributes", &json!({ "dataset": "spans" })));
        assert!(!trace.contains("datasetAttributes", &json!({ "dataset": "logs" })));
    }

    #[test]
    fn record_json_uses_camel_case_and_omits_missing_error() {
        let v = serde_json::to_value(ToolCallRecord::ok("identityResolver", json!({}))).unwrap();
        assert_eq!(v, json!({ "toolName": "identityResolver", "arguments": {} }));
        let v = serde_json::to_value(ToolCallRecord::failed("x", json!(null), "boom")).unwrap();
        assert_eq!(v["error"], "boom");
    }
}

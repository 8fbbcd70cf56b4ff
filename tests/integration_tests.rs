//! End-to-end translation runs: heuristic model, demo fixture backend, real
//! orchestrator, discovery tools and validator.

use chrono::{TimeZone, Utc};
use sift_agent::{AgentConfig, AgentRunResult, HeuristicModel, Orchestrator, TranslationRequest};
use sift_discovery::tools::{DATASET_ATTRIBUTES, IDENTITY_RESOLVER, SEMANTIC_NAMESPACE};
use sift_discovery::{FixtureBackend, SearchBackend};
use sift_query::equation::{parse_equation, strip_equation_prefix};
use sift_query::{DatasetKind, TimeRange};
use std::sync::Arc;

fn orchestrator() -> Orchestrator {
    Orchestrator::new(Arc::new(HeuristicModel::new()), AgentConfig::default())
        .with_clock(Utc.with_ymd_and_hms(2026, 3, 18, 9, 30, 0).unwrap())
}

fn demo_backend() -> Arc<dyn SearchBackend> {
    Arc::new(FixtureBackend::demo().unwrap())
}

async fn translate(text: &str) -> AgentRunResult {
    orchestrator()
        .translate_with_backend(&TranslationRequest::new(text, "demo"), demo_backend())
        .await
        .unwrap()
}

fn tool_names(result: &AgentRunResult) -> Vec<&str> {
    result.tool_calls.iter().map(|r| r.tool_name.as_str()).collect()
}

#[tokio::test]
async fn common_fields_need_no_discovery() {
    let out = translate("Show me all errors from today").await;

    assert!(out.tool_calls.is_empty(), "trace: {:?}", out.tool_calls);
    assert_eq!(out.result.dataset, DatasetKind::Errors);
    assert_eq!(out.result.query, "");
    assert_eq!(out.result.sort, "-timestamp");
    assert_eq!(out.result.time_range, Some(TimeRange::stats_period("24h")));
    assert!(out.is_clean());
}

#[tokio::test]
async fn first_person_requests_resolve_identity_first() {
    let out = translate("Show me my errors from last week").await;

    assert_eq!(tool_names(&out), [IDENTITY_RESOLVER]);
    assert!(out.result.query.contains("user.email:jane.doe@example.com"));
    assert_eq!(out.result.time_range, Some(TimeRange::stats_period("7d")));
    assert!(out.is_clean());
}

#[tokio::test]
async fn token_totals_become_an_equation_column() {
    let out = translate("How many total tokens did we consume yesterday").await;

    assert!(out.tool_calls.is_empty());
    assert_eq!(out.result.dataset, DatasetKind::Spans);
    let equations: Vec<&String> = out
        .result
        .fields
        .iter()
        .filter(|f| f.starts_with("equation|"))
        .collect();
    assert_eq!(equations.len(), 1);
    let body = strip_equation_prefix(equations[0]).unwrap();
    let parsed = parse_equation(body).unwrap();
    assert_eq!(parsed.aggregates().len(), 2);
    assert!(parsed.aggregates().iter().all(|a| a.function == "sum"));
    assert_eq!(out.result.sort, format!("-{}", equations[0]));
    assert_eq!(
        out.result.time_range,
        Some(TimeRange::absolute("2026-03-17T00:00:00Z", "2026-03-18T00:00:00Z"))
    );
}

#[tokio::test]
async fn custom_fields_are_discovered_before_use() {
    let out = translate("Show me errors where customer.tier is enterprise").await;

    assert_eq!(tool_names(&out), [DATASET_ATTRIBUTES]);
    assert_eq!(out.tool_calls[0].arguments["dataset"], "errors");
    assert!(out.result.query.contains("customer.tier:enterprise"));
    assert!(out.is_clean());
}

#[tokio::test]
async fn convention_fields_use_the_semantic_namespace_tool() {
    let out = translate("spans where db.system is postgresql in the last 3 days").await;

    assert_eq!(tool_names(&out), [SEMANTIC_NAMESPACE]);
    assert_eq!(out.tool_calls[0].arguments["namespace"], "db");
    assert!(out.result.query.contains("db.system:postgresql"));
    assert_eq!(out.result.time_range, Some(TimeRange::stats_period("3d")));
    assert!(out.is_clean(), "violations: {:?}", out.violations);
}

#[tokio::test]
async fn slow_api_calls_filter_on_duration() {
    let out = translate("slow API calls over 5s last week").await;

    assert_eq!(out.result.dataset, DatasetKind::Spans);
    assert!(out.result.query.contains("span.op:http.client"));
    assert!(out.result.query.contains("span.duration:>5s"));
    assert_eq!(out.result.sort, "-span.duration");
    assert!(out.tool_calls.is_empty());
}

#[tokio::test]
async fn my_issues_filter_on_assignee() {
    let out = translate("my unresolved issues").await;

    assert_eq!(out.result.dataset, DatasetKind::Issues);
    assert_eq!(tool_names(&out), [IDENTITY_RESOLVER]);
    assert!(out.result.query.contains("assigned:jane.doe@example.com"));
    assert!(out.result.query.contains("is:unresolved"));
}

#[tokio::test]
async fn failed_discovery_is_traced_and_the_run_still_answers() {
    let backend: Arc<dyn SearchBackend> =
        Arc::new(FixtureBackend::demo().unwrap().failing(DATASET_ATTRIBUTES));
    let out = orchestrator()
        .translate_with_backend(
            &TranslationRequest::new("errors where customer.tier is enterprise", "demo"),
            backend,
        )
        .await
        .unwrap();

    assert_eq!(tool_names(&out), [DATASET_ATTRIBUTES]);
    assert!(out.tool_calls[0].error.is_some());
    // The field could not be discovered, so the last-resort answer carries a violation.
    assert!(out.violations.iter().any(|v| v.contains("customer.tier")));
}

#[tokio::test]
async fn validation_is_a_fixed_point_of_every_result() {
    for text in [
        "Show me all errors from today",
        "How many total tokens did we consume yesterday",
        "logs from the worker in the past 15 minutes",
        "how many errors in the last 2 hours",
    ] {
        let out = translate(text).await;
        let candidate = sift_query::CandidateQuery::from(&out.result);
        let catalog = sift_query::FieldCatalog::new();
        let again = sift_query::validate(&candidate, &sift_query::ValidationContext::new(&catalog));
        assert_eq!(again.query, out.result, "{text}");
    }
}

#[tokio::test]
async fn run_result_serializes_with_camel_case_trace() {
    let out = translate("Show me my errors from last week").await;
    let v = serde_json::to_value(&out).unwrap();
    assert_eq!(v["toolCalls"][0]["toolName"], IDENTITY_RESOLVER);
    assert_eq!(v["result"]["timeRange"]["statsPeriod"], "7d");
}

#[tokio::test]
async fn fixture_files_define_the_organization() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.json");
    std::fs::write(
        &path,
        serde_json::json!({
            "identity": { "id": "7", "email": "ops@acme.test" },
            "attributes": {
                "logs": [ { "name": "tenant.id", "kind": "filterable", "exampleValues": ["t-1"] } ]
            }
        })
        .to_string(),
    )
    .unwrap();

    let backend: Arc<dyn SearchBackend> = Arc::new(FixtureBackend::from_path(&path).unwrap());
    let out = orchestrator()
        .translate_with_backend(
            &TranslationRequest::new("logs where tenant.id is t-42 from today", "acme")
                .with_project("backend"),
            backend,
        )
        .await
        .unwrap();

    assert_eq!(out.result.dataset, DatasetKind::Logs);
    assert_eq!(tool_names(&out), [DATASET_ATTRIBUTES]);
    assert!(out.result.query.contains("tenant.id:t-42"));
    assert!(out.is_clean());
}

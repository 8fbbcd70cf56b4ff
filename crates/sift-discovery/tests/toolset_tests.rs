use serde_json::json;
use sift_discovery::{DiscoveryCall, DiscoveryToolset, FixtureBackend, SearchScope, ToolOutput};
use sift_query::catalog::FieldResolution;
use sift_query::{DatasetKind, FieldCatalog};
use std::sync::Arc;

fn demo_toolset() -> DiscoveryToolset {
    let backend = FixtureBackend::demo().expect("demo fixture");
    DiscoveryToolset::new(Arc::new(backend), SearchScope::new("demo"))
}

#[tokio::test]
async fn decoded_calls_feed_the_field_catalog() {
    let tools = demo_toolset();
    let mut catalog = FieldCatalog::new();

    let call = DiscoveryCall::decode("datasetAttributes", &json!({ "dataset": "errors" })).unwrap();
    let out = tools.invoke(&call).await.unwrap();
    out.fold_into(&mut catalog);

    assert_eq!(
        catalog.resolve(DatasetKind::Errors, "customer.tier"),
        FieldResolution::Known
    );
    // Not listed, but errors attributes were looked up.
    assert_eq!(
        catalog.resolve(DatasetKind::Errors, "payment.provider"),
        FieldResolution::Covered
    );
    assert_eq!(
        catalog.resolve(DatasetKind::Spans, "payment.provider"),
        FieldResolution::Unknown
    );
}

#[tokio::test]
async fn identity_output_serializes_flat() {
    let tools = demo_toolset();
    let out = tools.invoke(&DiscoveryCall::IdentityResolver).await.unwrap();
    assert!(matches!(out, ToolOutput::Identity(_)));
    let v = out.to_json();
    assert_eq!(v["email"], "jane.doe@example.com");
    assert!(v.get("name").is_some());
}

#[tokio::test]
async fn repeated_calls_are_idempotent() {
    let tools = demo_toolset();
    let call = DiscoveryCall::IssueFieldCatalog {
        include_values: true,
    };
    let first = tools.invoke(&call).await.unwrap();
    let second = tools.invoke(&call).await.unwrap();
    assert_eq!(first, second);
}

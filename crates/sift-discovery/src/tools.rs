//! Tool schemas, typed call decode and the bounded toolset.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sift_query::{DatasetKind, FieldCatalog, FieldDescriptor, FieldKind};
use std::sync::Arc;
use tracing::debug;

use crate::backend::{BackendError, SearchBackend};
use crate::semantic::SemanticCatalog;
use crate::{CatalogEntry, IdentityRecord, SearchScope};

pub const IDENTITY_RESOLVER: &str = "identityResolver";
pub const DATASET_ATTRIBUTES: &str = "datasetAttributes";
pub const SEMANTIC_NAMESPACE: &str = "semanticNamespace";
pub const ISSUE_FIELD_CATALOG: &str = "issueFieldCatalog";

pub const TOOL_NAMES: [&str; 4] = [
    IDENTITY_RESOLVER,
    DATASET_ATTRIBUTES,
    SEMANTIC_NAMESPACE,
    ISSUE_FIELD_CATALOG,
];

// =============================================================================
// Schemas
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub args_schema: Value,
}

fn dataset_schema() -> Value {
    json!({ "type": "string", "enum": ["errors", "spans", "logs", "issues"] })
}

/// The closed tool set offered to the model.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: IDENTITY_RESOLVER.to_string(),
            description: "Resolve the requesting user (\"me\", \"my\") to a concrete id, email and username. Call this before writing any filter that refers to the requester.".to_string(),
            args_schema: json!({ "type": "object", "additionalProperties": false, "properties": {} }),
        },
        ToolSpec {
            name: DATASET_ATTRIBUTES.to_string(),
            description: "List the filterable/aggregatable fields a dataset knows about (custom tags included), with descriptions and example values. Use it when the request names a field that is not a common field.".to_string(),
            args_schema: json!({
                "type": "object",
                "additionalProperties": false,
                "properties": { "dataset": dataset_schema() },
                "required": ["dataset"]
            }),
        },
        ToolSpec {
            name: SEMANTIC_NAMESPACE.to_string(),
            description: "Look up a documented field naming convention, e.g. `gen_ai` (LLM calls and token usage), `db`, `http`, `rpc`, `messaging`, `mcp`.".to_string(),
            args_schema: json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "namespace": { "type": "string", "minLength": 1 },
                    "dataset": dataset_schema()
                },
                "required": ["namespace", "dataset"]
            }),
        },
        ToolSpec {
            name: ISSUE_FIELD_CATALOG.to_string(),
            description: "List issue search keys (status, assignment, priority, issue tags). Set includeValues to also get example values.".to_string(),
            args_schema: json!({
                "type": "object",
                "additionalProperties": false,
                "properties": { "includeValues": { "type": "boolean", "default": false } }
            }),
        },
    ]
}

// =============================================================================
// Typed decode
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolInvocationError {
    #[error("unknown tool `{0}` (available: identityResolver, datasetAttributes, semanticNamespace, issueFieldCatalog)")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("unknown semantic namespace `{namespace}` (known: {})", .known.join(", "))]
    UnknownNamespace {
        namespace: String,
        known: Vec<String>,
    },
    #[error("{tool} failed: {source}")]
    Backend {
        tool: String,
        #[source]
        source: BackendError,
    },
}

impl ToolInvocationError {
    fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatasetAttributesArgs {
    dataset: DatasetKind,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SemanticNamespaceArgs {
    namespace: String,
    dataset: DatasetKind,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct IssueFieldCatalogArgs {
    #[serde(default)]
    include_values: bool,
}

/// A validated tool request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryCall {
    IdentityResolver,
    DatasetAttributes { dataset: DatasetKind },
    SemanticNamespace { namespace: String, dataset: DatasetKind },
    IssueFieldCatalog { include_values: bool },
}

impl DiscoveryCall {
    /// Decode a model-supplied `(name, args)` pair. `null` args mean `{}`.
    pub fn decode(name: &str, args: &Value) -> Result<Self, ToolInvocationError> {
        fn parse<T: DeserializeOwned>(tool: &str, args: &Value) -> Result<T, ToolInvocationError> {
            let args = if args.is_null() { json!({}) } else { args.clone() };
            serde_json::from_value(args).map_err(|e| ToolInvocationError::invalid(tool, e.to_string()))
        }

        match name {
            IDENTITY_RESOLVER => {
                parse::<NoArgs>(name, args)?;
                Ok(Self::IdentityResolver)
            }
            DATASET_ATTRIBUTES => {
                let a: DatasetAttributesArgs = parse(name, args)?;
                Ok(Self::DatasetAttributes { dataset: a.dataset })
            }
            SEMANTIC_NAMESPACE => {
                let a: SemanticNamespaceArgs = parse(name, args)?;
                let namespace = a.namespace.trim().to_string();
                if namespace.is_empty() {
                    return Err(ToolInvocationError::invalid(name, "namespace must be non-empty"));
                }
                Ok(Self::SemanticNamespace {
                    namespace,
                    dataset: a.dataset,
                })
            }
            ISSUE_FIELD_CATALOG => {
                let a: IssueFieldCatalogArgs = parse(name, args)?;
                Ok(Self::IssueFieldCatalog {
                    include_values: a.include_values,
                })
            }
            other => Err(ToolInvocationError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::IdentityResolver => IDENTITY_RESOLVER,
            Self::DatasetAttributes { .. } => DATASET_ATTRIBUTES,
            Self::SemanticNamespace { .. } => SEMANTIC_NAMESPACE,
            Self::IssueFieldCatalog { .. } => ISSUE_FIELD_CATALOG,
        }
    }

    /// Canonical argument object, used to spot repeated calls.
    pub fn args(&self) -> Value {
        match self {
            Self::IdentityResolver => json!({}),
            Self::DatasetAttributes { dataset } => json!({ "dataset": dataset }),
            Self::SemanticNamespace { namespace, dataset } => {
                json!({ "namespace": namespace, "dataset": dataset })
            }
            Self::IssueFieldCatalog { include_values } => json!({ "includeValues": include_values }),
        }
    }
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Identity(IdentityRecord),
    Fields {
        dataset: DatasetKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        fields: Vec<FieldDescriptor>,
        truncated: bool,
    },
    IssueCatalog {
        entries: Vec<CatalogEntry>,
        truncated: bool,
    },
}

impl ToolOutput {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Record what this result taught us about field names.
    pub fn fold_into(&self, catalog: &mut FieldCatalog) {
        match self {
            ToolOutput::Identity(_) => {}
            ToolOutput::Fields {
                dataset,
                namespace,
                fields,
                ..
            } => {
                catalog.add_descriptors(*dataset, fields.iter().cloned());
                match namespace {
                    Some(ns) => catalog.record_namespace_lookup(ns),
                    None => catalog.record_attribute_lookup(*dataset),
                }
            }
            ToolOutput::IssueCatalog { entries, .. } => {
                catalog.add_descriptors(
                    DatasetKind::Issues,
                    entries.iter().map(|e| {
                        FieldDescriptor::new(e.name.clone(), FieldKind::Filterable)
                            .with_description(e.description.clone())
                    }),
                );
                catalog.record_issue_catalog_lookup();
            }
        }
    }
}

// =============================================================================
// Toolset
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolLimits {
    pub max_descriptors: usize,
    pub max_example_values: usize,
    pub max_description_chars: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            max_descriptors: 100,
            max_example_values: 5,
            max_description_chars: 200,
        }
    }
}

const BUILTIN_ISSUE_KEYS: &[(&str, &str, &[&str])] = &[
    ("is", "Issue state or assignment predicate.", &["unresolved", "resolved", "ignored", "assigned", "unassigned", "for_review"]),
    ("assigned", "Assignee: a user email, `me`, `#team`, or `none`.", &["me", "none"]),
    ("assignedTo", "Alias of `assigned`.", &["me"]),
    ("assigned_or_suggested", "Assigned to, or suggested for, a user or team.", &["me"]),
    ("bookmarks", "Issues bookmarked by a user.", &["me"]),
    ("issue.priority", "Issue priority.", &["high", "medium", "low"]),
    ("issue.category", "Issue category.", &["error", "performance", "cron", "feedback"]),
    ("firstSeen", "When the issue was first seen, e.g. `-24h` or an ISO date.", &["-24h", "-7d"]),
    ("lastSeen", "When the issue was last seen.", &["-1h", "-24h"]),
    ("times_seen", "Number of events in the issue; supports `>` and `<`.", &[">100"]),
    ("firstRelease", "Release the issue first appeared in.", &["latest"]),
];

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// The four discovery tools bound to one backend and scope.
pub struct DiscoveryToolset {
    backend: Arc<dyn SearchBackend>,
    scope: SearchScope,
    namespaces: &'static SemanticCatalog,
    limits: ToolLimits,
}

impl DiscoveryToolset {
    pub fn new(backend: Arc<dyn SearchBackend>, scope: SearchScope) -> Self {
        Self {
            backend,
            scope,
            namespaces: SemanticCatalog::bundled(),
            limits: ToolLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ToolLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn scope(&self) -> &SearchScope {
        &self.scope
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        tool_specs()
    }

    pub async fn invoke(&self, call: &DiscoveryCall) -> Result<ToolOutput, ToolInvocationError> {
        debug!(tool = call.name(), args = %call.args(), "discovery call");
        let backend_err = |source: BackendError| ToolInvocationError::Backend {
            tool: call.name().to_string(),
            source,
        };

        match call {
            DiscoveryCall::IdentityResolver => self
                .backend
                .resolve_identity(&self.scope)
                .await
                .map(ToolOutput::Identity)
                .map_err(backend_err),
            DiscoveryCall::DatasetAttributes { dataset } => {
                let fields = self
                    .backend
                    .dataset_attributes(&self.scope, *dataset)
                    .await
                    .map_err(backend_err)?;
                Ok(self.bounded_fields(*dataset, None, fields))
            }
            DiscoveryCall::SemanticNamespace { namespace, dataset } => {
                let entry = self.namespaces.lookup(namespace).ok_or_else(|| {
                    ToolInvocationError::UnknownNamespace {
                        namespace: namespace.clone(),
                        known: self
                            .namespaces
                            .namespaces()
                            .into_iter()
                            .map(String::from)
                            .collect(),
                    }
                })?;
                if !entry.datasets.contains(dataset) {
                    return Err(ToolInvocationError::invalid(
                        SEMANTIC_NAMESPACE,
                        format!(
                            "namespace `{}` is not recorded on {dataset}; try one of: {}",
                            entry.namespace,
                            entry
                                .datasets
                                .iter()
                                .map(|d| d.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    ));
                }
                Ok(self.bounded_fields(
                    *dataset,
                    Some(entry.namespace.clone()),
                    entry.fields.clone(),
                ))
            }
            DiscoveryCall::IssueFieldCatalog { include_values } => {
                let tags = self
                    .backend
                    .issue_tags(&self.scope, *include_values)
                    .await
                    .map_err(backend_err)?;
                let mut entries: Vec<CatalogEntry> = BUILTIN_ISSUE_KEYS
                    .iter()
                    .map(|(name, description, examples)| CatalogEntry {
                        name: (*name).to_string(),
                        description: (*description).to_string(),
                        example_values: Some(examples.iter().map(|s| s.to_string()).collect()),
                    })
                    .collect();
                for tag in tags {
                    if !entries.iter().any(|e| e.name == tag.name) {
                        entries.push(tag);
                    }
                }
                Ok(self.bounded_catalog(entries, *include_values))
            }
        }
    }

    fn bounded_fields(
        &self,
        dataset: DatasetKind,
        namespace: Option<String>,
        fields: Vec<FieldDescriptor>,
    ) -> ToolOutput {
        let truncated = fields.len() > self.limits.max_descriptors;
        let fields = fields
            .into_iter()
            .take(self.limits.max_descriptors)
            .map(|mut d| {
                d.description = d
                    .description
                    .map(|s| truncate_chars(&s, self.limits.max_description_chars));
                if let Some(values) = d.example_values.as_mut() {
                    values.truncate(self.limits.max_example_values);
                }
                d
            })
            .collect();
        ToolOutput::Fields {
            dataset,
            namespace,
            fields,
            truncated,
        }
    }

    fn bounded_catalog(&self, entries: Vec<CatalogEntry>, include_values: bool) -> ToolOutput {
        let truncated = entries.len() > self.limits.max_descriptors;
        let entries = entries
            .into_iter()
            .take(self.limits.max_descriptors)
            .map(|mut e| {
                e.description = truncate_chars(&e.description, self.limits.max_description_chars);
                if include_values {
                    if let Some(values) = e.example_values.as_mut() {
                        values.truncate(self.limits.max_example_values);
                    }
                } else {
                    e.example_values = None;
                }
                e
            })
            .collect();
        ToolOutput::IssueCatalog { entries, truncated }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixtureBackend;
    use sift_query::catalog::FieldResolution;

    fn toolset(fixture: FixtureBackend) -> DiscoveryToolset {
        DiscoveryToolset::new(Arc::new(fixture), SearchScope::new("acme"))
    }

    #[test]
    fn decode_rejects_schema_mismatch_instead_of_coercing() {
        assert_eq!(
            DiscoveryCall::decode("datasetAttributes", &json!({ "dataset": "spans" })).unwrap(),
            DiscoveryCall::DatasetAttributes {
                dataset: DatasetKind::Spans
            }
        );
        for bad in [
            json!({ "dataset": "transactions" }),
            json!({ "dataset": "spans", "limit": 5 }),
            json!({}),
            json!("spans"),
        ] {
            assert!(matches!(
                DiscoveryCall::decode("datasetAttributes", &bad),
                Err(ToolInvocationError::InvalidArguments { .. })
            ));
        }
        assert!(matches!(
            DiscoveryCall::decode("runQuery", &json!({})),
            Err(ToolInvocationError::UnknownTool(_))
        ));
    }

    #[test]
    fn decode_accepts_missing_args_for_argless_tools() {
        assert_eq!(
            DiscoveryCall::decode("identityResolver", &Value::Null).unwrap(),
            DiscoveryCall::IdentityResolver
        );
        assert_eq!(
            DiscoveryCall::decode("issueFieldCatalog", &json!({})).unwrap(),
            DiscoveryCall::IssueFieldCatalog {
                include_values: false
            }
        );
        assert!(DiscoveryCall::decode("identityResolver", &json!({ "who": "me" })).is_err());
        assert!(DiscoveryCall::decode(
            "semanticNamespace",
            &json!({ "namespace": "  ", "dataset": "spans" })
        )
        .is_err());
    }

    #[test]
    fn specs_cover_every_tool_name() {
        let names: Vec<String> = tool_specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, TOOL_NAMES.to_vec());
    }

    #[tokio::test]
    async fn dataset_attributes_are_bounded() {
        let many: Vec<FieldDescriptor> = (0..150)
            .map(|i| {
                FieldDescriptor::new(format!("custom.f{i}"), FieldKind::Filterable)
                    .with_description("x".repeat(500))
                    .with_examples((0..9).map(|v| v.to_string()))
            })
            .collect();
        let tools = toolset(FixtureBackend::default().with_attributes(DatasetKind::Errors, many));
        let out = tools
            .invoke(&DiscoveryCall::DatasetAttributes {
                dataset: DatasetKind::Errors,
            })
            .await
            .unwrap();
        match out {
            ToolOutput::Fields {
                fields, truncated, ..
            } => {
                assert!(truncated);
                assert_eq!(fields.len(), 100);
                assert_eq!(fields[0].example_values.as_ref().unwrap().len(), 5);
                assert_eq!(fields[0].description.as_ref().unwrap().chars().count(), 200);
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn semantic_namespace_is_served_from_the_bundled_catalog() {
        let tools = toolset(FixtureBackend::default());
        let out = tools
            .invoke(&DiscoveryCall::SemanticNamespace {
                namespace: "gen_ai".into(),
                dataset: DatasetKind::Spans,
            })
            .await
            .unwrap();
        let mut catalog = FieldCatalog::new();
        out.fold_into(&mut catalog);
        assert_eq!(
            catalog.resolve(DatasetKind::Spans, "gen_ai.tool.name"),
            FieldResolution::Known
        );
        assert_eq!(
            catalog.resolve(DatasetKind::Spans, "gen_ai.cost.usd"),
            FieldResolution::Covered
        );

        let err = tools
            .invoke(&DiscoveryCall::SemanticNamespace {
                namespace: "kubernetes".into(),
                dataset: DatasetKind::Spans,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gen_ai"));
    }

    #[tokio::test]
    async fn issue_catalog_hides_values_unless_asked() {
        let tools = toolset(FixtureBackend::default());
        let bare = tools
            .invoke(&DiscoveryCall::IssueFieldCatalog {
                include_values: false,
            })
            .await
            .unwrap();
        let ToolOutput::IssueCatalog { entries, .. } = bare else {
            panic!("expected issue catalog");
        };
        assert!(entries.iter().any(|e| e.name == "is"));
        assert!(entries.iter().all(|e| e.example_values.is_none()));

        let with_values = tools
            .invoke(&DiscoveryCall::IssueFieldCatalog {
                include_values: true,
            })
            .await
            .unwrap();
        let v = with_values.to_json();
        assert_eq!(v["entries"][0]["exampleValues"][0], "unresolved");
    }

    #[tokio::test]
    async fn backend_failures_name_the_tool() {
        let tools = toolset(FixtureBackend::default().failing(DATASET_ATTRIBUTES));
        let err = tools
            .invoke(&DiscoveryCall::DatasetAttributes {
                dataset: DatasetKind::Logs,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolInvocationError::Backend { ref tool, .. } if tool == DATASET_ATTRIBUTES));
    }
}

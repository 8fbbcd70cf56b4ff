//! In-memory backend driven by a JSON fixture.
//!
//! ```json
//! {
//!   "identity": { "id": "42", "email": "jane@example.com" },
//!   "attributes": { "errors": [ { "name": "customer.tier", "kind": "filterable" } ] },
//!   "issueTags": [ { "name": "customer.tier", "description": "Customer plan" } ],
//!   "failing": ["datasetAttributes"]
//! }
//! ```
//!
//! Tools listed under `failing` answer with HTTP 503, which is how tests
//! exercise the recoverable tool-error path.

use async_trait::async_trait;
use serde::Deserialize;
use sift_query::{DatasetKind, FieldDescriptor};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::backend::{BackendError, SearchBackend};
use crate::tools::{DATASET_ATTRIBUTES, IDENTITY_RESOLVER, ISSUE_FIELD_CATALOG};
use crate::{CatalogEntry, IdentityRecord, SearchScope};

const DEMO_FIXTURE: &str = include_str!("../data/demo_fixture.json");

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FixtureFile {
    #[serde(default)]
    identity: Option<IdentityRecord>,
    #[serde(default)]
    attributes: BTreeMap<String, Vec<FieldDescriptor>>,
    #[serde(default)]
    issue_tags: Vec<CatalogEntry>,
    #[serde(default)]
    failing: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FixtureBackend {
    identity: Option<IdentityRecord>,
    attributes: BTreeMap<DatasetKind, Vec<FieldDescriptor>>,
    issue_tags: Vec<CatalogEntry>,
    failing: BTreeSet<String>,
}

impl FixtureBackend {
    pub fn from_json_str(text: &str) -> Result<Self, BackendError> {
        let file: FixtureFile =
            serde_json::from_str(text).map_err(|e| BackendError::Decode(e.to_string()))?;
        let mut attributes = BTreeMap::new();
        for (key, fields) in file.attributes {
            let dataset: DatasetKind = key
                .parse()
                .map_err(|e: sift_query::QueryError| BackendError::Decode(e.to_string()))?;
            attributes.insert(dataset, fields);
        }
        Ok(Self {
            identity: file.identity,
            attributes,
            issue_tags: file.issue_tags,
            failing: file.failing.into_iter().collect(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, BackendError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BackendError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// A small demo organization, used when no fixture is given.
    pub fn demo() -> Result<Self, BackendError> {
        Self::from_json_str(DEMO_FIXTURE)
    }

    pub fn with_identity(mut self, identity: IdentityRecord) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_attributes(mut self, dataset: DatasetKind, fields: Vec<FieldDescriptor>) -> Self {
        self.attributes.insert(dataset, fields);
        self
    }

    pub fn with_issue_tags(mut self, tags: Vec<CatalogEntry>) -> Self {
        self.issue_tags = tags;
        self
    }

    /// Make `tool` answer with a 503.
    pub fn failing(mut self, tool: &str) -> Self {
        self.failing.insert(tool.to_string());
        self
    }

    fn check(&self, tool: &str) -> Result<(), BackendError> {
        if self.failing.contains(tool) {
            return Err(BackendError::Status {
                status: 503,
                body: format!("{tool} is unavailable in this fixture"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SearchBackend for FixtureBackend {
    async fn resolve_identity(&self, _scope: &SearchScope) -> Result<IdentityRecord, BackendError> {
        self.check(IDENTITY_RESOLVER)?;
        self.identity
            .clone()
            .ok_or_else(|| BackendError::NotFound("no authenticated user".to_string()))
    }

    async fn dataset_attributes(
        &self,
        _scope: &SearchScope,
        dataset: DatasetKind,
    ) -> Result<Vec<FieldDescriptor>, BackendError> {
        self.check(DATASET_ATTRIBUTES)?;
        Ok(self.attributes.get(&dataset).cloned().unwrap_or_default())
    }

    async fn issue_tags(
        &self,
        _scope: &SearchScope,
        include_values: bool,
    ) -> Result<Vec<CatalogEntry>, BackendError> {
        self.check(ISSUE_FIELD_CATALOG)?;
        Ok(self
            .issue_tags
            .iter()
            .cloned()
            .map(|mut e| {
                if !include_values {
                    e.example_values = None;
                }
                e
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_fixture_loads() {
        let backend = FixtureBackend::demo().unwrap();
        let scope = SearchScope::new("demo");
        let me = backend.resolve_identity(&scope).await.unwrap();
        assert!(me.email.is_some());
        let errors = backend
            .dataset_attributes(&scope, DatasetKind::Errors)
            .await
            .unwrap();
        assert!(errors.iter().any(|f| f.name == "customer.tier"));
    }

    #[test]
    fn rejects_unknown_dataset_keys_and_fields() {
        let err = FixtureBackend::from_json_str(r#"{ "attributes": { "metrics": [] } }"#).unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
        assert!(FixtureBackend::from_json_str(r#"{ "users": [] }"#).is_err());
    }

    #[tokio::test]
    async fn missing_identity_is_not_found() {
        let backend = FixtureBackend::default();
        let err = backend
            .resolve_identity(&SearchScope::new("acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }

    #[test]
    fn from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.json");
        std::fs::write(&path, r#"{ "failing": ["identityResolver"] }"#).unwrap();
        let backend = FixtureBackend::from_path(&path).unwrap();
        assert!(backend.check(IDENTITY_RESOLVER).is_err());
    }
}

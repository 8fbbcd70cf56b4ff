//! Field descriptors and the per-run field catalog.
//!
//! Discovery adapters return [`FieldDescriptor`]s. The orchestration core
//! folds every successful result into a [`FieldCatalog`] and also records
//! which lookups were *attempted*, because a field that a discovery call was
//! made for is accepted even if the backend did not list it (custom tags are
//! not always enumerable).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::dataset::DatasetKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Filterable,
    Aggregatable,
    Both,
}

impl FieldKind {
    pub fn can_filter(self) -> bool {
        matches!(self, FieldKind::Filterable | FieldKind::Both)
    }

    pub fn can_aggregate(self) -> bool {
        matches!(self, FieldKind::Aggregatable | FieldKind::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_values: Option<Vec<String>>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            example_values: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_examples<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.example_values = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// How a field name resolves against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldResolution {
    /// Built into the dataset or returned by a discovery call.
    Known,
    /// Not listed anywhere, but a matching discovery lookup was attempted.
    Covered,
    Unknown,
}

/// Everything learned about fields during one translation run.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    discovered: BTreeMap<DatasetKind, BTreeMap<String, FieldDescriptor>>,
    attribute_lookups: BTreeSet<DatasetKind>,
    namespace_lookups: BTreeSet<String>,
    issue_catalog_lookup: bool,
}

impl FieldCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_descriptors<I>(&mut self, dataset: DatasetKind, descriptors: I)
    where
        I: IntoIterator<Item = FieldDescriptor>,
    {
        let entry = self.discovered.entry(dataset).or_default();
        for d in descriptors {
            entry.insert(d.name.clone(), d);
        }
    }

    pub fn record_attribute_lookup(&mut self, dataset: DatasetKind) {
        self.attribute_lookups.insert(dataset);
    }

    pub fn record_namespace_lookup(&mut self, namespace: &str) {
        let ns = namespace.trim().trim_end_matches('.').to_ascii_lowercase();
        if !ns.is_empty() {
            self.namespace_lookups.insert(ns);
        }
    }

    pub fn record_issue_catalog_lookup(&mut self) {
        self.issue_catalog_lookup = true;
    }

    pub fn discovered(&self, dataset: DatasetKind) -> impl Iterator<Item = &FieldDescriptor> {
        self.discovered.get(&dataset).into_iter().flat_map(|m| m.values())
    }

    pub fn descriptor(&self, dataset: DatasetKind, name: &str) -> Option<&FieldDescriptor> {
        self.discovered.get(&dataset).and_then(|m| m.get(name))
    }

    pub fn is_empty(&self) -> bool {
        self.discovered.values().all(|m| m.is_empty())
            && self.attribute_lookups.is_empty()
            && self.namespace_lookups.is_empty()
            && !self.issue_catalog_lookup
    }

    pub fn resolve(&self, dataset: DatasetKind, name: &str) -> FieldResolution {
        let name = name.trim();
        if is_explicit_tag(name)
            || dataset.is_common_field(name)
            || self.descriptor(dataset, name).is_some()
        {
            return FieldResolution::Known;
        }
        if self.is_covered(dataset, name) {
            return FieldResolution::Covered;
        }
        FieldResolution::Unknown
    }

    /// Only successful lookups count: a failed discovery call leaves the field unknown.
    fn is_covered(&self, dataset: DatasetKind, name: &str) -> bool {
        if self.attribute_lookups.contains(&dataset) {
            return true;
        }
        if dataset == DatasetKind::Issues && self.issue_catalog_lookup {
            return true;
        }
        let lc = name.to_ascii_lowercase();
        self.namespace_lookups
            .iter()
            .any(|ns| lc == *ns || lc.starts_with(&format!("{ns}.")))
    }
}

/// `tags[key]` / `tags[key,number]` addresses a tag explicitly.
pub fn is_explicit_tag(name: &str) -> bool {
    name.starts_with("tags[") && name.ends_with(']') && name.len() > "tags[]".len()
}

//! Bundled catalog of telemetry naming conventions.
//!
//! Semantic namespaces are documented conventions rather than per-organization
//! data, so they ship with the crate instead of being fetched.

use serde::{Deserialize, Serialize};
use sift_query::{DatasetKind, FieldDescriptor};
use std::collections::BTreeMap;
use std::sync::OnceLock;

const BUNDLED_NAMESPACES: &str = include_str!("../data/semantic_namespaces.json");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceEntry {
    pub namespace: String,
    pub description: String,
    /// Datasets the convention's fields are recorded on.
    pub datasets: Vec<DatasetKind>,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    namespaces: Vec<NamespaceEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct SemanticCatalog {
    entries: BTreeMap<String, NamespaceEntry>,
}

impl SemanticCatalog {
    /// The catalog compiled into this crate.
    pub fn bundled() -> &'static SemanticCatalog {
        static CATALOG: OnceLock<SemanticCatalog> = OnceLock::new();
        CATALOG.get_or_init(|| {
            SemanticCatalog::from_json_str(BUNDLED_NAMESPACES)
                .expect("bundled semantic namespace catalog is valid JSON")
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let file: CatalogFile = serde_json::from_str(text)?;
        let entries = file
            .namespaces
            .into_iter()
            .map(|e| (normalize(&e.namespace), e))
            .collect();
        Ok(Self { entries })
    }

    /// Lookup is case-insensitive and tolerates a trailing `.`.
    pub fn lookup(&self, namespace: &str) -> Option<&NamespaceEntry> {
        self.entries.get(&normalize(namespace))
    }

    pub fn namespaces(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// The namespace a field name belongs to, if any (`gen_ai.usage.input_tokens` → `gen_ai`).
    pub fn namespace_of(&self, field: &str) -> Option<&NamespaceEntry> {
        let head = field.split('.').next()?;
        if head.len() == field.len() {
            return None;
        }
        self.lookup(head)
    }
}

fn normalize(namespace: &str) -> String {
    namespace.trim().trim_end_matches('.').to_ascii_lowercase()
}

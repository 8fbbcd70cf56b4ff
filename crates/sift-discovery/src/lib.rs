//! Discovery tools for the sift query agent.
//!
//! Each tool is one read-only lookup the model may request mid-run:
//!
//! | tool                | answers                                              |
//! |---------------------|------------------------------------------------------|
//! | `identityResolver`  | who "me" is for the authenticated caller             |
//! | `datasetAttributes` | fields a dataset knows about, with example values    |
//! | `semanticNamespace` | a documented naming-convention group (`gen_ai`, ...) |
//! | `issueFieldCatalog` | issue search keys, optionally with value examples    |
//!
//! Model payloads are decoded into a [`DiscoveryCall`] before anything runs;
//! a payload that does not match a tool's argument schema is rejected, never
//! coerced. Results are bounded by [`ToolLimits`].
//!
//! The backend behind the tools is a [`SearchBackend`]:
//! - [`HttpSearchBackend`]: the search service's HTTP API.
//! - [`FixtureBackend`]: canned JSON, for tests and offline runs.

use serde::{Deserialize, Serialize};

pub mod backend;
pub mod fixture;
pub mod http;
pub mod semantic;
pub mod tools;

pub use backend::{BackendError, SearchBackend};
pub use fixture::FixtureBackend;
pub use http::{HttpBackendConfig, HttpSearchBackend};
pub use semantic::{NamespaceEntry, SemanticCatalog};
pub use tools::{
    tool_specs, DiscoveryCall, DiscoveryToolset, ToolInvocationError, ToolLimits, ToolOutput,
    ToolSpec,
};

/// Organization/project scope every lookup is confined to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchScope {
    pub organization: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl SearchScope {
    pub fn new(organization: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            project: None,
        }
    }

    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project = project.filter(|p| !p.trim().is_empty());
        self
    }
}

/// The authenticated caller, as returned by `identityResolver`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// One issue search key from `issueFieldCatalog`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_values: Option<Vec<String>>,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            example_values: None,
        }
    }
}

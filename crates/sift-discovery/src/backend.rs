//! The search backend seam.

use async_trait::async_trait;
use sift_query::{DatasetKind, FieldDescriptor};

use crate::{CatalogEntry, IdentityRecord, SearchScope};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("could not decode backend response: {0}")]
    Decode(String),
    #[error("backend misconfigured: {0}")]
    Config(String),
    #[error("invalid path segment `{0}`")]
    InvalidSegment(String),
}

/// Read-only metadata lookups against the search service.
///
/// Implementations must not mutate anything on the caller's side; the agent
/// may repeat any call.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn resolve_identity(&self, scope: &SearchScope) -> Result<IdentityRecord, BackendError>;

    async fn dataset_attributes(
        &self,
        scope: &SearchScope,
        dataset: DatasetKind,
    ) -> Result<Vec<FieldDescriptor>, BackendError>;

    /// Issue tags beyond the built-in issue search keys.
    async fn issue_tags(
        &self,
        scope: &SearchScope,
        include_values: bool,
    ) -> Result<Vec<CatalogEntry>, BackendError>;
}

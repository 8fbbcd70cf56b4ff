//! HTTP backend for the search service API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use sift_query::{DatasetKind, FieldDescriptor, FieldKind};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::backend::{BackendError, SearchBackend};
use crate::{CatalogEntry, IdentityRecord, SearchScope};

pub const DEFAULT_API_BASE_URL: &str = "https://sentry.io";
const DEFAULT_TIMEOUT_SECS: u64 = 15;
const MAX_TIMEOUT_SECS: u64 = 300;
/// Issue tags whose values are fetched when `includeValues` is set.
const MAX_VALUE_LOOKUPS: usize = 10;
const MAX_VALUES_PER_TAG: usize = 5;
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub token: String,
    pub timeout_secs: u64,
}

impl HttpBackendConfig {
    /// Load from `SIFT_API_BASE_URL`, `SIFT_API_TOKEN` and `SIFT_API_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, BackendError> {
        let token = std::env::var("SIFT_API_TOKEN")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BackendError::Config("SIFT_API_TOKEN is not set".to_string()))?;
        let base_url = std::env::var("SIFT_API_BASE_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let timeout_secs = match std::env::var("SIFT_API_TIMEOUT_SECS") {
            Ok(v) if !v.trim().is_empty() => {
                let n: u64 = v.trim().parse().map_err(|_| {
                    BackendError::Config(format!(
                        "SIFT_API_TIMEOUT_SECS must be a positive integer (got `{v}`)"
                    ))
                })?;
                n.clamp(1, MAX_TIMEOUT_SECS)
            }
            _ => DEFAULT_TIMEOUT_SECS,
        };
        Ok(Self {
            base_url,
            token,
            timeout_secs,
        })
    }
}

pub struct HttpSearchBackend {
    client: Client,
    base: Url,
    token: String,
}

impl HttpSearchBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Config(format!("failed to create HTTP client: {e}")))?;
        let mut base_url = config.base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base = Url::parse(&base_url)
            .map_err(|e| BackendError::Config(format!("invalid base URL `{}`: {e}", config.base_url)))?;
        Ok(Self {
            client,
            base,
            token: config.token,
        })
    }

    pub fn from_env() -> Result<Self, BackendError> {
        Self::new(HttpBackendConfig::from_env()?)
    }

    /// Join `segments` onto the base URL, one encoded path segment each.
    fn endpoint(&self, segments: &[&str], params: &[(&str, &str)]) -> Result<Url, BackendError> {
        if let Some(bad) = segments
            .iter()
            .find(|s| s.trim().is_empty() || **s == "." || **s == "..")
        {
            return Err(BackendError::InvalidSegment((*bad).to_string()));
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Config(format!("base URL `{}` cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments)
            .push("");
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter().copied());
        }
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, BackendError> {
        debug!(url = %url, "search backend request");
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(url.path().to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), url = %url, "search backend error");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    fn org_path<'a>(scope: &'a SearchScope, rest: &[&'a str]) -> Vec<&'a str> {
        let mut path = vec!["api", "0", "organizations", scope.organization.as_str()];
        path.extend_from_slice(rest);
        path
    }

    fn scoped_params<'a>(scope: &'a SearchScope, params: &mut Vec<(&'a str, &'a str)>) {
        if let Some(project) = scope.project.as_deref() {
            params.push(("project", project));
        }
    }

    async fn tags(&self, scope: &SearchScope, dataset: &str) -> Result<Vec<Value>, BackendError> {
        let mut params = vec![("dataset", dataset)];
        Self::scoped_params(scope, &mut params);
        let url = self.endpoint(&Self::org_path(scope, &["tags"]), &params)?;
        expect_array(self.get_json(url).await?)
    }

    async fn trace_item_attributes(
        &self,
        scope: &SearchScope,
        item_type: &str,
        attribute_type: &str,
    ) -> Result<Vec<Value>, BackendError> {
        let mut params = vec![("itemType", item_type), ("attributeType", attribute_type)];
        Self::scoped_params(scope, &mut params);
        let url = self.endpoint(&Self::org_path(scope, &["trace-items", "attributes"]), &params)?;
        expect_array(self.get_json(url).await?)
    }

    async fn tag_values(&self, scope: &SearchScope, key: &str) -> Result<Vec<String>, BackendError> {
        let mut params = vec![("dataset", "search_issues")];
        Self::scoped_params(scope, &mut params);
        let url = self.endpoint(&Self::org_path(scope, &["tags", key, "values"]), &params)?;
        let rows = expect_array(self.get_json(url).await?)?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get("value").and_then(value_to_string))
            .take(MAX_VALUES_PER_TAG)
            .collect())
    }
}

fn expect_array(v: Value) -> Result<Vec<Value>, BackendError> {
    match v {
        Value::Array(items) => Ok(items),
        other => Err(BackendError::Decode(format!(
            "expected a JSON array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `{ "key": "browser", "name": "Browser" }` → descriptor. Rows without a key are skipped.
fn descriptor_from_row(row: &Value, kind: FieldKind) -> Option<FieldDescriptor> {
    let key = row.get("key").and_then(value_to_string)?;
    let mut d = FieldDescriptor::new(key.clone(), kind);
    if let Some(name) = row.get("name").and_then(value_to_string) {
        if name != key {
            d = d.with_description(name);
        }
    }
    Some(d)
}

fn identity_from_auth(v: &Value) -> Result<IdentityRecord, BackendError> {
    // `/auth/` wraps the user for some token types.
    let user = v.get("user").filter(|u| u.is_object()).unwrap_or(v);
    let id = user
        .get("id")
        .and_then(value_to_string)
        .ok_or_else(|| BackendError::Decode("auth response has no user id".to_string()))?;
    let field = |k: &str| user.get(k).and_then(value_to_string);
    Ok(IdentityRecord {
        id,
        name: field("name"),
        email: field("email"),
        username: field("username"),
    })
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn resolve_identity(&self, _scope: &SearchScope) -> Result<IdentityRecord, BackendError> {
        let url = self.endpoint(&["api", "0", "auth"], &[])?;
        identity_from_auth(&self.get_json(url).await?)
    }

    async fn dataset_attributes(
        &self,
        scope: &SearchScope,
        dataset: DatasetKind,
    ) -> Result<Vec<FieldDescriptor>, BackendError> {
        match dataset {
            DatasetKind::Errors | DatasetKind::Issues => {
                let name = if dataset == DatasetKind::Errors {
                    "events"
                } else {
                    "search_issues"
                };
                let rows = self.tags(scope, name).await?;
                Ok(rows
                    .iter()
                    .filter_map(|r| descriptor_from_row(r, FieldKind::Filterable))
                    .collect())
            }
            DatasetKind::Spans | DatasetKind::Logs => {
                let item_type = dataset.as_str();
                let strings = self.trace_item_attributes(scope, item_type, "string").await?;
                let numbers = self.trace_item_attributes(scope, item_type, "number").await?;
                Ok(strings
                    .iter()
                    .filter_map(|r| descriptor_from_row(r, FieldKind::Filterable))
                    .chain(
                        numbers
                            .iter()
                            .filter_map(|r| descriptor_from_row(r, FieldKind::Both)),
                    )
                    .collect())
            }
        }
    }

    async fn issue_tags(
        &self,
        scope: &SearchScope,
        include_values: bool,
    ) -> Result<Vec<CatalogEntry>, BackendError> {
        let rows = self.tags(scope, "search_issues").await?;
        let mut entries: Vec<CatalogEntry> = rows
            .iter()
            .filter_map(|r| {
                let d = descriptor_from_row(r, FieldKind::Filterable)?;
                let description = d.description.unwrap_or_else(|| format!("Issue tag `{}`", d.name));
                Some(CatalogEntry::new(d.name, description))
            })
            .collect();
        if include_values {
            for entry in entries.iter_mut().take(MAX_VALUE_LOOKUPS) {
                let values = self.tag_values(scope, &entry.name).await;
                match values {
                    Ok(values) if !values.is_empty() => entry.example_values = Some(values),
                    Ok(_) => {}
                    // Values are a best-effort extra; the key list is still useful.
                    Err(e) => debug!(tag = %entry.name, error = %e, "tag value lookup failed"),
                }
            }
        }
        Ok(entries)
    }
}

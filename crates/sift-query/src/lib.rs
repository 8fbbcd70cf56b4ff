//! Sift query model: the machine-checkable output of a translation run.
//!
//! A natural-language request ends up as a [`StructuredQuery`]: a dataset, a
//! single filter expression, output fields, a sort key, an optional time
//! range and optional computed equation columns.
//!
//! ## Layers
//!
//! ```text
//!   model JSON ──► CandidateQuery ──► validate() ──► StructuredQuery
//!                  (loose decode)     (repair +      (typed, stable)
//!                                      report)
//! ```
//!
//! - [`dataset`]: the four datasets with their built-in field catalogs and
//!   legal aggregate functions.
//! - [`catalog`]: field descriptors returned by discovery, and the per-run
//!   view of which fields are known.
//! - [`equation`]: grammar for `equation|...` arithmetic over aggregates.
//! - [`filter`]: a structural scanner for filter expressions (keys only; the
//!   filter syntax itself is trusted verbatim).
//! - [`validate`]: the deterministic self-corrector.
//!
//! Nothing in this crate performs I/O.

pub mod catalog;
pub mod dataset;
pub mod equation;
pub mod filter;
pub mod query;
pub mod validate;

pub use catalog::{FieldCatalog, FieldDescriptor, FieldKind};
pub use dataset::DatasetKind;
pub use equation::{parse_equation, Equation, EQUATION_PREFIX};
pub use query::{CandidateQuery, StructuredQuery, TimeRange};
pub use validate::{validate, ValidationContext, ValidationReport};

/// Errors produced while decoding or parsing query components.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("unknown dataset `{0}` (expected one of errors, spans, logs, issues)")]
    UnknownDataset(String),
    #[error("invalid equation `{input}`: {reason}")]
    InvalidEquation { input: String, reason: String },
    #[error("candidate query does not match the structured query shape: {0}")]
    Shape(String),
}

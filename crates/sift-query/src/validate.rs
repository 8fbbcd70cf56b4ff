//! Deterministic validator and self-corrector for candidate queries.
//!
//! `validate` never calls out to the network or a model. It repairs what can
//! be repaired without changing the meaning of the request and reports the
//! rest. Repairs are applied in a fixed order and each one produces a state
//! the next pass leaves untouched, so validation is idempotent:
//!
//! ```text
//! validate(validate(x).query) == validate(x).query
//! ```
//!
//! Repairs (reported in `fixed`):
//! 1. unknown dataset: fall back to the hint (or `errors`), also a violation
//! 2. unprefixed equations get `equation|`
//! 3. duplicate output columns are removed
//! 4. plain output fields nobody discovered are dropped
//! 5. empty `fields` get the dataset defaults
//! 6. empty `sort` gets the dataset default
//! 7. an aggregate/equation sort key missing from the columns is appended
//!
//! Checks (reported in `violations`): aggregate functions legal for the
//! dataset, equation syntax and bare field references, filter keys known or
//! covered by discovery, time range shape.

use chrono::DateTime;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::catalog::{FieldCatalog, FieldResolution};
use crate::dataset::DatasetKind;
use crate::equation::{
    is_aggregate_like, parse_aggregate_call, parse_equation, strip_equation_prefix, AggregateCall,
    EQUATION_PREFIX,
};
use crate::filter::filter_keys;
use crate::query::{strip_sort_direction, CandidateQuery, StructuredQuery, TimeRange};

/// What the validator knows beyond the candidate itself.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub catalog: &'a FieldCatalog,
    pub dataset_hint: Option<DatasetKind>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(catalog: &'a FieldCatalog) -> Self {
        Self {
            catalog,
            dataset_hint: None,
        }
    }

    pub fn with_dataset_hint(mut self, hint: Option<DatasetKind>) -> Self {
        self.dataset_hint = hint;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub query: StructuredQuery,
    pub fixed: Vec<String>,
    pub violations: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

fn stats_period_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+[smhdw]$").expect("stats period pattern is a valid regex"))
}

fn push_unique(out: &mut Vec<String>, msg: String) {
    if !out.contains(&msg) {
        out.push(msg);
    }
}

pub fn validate(candidate: &CandidateQuery, ctx: &ValidationContext<'_>) -> ValidationReport {
    let mut fixed: Vec<String> = Vec::new();
    let mut violations: Vec<String> = Vec::new();

    let dataset = match candidate.dataset.parse::<DatasetKind>() {
        Ok(ds) => ds,
        Err(e) => {
            let fallback = ctx.dataset_hint.unwrap_or(DatasetKind::Errors);
            violations.push(e.to_string());
            fixed.push(format!(
                "replaced unknown dataset `{}` with `{fallback}`",
                candidate.dataset
            ));
            fallback
        }
    };

    let mut query = StructuredQuery {
        dataset,
        query: candidate.query.clone(),
        fields: candidate.fields.clone(),
        sort: candidate.sort.clone(),
        time_range: candidate.time_range.clone(),
        equations: candidate.equations.clone(),
    };

    prefix_equations(&mut query, &mut fixed);
    dedupe_columns(&mut query, &mut fixed);
    drop_unknown_fields(&mut query, ctx.catalog, &mut fixed);

    if query.fields.is_empty() && query.equations.is_empty() {
        query.fields = dataset.default_fields();
        fixed.push(format!("filled empty fields with the {dataset} defaults"));
    }

    if query.sort.trim().is_empty() {
        query.sort = default_sort(&query);
        fixed.push(format!("set missing sort to `{}`", query.sort));
    }

    let sort_key = strip_sort_direction(&query.sort).to_string();
    if is_aggregate_like(&sort_key) && !query.has_column(&sort_key) {
        fixed.push(format!("added sort column `{sort_key}` to fields"));
        query.fields.push(sort_key);
    }

    check_columns(&query, ctx.catalog, &mut violations);
    check_sort(&query, ctx.catalog, &mut violations);
    check_filter(&query, ctx.catalog, &mut violations);
    check_time_range(&query, &mut violations);

    ValidationReport {
        query,
        fixed,
        violations,
    }
}

fn prefix_equations(query: &mut StructuredQuery, fixed: &mut Vec<String>) {
    for eq in query.equations.iter_mut() {
        if strip_equation_prefix(eq).is_some() {
            continue;
        }
        let well_formed = parse_equation(eq)
            .map(|e| !e.aggregates().is_empty() && e.bare_fields().is_empty())
            .unwrap_or(false);
        if well_formed {
            fixed.push(format!("prefixed equation `{eq}`"));
            *eq = format!("{EQUATION_PREFIX}{eq}");
        }
    }

    for field in query.fields.iter_mut() {
        if strip_equation_prefix(field).is_some() {
            continue;
        }
        if parse_equation(field).map(|e| e.is_promotable()).unwrap_or(false) {
            fixed.push(format!("prefixed equation column `{field}`"));
            *field = format!("{EQUATION_PREFIX}{field}");
        }
    }

    let key = strip_sort_direction(&query.sort);
    if strip_equation_prefix(key).is_none()
        && parse_equation(key).map(|e| e.is_promotable()).unwrap_or(false)
    {
        let direction = if query.sort_descending() { "-" } else { "" };
        let sort = format!("{direction}{EQUATION_PREFIX}{key}");
        fixed.push(format!("prefixed equation sort `{sort}`"));
        query.sort = sort;
    }
}

fn dedupe_columns(query: &mut StructuredQuery, fixed: &mut Vec<String>) {
    let mut seen: HashSet<String> = HashSet::new();
    let before = query.fields.len();
    query.fields.retain(|f| seen.insert(f.clone()));
    let mut seen_eq: HashSet<String> = HashSet::new();
    let before_eq = query.equations.len();
    query.equations.retain(|e| seen_eq.insert(e.clone()));
    let removed = (before - query.fields.len()) + (before_eq - query.equations.len());
    if removed > 0 {
        fixed.push(format!("removed {removed} duplicate column(s)"));
    }
}

fn drop_unknown_fields(query: &mut StructuredQuery, catalog: &FieldCatalog, fixed: &mut Vec<String>) {
    let dataset = query.dataset;
    let mut dropped: Vec<String> = Vec::new();
    query.fields.retain(|f| {
        if is_aggregate_like(f) || catalog.resolve(dataset, f) != FieldResolution::Unknown {
            return true;
        }
        dropped.push(f.clone());
        false
    });
    for f in dropped {
        fixed.push(format!(
            "dropped unknown field `{f}` (not in the {dataset} catalog and not covered by discovery)"
        ));
    }
}

fn default_sort(query: &StructuredQuery) -> String {
    let first_aggregate = query
        .fields
        .iter()
        .find(|f| is_aggregate_like(f))
        .or_else(|| {
            query
                .equations
                .iter()
                .find(|e| strip_equation_prefix(e).is_some())
        });
    match first_aggregate {
        Some(col) => format!("-{col}"),
        None => query.dataset.default_sort().to_string(),
    }
}

fn check_aggregate(
    call: &AggregateCall,
    dataset: DatasetKind,
    catalog: &FieldCatalog,
    violations: &mut Vec<String>,
) {
    if !dataset.supports_aggregate(&call.function) {
        push_unique(
            violations,
            format!(
                "aggregate `{}` is not available for dataset {dataset}",
                call.function
            ),
        );
    }
    // The first argument names the aggregated field; the rest are operands.
    if let Some(arg) = call.args.first() {
        let looks_like_field = arg
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if looks_like_field && catalog.resolve(dataset, arg) == FieldResolution::Unknown {
            push_unique(
                violations,
                format!(
                    "`{}` aggregates unknown field `{arg}`; discover {dataset} attributes first",
                    call.render()
                ),
            );
        }
    }
}

fn check_equation(
    column: &str,
    dataset: DatasetKind,
    catalog: &FieldCatalog,
    violations: &mut Vec<String>,
) {
    let Some(body) = strip_equation_prefix(column) else {
        push_unique(
            violations,
            format!("equation `{column}` is not well-formed arithmetic over aggregates"),
        );
        return;
    };
    match parse_equation(body) {
        Ok(eq) => {
            for field in eq.bare_fields() {
                push_unique(
                    violations,
                    format!(
                        "equation `{column}` references bare field `{field}`; equations may only combine aggregate calls"
                    ),
                );
            }
            for call in eq.aggregates() {
                check_aggregate(call, dataset, catalog, violations);
            }
        }
        Err(e) => push_unique(violations, e.to_string()),
    }
}

fn check_columns(query: &StructuredQuery, catalog: &FieldCatalog, violations: &mut Vec<String>) {
    for eq in &query.equations {
        check_equation(eq, query.dataset, catalog, violations);
    }
    for field in &query.fields {
        if strip_equation_prefix(field).is_some() {
            check_equation(field, query.dataset, catalog, violations);
        } else if let Some(call) = parse_aggregate_call(field) {
            check_aggregate(&call, query.dataset, catalog, violations);
        }
    }
}

fn check_sort(query: &StructuredQuery, catalog: &FieldCatalog, violations: &mut Vec<String>) {
    let key = query.sort_key();
    if strip_equation_prefix(key).is_some() {
        // Equation sort keys are always columns by now and checked there.
        return;
    }
    if let Some(call) = parse_aggregate_call(key) {
        check_aggregate(&call, query.dataset, catalog, violations);
    } else if catalog.resolve(query.dataset, key) == FieldResolution::Unknown {
        push_unique(
            violations,
            format!("sort references unknown field `{key}`"),
        );
    }
}

fn check_filter(query: &StructuredQuery, catalog: &FieldCatalog, violations: &mut Vec<String>) {
    for key in filter_keys(&query.query) {
        if let Some(call) = &key.aggregate {
            check_aggregate(call, query.dataset, catalog, violations);
            continue;
        }
        if catalog.resolve(query.dataset, &key.name) == FieldResolution::Unknown {
            push_unique(
                violations,
                format!(
                    "filter references unknown field `{}`; no {} attribute discovery was made for it",
                    key.name, query.dataset
                ),
            );
        }
    }
}

fn check_time_range(query: &StructuredQuery, violations: &mut Vec<String>) {
    match &query.time_range {
        None => {}
        Some(TimeRange::Relative { stats_period }) => {
            if !stats_period_regex().is_match(stats_period) {
                push_unique(
                    violations,
                    format!("statsPeriod `{stats_period}` must look like `24h`, `7d` or `30m`"),
                );
            }
        }
        Some(TimeRange::Absolute { start, end }) => {
            let parsed_start = DateTime::parse_from_rfc3339(start);
            let parsed_end = DateTime::parse_from_rfc3339(end);
            match (parsed_start, parsed_end) {
                (Ok(s), Ok(e)) => {
                    if e < s {
                        push_unique(
                            violations,
                            format!("time range ends (`{end}`) before it starts (`{start}`)"),
                        );
                    }
                }
                (Err(_), _) => push_unique(
                    violations,
                    format!("time range start `{start}` is not an RFC 3339 timestamp"),
                ),
                (_, Err(_)) => push_unique(
                    violations,
                    format!("time range end `{end}` is not an RFC 3339 timestamp"),
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDescriptor, FieldKind};

    fn candidate(dataset: &str, query: &str, fields: &[&str], sort: &str) -> CandidateQuery {
        CandidateQuery {
            dataset: dataset.to_string(),
            query: query.to_string(),
            fields: fields.iter().map(|s| s.to_string()).collect(),
            sort: sort.to_string(),
            time_range: None,
            equations: Vec::new(),
        }
    }

    fn run(c: &CandidateQuery, catalog: &FieldCatalog) -> ValidationReport {
        validate(c, &ValidationContext::new(catalog))
    }

    #[test]
    fn clean_candidate_passes_untouched() {
        let catalog = FieldCatalog::new();
        let c = candidate("errors", "level:error", &["title", "timestamp"], "-timestamp");
        let report = run(&c, &catalog);
        assert!(report.is_valid(), "{:?}", report.violations);
        assert!(report.fixed.is_empty(), "{:?}", report.fixed);
        assert_eq!(report.query.query, "level:error");
    }

    #[test]
    fn appends_missing_sort_aggregate() {
        let catalog = FieldCatalog::new();
        let c = candidate("spans", "", &["span.op", "avg(span.duration)"], "-count()");
        let report = run(&c, &catalog);
        assert_eq!(
            report.query.fields,
            vec!["span.op", "avg(span.duration)", "count()"]
        );
        assert!(report.fixed.iter().any(|f| f.contains("count()")));
        assert!(report.is_valid());
    }

    #[test]
    fn sort_satisfied_by_equations_list() {
        let catalog = FieldCatalog::new();
        let mut c = candidate("spans", "", &["span.op"], "-equation|count() * 2");
        c.equations = vec!["equation|count() * 2".to_string()];
        let report = run(&c, &catalog);
        assert_eq!(report.query.fields, vec!["span.op"]);
        assert!(report.fixed.is_empty());
    }

    #[test]
    fn prefixes_equations_fields_and_sort() {
        let catalog = FieldCatalog::new();
        let mut c = candidate(
            "spans",
            "",
            &["sum(gen_ai.usage.input_tokens) + sum(gen_ai.usage.output_tokens)"],
            "-sum(gen_ai.usage.input_tokens) + sum(gen_ai.usage.output_tokens)",
        );
        c.equations = vec!["count() / 60".to_string()];
        let report = run(&c, &catalog);
        let expected = "equation|sum(gen_ai.usage.input_tokens) + sum(gen_ai.usage.output_tokens)";
        assert_eq!(report.query.fields, vec![expected]);
        assert_eq!(report.query.sort, format!("-{expected}"));
        assert_eq!(report.query.equations, vec!["equation|count() / 60"]);
        assert!(report.is_valid(), "{:?}", report.violations);
    }

    #[test]
    fn fills_default_sort_per_dataset() {
        let catalog = FieldCatalog::new();
        let report = run(&candidate("logs", "", &["message"], ""), &catalog);
        assert_eq!(report.query.sort, "-timestamp");

        let report = run(&candidate("issues", "is:unresolved", &["title"], ""), &catalog);
        assert_eq!(report.query.sort, "-count()");
        assert!(report.query.fields.contains(&"count()".to_string()));

        let report = run(
            &candidate("spans", "", &["span.op", "p95(span.duration)"], ""),
            &catalog,
        );
        assert_eq!(report.query.sort, "-p95(span.duration)");
    }

    #[test]
    fn fills_default_fields() {
        let catalog = FieldCatalog::new();
        let report = run(&candidate("errors", "", &[], "-timestamp"), &catalog);
        assert_eq!(report.query.fields, DatasetKind::Errors.default_fields());
    }

    #[test]
    fn drops_unknown_output_fields_but_keeps_discovered_ones() {
        let mut catalog = FieldCatalog::new();
        catalog.add_descriptors(
            DatasetKind::Errors,
            vec![FieldDescriptor::new("customer.tier", FieldKind::Filterable)],
        );
        let report = run(
            &candidate("errors", "", &["title", "customer.tier", "made.up"], "-timestamp"),
            &catalog,
        );
        assert_eq!(report.query.fields, vec!["title", "customer.tier"]);
        assert!(report.fixed.iter().any(|f| f.contains("made.up")));
    }

    #[test]
    fn unknown_filter_field_is_unfixable_until_discovered() {
        let mut catalog = FieldCatalog::new();
        let c = candidate("errors", "customer.tier:gold", &["title"], "-timestamp");
        let report = run(&c, &catalog);
        assert_eq!(report.violations.len(), 1);
        assert!(report.violations[0].contains("customer.tier"));
        // Filter text is never rewritten.
        assert_eq!(report.query.query, "customer.tier:gold");

        catalog.record_attribute_lookup(DatasetKind::Errors);
        assert!(run(&c, &catalog).is_valid());
    }

    #[test]
    fn bare_field_equation_is_reported() {
        let catalog = FieldCatalog::new();
        let mut c = candidate("spans", "", &["span.op"], "-timestamp");
        c.equations = vec!["equation|sum(span.duration) / span.self_time".to_string()];
        let report = run(&c, &catalog);
        assert!(report
            .violations
            .iter()
            .any(|v| v.contains("bare field `span.self_time`")));
    }

    #[test]
    fn unfixable_unprefixed_equation_is_reported() {
        let catalog = FieldCatalog::new();
        let mut c = candidate("spans", "", &["span.op"], "-timestamp");
        c.equations = vec!["span.duration * 2".to_string()];
        let report = run(&c, &catalog);
        assert_eq!(report.query.equations, vec!["span.duration * 2"]);
        assert!(!report.is_valid());
    }

    #[test]
    fn unknown_dataset_falls_back_to_hint_with_violation() {
        let catalog = FieldCatalog::new();
        let c = candidate("transactions", "", &["title"], "-timestamp");
        let report = validate(
            &c,
            &ValidationContext::new(&catalog).with_dataset_hint(Some(DatasetKind::Spans)),
        );
        assert_eq!(report.query.dataset, DatasetKind::Spans);
        assert!(report.violations[0].contains("transactions"));
    }

    #[test]
    fn aggregate_must_be_legal_for_dataset() {
        let catalog = FieldCatalog::new();
        let report = run(
            &candidate("errors", "", &["title", "p95(span.duration)"], "-timestamp"),
            &catalog,
        );
        assert!(report
            .violations
            .iter()
            .any(|v| v.contains("`p95` is not available for dataset errors")));
    }

    #[test]
    fn logs_accept_p100() {
        let catalog = FieldCatalog::new();
        let report = run(
            &candidate("logs", "", &["p100(severity_number)"], "-p100(severity_number)"),
            &catalog,
        );
        assert!(report.is_valid(), "{:?}", report.violations);
    }

    #[test]
    fn time_range_shapes_are_checked() {
        let catalog = FieldCatalog::new();
        let mut c = candidate("errors", "", &["title"], "-timestamp");
        c.time_range = Some(TimeRange::stats_period("1 week"));
        assert!(!run(&c, &catalog).is_valid());

        c.time_range = Some(TimeRange::absolute(
            "2026-10-15T00:00:00Z",
            "2026-10-14T00:00:00Z",
        ));
        assert!(run(&c, &catalog).violations[0].contains("before it starts"));

        c.time_range = Some(TimeRange::absolute(
            "2026-10-14T00:00:00Z",
            "2026-10-14T23:59:59Z",
        ));
        assert!(run(&c, &catalog).is_valid());
    }

    #[test]
    fn second_pass_is_a_fixed_point() {
        let catalog = FieldCatalog::new();
        let c = candidate("issues", "", &["title", "title", "nope"], "");
        let first = run(&c, &catalog);
        let second = run(&CandidateQuery::from(&first.query), &catalog);
        assert_eq!(first.query, second.query);
        assert!(second.fixed.is_empty(), "{:?}", second.fixed);
    }
}

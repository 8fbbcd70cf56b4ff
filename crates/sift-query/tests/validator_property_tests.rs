use proptest::prelude::*;
use sift_query::catalog::FieldCatalog;
use sift_query::query::strip_sort_direction;
use sift_query::{validate, CandidateQuery, DatasetKind, TimeRange, ValidationContext, EQUATION_PREFIX};

fn dataset_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("errors".to_string()),
        Just("spans".to_string()),
        Just("logs".to_string()),
        Just("issues".to_string()),
        Just("transactions".to_string()),
    ]
}

// A mix of built-in fields, unknown fields, aggregates and equations with
// and without their prefix.
fn column() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("title".to_string()),
        Just("timestamp".to_string()),
        Just("span.op".to_string()),
        Just("message".to_string()),
        Just("customer.tier".to_string()),
        Just("count()".to_string()),
        Just("p95(span.duration)".to_string()),
        Just("count_unique(user.id)".to_string()),
        Just("sum(gen_ai.usage.input_tokens) + sum(gen_ai.usage.output_tokens)".to_string()),
        Just("equation|count() / 60".to_string()),
        Just("equation|sum(span.duration) / span.self_time".to_string()),
    ]
}

fn sort() -> impl Strategy<Value = String> {
    (any::<bool>(), prop_oneof![Just(String::new()), column()]).prop_map(|(desc, col)| {
        if col.is_empty() || !desc {
            col
        } else {
            format!("-{col}")
        }
    })
}

fn filter() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("level:error".to_string()),
        Just("customer.tier:gold !environment:prod".to_string()),
        Just("span.duration:>5s span.op:http.client".to_string()),
        Just("count():>10".to_string()),
    ]
}

fn time_range() -> impl Strategy<Value = Option<TimeRange>> {
    proptest::option::of(prop_oneof![
        Just(TimeRange::stats_period("24h")),
        Just(TimeRange::stats_period("a week")),
        Just(TimeRange::absolute("2026-10-14T00:00:00Z", "2026-10-15T00:00:00Z")),
    ])
}

fn candidate() -> impl Strategy<Value = CandidateQuery> {
    (
        dataset_name(),
        filter(),
        proptest::collection::vec(column(), 0..5),
        sort(),
        time_range(),
        proptest::collection::vec(column(), 0..2),
    )
        .prop_map(|(dataset, query, fields, sort, time_range, equations)| CandidateQuery {
            dataset,
            query,
            fields,
            sort,
            time_range,
            equations,
        })
}

fn catalog() -> impl Strategy<Value = FieldCatalog> {
    (any::<bool>(), any::<bool>()).prop_map(|(errors_lookup, gen_ai_lookup)| {
        let mut catalog = FieldCatalog::new();
        if errors_lookup {
            catalog.record_attribute_lookup(DatasetKind::Errors);
        }
        if gen_ai_lookup {
            catalog.record_namespace_lookup("gen_ai");
        }
        catalog
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn validation_is_idempotent(c in candidate(), catalog in catalog()) {
        let ctx = ValidationContext::new(&catalog).with_dataset_hint(Some(DatasetKind::Spans));
        let first = validate(&c, &ctx);
        let second = validate(&CandidateQuery::from(&first.query), &ctx);
        prop_assert_eq!(&second.query, &first.query);
        prop_assert!(second.fixed.is_empty(), "second pass repaired again: {:?}", second.fixed);
    }

    #[test]
    fn sorted_aggregates_are_always_columns(c in candidate(), catalog in catalog()) {
        let report = validate(&c, &ValidationContext::new(&catalog));
        let key = strip_sort_direction(&report.query.sort);
        prop_assert!(!key.is_empty());
        if key.contains('(') {
            prop_assert!(report.query.has_column(key), "sort `{}` missing from columns", key);
        }
    }

    #[test]
    fn declared_equations_are_prefixed_or_reported(c in candidate(), catalog in catalog()) {
        let report = validate(&c, &ValidationContext::new(&catalog));
        for eq in &report.query.equations {
            prop_assert!(
                eq.starts_with(EQUATION_PREFIX) || !report.violations.is_empty(),
                "unprefixed equation `{}` passed silently", eq
            );
        }
    }

    #[test]
    fn filter_text_is_never_rewritten(c in candidate(), catalog in catalog()) {
        let report = validate(&c, &ValidationContext::new(&catalog));
        prop_assert_eq!(report.query.query, c.query);
    }
}

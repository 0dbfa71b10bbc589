#![allow(missing_docs)]

use std::sync::Once;

use imhotep_groupby::{
    EngineConfig, EngineError, EzSession, Field, FilterMode, MemorySession, Query, Result,
    StatExpr, Term, TermSet,
};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn people_table() -> MemorySession {
    let mut remote = MemorySession::new();
    remote.add_document(|doc| doc.int("age", 20).string("country", "us"));
    remote.add_document(|doc| doc.int("age", 30).string("country", "fr"));
    remote.add_document(|doc| doc.int("age", 45).string("country", "fr"));
    remote.add_document(|doc| doc.int("age", 61).string("country", "de"));
    remote
}

fn people() -> EzSession<MemorySession> {
    EzSession::with_defaults(people_table())
}

fn groups(session: &EzSession<MemorySession>) -> Vec<Option<usize>> {
    (0..4).map(|doc| session.remote().group_of(doc)).collect()
}

#[test]
fn term_filter_over_several_groups_keeps_each_group() -> Result<()> {
    init_tracing();
    let mut remote = MemorySession::new();
    for (bucket, value) in [(1, 5), (1, 6), (2, 7), (3, 8), (3, 5)] {
        remote.add_document(|doc| doc.int("bucket", bucket).int("v", value));
    }
    let mut session = EzSession::with_defaults(remote);
    session.explode_each_group(&Field::int("bucket"), TermSet::Int(vec![1, 2, 3]), None)?;
    assert_eq!(session.num_groups(), 4);

    session.filter_terms(&Field::int("v"), TermSet::Int(vec![7, 5]), FilterMode::Keep)?;
    let assigned: Vec<Option<usize>> = (0..5).map(|doc| session.remote().group_of(doc)).collect();
    assert_eq!(
        assigned,
        vec![Some(1), Some(0), Some(2), Some(0), Some(3)]
    );
    assert_eq!(session.num_groups(), 4);
    Ok(())
}

#[test]
fn exclude_mode_drops_matching_documents() -> Result<()> {
    let mut session = people();
    session.filter_terms(
        &Field::string("country"),
        TermSet::Str(vec!["fr".into()]),
        FilterMode::Exclude,
    )?;
    assert_eq!(groups(&session), vec![Some(1), Some(0), Some(0), Some(1)]);
    Ok(())
}

#[test]
fn term_filter_rejects_mismatched_kind() {
    let mut session = people();
    let result = session.filter_terms(
        &Field::string("country"),
        TermSet::Int(vec![1]),
        FilterMode::Keep,
    );
    assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
}

#[test]
fn predicate_filters_enumerate_terms_first() -> Result<()> {
    let mut session = people();
    session.filter_int_predicate("age", |age| age >= 30, FilterMode::Keep)?;
    assert_eq!(groups(&session), vec![Some(0), Some(1), Some(1), Some(1)]);

    session.filter_string_predicate("country", |c| c.starts_with('d'), FilterMode::Exclude)?;
    assert_eq!(groups(&session), vec![Some(0), Some(1), Some(1), Some(0)]);
    Ok(())
}

#[test]
fn predicate_filters_see_every_term_under_a_default_term_limit() -> Result<()> {
    let config = EngineConfig {
        default_term_limit: 1,
        ..EngineConfig::default()
    };
    let mut session = EzSession::new(people_table(), config);
    session.filter_int_predicate("age", |age| age >= 30, FilterMode::Keep)?;
    assert_eq!(groups(&session), vec![Some(0), Some(1), Some(1), Some(1)]);

    session.filter_string_predicate("country", |c| c == "fr", FilterMode::Exclude)?;
    assert_eq!(groups(&session), vec![Some(0), Some(0), Some(0), Some(1)]);
    Ok(())
}

#[test]
fn query_filter_applies_boolean_predicate() -> Result<()> {
    let mut session = people();
    let query = Query::Or(vec![
        Query::term("country", "us"),
        Query::IntRange {
            field: "age".into(),
            start: 40,
            end: 61,
            end_inclusive: false,
        },
    ]);
    session.filter_query(&query, FilterMode::Keep)?;
    assert_eq!(groups(&session), vec![Some(1), Some(0), Some(1), Some(0)]);
    Ok(())
}

#[test]
fn metric_filter_bounds_are_inclusive() -> Result<()> {
    let mut session = people();
    let age = session.push_single_stat(&StatExpr::int_field("age"))?;
    session.filter_metric(&age, 30, 45, FilterMode::Keep)?;
    assert_eq!(groups(&session), vec![Some(0), Some(1), Some(1), Some(0)]);

    session.filter_metric(&age, 45, 100, FilterMode::Exclude)?;
    assert_eq!(groups(&session), vec![Some(0), Some(1), Some(0), Some(0)]);
    Ok(())
}

#[test]
fn metric_filter_rejects_popped_reference() -> Result<()> {
    let mut session = people();
    let age = session.push_single_stat(&StatExpr::int_field("age"))?;
    session.pop_stat()?;
    let result = session.filter_metric(&age, 0, 10, FilterMode::Keep);
    assert!(matches!(result, Err(EngineError::StaleReference { .. })));
    Ok(())
}

#[test]
fn sample_filter_validates_arguments() {
    let mut session = people();
    let field = Field::string("country");
    for p in [-0.1, 1.5, f64::NAN, f64::INFINITY] {
        let result = session.filter_sample(&field, p, "salt", FilterMode::Keep);
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))), "p = {p}");
    }
    let result = session.filter_sample(&field, 0.5, "", FilterMode::Keep);
    assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
}

#[test]
fn sample_filter_extremes_keep_or_drop_everything() -> Result<()> {
    let field = Field::string("country");

    let mut session = people();
    session.filter_sample(&field, 0.0, "salt", FilterMode::Keep)?;
    assert_eq!(session.remote().group_sizes(), vec![0, 4]);

    let mut session = people();
    session.filter_sample(&field, 1.0, "salt", FilterMode::Keep)?;
    assert_eq!(session.remote().group_sizes(), vec![4, 0]);

    let mut session = people();
    session.filter_sample(&field, 1.0, "salt", FilterMode::Exclude)?;
    assert_eq!(session.remote().group_sizes(), vec![0, 4]);
    Ok(())
}

#[test]
fn regex_filter_requires_full_match_on_string_field() -> Result<()> {
    let mut session = people();
    session.filter_regex(&Field::string("country"), "f|u", FilterMode::Keep)?;
    assert_eq!(session.remote().group_sizes(), vec![4, 0]);

    let mut session = people();
    session.filter_regex(&Field::string("country"), "f.", FilterMode::Keep)?;
    assert_eq!(groups(&session), vec![Some(0), Some(1), Some(1), Some(0)]);

    let result = session.filter_regex(&Field::int("age"), "2.*", FilterMode::Keep);
    assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    Ok(())
}

#[test]
fn distinct_and_top_terms_reflect_current_groups() -> Result<()> {
    let mut session = people();
    assert_eq!(session.distinct(&Field::string("country"))?, vec![0, 3]);

    let top = session.top_terms(&Field::string("country"), 2)?;
    let terms: Vec<(Term, u64)> = top.into_iter().map(|tc| (tc.term, tc.count)).collect();
    assert_eq!(terms, vec![(Term::from("fr"), 2), (Term::from("de"), 1)]);

    session.filter_terms(&Field::string("country"), TermSet::Str(vec!["fr".into()]), FilterMode::Keep)?;
    assert_eq!(session.distinct(&Field::int("age"))?, vec![0, 2]);
    Ok(())
}

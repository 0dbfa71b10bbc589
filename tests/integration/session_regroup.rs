#![allow(missing_docs)]

use std::sync::Once;

use imhotep_groupby::{
    new_group_keys, BucketRange, Direction, EngineConfig, EngineError, EzSession, Field,
    GroupKey, GroupKeys, Limits, MemorySession, Result, StatExpr, Term, TermSet,
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

fn people() -> MemorySession {
    let mut remote = MemorySession::new();
    remote.add_document(|doc| doc.int("age", 20).string("country", "us"));
    remote.add_document(|doc| doc.int("age", 30).string("country", "fr"));
    remote.add_document(|doc| doc.int("age", 20).string("country", "fr"));
    remote
}

fn session_with_limit(remote: MemorySession, rows: u64) -> EzSession<MemorySession> {
    let config = EngineConfig {
        limits: Limits::with_rows_limit(rows),
        ..EngineConfig::default()
    };
    EzSession::new(remote, config)
}

fn label(keys: &GroupKeys, group: usize) -> Result<String> {
    let key = keys
        .get(&group)
        .ok_or_else(|| EngineError::invalid(format!("missing key {group}")))?;
    Ok(key.to_string())
}

#[test]
fn explode_assigns_contiguous_groups_with_labels() -> Result<()> {
    init_tracing();
    let mut session = EzSession::with_defaults(people());
    let keys = session
        .explode_each_group(
            &Field::string("country"),
            TermSet::Str(vec!["us".into(), "fr".into()]),
            Some(&new_group_keys()),
        )?
        .ok_or_else(|| EngineError::invalid("labels requested"))?;

    assert_eq!(session.num_groups(), 3);
    assert_eq!(label(&keys, 1)?, "[fr]");
    assert_eq!(label(&keys, 2)?, "[us]");
    assert_eq!(session.remote().group_sizes(), vec![0, 2, 1]);
    Ok(())
}

#[test]
fn split_all_nests_terms_under_parent_labels() -> Result<()> {
    init_tracing();
    let mut session = EzSession::with_defaults(people());
    let keys = session.split_all(&Field::string("country"), Some(&new_group_keys()), 0)?;
    let keys = session.split_all(&Field::int("age"), keys.as_ref(), 0)?;
    let keys = keys.ok_or_else(|| EngineError::invalid("labels requested"))?;

    assert_eq!(session.num_groups(), 4);
    assert_eq!(label(&keys, 1)?, "[fr, 20]");
    assert_eq!(label(&keys, 2)?, "[fr, 30]");
    assert_eq!(label(&keys, 3)?, "[us, 20]");
    assert_eq!(session.remote().group_of(0), Some(3));
    assert_eq!(session.remote().group_of(1), Some(2));
    assert_eq!(session.remote().group_of(2), Some(1));
    Ok(())
}

#[test]
fn split_all_without_keys_returns_no_labels() -> Result<()> {
    let mut session = EzSession::with_defaults(people());
    assert!(session.split_all(&Field::int("age"), None, 0)?.is_none());
    assert_eq!(session.num_groups(), 3);
    Ok(())
}

#[test]
fn split_all_explode_gives_every_group_every_term() -> Result<()> {
    let mut session = EzSession::with_defaults(people());
    session.split_all(&Field::string("country"), None, 0)?;
    let mut parents = new_group_keys();
    parents.insert(1, GroupKey::singleton(Term::from("fr")));
    parents.insert(2, GroupKey::singleton(Term::from("us")));
    let keys = session
        .split_all_explode(&Field::int("age"), Some(&parents), 0)?
        .ok_or_else(|| EngineError::invalid("labels requested"))?;

    // two groups times two distinct ages, including the empty (us, 30) cell
    assert_eq!(keys.len(), 4);
    assert_eq!(label(&keys, 4)?, "[us, 30]");
    Ok(())
}

#[test]
fn top_k_split_keeps_best_terms_and_restores_stack() -> Result<()> {
    init_tracing();
    let mut session = EzSession::with_defaults(people());
    let keys = session.split_all_top_k(
        &Field::string("country"),
        Some(&new_group_keys()),
        1,
        &StatExpr::count(),
        Direction::Top,
    )?;
    let keys = keys.ok_or_else(|| EngineError::invalid("labels requested"))?;

    assert_eq!(session.stack_depth(), 0);
    assert_eq!(session.num_groups(), 2);
    assert_eq!(label(&keys, 1)?, "[fr]");
    assert_eq!(session.remote().group_sizes(), vec![1, 2]);
    Ok(())
}

#[test]
fn top_k_bottom_direction_prefers_low_scores() -> Result<()> {
    let mut session = EzSession::with_defaults(people());
    session.split_all_top_k(
        &Field::string("country"),
        None,
        1,
        &StatExpr::count(),
        Direction::Bottom,
    )?;
    assert_eq!(session.remote().group_of(0), Some(1));
    assert_eq!(session.remote().group_of(1), Some(0));
    Ok(())
}

#[test]
fn over_limit_explode_fails_before_touching_the_remote() -> Result<()> {
    init_tracing();
    let mut session = session_with_limit(people(), 2);
    let result = session.explode_each_group(
        &Field::int("age"),
        TermSet::Int(vec![20, 30, 40]),
        None,
    );
    assert!(matches!(
        result,
        Err(EngineError::RowLimitExceeded {
            requested: 3,
            limit: 2
        })
    ));
    assert_eq!(session.num_groups(), 2);
    assert_eq!(session.remote().group_sizes(), vec![0, 3]);
    Ok(())
}

#[test]
fn over_limit_split_fails_during_enumeration() -> Result<()> {
    let mut remote = MemorySession::new();
    for value in 0..5 {
        remote.add_document(|doc| doc.int("v", value));
    }
    let mut session = session_with_limit(remote, 3);
    let result = session.split_all(&Field::int("v"), None, 0);
    assert!(matches!(result, Err(EngineError::RowLimitExceeded { .. })));
    assert_eq!(session.num_groups(), 2);
    assert_eq!(session.remote().group_sizes(), vec![0, 5]);
    Ok(())
}

#[test]
fn explode_rejects_mismatched_term_kind() {
    let mut session = EzSession::with_defaults(people());
    let result = session.explode_each_group(
        &Field::int("age"),
        TermSet::Str(vec!["20".into()]),
        None,
    );
    assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
}

fn ranged(values: impl IntoIterator<Item = i64>) -> MemorySession {
    let mut remote = MemorySession::new();
    for value in values {
        remote.add_document(|doc| doc.int("v", value));
    }
    remote
}

#[test]
fn metric_regroup_without_gutters_labels_interior_buckets() -> Result<()> {
    init_tracing();
    let mut session = EzSession::with_defaults(ranged(0..10));
    let v = session.push_single_stat(&StatExpr::int_field("v"))?;
    let keys = session.metric_regroup(
        &v,
        BucketRange::new(0, 10, 2),
        true,
        |value| value.to_string(),
        Some(&new_group_keys()),
    )?;

    assert_eq!(session.num_groups(), 6);
    let labels: Vec<String> = (1..=5)
        .map(|group| label(&keys, group))
        .collect::<Result<_>>()?;
    assert_eq!(
        labels,
        vec!["[[0, 2)]", "[[2, 4)]", "[[4, 6)]", "[[6, 8)]", "[[8, 10)]"]
    );
    assert_eq!(session.remote().group_sizes(), vec![0, 2, 2, 2, 2, 2]);
    Ok(())
}

#[test]
fn metric_regroup_gutters_follow_interior_buckets() -> Result<()> {
    let mut session = EzSession::with_defaults(ranged([-5, 0, 9, 10, 42]));
    let v = session.push_single_stat(&StatExpr::int_field("v"))?;
    let keys = session.metric_regroup(
        &v,
        BucketRange::new(0, 10, 2),
        false,
        |value| value.to_string(),
        None,
    )?;

    assert_eq!(session.num_groups(), 8);
    assert_eq!(
        keys.get(&6).map(|key| key.to_string()),
        Some("[< 0]".to_owned())
    );
    assert_eq!(
        keys.get(&7).map(|key| key.to_string()),
        Some("[>= 10]".to_owned())
    );
    assert_eq!(session.remote().group_of(0), Some(6));
    assert_eq!(session.remote().group_of(2), Some(5));
    assert_eq!(session.remote().group_of(4), Some(7));
    Ok(())
}

#[test]
fn metric_regroup_drops_labels_past_the_remote_group_count() -> Result<()> {
    let mut session = EzSession::with_defaults(ranged([1, 3]));
    let v = session.push_single_stat(&StatExpr::int_field("v"))?;
    let keys = session.metric_regroup(
        &v,
        BucketRange::new(0, 10, 2),
        true,
        |value| format!("{value}s"),
        None,
    )?;
    assert_eq!(session.num_groups(), 3);
    assert_eq!(keys.len(), 2);
    assert_eq!(
        keys.get(&2).map(|key| key.to_string()),
        Some("[[2s, 4s)]".to_owned())
    );
    Ok(())
}

#[test]
fn ragged_metric_range_names_nearest_valid_bounds() -> Result<()> {
    let mut session = EzSession::with_defaults(ranged(0..3));
    let v = session.push_single_stat(&StatExpr::int_field("v"))?;
    let result = session.metric_regroup(
        &v,
        BucketRange::new(0, 10, 3),
        false,
        |value| value.to_string(),
        None,
    );
    match result {
        Err(err @ EngineError::BucketWidth { lower: 9, upper: 12, .. }) => {
            let message = err.to_string();
            assert!(message.contains('9') && message.contains("12"));
        }
        other => panic!("expected bucket width error, got {other:?}"),
    }
    assert_eq!(session.num_groups(), 2);
    Ok(())
}

#[test]
fn metric_regroup_rejects_popped_reference() -> Result<()> {
    let mut session = EzSession::with_defaults(ranged(0..3));
    let v = session.push_single_stat(&StatExpr::int_field("v"))?;
    session.pop_stat()?;
    let result = session.metric_regroup(
        &v,
        BucketRange::new(0, 10, 2),
        false,
        |value| value.to_string(),
        None,
    );
    assert!(matches!(result, Err(EngineError::StaleReference { .. })));
    Ok(())
}

#[test]
fn two_dimensional_regroup_labels_both_axes() -> Result<()> {
    init_tracing();
    let mut remote = MemorySession::new();
    remote.add_document(|doc| doc.int("x", 5).int("y", 5));
    remote.add_document(|doc| doc.int("x", -1).int("y", 20));
    let mut session = EzSession::with_defaults(remote);
    let x = session.push_single_stat(&StatExpr::int_field("x"))?;
    let y = session.push_single_stat(&StatExpr::int_field("y"))?;
    let keys = session.metric_regroup_2d(
        &x,
        BucketRange::new(0, 10, 10),
        &y,
        BucketRange::new(0, 10, 10),
    )?;

    assert_eq!(session.num_groups(), 8);
    assert_eq!(session.remote().group_of(0), Some(5));
    assert_eq!(session.remote().group_of(1), Some(7));
    assert_eq!(label(&keys, 5)?, "[[0, 10), [0, 10)]");
    assert_eq!(label(&keys, 7)?, "[< 0, >= 10]");
    assert_eq!(label(&keys, 1)?, "[< 0, < 0]");
    assert!(!keys.contains_key(&8));
    Ok(())
}

fn session_with_term_limit(remote: MemorySession, default_term_limit: u64) -> EzSession<MemorySession> {
    let config = EngineConfig {
        default_term_limit,
        ..EngineConfig::default()
    };
    EzSession::new(remote, config)
}

#[test]
fn split_on_a_field_without_terms_leaves_groups_alone() -> Result<()> {
    let mut session = EzSession::with_defaults(people());
    let keys = session.split_all(&Field::int("missing"), Some(&new_group_keys()), 0)?;
    assert_eq!(keys.map(|keys| keys.len()), Some(0));
    assert_eq!(session.num_groups(), 2);
    assert_eq!(session.remote().group_sizes(), vec![0, 3]);
    Ok(())
}

#[test]
fn exploding_by_no_terms_leaves_groups_alone() -> Result<()> {
    let mut session = EzSession::with_defaults(people());
    let keys = session.explode_each_group(&Field::int("age"), TermSet::Int(Vec::new()), None)?;
    assert!(keys.is_none());
    assert_eq!(session.num_groups(), 2);
    assert_eq!(session.remote().group_sizes(), vec![0, 3]);
    Ok(())
}

#[test]
fn top_k_ranks_every_term_despite_a_default_term_limit() -> Result<()> {
    let mut session = session_with_term_limit(people(), 1);
    session.split_all_top_k(
        &Field::string("country"),
        None,
        1,
        &StatExpr::count(),
        Direction::Bottom,
    )?;
    assert_eq!(session.remote().group_of(0), Some(1));
    assert_eq!(session.remote().group_of(1), Some(0));
    assert_eq!(session.stack_depth(), 0);
    Ok(())
}

#[test]
fn default_term_limit_still_caps_caller_scans() -> Result<()> {
    let mut session = session_with_term_limit(people(), 1);
    session.split_all(&Field::string("country"), None, 0)?;
    assert_eq!(session.num_groups(), 2);
    assert_eq!(session.remote().group_sizes(), vec![1, 2]);
    Ok(())
}

#[test]
fn oversized_bucket_count_fails_before_touching_the_remote() -> Result<()> {
    let mut session = EzSession::with_defaults(people());
    session.explode_each_group(&Field::int("age"), TermSet::Int(vec![20, 30]), None)?;
    session.explode_each_group(&Field::string("country"), TermSet::Str(vec!["fr".into(), "us".into()]), None)?;
    assert_eq!(session.num_groups(), 5);
    let age = session.push_single_stat(&StatExpr::int_field("age"))?;
    let before = session.remote().group_sizes();

    let result = session.metric_regroup(
        &age,
        BucketRange::new(0, i64::MAX, 1),
        false,
        |value| value.to_string(),
        None,
    );
    assert!(matches!(result, Err(EngineError::RowLimitExceeded { .. })));

    let result = session.metric_regroup_2d(
        &age,
        BucketRange::new(0, i64::MAX, 1),
        &age,
        BucketRange::new(0, i64::MAX, 1),
    );
    assert!(matches!(result, Err(EngineError::RowLimitExceeded { .. })));

    let result = session.metric_regroup(
        &age,
        BucketRange::new(i64::MIN, i64::MAX, 1),
        true,
        |value| value.to_string(),
        None,
    );
    assert!(matches!(result, Err(EngineError::InvalidArgument(_))));

    assert_eq!(session.num_groups(), 5);
    assert_eq!(session.remote().group_sizes(), before);
    Ok(())
}

#![allow(missing_docs)]

use std::sync::Once;

use imhotep_groupby::stats::BinOp;
use imhotep_groupby::{
    EngineError, EzSession, Field, FtgsRow, MemorySession, Query, Result, StatExpr,
    StatReference,
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

fn ads() -> EzSession<MemorySession> {
    let mut remote = MemorySession::new();
    remote.add_document(|doc| doc.int("clicks", 3).int("impressions", 10).string("site", "a"));
    remote.add_document(|doc| doc.int("clicks", 1).int("impressions", 10).string("site", "b"));
    remote.add_document(|doc| doc.int("clicks", 0).int("impressions", 5).string("site", "b"));
    EzSession::with_defaults(remote)
}

#[test]
fn push_depth_deltas_follow_slot_counts() -> Result<()> {
    init_tracing();
    let mut session = ads();
    let clicks = session.push_stat(&StatExpr::int_field("clicks"))?;
    assert_eq!(session.stack_depth(), 1);

    let ctr = session.push_stat(&StatExpr::agg_div(
        StatExpr::int_field("clicks"),
        StatExpr::int_field("impressions"),
    )?)?;
    assert_eq!(session.stack_depth(), 3);
    assert!(matches!(ctr, StatReference::Composite(_)));

    session.pop_stat()?;
    assert_eq!(session.stack_depth(), 1);
    assert!(!ctr.is_valid());
    assert!(clicks.is_valid());

    session.pop_stat()?;
    assert_eq!(session.stack_depth(), 0);
    assert!(matches!(
        session.group_stats(&clicks),
        Err(EngineError::StaleReference { .. })
    ));
    Ok(())
}

#[test]
fn aggregate_ratio_is_computed_per_group() -> Result<()> {
    let mut session = ads();
    session.split_all(&Field::string("site"), None, 0)?;
    let ctr = session.push_stat(&StatExpr::agg_div(
        StatExpr::int_field("clicks"),
        StatExpr::int_field("impressions"),
    )?)?;
    let values = session.group_stats(&ctr)?;
    assert_eq!(values.len(), 3);
    assert!((values[1] - 0.3).abs() < 1e-9);
    assert!((values[2] - 1.0 / 15.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn compiled_expressions_evaluate_on_the_remote() -> Result<()> {
    let mut session = ads();
    let expr = StatExpr::add([
        StatExpr::mul([StatExpr::int_field("clicks"), StatExpr::constant(2)])?,
        StatExpr::has_string("site", "b"),
        StatExpr::count(),
    ])?;
    assert_eq!(
        expr.pushes()?,
        vec!["clicks", "2", "*", "hasstr site:b", "+", "count()", "+"]
    );
    let total = session.push_stat(&expr)?;
    // (6 + 0 + 1) + (2 + 1 + 1) + (0 + 1 + 1)
    assert_eq!(session.group_stats(&total)?, vec![0.0, 13.0]);
    Ok(())
}

#[test]
fn equality_with_constant_becomes_term_presence() -> Result<()> {
    let mut session = ads();
    let expr = StatExpr::is_equal([StatExpr::int_field("impressions"), StatExpr::constant(10)])?;
    assert_eq!(expr, StatExpr::has_int("impressions", 10));
    let tens = session.push_stat(&expr)?;
    assert_eq!(session.group_stats(&tens)?, vec![0.0, 2.0]);

    let general = StatExpr::is_equal([StatExpr::int_field("clicks"), StatExpr::int_field("impressions")])?;
    assert!(matches!(general, StatExpr::BinOp { op: BinOp::Equal, .. }));
    Ok(())
}

#[test]
fn query_stats_round_trip_through_the_token() -> Result<()> {
    let mut session = ads();
    let matches = session.push_stat(&StatExpr::query(Query::negate(Query::term("site", "a"))))?;
    assert_eq!(session.group_stats(&matches)?, vec![0.0, 2.0]);
    Ok(())
}

#[test]
fn compound_query_stats_evaluate_on_the_remote() -> Result<()> {
    let mut session = ads();
    let busy_b = Query::And(vec![
        Query::term("site", "b"),
        Query::term("impressions", 10),
    ]);
    let either = Query::Or(vec![Query::term("site", "a"), Query::term("clicks", 0)]);
    let neither = Query::negate(either.clone());

    let busy_b = session.push_stat(&StatExpr::query(busy_b))?;
    let either = session.push_stat(&StatExpr::query(either))?;
    let neither = session.push_stat(&StatExpr::query(neither))?;
    assert_eq!(session.group_stats(&busy_b)?, vec![0.0, 1.0]);
    assert_eq!(session.group_stats(&either)?, vec![0.0, 2.0]);
    assert_eq!(session.group_stats(&neither)?, vec![0.0, 1.0]);
    Ok(())
}

#[test]
fn aggregates_cannot_feed_per_document_operators() -> Result<()> {
    let ratio = StatExpr::agg_div(StatExpr::int_field("clicks"), StatExpr::count())?;
    assert!(matches!(
        StatExpr::add([ratio.clone(), StatExpr::count()]),
        Err(EngineError::AggregateComposition)
    ));
    assert!(matches!(
        StatExpr::abs(ratio),
        Err(EngineError::AggregateComposition)
    ));
    assert!(matches!(
        StatExpr::agg_div_const(StatExpr::count(), 0),
        Err(EngineError::DivideByZero)
    ));
    Ok(())
}

#[test]
fn stale_reference_is_rejected_during_ftgs() -> Result<()> {
    let mut session = ads();
    let clicks = session.push_stat(&StatExpr::int_field("clicks"))?;
    let mut sums = Vec::new();
    session.ftgs_iterate(
        &[Field::string("site")],
        &mut |row: &FtgsRow<'_>| -> Result<()> {
            sums.push(row.stats.get(&clicks)?);
            Ok(())
        },
        0,
    )?;
    assert_eq!(sums, vec![3.0, 1.0]);

    session.pop_stat()?;
    let result = session.ftgs_iterate(
        &[Field::string("site")],
        &mut |row: &FtgsRow<'_>| row.stats.get(&clicks).map(|_| ()),
        0,
    );
    assert!(matches!(result, Err(EngineError::StaleReference { .. })));
    Ok(())
}

#[test]
fn closing_the_session_revokes_every_reference() -> Result<()> {
    let mut session = ads();
    let clicks = session.push_stat(&StatExpr::int_field("clicks"))?;
    let stats = session.close_and_get_performance_stats()?;
    assert!(stats.map_or(false, |s| s.calls >= 1));
    assert!(!clicks.is_valid());
    assert_eq!(clicks.require_valid().map_err(|e| e.code()), Err("StaleReference"));
    Ok(())
}

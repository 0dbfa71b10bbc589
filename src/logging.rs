//! Tracing decorator for remote sessions.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, warn};

use crate::remote::{
    FtgsIterator, GroupMultiRemapRule, GroupRemap, MetricAxis, PerformanceStats, QueryRemapRule,
    RemoteResult, RemoteSession, TermCount,
};

/// Wraps a [`RemoteSession`] and emits one `remote.call` event per call.
///
/// Successful calls are logged at debug level with their latency; failures
/// are logged at warn level and returned unchanged.
pub struct LoggingSession<S> {
    inner: S,
    session_id: String,
}

impl<S: RemoteSession> LoggingSession<S> {
    /// Decorates `inner`; `session_id` is attached to every event.
    pub fn new(inner: S, session_id: impl Into<String>) -> Self {
        Self {
            inner,
            session_id: session_id.into(),
        }
    }

    /// Wrapped session.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwraps the decorated session.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn traced<T, F>(&mut self, op: &'static str, call: F) -> RemoteResult<T>
    where
        F: FnOnce(&mut S) -> RemoteResult<T>,
    {
        let started = Instant::now();
        let result = call(&mut self.inner);
        let elapsed_us = started.elapsed().as_micros() as u64;
        match &result {
            Ok(_) => debug!(session = %self.session_id, op, elapsed_us, "remote.call"),
            Err(err) => warn!(
                session = %self.session_id,
                op,
                elapsed_us,
                error = %err,
                "remote.call_failed"
            ),
        }
        result
    }
}

impl<S: RemoteSession> RemoteSession for LoggingSession<S> {
    fn push_stats(&mut self, tokens: &[String]) -> RemoteResult<usize> {
        debug!(session = %self.session_id, tokens = ?tokens, "remote.push_stats");
        self.traced("push_stats", |s| s.push_stats(tokens))
    }

    fn pop_stat(&mut self) -> RemoteResult<usize> {
        self.traced("pop_stat", |s| s.pop_stat())
    }

    fn group_stats(&mut self, stat_index: usize) -> RemoteResult<Vec<i64>> {
        self.traced("group_stats", |s| s.group_stats(stat_index))
    }

    fn metric_filter(
        &mut self,
        stat_index: usize,
        min: i64,
        max: i64,
        negate: bool,
    ) -> RemoteResult<usize> {
        self.traced("metric_filter", |s| s.metric_filter(stat_index, min, max, negate))
    }

    fn int_or_regroup(
        &mut self,
        field: &str,
        terms: &[i64],
        remap: GroupRemap,
    ) -> RemoteResult<()> {
        self.traced("int_or_regroup", |s| s.int_or_regroup(field, terms, remap))
    }

    fn string_or_regroup(
        &mut self,
        field: &str,
        terms: &[String],
        remap: GroupRemap,
    ) -> RemoteResult<()> {
        self.traced("string_or_regroup", |s| s.string_or_regroup(field, terms, remap))
    }

    fn regroup(&mut self, rule: &QueryRemapRule) -> RemoteResult<()> {
        debug!(session = %self.session_id, query = %rule.query, "remote.regroup");
        self.traced("regroup", |s| s.regroup(rule))
    }

    fn regroup_with_batch(
        &mut self,
        rules: &[GroupMultiRemapRule],
        error_on_collisions: bool,
    ) -> RemoteResult<usize> {
        self.traced("regroup_with_batch", |s| {
            s.regroup_with_batch(rules, error_on_collisions)
        })
    }

    fn random_regroup(
        &mut self,
        field: &str,
        is_int: bool,
        salt: &str,
        p: f64,
        remap: GroupRemap,
    ) -> RemoteResult<()> {
        self.traced("random_regroup", |s| {
            s.random_regroup(field, is_int, salt, p, remap)
        })
    }

    fn regex_regroup(
        &mut self,
        field: &str,
        pattern: &str,
        remap: GroupRemap,
    ) -> RemoteResult<()> {
        self.traced("regex_regroup", |s| s.regex_regroup(field, pattern, remap))
    }

    fn ftgs_iterator(
        &mut self,
        int_fields: &[String],
        string_fields: &[String],
        term_limit: u64,
    ) -> RemoteResult<Box<dyn FtgsIterator>> {
        self.traced("ftgs_iterator", |s| {
            s.ftgs_iterator(int_fields, string_fields, term_limit)
        })
    }

    fn subset_ftgs_iterator(
        &mut self,
        int_terms: &BTreeMap<String, Vec<i64>>,
        string_terms: &BTreeMap<String, Vec<String>>,
    ) -> RemoteResult<Box<dyn FtgsIterator>> {
        self.traced("subset_ftgs_iterator", |s| {
            s.subset_ftgs_iterator(int_terms, string_terms)
        })
    }

    fn distinct(&mut self, field: &str, is_int: bool) -> RemoteResult<Vec<i64>> {
        self.traced("distinct", |s| s.distinct(field, is_int))
    }

    fn metric_regroup(&mut self, axis: MetricAxis, no_gutters: bool) -> RemoteResult<usize> {
        self.traced("metric_regroup", |s| s.metric_regroup(axis, no_gutters))
    }

    fn metric_regroup_2d(&mut self, x: MetricAxis, y: MetricAxis) -> RemoteResult<usize> {
        self.traced("metric_regroup_2d", |s| s.metric_regroup_2d(x, y))
    }

    fn approximate_top_terms(
        &mut self,
        field: &str,
        is_int: bool,
        k: usize,
    ) -> RemoteResult<Vec<TermCount>> {
        self.traced("approximate_top_terms", |s| {
            s.approximate_top_terms(field, is_int, k)
        })
    }

    fn close(&mut self) -> RemoteResult<()> {
        self.traced("close", |s| s.close())
    }

    fn close_and_get_performance_stats(&mut self) -> RemoteResult<Option<PerformanceStats>> {
        let stats = self.traced("close_and_get_performance_stats", |s| {
            s.close_and_get_performance_stats()
        })?;
        if let Some(stats) = &stats {
            debug!(
                session = %self.session_id,
                calls = stats.calls,
                wall_clock_ms = stats.wall_clock_ms,
                "remote.performance"
            );
        }
        Ok(stats)
    }
}

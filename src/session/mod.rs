//! The group-by session: stat stack, FTGS scans, filters and regroups.
//!
//! [`EzSession`] owns a [`RemoteSession`] and mirrors the two pieces of remote
//! state the engine reasons about: the stat stack depth and the number of
//! groups. Groups are numbered `1..num_groups`; group 0 collects filtered-out
//! documents and is never a regroup target.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::{EngineConfig, Limits};
use crate::error::{EngineError, Result};
use crate::field::{Field, TermSet};
use crate::ftgs::{self, FtgsCallback, FtgsRow, FtgsRows, ScopedIterator};
use crate::remote::{GroupRemap, PerformanceStats, RemoteSession, TermCount};
use crate::stats::{SingleStatReference, StatExpr, StatReference, StatStack};

mod filter;
mod regroup;

pub use regroup::BucketRange;

/// Direction of a filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    /// Matching documents stay in their group; the rest move to group 0.
    Keep,
    /// Matching documents move to group 0; the rest stay.
    Exclude,
}

impl FilterMode {
    /// Binary remap applying this mode to `group`.
    pub fn remap(self, group: usize) -> GroupRemap {
        match self {
            FilterMode::Keep => GroupRemap::keep(group),
            FilterMode::Exclude => GroupRemap::exclude(group),
        }
    }
}

/// Group-by session over a remote multi-group store.
pub struct EzSession<S: RemoteSession> {
    remote: S,
    stack: StatStack,
    config: EngineConfig,
    num_groups: usize,
    closed: bool,
}

impl<S: RemoteSession> EzSession<S> {
    /// Wraps a freshly opened remote session, where every document is in group 1.
    pub fn new(remote: S, config: EngineConfig) -> Self {
        Self {
            remote,
            stack: StatStack::new(),
            config,
            num_groups: 2,
            closed: false,
        }
    }

    /// Wraps `remote` with [`EngineConfig::default`].
    pub fn with_defaults(remote: S) -> Self {
        Self::new(remote, EngineConfig::default())
    }

    /// Underlying remote session.
    pub fn remote(&self) -> &S {
        &self.remote
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Active row ceilings.
    pub fn limits(&self) -> &Limits {
        &self.config.limits
    }

    /// Exclusive upper bound of the active group ids.
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    /// Number of remote stack slots in use.
    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Pushes any stat, aggregates included.
    pub fn push_stat(&mut self, expr: &StatExpr) -> Result<StatReference> {
        self.stack.push(&mut self.remote, expr)
    }

    /// Pushes a stat that must occupy a single addressable slot.
    pub fn push_single_stat(&mut self, expr: &StatExpr) -> Result<SingleStatReference> {
        self.stack.push_single(&mut self.remote, expr)
    }

    /// Pops the most recently pushed stat; its reference becomes stale.
    pub fn pop_stat(&mut self) -> Result<StatReference> {
        self.stack.pop(&mut self.remote)
    }

    /// Per-group values of a live reference, indexed by group id.
    pub fn group_stats(&mut self, reference: &StatReference) -> Result<Vec<f64>> {
        self.stack.group_stats(&mut self.remote, reference)
    }

    /// Number of distinct terms of `field` per group, indexed by group id.
    pub fn distinct(&mut self, field: &Field) -> Result<Vec<i64>> {
        Ok(self.remote.distinct(field.name(), field.is_int())?)
    }

    /// Approximate `k` most frequent terms of `field`.
    pub fn top_terms(&mut self, field: &Field, k: usize) -> Result<Vec<TermCount>> {
        Ok(self
            .remote
            .approximate_top_terms(field.name(), field.is_int(), k)?)
    }

    fn effective_term_limit(&self, term_limit: u64) -> u64 {
        if term_limit == 0 {
            self.config.default_term_limit
        } else {
            term_limit
        }
    }

    /// Scans `fields` in order and hands every row to `callback`.
    ///
    /// `term_limit == 0` falls back to the configured default; a default of
    /// `0` means unlimited.
    pub fn ftgs_iterate(
        &mut self,
        fields: &[Field],
        callback: &mut dyn FtgsCallback,
        term_limit: u64,
    ) -> Result<()> {
        let term_limit = self.effective_term_limit(term_limit);
        self.scan_fields(fields, callback, term_limit)
    }

    // Raw scan: `term_limit` is passed through as is, `0` meaning unlimited.
    fn scan_fields(
        &mut self,
        fields: &[Field],
        callback: &mut dyn FtgsCallback,
        term_limit: u64,
    ) -> Result<()> {
        for run in ftgs::field_runs(fields) {
            let mut iter = run.open(&mut self.remote, term_limit)?;
            ftgs::drive(&mut *iter, &self.stack, callback)?;
        }
        Ok(())
    }

    /// Scans only the listed terms of each field.
    ///
    /// Term lists are sorted and de-duplicated first. Integer fields are
    /// visited before string fields, each kind in field name order.
    pub fn ftgs_subset_iterate(
        &mut self,
        subset: &[(Field, TermSet)],
        callback: &mut dyn FtgsCallback,
    ) -> Result<()> {
        let mut int_terms: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        let mut string_terms: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (field, terms) in subset {
            match (field, terms) {
                (Field::Int(name), TermSet::Int(values)) => int_terms
                    .entry(name.clone())
                    .or_default()
                    .extend_from_slice(values),
                (Field::Str(name), TermSet::Str(values)) => string_terms
                    .entry(name.clone())
                    .or_default()
                    .extend_from_slice(values),
                _ => return Err(term_kind_mismatch(field)),
            }
        }
        for values in int_terms.values_mut() {
            values.sort_unstable();
            values.dedup();
        }
        for values in string_terms.values_mut() {
            values.sort_unstable();
            values.dedup();
        }
        let mut iter = ScopedIterator::new(
            self.remote
                .subset_ftgs_iterator(&int_terms, &string_terms)?,
        );
        ftgs::drive(&mut *iter, &self.stack, callback)
    }

    /// Lazily scans `fields`, mapping every row through `mapper`.
    ///
    /// The session stays borrowed until the iterator is dropped, so no regroup
    /// can run while a scan is open.
    pub fn ftgs_rows<F, T>(
        &mut self,
        fields: &[Field],
        term_limit: u64,
        mapper: F,
    ) -> FtgsRows<'_, S, F>
    where
        F: FnMut(&FtgsRow<'_>) -> Result<T>,
    {
        let term_limit = self.effective_term_limit(term_limit);
        FtgsRows::new(
            &mut self.remote,
            &self.stack,
            ftgs::field_runs(fields),
            term_limit,
            mapper,
        )
    }

    fn warn_multi_group(&self, filter: &'static str) {
        if self.config.warn_on_multi_group_filter && self.num_groups > 2 {
            warn!(
                num_groups = self.num_groups,
                filter, "session.filter.multi_group"
            );
        }
    }

    /// Closes the remote session and revokes every live reference.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stack.revoke_all();
        self.remote.close()?;
        debug!("session.close");
        Ok(())
    }

    /// Closes the session and returns the remote's resource usage.
    ///
    /// Returns `None` when the session was already closed.
    pub fn close_and_get_performance_stats(&mut self) -> Result<Option<PerformanceStats>> {
        if self.closed {
            return Ok(None);
        }
        self.closed = true;
        self.stack.revoke_all();
        Ok(self.remote.close_and_get_performance_stats()?)
    }
}

impl<S: RemoteSession> Drop for EzSession<S> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "session.close_failed");
        }
    }
}

fn term_kind_mismatch(field: &Field) -> EngineError {
    let expected = if field.is_int() { "integer" } else { "string" };
    EngineError::invalid(format!("field {field} expects {expected} terms"))
}

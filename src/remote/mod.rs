//! Contract of the remote multi-group session.
//!
//! The engine talks to the column store exclusively through [`RemoteSession`]
//! and [`FtgsIterator`]. Every call is a blocking round trip; the session is
//! stateful (stat stack, document-to-group assignment) and expects one caller
//! at a time, which `&mut self` receivers enforce.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::field::{Term, TermRef};

/// Remap rules and document predicates.
pub mod rules;

pub use rules::{GroupMultiRemapRule, Query, QueryRemapRule, RegroupCondition};

/// Result alias for remote calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Destination groups for a single-target binary regroup.
///
/// Documents of `target` move to `positive` when they match and to
/// `negative` otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupRemap {
    /// Source group.
    pub target: usize,
    /// Destination for non-matching documents.
    pub negative: usize,
    /// Destination for matching documents.
    pub positive: usize,
}

impl GroupRemap {
    /// Matching documents stay in `group`, the rest go to group 0.
    pub const fn keep(group: usize) -> Self {
        Self {
            target: group,
            negative: 0,
            positive: group,
        }
    }

    /// Matching documents go to group 0, the rest stay in `group`.
    pub const fn exclude(group: usize) -> Self {
        Self {
            target: group,
            negative: group,
            positive: 0,
        }
    }
}

/// One axis of a metric bucketing call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetricAxis {
    /// Stack index of the stat to bucket by.
    pub stat_index: usize,
    /// Inclusive lower bound of the first interior bucket.
    pub min: i64,
    /// Exclusive upper bound of the last interior bucket.
    pub max: i64,
    /// Width of each interior bucket.
    pub interval: i64,
}

impl MetricAxis {
    /// Number of interior buckets, `ceil((max - min) / interval)`.
    ///
    /// Zero for an empty range or a non-positive interval. Computed in wide
    /// arithmetic, so any pair of `i64` bounds is accepted.
    pub fn interior_buckets(&self) -> u64 {
        let span = i128::from(self.max) - i128::from(self.min);
        if span <= 0 || self.interval <= 0 {
            return 0;
        }
        let buckets = (span - 1) / i128::from(self.interval) + 1;
        u64::try_from(buckets).unwrap_or(u64::MAX)
    }

    /// 0-based interior bucket holding `value`, which must lie in `[min, max)`.
    pub fn bucket_of(&self, value: i64) -> u64 {
        value.abs_diff(self.min) / self.interval.unsigned_abs()
    }
}

/// Resource usage reported when a session closes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// Wall clock time spent serving the session, in milliseconds.
    pub wall_clock_ms: u64,
    /// CPU time spent serving the session, in milliseconds.
    pub cpu_time_ms: u64,
    /// Peak memory held by the session, in bytes.
    pub max_memory_bytes: u64,
    /// Bytes written to temporary files during FTGS.
    pub ftgs_temp_file_bytes: u64,
    /// Number of remote calls the session served.
    pub calls: u64,
}

/// A term with its approximate document frequency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCount {
    /// The term.
    pub term: Term,
    /// Approximate number of documents containing it.
    pub count: u64,
}

/// Field-term-group-stats cursor.
///
/// The cursor walks fields, then terms within the current field in ascending
/// order, then groups within the current term in ascending order. The
/// accessors are only meaningful after the matching `next_*` call returned
/// `true`.
pub trait FtgsIterator {
    /// Advances to the next field.
    fn next_field(&mut self) -> RemoteResult<bool>;
    /// Name of the current field.
    fn field_name(&self) -> &str;
    /// Whether the current field is an integer field.
    fn field_is_int(&self) -> bool;
    /// Advances to the next term of the current field.
    fn next_term(&mut self) -> RemoteResult<bool>;
    /// Current term.
    fn term(&self) -> TermRef<'_>;
    /// Advances to the next group containing the current term.
    fn next_group(&mut self) -> RemoteResult<bool>;
    /// Current group.
    fn group(&self) -> usize;
    /// Copies the stat vector of the current (field, term, group) into `stats`.
    ///
    /// `stats` has one slot per pushed stat, indexed by stack depth.
    fn group_stats(&mut self, stats: &mut [i64]) -> RemoteResult<()>;
    /// Releases the cursor. Calling it more than once must be harmless.
    fn close(&mut self) -> RemoteResult<()>;
}

/// Stateful remote session executing stat pushes, regroups and FTGS scans.
pub trait RemoteSession {
    /// Pushes primitive stat tokens in order and returns the new stack depth.
    fn push_stats(&mut self, tokens: &[String]) -> RemoteResult<usize>;

    /// Pops the top stack slot and returns the new stack depth.
    fn pop_stat(&mut self) -> RemoteResult<usize>;

    /// Per-group sums of the stat at `stat_index`, indexed by group id.
    fn group_stats(&mut self, stat_index: usize) -> RemoteResult<Vec<i64>>;

    /// Moves documents whose stat value falls outside `[min, max]` to group 0
    /// (or inside, when `negate` is set). Returns the new group count.
    fn metric_filter(
        &mut self,
        stat_index: usize,
        min: i64,
        max: i64,
        negate: bool,
    ) -> RemoteResult<usize>;

    /// Binary regroup on an integer field; `terms` must be sorted ascending.
    fn int_or_regroup(&mut self, field: &str, terms: &[i64], remap: GroupRemap)
        -> RemoteResult<()>;

    /// Binary regroup on a string field; `terms` must be sorted ascending.
    fn string_or_regroup(
        &mut self,
        field: &str,
        terms: &[String],
        remap: GroupRemap,
    ) -> RemoteResult<()>;

    /// Binary regroup driven by an arbitrary predicate.
    fn regroup(&mut self, rule: &QueryRemapRule) -> RemoteResult<()>;

    /// Applies multi-way remap rules in one batch and returns the new group count.
    ///
    /// Documents in groups not targeted by any rule move to group 0.
    fn regroup_with_batch(
        &mut self,
        rules: &[GroupMultiRemapRule],
        error_on_collisions: bool,
    ) -> RemoteResult<usize>;

    /// Salted pseudo-random regroup: a document whose hashed term falls below
    /// `p` goes to the negative group, otherwise to the positive group.
    fn random_regroup(
        &mut self,
        field: &str,
        is_int: bool,
        salt: &str,
        p: f64,
        remap: GroupRemap,
    ) -> RemoteResult<()>;

    /// Regroup by full-match of `pattern` against any term of a string field.
    fn regex_regroup(&mut self, field: &str, pattern: &str, remap: GroupRemap)
        -> RemoteResult<()>;

    /// Opens an FTGS cursor over whole fields.
    ///
    /// Int fields are visited in order, then string fields in order. A
    /// non-zero `term_limit` caps the number of terms produced per field. The
    /// cursor owns what it reads; it does not borrow the session.
    fn ftgs_iterator(
        &mut self,
        int_fields: &[String],
        string_fields: &[String],
        term_limit: u64,
    ) -> RemoteResult<Box<dyn FtgsIterator>>;

    /// Opens an FTGS cursor restricted to explicit, ascending term lists.
    fn subset_ftgs_iterator(
        &mut self,
        int_terms: &BTreeMap<String, Vec<i64>>,
        string_terms: &BTreeMap<String, Vec<String>>,
    ) -> RemoteResult<Box<dyn FtgsIterator>>;

    /// Number of distinct terms of `field` per group, indexed by group id.
    fn distinct(&mut self, field: &str, is_int: bool) -> RemoteResult<Vec<i64>>;

    /// Buckets every active group by a stat and returns the new group count.
    fn metric_regroup(&mut self, axis: MetricAxis, no_gutters: bool) -> RemoteResult<usize>;

    /// Buckets every document on two stats at once and returns the new group count.
    fn metric_regroup_2d(&mut self, x: MetricAxis, y: MetricAxis) -> RemoteResult<usize>;

    /// Approximate `k` most frequent terms of a field.
    fn approximate_top_terms(
        &mut self,
        field: &str,
        is_int: bool,
        k: usize,
    ) -> RemoteResult<Vec<TermCount>>;

    /// Releases the session.
    fn close(&mut self) -> RemoteResult<()>;

    /// Releases the session and returns its resource usage, if tracked.
    fn close_and_get_performance_stats(&mut self) -> RemoteResult<Option<PerformanceStats>>;
}

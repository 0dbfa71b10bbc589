use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::field::{Field, Term, TermSet};
use crate::ftgs::FtgsRow;
use crate::group_key::{GroupKey, GroupKeys};
use crate::remote::{GroupMultiRemapRule, MetricAxis, RegroupCondition, RemoteSession};
use crate::stats::{SingleStatReference, StatExpr, StatReference};
use crate::topk::{Direction, TopK};

use super::{term_kind_mismatch, EzSession};

/// Interior bucket range of a metric regroup: `[min, max)` cut every `interval`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketRange {
    /// Lower bound of the first bucket.
    pub min: i64,
    /// Upper bound of the last bucket.
    pub max: i64,
    /// Bucket width.
    pub interval: i64,
}

impl BucketRange {
    /// Builds a range; call [`BucketRange::validate`] before use.
    pub const fn new(min: i64, max: i64, interval: i64) -> Self {
        Self { min, max, interval }
    }

    /// Checks that the range is non-empty and evenly divided by `interval`.
    ///
    /// On a ragged range the error names the nearest valid `max` below and
    /// above the requested one.
    pub fn validate(&self) -> Result<()> {
        if self.interval <= 0 {
            return Err(EngineError::invalid(format!(
                "bucket interval must be positive, got {}",
                self.interval
            )));
        }
        if self.max <= self.min {
            return Err(EngineError::invalid(format!(
                "bucket max {} must be greater than min {}",
                self.max, self.min
            )));
        }
        let range = self.max.checked_sub(self.min).ok_or_else(|| {
            EngineError::invalid(format!(
                "bucket range [{}, {}) is wider than i64",
                self.min, self.max
            ))
        })?;
        let remainder = range % self.interval;
        if remainder != 0 {
            let lower = self.max - remainder;
            return Err(EngineError::BucketWidth {
                range,
                interval: self.interval,
                lower,
                upper: lower.saturating_add(self.interval),
            });
        }
        Ok(())
    }

    /// Number of interior buckets; zero for an empty range.
    pub fn interior_buckets(&self) -> u64 {
        self.axis(0).interior_buckets()
    }

    fn axis(&self, stat_index: usize) -> MetricAxis {
        MetricAxis {
            stat_index,
            min: self.min,
            max: self.max,
            interval: self.interval,
        }
    }

    // Lower bound of the 0-based interior bucket `idx`.
    fn lower(&self, idx: usize) -> i64 {
        self.min + idx as i64 * self.interval
    }
}

impl<S: RemoteSession> EzSession<S> {
    /// Splits every active group into one group per listed term.
    ///
    /// New ids are assigned contiguously from 1, group by group and term by
    /// term. Documents matching none of the terms move to group 0. When `keys`
    /// is given, the returned map labels each new group with its parent's key
    /// plus the term. An empty term list leaves the groups untouched.
    pub fn explode_each_group(
        &mut self,
        field: &Field,
        terms: TermSet,
        keys: Option<&GroupKeys>,
    ) -> Result<Option<GroupKeys>> {
        if field.is_int() != terms.is_int() {
            return Err(term_kind_mismatch(field));
        }
        let terms = terms.normalized().terms();
        let active = self.num_groups.saturating_sub(1) as u64;
        self.config
            .limits
            .assert_in_memory_rows(active * terms.len() as u64)?;
        let per_group: Vec<(usize, Vec<Term>)> = (1..self.num_groups)
            .map(|group| (group, terms.clone()))
            .collect();
        self.regroup_by_terms(field, per_group, keys)
    }

    /// Splits every active group into one group per term occurring in it.
    ///
    /// Terms are found with an FTGS scan capped at `term_limit` terms (`0`
    /// uses the configured default). Fails with
    /// [`EngineError::RowLimitExceeded`] before regrouping when the scan or
    /// the resulting group count exceeds the row ceiling.
    pub fn split_all(
        &mut self,
        field: &Field,
        keys: Option<&GroupKeys>,
        term_limit: u64,
    ) -> Result<Option<GroupKeys>> {
        let limits = self.config.limits;
        let mut per_group: FxHashMap<usize, Vec<Term>> = FxHashMap::default();
        let mut rows: u64 = 0;
        self.ftgs_iterate(
            std::slice::from_ref(field),
            &mut |row: &FtgsRow<'_>| -> Result<()> {
                rows += 1;
                limits.assert_in_memory_rows(rows)?;
                per_group
                    .entry(row.group)
                    .or_default()
                    .push(row.term.to_term());
                Ok(())
            },
            term_limit,
        )?;
        let per_group = self.in_group_order(per_group);
        self.regroup_by_terms(field, per_group, keys)
    }

    /// Explodes every active group by all distinct terms of `field`.
    ///
    /// Unlike [`EzSession::split_all`], every group gets every term, even
    /// terms that never occur in it.
    pub fn split_all_explode(
        &mut self,
        field: &Field,
        keys: Option<&GroupKeys>,
        term_limit: u64,
    ) -> Result<Option<GroupKeys>> {
        let term_limit = self.effective_term_limit(term_limit);
        let terms = if field.is_int() {
            TermSet::Int(self.int_field_terms(field, None::<fn(i64) -> bool>, term_limit)?)
        } else {
            TermSet::Str(self.string_field_terms(field, None::<fn(&str) -> bool>, term_limit)?)
        };
        self.explode_each_group(field, terms, keys)
    }

    /// Splits every active group into its `k` best terms ranked by `stat`.
    ///
    /// `stat` is pushed for the duration of the scan and popped afterwards,
    /// also when the scan fails. Within a group, new ids follow the ranking,
    /// best term first.
    pub fn split_all_top_k(
        &mut self,
        field: &Field,
        keys: Option<&GroupKeys>,
        k: usize,
        stat: &StatExpr,
        direction: Direction,
    ) -> Result<Option<GroupKeys>> {
        let score = self.push_stat(stat)?;
        let mut per_group: FxHashMap<usize, TopK<Term>> = FxHashMap::default();
        // every term competes for the top k, so the scan is never capped
        let scanned = self.scan_fields(
            std::slice::from_ref(field),
            &mut |row: &FtgsRow<'_>| -> Result<()> {
                let value = row.stats.get(&score)?;
                per_group
                    .entry(row.group)
                    .or_insert_with(|| TopK::new(k, direction))
                    .offer(value, row.term.to_term());
                Ok(())
            },
            0,
        );
        let popped = self.pop_stat();
        scanned?;
        popped?;

        let per_group: FxHashMap<usize, Vec<Term>> = per_group
            .into_iter()
            .map(|(group, top)| {
                let terms = top.into_best_first().into_iter().map(|s| s.term).collect();
                (group, terms)
            })
            .collect();
        let per_group = self.in_group_order(per_group);
        self.regroup_by_terms(field, per_group, keys)
    }

    fn in_group_order(&self, mut per_group: FxHashMap<usize, Vec<Term>>) -> Vec<(usize, Vec<Term>)> {
        (1..self.num_groups)
            .filter_map(|group| per_group.remove(&group).map(|terms| (group, terms)))
            .collect()
    }

    // Issues one multi-way rule per listed group, numbering new groups from 1.
    fn regroup_by_terms(
        &mut self,
        field: &Field,
        per_group: Vec<(usize, Vec<Term>)>,
        keys: Option<&GroupKeys>,
    ) -> Result<Option<GroupKeys>> {
        let total: u64 = per_group.iter().map(|(_, terms)| terms.len() as u64).sum();
        self.config.limits.assert_in_memory_rows(total)?;
        if total == 0 {
            debug!(field = %field, num_groups = self.num_groups, "session.regroup.no_terms");
            return Ok(keys.map(|_| GroupKeys::default()));
        }

        let mut new_keys = keys.map(|_| GroupKeys::default());
        let mut rules = Vec::with_capacity(per_group.len());
        let mut next_group = 1;
        for (group, terms) in per_group {
            let parent = match keys {
                Some(keys) => Some(keys.get(&group).ok_or_else(|| {
                    EngineError::invalid(format!("no group key for group {group}"))
                })?),
                None => None,
            };
            let mut rule = GroupMultiRemapRule::new(group);
            for term in terms {
                if let (Some(parent), Some(new_keys)) = (parent, new_keys.as_mut()) {
                    new_keys.insert(next_group, parent.add(term.clone()));
                }
                rule.push(RegroupCondition::equals(field.name(), term), next_group);
                next_group += 1;
            }
            rules.push(rule);
        }
        self.num_groups = self.remote.regroup_with_batch(&rules, true)?;
        debug!(
            field = %field,
            rules = rules.len(),
            num_groups = self.num_groups,
            "session.regroup.terms"
        );
        Ok(new_keys)
    }

    /// Buckets every active group by the value of `stat`.
    ///
    /// Each source group `g` yields a block of buckets starting at id
    /// `(g - 1) * buckets + 1`: the interior buckets labeled `[lo, hi)` and,
    /// unless `no_gutters` is set, a `< min` and a `>= max` bucket at the end
    /// of the block. Labels for trailing groups the remote did not
    /// materialize are dropped.
    pub fn metric_regroup<F>(
        &mut self,
        stat: &SingleStatReference,
        range: BucketRange,
        no_gutters: bool,
        stringifier: F,
        keys: Option<&GroupKeys>,
    ) -> Result<GroupKeys>
    where
        F: Fn(i64) -> String,
    {
        self.stack.validate(&StatReference::Single(stat.clone()))?;
        range.validate()?;
        let gutters = if no_gutters { 0 } else { 2 };
        let active = self.num_groups.saturating_sub(1) as u64;
        let expected = active.saturating_mul(range.interior_buckets().saturating_add(gutters));
        self.config.limits.assert_in_memory_rows(expected)?;
        let interior = in_memory(range.interior_buckets())?;
        let num_buckets = interior + gutters as usize;

        let empty = GroupKey::empty();
        let mut new_keys = GroupKeys::default();
        for group in 1..self.num_groups {
            let offset = (group - 1) * num_buckets;
            let parent = keys.and_then(|keys| keys.get(&group)).unwrap_or(&empty);
            for idx in 0..interior {
                let lo = range.lower(idx);
                let label = format!("[{}, {})", stringifier(lo), stringifier(lo + range.interval));
                new_keys.insert(offset + idx + 1, parent.add(Term::Str(label)));
            }
            if !no_gutters {
                let below = format!("< {}", stringifier(range.min));
                let above = format!(">= {}", stringifier(range.max));
                new_keys.insert(offset + num_buckets - 1, parent.add(Term::Str(below)));
                new_keys.insert(offset + num_buckets, parent.add(Term::Str(above)));
            }
        }

        self.num_groups = self
            .remote
            .metric_regroup(range.axis(stat.depth()), no_gutters)?;
        new_keys.retain(|group, _| *group < self.num_groups);
        debug!(
            stat = stat.label(),
            num_buckets,
            expected,
            num_groups = self.num_groups,
            "session.regroup.metric"
        );
        Ok(new_keys)
    }

    /// Buckets documents on two stats at once, with gutters on both axes.
    ///
    /// Bucket ids run x-major within each y row: id `y * x_buckets + x` where
    /// `x` counts from 1 (`< x.min`) to `x_buckets` (`>= x.max`) and `y` from
    /// 0 (`< y.min`) to `y_buckets - 1` (`>= y.max`). Labels are single
    /// strings such as `"[0, 5), >= 10"`.
    pub fn metric_regroup_2d(
        &mut self,
        x_stat: &SingleStatReference,
        x: BucketRange,
        y_stat: &SingleStatReference,
        y: BucketRange,
    ) -> Result<GroupKeys> {
        self.stack.validate(&StatReference::Single(x_stat.clone()))?;
        self.stack.validate(&StatReference::Single(y_stat.clone()))?;
        x.validate()?;
        y.validate()?;
        let requested = x
            .interior_buckets()
            .saturating_add(2)
            .saturating_mul(y.interior_buckets().saturating_add(2));
        self.config.limits.assert_in_memory_rows(requested)?;
        let x_buckets = in_memory(x.interior_buckets())? + 2;
        let y_buckets = in_memory(y.interior_buckets())? + 2;
        let num_buckets = x_buckets * y_buckets;

        let x_label = |bucket: usize| match bucket {
            1 => format!("< {}", x.min),
            b if b == x_buckets => format!(">= {}", x.max),
            b => format!("[{}, {})", x.lower(b - 2), x.lower(b - 2) + x.interval),
        };
        let y_label = |bucket: usize| match bucket {
            0 => format!("< {}", y.min),
            b if b == y_buckets - 1 => format!(">= {}", y.max),
            b => format!("[{}, {})", y.lower(b - 1), y.lower(b - 1) + y.interval),
        };
        let mut new_keys = GroupKeys::default();
        for y_bucket in 0..y_buckets {
            for x_bucket in 1..=x_buckets {
                let label = format!("{}, {}", x_label(x_bucket), y_label(y_bucket));
                new_keys.insert(y_bucket * x_buckets + x_bucket, GroupKey::singleton(Term::Str(label)));
            }
        }

        self.num_groups = self
            .remote
            .metric_regroup_2d(x.axis(x_stat.depth()), y.axis(y_stat.depth()))?;
        new_keys.retain(|group, _| *group < self.num_groups);
        debug!(num_buckets, num_groups = self.num_groups, "session.regroup.metric_2d");
        Ok(new_keys)
    }
}

fn in_memory(buckets: u64) -> Result<usize> {
    usize::try_from(buckets)
        .map_err(|_| EngineError::invalid(format!("{buckets} buckets do not fit in memory")))
}

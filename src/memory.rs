//! In-process [`RemoteSession`] over a small document table.
//!
//! Every document carries multi-valued integer and string fields and a group
//! id. Stat tokens are evaluated as a postfix program per document, and FTGS
//! cursors are materialized up front. The session is meant for tests and for
//! running the engine against local fixtures; it is not tuned for volume.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

use crate::error::RemoteError;
use crate::field::{Term, TermRef};
use crate::remote::{
    FtgsIterator, GroupMultiRemapRule, GroupRemap, MetricAxis, PerformanceStats, Query,
    QueryRemapRule, RegroupCondition, RemoteResult, RemoteSession, TermCount,
};
use crate::stats::expr::decode_query;
use crate::stats::BinOp;

/// Field values of one document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    ints: BTreeMap<String, Vec<i64>>,
    strings: BTreeMap<String, Vec<String>>,
}

impl Document {
    /// Adds `value` to the integer field `field`.
    pub fn int(mut self, field: impl Into<String>, value: i64) -> Self {
        self.ints.entry(field.into()).or_default().push(value);
        self
    }

    /// Adds `value` to the string field `field`.
    pub fn string(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.strings.entry(field.into()).or_default().push(value.into());
        self
    }

    fn int_values(&self, field: &str) -> &[i64] {
        self.ints.get(field).map_or(&[], Vec::as_slice)
    }

    fn string_values(&self, field: &str) -> &[String] {
        self.strings.get(field).map_or(&[], Vec::as_slice)
    }

    // Single-valued view of an integer field, as stats see it.
    fn int_value(&self, field: &str) -> i64 {
        self.int_values(field).first().copied().unwrap_or(0)
    }

    fn has_term(&self, field: &str, term: &Term) -> bool {
        match term {
            Term::Int(value) => self.int_values(field).contains(value),
            Term::Str(value) => self.string_values(field).iter().any(|v| v == value),
        }
    }

    fn matches(&self, query: &Query) -> bool {
        match query {
            Query::Term { field, term } => self.has_term(field, term),
            Query::IntRange {
                field,
                start,
                end,
                end_inclusive,
            } => self
                .int_values(field)
                .iter()
                .any(|v| v >= start && (v < end || (*end_inclusive && v == end))),
            Query::StringRange {
                field,
                start,
                end,
                end_inclusive,
            } => self.string_values(field).iter().any(|v| {
                v.as_str() >= start.as_str()
                    && (v.as_str() < end.as_str() || (*end_inclusive && v == end))
            }),
            Query::And(parts) => parts.iter().all(|part| self.matches(part)),
            Query::Or(parts) => parts.iter().any(|part| self.matches(part)),
            Query::Not(inner) => !self.matches(inner),
        }
    }

    fn satisfies(&self, condition: &RegroupCondition) -> bool {
        if !condition.inequality {
            return self.has_term(&condition.field, &condition.term);
        }
        match &condition.term {
            Term::Int(bound) => self.int_values(&condition.field).iter().any(|v| v <= bound),
            Term::Str(bound) => self
                .string_values(&condition.field)
                .iter()
                .any(|v| v.as_str() <= bound.as_str()),
        }
    }
}

/// Remote session backed by an in-memory document table.
pub struct MemorySession {
    docs: Vec<Document>,
    groups: Vec<usize>,
    num_groups: usize,
    stack: Vec<Vec<i64>>,
    closed: bool,
    started: Instant,
    perf: PerformanceStats,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySession {
    /// Empty session; group 1 is the only active group.
    pub fn new() -> Self {
        Self {
            docs: Vec::new(),
            groups: Vec::new(),
            num_groups: 2,
            stack: Vec::new(),
            closed: false,
            started: Instant::now(),
            perf: PerformanceStats::default(),
        }
    }

    /// Appends a document to group 1 and returns its index.
    ///
    /// Stats already on the stack are not re-evaluated for it.
    pub fn add_document<F>(&mut self, build: F) -> usize
    where
        F: FnOnce(Document) -> Document,
    {
        self.docs.push(build(Document::default()));
        self.groups.push(1);
        for slot in &mut self.stack {
            slot.push(0);
        }
        self.docs.len() - 1
    }

    /// Group currently holding document `doc`.
    pub fn group_of(&self, doc: usize) -> Option<usize> {
        self.groups.get(doc).copied()
    }

    /// Number of documents in each group, indexed by group id.
    pub fn group_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_groups.max(1)];
        for &group in &self.groups {
            if let Some(size) = sizes.get_mut(group) {
                *size += 1;
            }
        }
        sizes
    }

    /// Exclusive upper bound of the group ids in use.
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    /// Number of stack slots in use.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    fn begin(&mut self) -> RemoteResult<()> {
        if self.closed {
            return Err(RemoteError::Closed);
        }
        self.perf.calls += 1;
        Ok(())
    }

    fn stat(&self, stat_index: usize) -> RemoteResult<&[i64]> {
        self.stack.get(stat_index).map(Vec::as_slice).ok_or_else(|| {
            RemoteError::Protocol(format!(
                "stat index {stat_index} out of range for depth {}",
                self.stack.len()
            ))
        })
    }

    fn note_groups(&mut self, remap: GroupRemap) {
        self.num_groups = self
            .num_groups
            .max(remap.positive + 1)
            .max(remap.negative + 1);
    }

    fn remap_where<P>(&mut self, remap: GroupRemap, mut matches: P)
    where
        P: FnMut(&Document) -> bool,
    {
        for (doc, group) in self.docs.iter().zip(self.groups.iter_mut()) {
            if *group == remap.target {
                *group = if matches(doc) {
                    remap.positive
                } else {
                    remap.negative
                };
            }
        }
        self.note_groups(remap);
    }

    // Compacts the group count to the highest group still holding a document.
    fn settle_groups(&mut self) -> usize {
        self.num_groups = self.groups.iter().copied().max().unwrap_or(0) + 1;
        self.num_groups
    }

    fn eval(&self, doc: &Document, tokens: &[String]) -> RemoteResult<Vec<i64>> {
        let mut values: Vec<i64> = Vec::new();
        for token in tokens {
            if let Some(op) = BinOp::from_token(token) {
                let right = pop_operand(&mut values, token)?;
                let left = pop_operand(&mut values, token)?;
                values.push(op.apply(left, right));
                continue;
            }
            let (name, arg) = token.split_once(' ').unwrap_or((token.as_str(), ""));
            let value = match name {
                "count()" => 1,
                "abs()" => pop_operand(&mut values, token)?.wrapping_abs(),
                "cached()" => pop_operand(&mut values, token)?,
                "exp" => {
                    let scale = parse_arg::<i32>(token, arg)?.max(1) as f64;
                    let value = pop_operand(&mut values, token)? as f64;
                    ((value / scale).exp() * scale) as i64
                }
                "log" => {
                    let scale = parse_arg::<i32>(token, arg)?.max(1) as f64;
                    let value = pop_operand(&mut values, token)?;
                    if value <= 0 {
                        0
                    } else {
                        ((value as f64 / scale).ln() * scale) as i64
                    }
                }
                "mulshr" => {
                    let shift = parse_arg::<u32>(token, arg)?;
                    let right = pop_operand(&mut values, token)?;
                    let left = pop_operand(&mut values, token)?;
                    left.wrapping_mul(right).wrapping_shr(shift)
                }
                "shldiv" => {
                    let shift = parse_arg::<u32>(token, arg)?;
                    let right = pop_operand(&mut values, token)?;
                    let left = pop_operand(&mut values, token)?;
                    if right == 0 {
                        0
                    } else {
                        left.wrapping_shl(shift).wrapping_div(right)
                    }
                }
                "floatscale" => eval_float_scale(doc, token, arg)?,
                "hasint" => {
                    let (field, value) = split_field_arg(token, arg)?;
                    let value = parse_arg::<i64>(token, value)?;
                    i64::from(doc.int_values(field).contains(&value))
                }
                "hasstr" => {
                    let (field, value) = split_field_arg(token, arg)?;
                    i64::from(doc.string_values(field).iter().any(|v| v == value))
                }
                "hasintfield" => i64::from(!doc.int_values(arg).is_empty()),
                "hasstrfield" => i64::from(!doc.string_values(arg).is_empty()),
                "lucene" => {
                    let query = decode_query(arg)
                        .map_err(|err| RemoteError::Protocol(err.to_string()))?;
                    i64::from(doc.matches(&query))
                }
                _ => match token.parse::<i64>() {
                    Ok(constant) => constant,
                    Err(_) => doc.int_value(token),
                },
            };
            values.push(value);
        }
        Ok(values)
    }

    fn scan(&self, plan: Vec<(String, bool, Option<BTreeSet<Term>>)>, term_limit: u64) -> MemoryFtgs {
        let mut fields = Vec::with_capacity(plan.len());
        for (name, is_int, only) in plan {
            // term -> group -> summed stats
            let mut cells: BTreeMap<Term, BTreeMap<usize, Vec<i64>>> = BTreeMap::new();
            for (doc_idx, (doc, &group)) in self.docs.iter().zip(&self.groups).enumerate() {
                if group == 0 {
                    continue;
                }
                let terms: BTreeSet<Term> = if is_int {
                    doc.int_values(&name).iter().copied().map(Term::Int).collect()
                } else {
                    doc.string_values(&name).iter().cloned().map(Term::Str).collect()
                };
                for term in terms {
                    if only.as_ref().map_or(false, |only| !only.contains(&term)) {
                        continue;
                    }
                    let sums = cells
                        .entry(term)
                        .or_default()
                        .entry(group)
                        .or_insert_with(|| vec![0; self.stack.len()]);
                    for (sum, slot) in sums.iter_mut().zip(&self.stack) {
                        *sum = sum.wrapping_add(slot[doc_idx]);
                    }
                }
            }
            let limit = if term_limit == 0 {
                usize::MAX
            } else {
                usize::try_from(term_limit).unwrap_or(usize::MAX)
            };
            let terms = cells
                .into_iter()
                .take(limit)
                .map(|(term, groups)| (term, groups.into_iter().collect()))
                .collect();
            fields.push(ScannedField { name, is_int, terms });
        }
        MemoryFtgs {
            fields,
            field: None,
            term: None,
            group: None,
            closed: false,
        }
    }
}

fn pop_operand(values: &mut Vec<i64>, token: &str) -> RemoteResult<i64> {
    values
        .pop()
        .ok_or_else(|| RemoteError::Protocol(format!("stat token '{token}' is missing an operand")))
}

fn parse_arg<T: std::str::FromStr>(token: &str, arg: &str) -> RemoteResult<T> {
    arg.trim()
        .parse()
        .map_err(|_| RemoteError::Protocol(format!("malformed stat token '{token}'")))
}

fn split_field_arg<'a>(token: &str, arg: &'a str) -> RemoteResult<(&'a str, &'a str)> {
    arg.split_once(':')
        .ok_or_else(|| RemoteError::Protocol(format!("malformed stat token '{token}'")))
}

// "floatscale <field> * <mult> + <add>"
fn eval_float_scale(doc: &Document, token: &str, arg: &str) -> RemoteResult<i64> {
    let malformed = || RemoteError::Protocol(format!("malformed stat token '{token}'"));
    let (field, rest) = arg.split_once(" * ").ok_or_else(malformed)?;
    let (mult, add) = rest.split_once(" + ").ok_or_else(malformed)?;
    let mult = parse_arg::<i64>(token, mult)?;
    let add = parse_arg::<i64>(token, add)?;
    let value = doc
        .string_values(field)
        .first()
        .and_then(|raw| raw.parse::<f64>().ok())
        .unwrap_or(0.0);
    Ok((value * mult as f64 + add as f64) as i64)
}

fn check_sorted<T: PartialOrd>(field: &str, terms: &[T]) -> RemoteResult<()> {
    if terms.windows(2).all(|pair| pair[0] <= pair[1]) {
        Ok(())
    } else {
        Err(RemoteError::Protocol(format!(
            "terms for field {field} must be sorted ascending"
        )))
    }
}

fn bucket_count(axis: &MetricAxis, gutters: u64) -> RemoteResult<usize> {
    usize::try_from(axis.interior_buckets().saturating_add(gutters)).map_err(|_| {
        RemoteError::OutOfMemory(format!(
            "{} buckets do not fit in memory",
            axis.interior_buckets()
        ))
    })
}

// Fraction in [0, 1) derived from the salted hash of `key`.
fn salted_fraction(salt: &str, key: &str) -> f64 {
    let seed = xxh64(salt.as_bytes(), 0);
    (xxh64(key.as_bytes(), seed) >> 11) as f64 / (1u64 << 53) as f64
}

impl RemoteSession for MemorySession {
    fn push_stats(&mut self, tokens: &[String]) -> RemoteResult<usize> {
        self.begin()?;
        if tokens.is_empty() {
            return Err(RemoteError::Protocol("empty stat push".into()));
        }
        let mut columns: Vec<Vec<i64>> = Vec::new();
        for doc in &self.docs {
            let values = self.eval(doc, tokens)?;
            if columns.is_empty() {
                columns = vec![Vec::with_capacity(self.docs.len()); values.len()];
            }
            for (column, value) in columns.iter_mut().zip(values) {
                column.push(value);
            }
        }
        if self.docs.is_empty() {
            // Dry run on an empty document to learn how many slots the push fills.
            let slots = self.eval(&Document::default(), tokens)?.len();
            columns = vec![Vec::new(); slots];
        }
        self.stack.extend(columns);
        debug!(tokens = tokens.len(), depth = self.stack.len(), "memory.push_stats");
        Ok(self.stack.len())
    }

    fn pop_stat(&mut self) -> RemoteResult<usize> {
        self.begin()?;
        if self.stack.pop().is_none() {
            return Err(RemoteError::Protocol("pop on empty stat stack".into()));
        }
        Ok(self.stack.len())
    }

    fn group_stats(&mut self, stat_index: usize) -> RemoteResult<Vec<i64>> {
        self.begin()?;
        let column = self.stat(stat_index)?;
        let mut sums = vec![0i64; self.num_groups];
        for (&group, value) in self.groups.iter().zip(column) {
            if group > 0 {
                if let Some(sum) = sums.get_mut(group) {
                    *sum = sum.wrapping_add(*value);
                }
            }
        }
        Ok(sums)
    }

    fn metric_filter(
        &mut self,
        stat_index: usize,
        min: i64,
        max: i64,
        negate: bool,
    ) -> RemoteResult<usize> {
        self.begin()?;
        let column = self.stat(stat_index)?.to_vec();
        for (group, value) in self.groups.iter_mut().zip(column) {
            let inside = (min..=max).contains(&value);
            if *group > 0 && inside == negate {
                *group = 0;
            }
        }
        Ok(self.num_groups)
    }

    fn int_or_regroup(
        &mut self,
        field: &str,
        terms: &[i64],
        remap: GroupRemap,
    ) -> RemoteResult<()> {
        self.begin()?;
        check_sorted(field, terms)?;
        self.remap_where(remap, |doc| {
            doc.int_values(field)
                .iter()
                .any(|v| terms.binary_search(v).is_ok())
        });
        Ok(())
    }

    fn string_or_regroup(
        &mut self,
        field: &str,
        terms: &[String],
        remap: GroupRemap,
    ) -> RemoteResult<()> {
        self.begin()?;
        check_sorted(field, terms)?;
        self.remap_where(remap, |doc| {
            doc.string_values(field)
                .iter()
                .any(|v| terms.binary_search(v).is_ok())
        });
        Ok(())
    }

    fn regroup(&mut self, rule: &QueryRemapRule) -> RemoteResult<()> {
        self.begin()?;
        let remap = GroupRemap {
            target: rule.target_group,
            negative: rule.negative_group,
            positive: rule.positive_group,
        };
        self.remap_where(remap, |doc| doc.matches(&rule.query));
        Ok(())
    }

    fn regroup_with_batch(
        &mut self,
        rules: &[GroupMultiRemapRule],
        error_on_collisions: bool,
    ) -> RemoteResult<usize> {
        self.begin()?;
        let mut by_target: FxHashMap<usize, &GroupMultiRemapRule> = FxHashMap::default();
        for rule in rules {
            if rule.conditions.len() != rule.positive_groups.len() {
                return Err(RemoteError::Protocol(format!(
                    "rule for group {} has {} conditions but {} destinations",
                    rule.target_group,
                    rule.conditions.len(),
                    rule.positive_groups.len()
                )));
            }
            if by_target.insert(rule.target_group, rule).is_some() && error_on_collisions {
                return Err(RemoteError::Protocol(format!(
                    "more than one rule targets group {}",
                    rule.target_group
                )));
            }
        }
        for (doc, group) in self.docs.iter().zip(self.groups.iter_mut()) {
            *group = match by_target.get(&*group) {
                Some(rule) => rule
                    .conditions
                    .iter()
                    .zip(&rule.positive_groups)
                    .find(|(condition, _)| doc.satisfies(condition))
                    .map_or(rule.negative_group, |(_, &positive)| positive),
                None => 0,
            };
        }
        self.num_groups = rules
            .iter()
            .flat_map(|rule| rule.positive_groups.iter().copied().chain([rule.negative_group]))
            .max()
            .unwrap_or(0)
            + 1;
        debug!(rules = rules.len(), num_groups = self.num_groups, "memory.regroup_batch");
        Ok(self.num_groups)
    }

    fn random_regroup(
        &mut self,
        field: &str,
        is_int: bool,
        salt: &str,
        p: f64,
        remap: GroupRemap,
    ) -> RemoteResult<()> {
        self.begin()?;
        self.remap_where(remap, |doc| {
            let key = if is_int {
                doc.int_values(field).first().map(i64::to_string)
            } else {
                doc.string_values(field).first().cloned()
            };
            // documents without the field always land in the positive group
            key.map_or(true, |key| salted_fraction(salt, &key) >= p)
        });
        Ok(())
    }

    fn regex_regroup(
        &mut self,
        field: &str,
        pattern: &str,
        remap: GroupRemap,
    ) -> RemoteResult<()> {
        self.begin()?;
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|err| RemoteError::Protocol(format!("invalid regex: {err}")))?;
        self.remap_where(remap, |doc| {
            doc.string_values(field).iter().any(|v| regex.is_match(v))
        });
        Ok(())
    }

    fn ftgs_iterator(
        &mut self,
        int_fields: &[String],
        string_fields: &[String],
        term_limit: u64,
    ) -> RemoteResult<Box<dyn FtgsIterator>> {
        self.begin()?;
        let plan = int_fields
            .iter()
            .map(|name| (name.clone(), true, None))
            .chain(string_fields.iter().map(|name| (name.clone(), false, None)))
            .collect();
        Ok(Box::new(self.scan(plan, term_limit)))
    }

    fn subset_ftgs_iterator(
        &mut self,
        int_terms: &BTreeMap<String, Vec<i64>>,
        string_terms: &BTreeMap<String, Vec<String>>,
    ) -> RemoteResult<Box<dyn FtgsIterator>> {
        self.begin()?;
        let ints = int_terms.iter().map(|(name, terms)| {
            let only: BTreeSet<Term> = terms.iter().copied().map(Term::Int).collect();
            (name.clone(), true, Some(only))
        });
        let strings = string_terms.iter().map(|(name, terms)| {
            let only: BTreeSet<Term> = terms.iter().cloned().map(Term::Str).collect();
            (name.clone(), false, Some(only))
        });
        Ok(Box::new(self.scan(ints.chain(strings).collect(), 0)))
    }

    fn distinct(&mut self, field: &str, is_int: bool) -> RemoteResult<Vec<i64>> {
        self.begin()?;
        let mut seen: Vec<BTreeSet<Term>> = vec![BTreeSet::new(); self.num_groups];
        for (doc, &group) in self.docs.iter().zip(&self.groups) {
            let Some(terms) = seen.get_mut(group).filter(|_| group > 0) else {
                continue;
            };
            if is_int {
                terms.extend(doc.int_values(field).iter().copied().map(Term::Int));
            } else {
                terms.extend(doc.string_values(field).iter().cloned().map(Term::Str));
            }
        }
        Ok(seen.iter().map(|terms| terms.len() as i64).collect())
    }

    fn metric_regroup(&mut self, axis: MetricAxis, no_gutters: bool) -> RemoteResult<usize> {
        self.begin()?;
        if axis.interval <= 0 {
            return Err(RemoteError::Protocol("bucket interval must be positive".into()));
        }
        let column = self.stat(axis.stat_index)?.to_vec();
        let buckets = bucket_count(&axis, if no_gutters { 0 } else { 2 })?;
        for (group, value) in self.groups.iter_mut().zip(column) {
            if *group == 0 {
                continue;
            }
            let offset = (*group - 1) * buckets;
            *group = if value < axis.min {
                if no_gutters { 0 } else { offset + buckets - 1 }
            } else if value >= axis.max {
                if no_gutters { 0 } else { offset + buckets }
            } else {
                offset + 1 + axis.bucket_of(value) as usize
            };
        }
        Ok(self.settle_groups())
    }

    fn metric_regroup_2d(&mut self, x: MetricAxis, y: MetricAxis) -> RemoteResult<usize> {
        self.begin()?;
        if x.interval <= 0 || y.interval <= 0 {
            return Err(RemoteError::Protocol("bucket interval must be positive".into()));
        }
        let xs = self.stat(x.stat_index)?.to_vec();
        let ys = self.stat(y.stat_index)?.to_vec();
        let x_buckets = bucket_count(&x, 2)?;
        let y_buckets = bucket_count(&y, 2)?;
        for ((group, xv), yv) in self.groups.iter_mut().zip(xs).zip(ys) {
            if *group == 0 {
                continue;
            }
            let xb = if xv < x.min {
                1
            } else if xv >= x.max {
                x_buckets
            } else {
                2 + x.bucket_of(xv) as usize
            };
            let yb = if yv < y.min {
                0
            } else if yv >= y.max {
                y_buckets - 1
            } else {
                1 + y.bucket_of(yv) as usize
            };
            *group = yb * x_buckets + xb;
        }
        Ok(self.settle_groups())
    }

    fn approximate_top_terms(
        &mut self,
        field: &str,
        is_int: bool,
        k: usize,
    ) -> RemoteResult<Vec<TermCount>> {
        self.begin()?;
        let mut counts: BTreeMap<Term, u64> = BTreeMap::new();
        for (doc, &group) in self.docs.iter().zip(&self.groups) {
            if group == 0 {
                continue;
            }
            let terms: BTreeSet<Term> = if is_int {
                doc.int_values(field).iter().copied().map(Term::Int).collect()
            } else {
                doc.string_values(field).iter().cloned().map(Term::Str).collect()
            };
            for term in terms {
                *counts.entry(term).or_default() += 1;
            }
        }
        let mut ranked: Vec<TermCount> = counts
            .into_iter()
            .map(|(term, count)| TermCount { term, count })
            .collect();
        // stable sort keeps ties in ascending term order
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked.truncate(k);
        Ok(ranked)
    }

    fn close(&mut self) -> RemoteResult<()> {
        self.closed = true;
        Ok(())
    }

    fn close_and_get_performance_stats(&mut self) -> RemoteResult<Option<PerformanceStats>> {
        if self.closed {
            return Err(RemoteError::Closed);
        }
        self.closed = true;
        let mut perf = self.perf.clone();
        perf.wall_clock_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(Some(perf))
    }
}

struct ScannedField {
    name: String,
    is_int: bool,
    terms: Vec<(Term, Vec<(usize, Vec<i64>)>)>,
}

/// Materialized FTGS cursor of a [`MemorySession`].
struct MemoryFtgs {
    fields: Vec<ScannedField>,
    field: Option<usize>,
    term: Option<usize>,
    group: Option<usize>,
    closed: bool,
}

impl MemoryFtgs {
    fn current_field(&self) -> Option<&ScannedField> {
        self.fields.get(self.field?)
    }

    fn current_term(&self) -> Option<&(Term, Vec<(usize, Vec<i64>)>)> {
        self.current_field()?.terms.get(self.term?)
    }

    fn current_group(&self) -> Option<&(usize, Vec<i64>)> {
        self.current_term()?.1.get(self.group?)
    }

    fn ensure_open(&self) -> RemoteResult<()> {
        if self.closed {
            Err(RemoteError::Closed)
        } else {
            Ok(())
        }
    }
}

fn advance(cursor: &mut Option<usize>, len: usize) -> bool {
    let next = cursor.map_or(0, |idx| idx + 1);
    *cursor = Some(next.min(len));
    next < len
}

impl FtgsIterator for MemoryFtgs {
    fn next_field(&mut self) -> RemoteResult<bool> {
        self.ensure_open()?;
        self.term = None;
        self.group = None;
        Ok(advance(&mut self.field, self.fields.len()))
    }

    fn field_name(&self) -> &str {
        self.current_field().map_or("", |field| field.name.as_str())
    }

    fn field_is_int(&self) -> bool {
        self.current_field().map_or(false, |field| field.is_int)
    }

    fn next_term(&mut self) -> RemoteResult<bool> {
        self.ensure_open()?;
        self.group = None;
        let len = self.current_field().map_or(0, |field| field.terms.len());
        Ok(advance(&mut self.term, len))
    }

    fn term(&self) -> TermRef<'_> {
        self.current_term()
            .map_or(TermRef::Int(0), |(term, _)| term.as_term_ref())
    }

    fn next_group(&mut self) -> RemoteResult<bool> {
        self.ensure_open()?;
        let len = self.current_term().map_or(0, |(_, groups)| groups.len());
        Ok(advance(&mut self.group, len))
    }

    fn group(&self) -> usize {
        self.current_group().map_or(0, |(group, _)| *group)
    }

    fn group_stats(&mut self, stats: &mut [i64]) -> RemoteResult<()> {
        self.ensure_open()?;
        let sums = self
            .current_group()
            .map(|(_, sums)| sums.as_slice())
            .ok_or_else(|| RemoteError::Protocol("cursor is not positioned on a group".into()))?;
        for (out, sum) in stats.iter_mut().zip(sums) {
            *out = *sum;
        }
        Ok(())
    }

    fn close(&mut self) -> RemoteResult<()> {
        self.closed = true;
        Ok(())
    }
}

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::field::{Field, TermRef, TermSet};
use crate::ftgs::FtgsRow;
use crate::remote::{Query, QueryRemapRule, RemoteSession};
use crate::stats::{SingleStatReference, StatReference};

use super::{term_kind_mismatch, EzSession, FilterMode};

impl<S: RemoteSession> EzSession<S> {
    /// Keeps (or excludes) documents having any of `terms` in `field`, group by group.
    ///
    /// Non-matching documents of every active group end up in the shared
    /// group 0, so filtering after a regroup logs an advisory warning.
    pub fn filter_terms(&mut self, field: &Field, terms: TermSet, mode: FilterMode) -> Result<()> {
        if field.is_int() != terms.is_int() {
            return Err(term_kind_mismatch(field));
        }
        self.warn_multi_group("terms");
        let terms = terms.normalized();
        for group in 1..self.num_groups {
            let remap = mode.remap(group);
            match &terms {
                TermSet::Int(values) => self.remote.int_or_regroup(field.name(), values, remap)?,
                TermSet::Str(values) => {
                    self.remote.string_or_regroup(field.name(), values, remap)?
                }
            }
        }
        debug!(field = %field, terms = terms.len(), ?mode, "session.filter.terms");
        Ok(())
    }

    /// Filters on the integer terms of `field` accepted by `predicate`.
    pub fn filter_int_predicate<P>(&mut self, field: &str, predicate: P, mode: FilterMode) -> Result<()>
    where
        P: FnMut(i64) -> bool,
    {
        let field = Field::int(field);
        let terms = self.int_field_terms(&field, Some(predicate), 0)?;
        self.filter_terms(&field, TermSet::Int(terms), mode)
    }

    /// Filters on the string terms of `field` accepted by `predicate`.
    pub fn filter_string_predicate<P>(
        &mut self,
        field: &str,
        predicate: P,
        mode: FilterMode,
    ) -> Result<()>
    where
        P: FnMut(&str) -> bool,
    {
        let field = Field::string(field);
        let terms = self.string_field_terms(&field, Some(predicate), 0)?;
        self.filter_terms(&field, TermSet::Str(terms), mode)
    }

    /// Filters every active group on an arbitrary predicate.
    pub fn filter_query(&mut self, query: &Query, mode: FilterMode) -> Result<()> {
        self.warn_multi_group("query");
        for group in 1..self.num_groups {
            let remap = mode.remap(group);
            self.remote.regroup(&QueryRemapRule {
                target_group: remap.target,
                query: query.clone(),
                negative_group: remap.negative,
                positive_group: remap.positive,
            })?;
        }
        debug!(%query, ?mode, "session.filter.query");
        Ok(())
    }

    /// Keeps (or excludes) documents whose stat value lies in `[min, max]`.
    pub fn filter_metric(
        &mut self,
        stat: &SingleStatReference,
        min: i64,
        max: i64,
        mode: FilterMode,
    ) -> Result<()> {
        self.stack.validate(&StatReference::Single(stat.clone()))?;
        self.num_groups =
            self.remote
                .metric_filter(stat.depth(), min, max, mode == FilterMode::Exclude)?;
        debug!(stat = stat.label(), min, max, ?mode, num_groups = self.num_groups, "session.filter.metric");
        Ok(())
    }

    /// Removes a salted pseudo-random fraction `p` of each group's terms.
    ///
    /// The same salt over the same data always removes the same documents.
    /// With [`FilterMode::Exclude`] the fraction `p` is kept instead.
    pub fn filter_sample(&mut self, field: &Field, p: f64, salt: &str, mode: FilterMode) -> Result<()> {
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(EngineError::invalid(format!(
                "sample ratio must be within [0, 1], got {p}"
            )));
        }
        if salt.is_empty() {
            return Err(EngineError::invalid("sample salt must not be empty"));
        }
        self.warn_multi_group("sample");
        for group in 1..self.num_groups {
            self.remote
                .random_regroup(field.name(), field.is_int(), salt, p, mode.remap(group))?;
        }
        debug!(field = %field, p, ?mode, "session.filter.sample");
        Ok(())
    }

    /// Keeps (or excludes) documents with a term of `field` fully matching `pattern`.
    pub fn filter_regex(&mut self, field: &Field, pattern: &str, mode: FilterMode) -> Result<()> {
        if field.is_int() {
            return Err(EngineError::invalid(format!(
                "regex filter needs a string field, {field} is an integer field"
            )));
        }
        self.warn_multi_group("regex");
        for group in 1..self.num_groups {
            self.remote
                .regex_regroup(field.name(), pattern, mode.remap(group))?;
        }
        debug!(field = %field, pattern, ?mode, "session.filter.regex");
        Ok(())
    }

    /// Distinct integer terms of `field` across all groups, ascending.
    ///
    /// `term_limit` is taken literally; `0` enumerates every term.
    pub(crate) fn int_field_terms<P>(
        &mut self,
        field: &Field,
        mut predicate: Option<P>,
        term_limit: u64,
    ) -> Result<Vec<i64>>
    where
        P: FnMut(i64) -> bool,
    {
        let mut terms: Vec<i64> = Vec::new();
        let mut last: Option<i64> = None;
        self.scan_fields(
            std::slice::from_ref(field),
            &mut |row: &FtgsRow<'_>| -> Result<()> {
                // rows arrive grouped by term, once per group holding it
                if let TermRef::Int(term) = row.term {
                    if last != Some(term) {
                        last = Some(term);
                        if predicate.as_mut().map_or(true, |p| p(term)) {
                            terms.push(term);
                        }
                    }
                }
                Ok(())
            },
            term_limit,
        )?;
        Ok(terms)
    }

    /// Distinct string terms of `field` across all groups, ascending.
    ///
    /// `term_limit` is taken literally; `0` enumerates every term.
    pub(crate) fn string_field_terms<P>(
        &mut self,
        field: &Field,
        mut predicate: Option<P>,
        term_limit: u64,
    ) -> Result<Vec<String>>
    where
        P: FnMut(&str) -> bool,
    {
        let mut terms: Vec<String> = Vec::new();
        let mut last: Option<String> = None;
        self.scan_fields(
            std::slice::from_ref(field),
            &mut |row: &FtgsRow<'_>| -> Result<()> {
                if let TermRef::Str(term) = row.term {
                    if last.as_deref() != Some(term) {
                        last = Some(term.to_owned());
                        if predicate.as_mut().map_or(true, |p| p(term)) {
                            terms.push(term.to_owned());
                        }
                    }
                }
                Ok(())
            },
            term_limit,
        )?;
        Ok(terms)
    }
}

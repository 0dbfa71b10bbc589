//! Field-term-group-stats iteration.
//!
//! Remote cursors are wrapped in [`ScopedIterator`], which closes them on
//! every exit path. Close failures are logged and swallowed so they never mask
//! the error that ended the iteration.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};

use tracing::warn;

use crate::error::Result;
use crate::field::{Field, TermRef};
use crate::remote::{FtgsIterator, RemoteSession};
use crate::stats::{StatReference, StatStack};

/// One (field, term, group) position of an FTGS scan.
pub struct FtgsRow<'a> {
    /// Field being scanned.
    pub field: &'a str,
    /// Current term.
    pub term: TermRef<'a>,
    /// Group containing the term.
    pub group: usize,
    /// Stat values of the documents in `group` containing `term`.
    pub stats: GroupStatsView<'a>,
}

/// Stat vector of the current row, readable through live references.
#[derive(Clone, Copy)]
pub struct GroupStatsView<'a> {
    stack: &'a StatStack,
    raw: &'a [i64],
}

impl<'a> GroupStatsView<'a> {
    pub(crate) fn new(stack: &'a StatStack, raw: &'a [i64]) -> Self {
        Self { stack, raw }
    }

    /// Value of `reference` for this row. Popped references are rejected.
    pub fn get(&self, reference: &StatReference) -> Result<f64> {
        self.stack.validate(reference)?;
        reference.get_value(self.raw)
    }

    /// Raw values indexed by stack depth.
    pub fn raw(&self) -> &[i64] {
        self.raw
    }
}

/// Receives every row of an FTGS scan.
pub trait FtgsCallback {
    /// Handles one row; an error stops the scan.
    fn term_group(&mut self, row: &FtgsRow<'_>) -> Result<()>;
}

impl<F> FtgsCallback for F
where
    F: FnMut(&FtgsRow<'_>) -> Result<()>,
{
    fn term_group(&mut self, row: &FtgsRow<'_>) -> Result<()> {
        self(row)
    }
}

/// Remote cursor that is closed when dropped.
pub struct ScopedIterator {
    inner: Box<dyn FtgsIterator>,
    open: bool,
}

impl ScopedIterator {
    /// Takes ownership of an open cursor.
    pub fn new(inner: Box<dyn FtgsIterator>) -> Self {
        Self { inner, open: true }
    }

    /// Closes the cursor now, logging any failure.
    pub fn close(mut self) {
        self.close_quietly();
    }

    fn close_quietly(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(err) = self.inner.close() {
            warn!(error = %err, "ftgs.close_failed");
        }
    }
}

impl Deref for ScopedIterator {
    type Target = dyn FtgsIterator;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl DerefMut for ScopedIterator {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.inner
    }
}

impl Drop for ScopedIterator {
    fn drop(&mut self) {
        self.close_quietly();
    }
}

/// Consecutive fields of one kind, scanned by a single remote cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FieldRun {
    pub(crate) is_int: bool,
    pub(crate) names: Vec<String>,
}

impl FieldRun {
    pub(crate) fn open<S>(&self, remote: &mut S, term_limit: u64) -> Result<ScopedIterator>
    where
        S: RemoteSession + ?Sized,
    {
        let iter = if self.is_int {
            remote.ftgs_iterator(&self.names, &[], term_limit)?
        } else {
            remote.ftgs_iterator(&[], &self.names, term_limit)?
        };
        Ok(ScopedIterator::new(iter))
    }
}

/// Splits `fields` into runs so that caller order is preserved across kinds.
pub(crate) fn field_runs(fields: &[Field]) -> VecDeque<FieldRun> {
    let mut runs: VecDeque<FieldRun> = VecDeque::new();
    for field in fields {
        match runs.back_mut() {
            Some(run) if run.is_int == field.is_int() => run.names.push(field.name().to_owned()),
            _ => runs.push_back(FieldRun {
                is_int: field.is_int(),
                names: vec![field.name().to_owned()],
            }),
        }
    }
    runs
}

/// Feeds every row of `iter` to `callback`.
pub(crate) fn drive(
    iter: &mut dyn FtgsIterator,
    stack: &StatStack,
    callback: &mut dyn FtgsCallback,
) -> Result<()> {
    let mut raw = vec![0i64; stack.depth()];
    while iter.next_field()? {
        while iter.next_term()? {
            while iter.next_group()? {
                iter.group_stats(&mut raw)?;
                let row = FtgsRow {
                    field: iter.field_name(),
                    term: iter.term(),
                    group: iter.group(),
                    stats: GroupStatsView::new(stack, &raw),
                };
                callback.term_group(&row)?;
            }
        }
    }
    Ok(())
}

/// Lazy FTGS scan mapping each row through a closure.
///
/// The remote cursor is closed when the scan is exhausted, when the first
/// error is yielded, or when the iterator is dropped early.
pub struct FtgsRows<'s, S: ?Sized, F> {
    remote: &'s mut S,
    stack: &'s StatStack,
    runs: VecDeque<FieldRun>,
    term_limit: u64,
    current: Option<ScopedIterator>,
    in_field: bool,
    in_term: bool,
    raw: Vec<i64>,
    mapper: F,
    done: bool,
}

impl<'s, S, F, T> FtgsRows<'s, S, F>
where
    S: RemoteSession + ?Sized,
    F: FnMut(&FtgsRow<'_>) -> Result<T>,
{
    pub(crate) fn new(
        remote: &'s mut S,
        stack: &'s StatStack,
        runs: VecDeque<FieldRun>,
        term_limit: u64,
        mapper: F,
    ) -> Self {
        Self {
            remote,
            stack,
            runs,
            term_limit,
            current: None,
            in_field: false,
            in_term: false,
            raw: vec![0; stack.depth()],
            mapper,
            done: false,
        }
    }

    // Positions the cursor on the next row; `false` once every run is drained.
    fn advance(&mut self) -> Result<bool> {
        loop {
            if self.current.is_none() {
                let Some(run) = self.runs.pop_front() else {
                    return Ok(false);
                };
                self.current = Some(run.open(&mut *self.remote, self.term_limit)?);
                self.in_field = false;
                self.in_term = false;
                continue;
            }
            let Some(iter) = self.current.as_mut() else {
                continue;
            };
            if self.in_term {
                if iter.next_group()? {
                    return Ok(true);
                }
                self.in_term = false;
            }
            if self.in_field {
                if iter.next_term()? {
                    self.in_term = true;
                    continue;
                }
                self.in_field = false;
            }
            if iter.next_field()? {
                self.in_field = true;
                continue;
            }
            if let Some(finished) = self.current.take() {
                finished.close();
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.runs.clear();
        if let Some(iter) = self.current.take() {
            iter.close();
        }
    }
}

impl<'s, S, F, T> Iterator for FtgsRows<'s, S, F>
where
    S: RemoteSession + ?Sized,
    F: FnMut(&FtgsRow<'_>) -> Result<T>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(true) => {}
            Ok(false) => {
                self.finish();
                return None;
            }
            Err(err) => {
                self.finish();
                return Some(Err(err));
            }
        }
        let iter = self.current.as_mut()?;
        let mapped = match iter.group_stats(&mut self.raw) {
            Ok(()) => {
                let row = FtgsRow {
                    field: iter.field_name(),
                    term: iter.term(),
                    group: iter.group(),
                    stats: GroupStatsView::new(self.stack, &self.raw),
                };
                (self.mapper)(&row)
            }
            Err(err) => Err(err.into()),
        };
        if mapped.is_err() {
            self.finish();
        }
        Some(mapped)
    }
}

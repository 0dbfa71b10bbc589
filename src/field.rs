//! Fields, terms, and homogeneous term lists.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A document field, tagged with the column type the remote stores it as.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// 64-bit integer column.
    Int(String),
    /// String column.
    Str(String),
}

impl Field {
    /// Builds an integer field.
    pub fn int(name: impl Into<String>) -> Self {
        Field::Int(name.into())
    }

    /// Builds a string field.
    pub fn string(name: impl Into<String>) -> Self {
        Field::Str(name.into())
    }

    /// Field name as known to the remote session.
    pub fn name(&self) -> &str {
        match self {
            Field::Int(name) | Field::Str(name) => name,
        }
    }

    /// Whether the field is an integer column.
    pub fn is_int(&self) -> bool {
        matches!(self, Field::Int(_))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Owned term value; also used as a group label.
///
/// Integer terms sort before string terms; within a kind the natural order applies.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Term {
    /// Integer term.
    Int(i64),
    /// String term.
    Str(String),
}

impl Term {
    /// Borrows the term.
    pub fn as_term_ref(&self) -> TermRef<'_> {
        match self {
            Term::Int(v) => TermRef::Int(*v),
            Term::Str(s) => TermRef::Str(s),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Int(v) => write!(f, "{v}"),
            Term::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Term::Int(value)
    }
}

impl From<&str> for Term {
    fn from(value: &str) -> Self {
        Term::Str(value.to_owned())
    }
}

impl From<String> for Term {
    fn from(value: String) -> Self {
        Term::Str(value)
    }
}

/// Borrowed term handed out while an FTGS iterator is positioned on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TermRef<'a> {
    /// Integer term.
    Int(i64),
    /// String term.
    Str(&'a str),
}

impl TermRef<'_> {
    /// Copies the term into an owned [`Term`].
    pub fn to_term(self) -> Term {
        match self {
            TermRef::Int(v) => Term::Int(v),
            TermRef::Str(s) => Term::Str(s.to_owned()),
        }
    }
}

impl PartialOrd for TermRef<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TermRef<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (TermRef::Int(a), TermRef::Int(b)) => a.cmp(b),
            (TermRef::Str(a), TermRef::Str(b)) => a.cmp(b),
            (TermRef::Int(_), TermRef::Str(_)) => Ordering::Less,
            (TermRef::Str(_), TermRef::Int(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for TermRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermRef::Int(v) => write!(f, "{v}"),
            TermRef::Str(s) => f.write_str(s),
        }
    }
}

/// Homogeneous list of terms for bulk regroup calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TermSet {
    /// Integer terms.
    Int(Vec<i64>),
    /// String terms.
    Str(Vec<String>),
}

impl TermSet {
    /// Number of terms in the set.
    pub fn len(&self) -> usize {
        match self {
            TermSet::Int(terms) => terms.len(),
            TermSet::Str(terms) => terms.len(),
        }
    }

    /// Whether the set has no terms.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the set holds integer terms.
    pub fn is_int(&self) -> bool {
        matches!(self, TermSet::Int(_))
    }

    /// Sorts ascending and removes duplicates, the form the remote requires.
    pub fn normalized(mut self) -> Self {
        match &mut self {
            TermSet::Int(terms) => {
                terms.sort_unstable();
                terms.dedup();
            }
            TermSet::Str(terms) => {
                terms.sort_unstable();
                terms.dedup();
            }
        }
        self
    }

    /// Returns the terms as owned values.
    pub fn terms(&self) -> Vec<Term> {
        match self {
            TermSet::Int(terms) => terms.iter().copied().map(Term::Int).collect(),
            TermSet::Str(terms) => terms.iter().cloned().map(Term::Str).collect(),
        }
    }
}

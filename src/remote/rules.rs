use std::fmt;

use serde::{Deserialize, Serialize};

use crate::field::Term;

/// Boolean predicate over document fields.
///
/// Serialized adjacently tagged, `{"kind": ..., "args": ...}`, which keeps
/// the sequence-carrying `And`/`Or` variants representable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "args", rename_all = "snake_case")]
pub enum Query {
    /// Document has `term` in `field`.
    Term {
        /// Field to inspect.
        field: String,
        /// Term to look for.
        term: Term,
    },
    /// Document has an integer value in `[start, end)` (or `[start, end]` when inclusive).
    IntRange {
        /// Field to inspect.
        field: String,
        /// Lower bound, inclusive.
        start: i64,
        /// Upper bound.
        end: i64,
        /// Whether `end` is inclusive.
        end_inclusive: bool,
    },
    /// Document has a string value in `[start, end)` (or `[start, end]` when inclusive).
    StringRange {
        /// Field to inspect.
        field: String,
        /// Lower bound, inclusive.
        start: String,
        /// Upper bound.
        end: String,
        /// Whether `end` is inclusive.
        end_inclusive: bool,
    },
    /// All sub-queries match.
    And(Vec<Query>),
    /// Any sub-query matches.
    Or(Vec<Query>),
    /// The sub-query does not match.
    Not(Box<Query>),
}

impl Query {
    /// Term query shorthand.
    pub fn term(field: impl Into<String>, term: impl Into<Term>) -> Self {
        Query::Term {
            field: field.into(),
            term: term.into(),
        }
    }

    /// Negation shorthand.
    pub fn negate(query: Query) -> Self {
        Query::Not(Box::new(query))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Term { field, term } => write!(f, "{field}:{term}"),
            Query::IntRange {
                field,
                start,
                end,
                end_inclusive,
            } => {
                let close = if *end_inclusive { ']' } else { ')' };
                write!(f, "{field}:[{start}, {end}{close}")
            }
            Query::StringRange {
                field,
                start,
                end,
                end_inclusive,
            } => {
                let close = if *end_inclusive { ']' } else { ')' };
                write!(f, "{field}:[\"{start}\", \"{end}\"{close}")
            }
            Query::And(parts) => write_joined(f, parts, " AND "),
            Query::Or(parts) => write_joined(f, parts, " OR "),
            Query::Not(inner) => write!(f, "-({inner})"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Query], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{part}")?;
    }
    f.write_str(")")
}

/// Moves documents of `target_group` to `positive_group` when `query` matches,
/// otherwise to `negative_group`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRemapRule {
    /// Group the rule applies to.
    pub target_group: usize,
    /// Predicate to evaluate.
    pub query: Query,
    /// Destination for non-matching documents.
    pub negative_group: usize,
    /// Destination for matching documents.
    pub positive_group: usize,
}

/// Single term condition inside a [`GroupMultiRemapRule`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegroupCondition {
    /// Field to inspect.
    pub field: String,
    /// Term to compare against.
    pub term: Term,
    /// When set, matches values `<= term` instead of equality.
    pub inequality: bool,
}

impl RegroupCondition {
    /// Equality condition on `field`.
    pub fn equals(field: impl Into<String>, term: Term) -> Self {
        Self {
            field: field.into(),
            term,
            inequality: false,
        }
    }
}

/// Multi-way remap for one source group.
///
/// Documents of `target_group` go to the positive group of the first matching
/// condition; documents matching no condition go to `negative_group`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupMultiRemapRule {
    /// Group the rule applies to.
    pub target_group: usize,
    /// Destination when no condition matches.
    pub negative_group: usize,
    /// Conditions in evaluation order.
    pub conditions: Vec<RegroupCondition>,
    /// Destination per condition, parallel to `conditions`.
    pub positive_groups: Vec<usize>,
}

impl GroupMultiRemapRule {
    /// Creates an empty rule for `target_group` sending unmatched documents to group 0.
    pub fn new(target_group: usize) -> Self {
        Self {
            target_group,
            negative_group: 0,
            conditions: Vec::new(),
            positive_groups: Vec::new(),
        }
    }

    /// Appends a condition and its destination group.
    pub fn push(&mut self, condition: RegroupCondition, positive_group: usize) {
        self.conditions.push(condition);
        self.positive_groups.push(positive_group);
    }
}

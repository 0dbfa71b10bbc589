use std::sync::Arc;

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::remote::RemoteSession;

use super::expr::{AggregateOp, StatExpr};
use super::reference::{Capability, CompositeStatReference, SingleStatReference, StatReference};

#[derive(Debug)]
struct StackEntry {
    base: usize,
    slots: usize,
    reference: StatReference,
}

/// Host-side mirror of the remote stat stack.
///
/// Every push and pop is checked against the depth the remote reports, and
/// every reference handed out is tied to the entry that produced it.
#[derive(Debug, Default)]
pub struct StatStack {
    entries: Vec<StackEntry>,
    depth: usize,
    next_entry: u64,
}

impl StatStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of remote slots currently pushed.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of references currently live.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pushed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pushes `expr` and returns a reference to its slot(s).
    pub fn push<S>(&mut self, remote: &mut S, expr: &StatExpr) -> Result<StatReference>
    where
        S: RemoteSession + ?Sized,
    {
        expr.validate()?;
        let base = self.depth;
        let expected = base + expr.slots();
        let tokens = expr.pushes()?;
        let observed = remote.push_stats(&tokens)?;
        if observed != expected {
            return Err(EngineError::StackInvariant {
                op: "push_stat",
                expected,
                observed,
            });
        }
        self.depth = observed;

        let capability = Capability::new(self.next_entry);
        self.next_entry += 1;
        let label: Arc<str> = Arc::from(expr.to_string());
        let single = |depth| SingleStatReference::new(depth, label.clone(), capability.clone());
        let reference = match expr {
            StatExpr::AggregateBinOp {
                op: AggregateOp::Div,
                ..
            } => StatReference::Composite(CompositeStatReference::new(
                single(base),
                single(base + 1),
            )),
            StatExpr::AggregateBinOpConst {
                op: AggregateOp::Div,
                value,
                ..
            } => StatReference::ConstantDivide {
                inner: single(base),
                divisor: *value,
            },
            _ => StatReference::Single(single(base)),
        };
        debug!(depth = self.depth, stat = %label, "stats.push");
        self.entries.push(StackEntry {
            base,
            slots: expr.slots(),
            reference: reference.clone(),
        });
        Ok(reference)
    }

    /// Pushes an expression that must occupy exactly one addressable slot.
    pub fn push_single<S>(&mut self, remote: &mut S, expr: &StatExpr) -> Result<SingleStatReference>
    where
        S: RemoteSession + ?Sized,
    {
        if expr.is_aggregate() {
            return Err(EngineError::invalid(format!(
                "aggregate stat {expr} does not occupy a single addressable slot"
            )));
        }
        match self.push(remote, expr)? {
            StatReference::Single(single) => Ok(single),
            other => Err(EngineError::invalid(format!(
                "stat {other} was not pushed as a single slot"
            ))),
        }
    }

    /// Pops the most recent entry and revokes its reference.
    pub fn pop<S>(&mut self, remote: &mut S) -> Result<StatReference>
    where
        S: RemoteSession + ?Sized,
    {
        let Some(entry) = self.entries.last() else {
            return Err(EngineError::invalid("cannot pop an empty stat stack"));
        };
        let slots = entry.slots;
        for _ in 0..slots {
            let expected = self.depth.saturating_sub(1);
            let observed = remote.pop_stat()?;
            if observed != expected {
                return Err(EngineError::StackInvariant {
                    op: "pop_stat",
                    expected,
                    observed,
                });
            }
            self.depth = observed;
        }
        let Some(entry) = self.entries.pop() else {
            return Err(EngineError::invalid("cannot pop an empty stat stack"));
        };
        entry.reference.capability().revoke();
        debug!(depth = self.depth, stat = %entry.reference, "stats.pop");
        Ok(entry.reference)
    }

    /// Checks that `reference` belongs to an entry that is still pushed.
    pub fn validate(&self, reference: &StatReference) -> Result<()> {
        reference.require_valid()?;
        for slot in reference.slots() {
            let owner = self
                .entries
                .iter()
                .find(|entry| entry.base <= slot.depth() && slot.depth() < entry.base + entry.slots);
            match owner {
                Some(entry) if entry.reference.capability().entry == slot.capability.entry => {}
                _ => {
                    return Err(EngineError::StaleReference {
                        label: slot.label().to_owned(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Fetches per-group values for `reference`, widened to `f64`.
    pub fn group_stats<S>(&self, remote: &mut S, reference: &StatReference) -> Result<Vec<f64>>
    where
        S: RemoteSession + ?Sized,
    {
        self.validate(reference)?;
        match reference {
            StatReference::Single(single) => Ok(remote
                .group_stats(single.depth())?
                .into_iter()
                .map(|v| v as f64)
                .collect()),
            StatReference::ConstantDivide { inner, divisor } => {
                let divisor = *divisor as f64;
                Ok(remote
                    .group_stats(inner.depth())?
                    .into_iter()
                    .map(|v| v as f64 / divisor)
                    .collect())
            }
            StatReference::Composite(composite) => {
                let left = remote.group_stats(composite.left().depth())?;
                let right = remote.group_stats(composite.right().depth())?;
                Ok(left
                    .into_iter()
                    .zip(right)
                    .map(|(l, r)| l as f64 / r as f64)
                    .collect())
            }
        }
    }

    /// Revokes every live reference without touching the remote.
    pub(crate) fn revoke_all(&mut self) {
        for entry in self.entries.drain(..) {
            entry.reference.capability().revoke();
        }
        self.depth = 0;
    }
}

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Revocable proof that a stack entry is still pushed.
///
/// The [`StatStack`](super::StatStack) checks `entry` against the entry that
/// currently owns the slot; the shared flag is cleared when that entry is
/// popped so references also fail outside the stack's view.
#[derive(Clone, Debug)]
pub(crate) struct Capability {
    pub(crate) entry: u64,
    live: Arc<AtomicBool>,
}

impl Capability {
    pub(crate) fn new(entry: u64) -> Self {
        Self {
            entry,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn revoke(&self) {
        self.live.store(false, Ordering::Release);
    }
}

/// Handle to one remote stack slot.
#[derive(Clone, Debug)]
pub struct SingleStatReference {
    depth: usize,
    label: Arc<str>,
    pub(crate) capability: Capability,
}

impl SingleStatReference {
    pub(crate) fn new(depth: usize, label: Arc<str>, capability: Capability) -> Self {
        Self {
            depth,
            label,
            capability,
        }
    }

    /// Stack index of the slot.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Display form of the expression that was pushed.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the slot has not been popped yet.
    pub fn is_valid(&self) -> bool {
        self.capability.is_live()
    }

    /// Fails with [`EngineError::StaleReference`] once the slot was popped.
    pub fn require_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(EngineError::StaleReference {
                label: self.label.to_string(),
            })
        }
    }

    fn raw(&self, stats: &[i64]) -> Result<i64> {
        self.require_valid()?;
        stats.get(self.depth).copied().ok_or_else(|| {
            EngineError::invalid(format!(
                "stat vector of length {} has no slot {}",
                stats.len(),
                self.depth
            ))
        })
    }
}

/// Handle to the two slots of a host-side aggregate.
#[derive(Clone, Debug)]
pub struct CompositeStatReference {
    left: SingleStatReference,
    right: SingleStatReference,
}

impl CompositeStatReference {
    pub(crate) fn new(left: SingleStatReference, right: SingleStatReference) -> Self {
        Self { left, right }
    }

    /// Slot holding the numerator.
    pub fn left(&self) -> &SingleStatReference {
        &self.left
    }

    /// Slot holding the denominator.
    pub fn right(&self) -> &SingleStatReference {
        &self.right
    }
}

/// Handle to a pushed stat, as returned by
/// [`EzSession::push_stat`](crate::session::EzSession::push_stat).
#[derive(Clone, Debug)]
pub enum StatReference {
    /// One slot, read as is.
    Single(SingleStatReference),
    /// One slot, divided by a literal on read.
    ConstantDivide {
        /// Underlying slot.
        inner: SingleStatReference,
        /// Literal divisor, never zero.
        divisor: i64,
    },
    /// Two slots, the first divided by the second on read.
    Composite(CompositeStatReference),
}

impl StatReference {
    /// Display form of the expression that was pushed.
    pub fn label(&self) -> &str {
        self.primary().label()
    }

    /// Whether every slot the reference covers is still pushed.
    pub fn is_valid(&self) -> bool {
        self.slots().all(SingleStatReference::is_valid)
    }

    /// Fails with [`EngineError::StaleReference`] once the reference was popped.
    pub fn require_valid(&self) -> Result<()> {
        self.slots().try_for_each(SingleStatReference::require_valid)
    }

    /// Reads the value for the current row out of a raw stat vector.
    pub fn get_value(&self, stats: &[i64]) -> Result<f64> {
        match self {
            StatReference::Single(single) => Ok(single.raw(stats)? as f64),
            StatReference::ConstantDivide { inner, divisor } => {
                Ok(inner.raw(stats)? as f64 / *divisor as f64)
            }
            StatReference::Composite(composite) => {
                let left = composite.left.raw(stats)? as f64;
                let right = composite.right.raw(stats)? as f64;
                Ok(left / right)
            }
        }
    }

    /// Iterates over the slots covered by this reference, lowest depth first.
    pub fn slots(&self) -> impl Iterator<Item = &SingleStatReference> {
        let (first, second) = match self {
            StatReference::Single(single) => (single, None),
            StatReference::ConstantDivide { inner, .. } => (inner, None),
            StatReference::Composite(composite) => (&composite.left, Some(&composite.right)),
        };
        std::iter::once(first).chain(second)
    }

    /// Returns the single slot, or `None` for composite references.
    pub fn as_single(&self) -> Option<&SingleStatReference> {
        match self {
            StatReference::Single(single) => Some(single),
            _ => None,
        }
    }

    fn primary(&self) -> &SingleStatReference {
        match self {
            StatReference::Single(single) => single,
            StatReference::ConstantDivide { inner, .. } => inner,
            StatReference::Composite(composite) => &composite.left,
        }
    }

    pub(crate) fn capability(&self) -> &Capability {
        &self.primary().capability
    }
}

impl From<SingleStatReference> for StatReference {
    fn from(value: SingleStatReference) -> Self {
        StatReference::Single(value)
    }
}

impl fmt::Display for StatReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

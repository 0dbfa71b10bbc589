//! Stat expressions and the host-side view of the remote stat stack.

/// Expression tree and its postfix compiler.
pub mod expr;
/// Capability-checked handles to stack slots.
pub mod reference;
/// Depth-checked push/pop bookkeeping.
pub mod stack;

pub use expr::{AggregateOp, BinOp, StatExpr};
pub use reference::{CompositeStatReference, SingleStatReference, StatReference};
pub use stack::StatStack;

//! Error types shared by the engine and its remote collaborators.

use std::io;

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures reported by a remote group session.
///
/// The engine never retries these; they are surfaced to the caller unchanged
/// inside [`EngineError::Remote`].
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote side ran out of memory while executing the call.
    #[error("remote session out of memory: {0}")]
    OutOfMemory(String),
    /// The remote rejected the call because a protocol precondition was violated.
    #[error("remote protocol violation: {0}")]
    Protocol(String),
    /// The session was used after being closed.
    #[error("remote session is closed")]
    Closed,
    /// Transport-level failure.
    #[error("remote I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Structured errors emitted by the group-by engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A stat reference was used after the slot it points at was popped.
    #[error("stat reference '{label}' is no longer valid")]
    StaleReference {
        /// Display form of the expression the reference was created for.
        label: String,
    },
    /// The remote stack depth moved by something other than the expected delta.
    #[error("stack invariant violated during {op}: expected depth {expected}, remote reported {observed}")]
    StackInvariant {
        /// Operation that observed the mismatch.
        op: &'static str,
        /// Depth the engine expected.
        expected: usize,
        /// Depth the remote session reported.
        observed: usize,
    },
    /// An aggregate result was used as the operand of a per-document expression.
    #[error("result of aggregate operations like / can't be used as input for further calculations")]
    AggregateComposition,
    /// Division by a literal zero.
    #[error("division by constant zero")]
    DivideByZero,
    /// Bucket interval does not evenly divide the requested range.
    #[error("bucket range length {range} is not a multiple of interval {interval}; use max = {lower} or max = {upper}")]
    BucketWidth {
        /// `max - min` as requested.
        range: i64,
        /// Requested bucket width.
        interval: i64,
        /// Nearest valid upper bound below the requested one.
        lower: i64,
        /// Nearest valid upper bound above the requested one.
        upper: i64,
    },
    /// The operation would materialize more rows than the configured ceiling.
    #[error("number of groups {requested} exceeds the in-memory rows limit of {limit}")]
    RowLimitExceeded {
        /// Prospective number of rows/groups.
        requested: u64,
        /// Configured ceiling.
        limit: u64,
    },
    /// `head`/`tail` requested from the empty group key.
    #[error("empty group key has no {0}")]
    EmptyGroupKey(&'static str),
    /// Caller supplied an argument outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Error propagated from the remote session.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl EngineError {
    /// Builds an [`EngineError::InvalidArgument`] from any displayable message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidArgument(msg.into())
    }

    /// Returns `true` for programmer errors inside this layer or a protocol
    /// mismatch with the remote, as opposed to user/query errors.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            EngineError::StackInvariant { .. } | EngineError::StaleReference { .. }
        )
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::StaleReference { .. } => "StaleReference",
            EngineError::StackInvariant { .. } => "StackInvariant",
            EngineError::AggregateComposition => "AggregateComposition",
            EngineError::DivideByZero => "DivideByZero",
            EngineError::BucketWidth { .. } => "BucketWidth",
            EngineError::RowLimitExceeded { .. } => "RowLimitExceeded",
            EngineError::EmptyGroupKey(_) => "EmptyGroupKey",
            EngineError::InvalidArgument(_) => "InvalidArgument",
            EngineError::Remote(RemoteError::OutOfMemory(_)) => "RemoteOutOfMemory",
            EngineError::Remote(_) => "Remote",
        }
    }
}

//! Group-by execution engine over a remote multi-group analytics session.
//!
//! The engine drives a stateful remote session that assigns every document
//! to a numbered group. Callers build [`StatExpr`] trees, push them onto the
//! remote stat stack, then filter, explode and bucket groups through
//! [`EzSession`], reading results back with FTGS scans.

#![warn(missing_docs)]

/// Engine configuration and row ceilings.
pub mod config;
/// Engine and remote error types.
pub mod error;
/// Field, term and term-set values.
pub mod field;
/// Field-term-group-stats scans.
pub mod ftgs;
/// Persistent label paths for groups.
pub mod group_key;
/// Tracing decorator for remote sessions.
pub mod logging;
/// In-process remote session.
#[cfg(feature = "memory-session")]
pub mod memory;
/// Remote session contract.
pub mod remote;
/// Filters, explodes and metric regroups.
pub mod session;
/// Stat expressions, references and the stack manager.
pub mod stats;
/// Bounded best-k selection.
pub mod topk;

pub use config::{EngineConfig, Limits};
pub use error::{EngineError, RemoteError, Result};
pub use field::{Field, Term, TermRef, TermSet};
pub use ftgs::{FtgsCallback, FtgsRow, FtgsRows};
pub use group_key::{new_group_keys, GroupKey, GroupKeys};
pub use logging::LoggingSession;
#[cfg(feature = "memory-session")]
pub use memory::MemorySession;
pub use remote::{FtgsIterator, Query, RemoteSession};
pub use session::{BucketRange, EzSession, FilterMode};
pub use stats::{SingleStatReference, StatExpr, StatReference};
pub use topk::{Direction, TopK};

//! Cursor commands
//!
//! Handlers for `find`, `getMore` and `killCursors`, plus the router that
//! dispatches raw command documents to them. Handlers are methods on
//! [`CommandContext`]; each runs under a cancellation token.

pub mod context;
mod find;
mod get_more;
mod kill_cursors;
pub mod killable;
pub mod metrics;
pub mod request;
pub mod result;
pub mod router;

#[cfg(test)]
mod tests;

pub use context::CommandContext;
pub use kill_cursors::KillCursorsReply;
pub use killable::run_killable;
pub use metrics::{OpCounters, OpCountersSnapshot, status_document};
pub use request::{DOC_SEQUENCE_OPT_IN, FindRequest, GetMoreRequest, KillCursorsRequest};
pub use result::CommandReply;
pub use router::{CommandKind, CommandRouter};

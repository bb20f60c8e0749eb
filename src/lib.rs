//! cursord library
//!
//! Server-side cursors for a document database command layer: `find` opens
//! a cursor over a query's results, `getMore` continues it, and every reply
//! batch is bounded by a document count and a byte budget. Replies are
//! framed either inline in the OP_MSG body (capped at the 16 MiB message
//! ceiling) or, for an opted-in getMore, as an OP_MSG document sequence.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and the demo session
//! - `commands`: `find`, `getMore`, `killCursors` handlers and dispatch
//! - `config`: Configuration management
//! - `cursor`: Cursor registry, entries, producers and batch building
//! - `error`: Error types and error replies
//! - `wire`: OP_MSG framing and cursor reply shapes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bson::doc;
//! use cursord::commands::{CommandContext, CommandRouter};
//! use cursord::config::Config;
//! use cursord::cursor::{MemoryEngine, Namespace};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = MemoryEngine::new();
//!     let ns = Namespace::new("test", "items")?;
//!     engine.insert_many(&ns, (0..500).map(|i| doc! {"_id": i}));
//!
//!     let config = Config::default();
//!     let router = CommandRouter::new(CommandContext::from_config(Arc::new(engine), &config));
//!     let cancel = CancellationToken::new();
//!
//!     let reply = router
//!         .execute("test", &doc! {"find": "items", "batchSize": 10}, &cancel)
//!         .await?;
//!     println!("{:?}", reply.as_cursor().map(|c| c.cursor_id));
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod cursor;
pub mod error;
pub mod wire;

// Re-export commonly used types
pub use commands::{CommandContext, CommandReply, CommandRouter};
pub use config::Config;
pub use cursor::{BatchBuilder, CursorId, CursorRegistry, Namespace, QueryEngine, ResultProducer};
pub use error::{CursorError, CursordError, Result};
pub use wire::{CursorReply, OpMsg};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
pub fn version() -> &'static str {
    VERSION
}

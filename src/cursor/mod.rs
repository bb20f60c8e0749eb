//! Server-side cursors
//!
//! This module keeps paused query results alive between requests:
//! - `producer`: the pull interface over a query's documents, plus adapters
//! - `memory`: an in-memory query engine serving producers
//! - `entry`: per-cursor state (producer, stash, counters, timestamps)
//! - `registry`: the sharded table of open cursors and pinning
//! - `batch`: count and byte bounded batch assembly

pub mod batch;
pub mod entry;
pub mod id;
pub mod memory;
pub mod namespace;
pub mod producer;
pub mod registry;

pub use batch::{Batch, BatchBuilder, BatchLimits, BatchRequest, EncodingMode};
pub use entry::CursorEntry;
pub use id::CursorId;
pub use memory::MemoryEngine;
pub use namespace::Namespace;
pub use producer::{QueryEngine, ResultProducer, StreamProducer, VecProducer};
pub use registry::{CursorRegistry, PinnedCursor, RegistryStats};

//! Command context
//!
//! Bundles the handles every cursor command needs: the cursor registry, the
//! query engine, the batch builder and the operation counters. The context
//! is cheap to clone and is passed explicitly to handlers.

use std::sync::Arc;

use tracing::warn;

use crate::config::{Config, ServerConfig};
use crate::cursor::{BatchBuilder, BatchLimits, CursorRegistry, PinnedCursor, QueryEngine};
use crate::error::{CursordError, Result};

use super::metrics::OpCounters;

/// Shared state for command handlers
#[derive(Clone)]
pub struct CommandContext {
    /// Open cursors
    pub(crate) registry: CursorRegistry,

    /// Source of result producers
    pub(crate) engine: Arc<dyn QueryEngine>,

    /// Batch limits in force
    pub(crate) builder: BatchBuilder,

    /// Command surface switches
    pub(crate) server: ServerConfig,

    /// Operation counters
    pub(crate) counters: Arc<OpCounters>,
}

impl CommandContext {
    /// Create a context around an existing registry
    ///
    /// # Arguments
    /// * `registry` - Cursor registry handle
    /// * `engine` - Query engine opening result producers
    /// * `config` - Effective configuration
    pub fn new(registry: CursorRegistry, engine: Arc<dyn QueryEngine>, config: &Config) -> Self {
        Self {
            registry,
            engine,
            builder: BatchBuilder::new(BatchLimits::from(&config.cursor)),
            server: config.server.clone(),
            counters: Arc::new(OpCounters::default()),
        }
    }

    /// Create a context with a fresh registry sized from `config`
    pub fn from_config(engine: Arc<dyn QueryEngine>, config: &Config) -> Self {
        Self::new(CursorRegistry::from_config(&config.cursor), engine, config)
    }

    pub fn registry(&self) -> &CursorRegistry {
        &self.registry
    }

    pub fn counters(&self) -> &OpCounters {
        &self.counters
    }

    pub fn limits(&self) -> &BatchLimits {
        self.builder.limits()
    }

    /// Unregister a cursor whose batch failed and pass the error on
    pub(crate) async fn discard_cursor<T>(
        &self,
        pinned: PinnedCursor,
        err: CursordError,
    ) -> Result<T> {
        let id = pinned.id();
        warn!("Killing cursor {} after failed batch: {}", id, err);
        if let Err(close_err) = pinned.destroy().await {
            warn!("Error closing producer of cursor {}: {}", id, close_err);
        }
        Err(err)
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("registry", &self.registry)
            .field("limits", self.builder.limits())
            .field("server", &self.server)
            .finish()
    }
}

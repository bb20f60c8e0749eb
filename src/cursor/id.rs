use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{CursorError, Result};

/// Identifier of a live server-side cursor.
///
/// Never zero: `0` on the wire means "no cursor".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CursorId(i64);

impl CursorId {
    /// Wrap a raw wire id, rejecting zero.
    pub fn new(raw: i64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id source; ids are never handed out twice.
#[derive(Debug)]
pub struct CursorIdGenerator {
    next: AtomicI64,
}

impl CursorIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first.max(1)),
        }
    }

    /// Allocate the next id, failing once the positive id space is used up.
    pub fn next_id(&self) -> Result<CursorId> {
        let id = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_add(1)
            })
            .map_err(|_| CursorError::ResourceExhausted("cursor id space exhausted".into()))?;
        Ok(CursorId(id))
    }
}

impl Default for CursorIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

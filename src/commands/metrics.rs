//! Operation counters
//!
//! A getMore counts as `getmore`, a find as `query`; every other command
//! counts as `command`.

use std::sync::atomic::{AtomicU64, Ordering};

use bson::{Document, doc};
use serde::Serialize;

use crate::cursor::RegistryStats;

/// Per-process operation counters
#[derive(Debug, Default)]
pub struct OpCounters {
    query: AtomicU64,
    getmore: AtomicU64,
    command: AtomicU64,
}

/// Snapshot of [`OpCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpCountersSnapshot {
    pub query: u64,
    pub getmore: u64,
    pub command: u64,
}

impl OpCounters {
    pub fn got_query(&self) {
        self.query.fetch_add(1, Ordering::Relaxed);
    }

    pub fn got_get_more(&self) {
        self.getmore.fetch_add(1, Ordering::Relaxed);
    }

    pub fn got_command(&self) {
        self.command.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OpCountersSnapshot {
        OpCountersSnapshot {
            query: self.query.load(Ordering::Relaxed),
            getmore: self.getmore.load(Ordering::Relaxed),
            command: self.command.load(Ordering::Relaxed),
        }
    }
}

/// `serverStatus`-style reply with cursor metrics and op counters
pub fn status_document(counters: &OpCountersSnapshot, cursors: &RegistryStats) -> Document {
    let oldest_opened_at = cursors.oldest_opened_at.map(bson::DateTime::from_chrono);
    doc! {
        "metrics": {
            "cursor": {
                "timedOut": cursors.timed_out as i64,
                "totalOpened": cursors.total_opened as i64,
                "open": {
                    "total": cursors.open as i64,
                    "pinned": cursors.pinned as i64,
                    "docSequences": cursors.doc_sequences as i64,
                    "oldestOpenedAt": oldest_opened_at,
                },
            },
        },
        "opcounters": {
            "query": counters.query as i64,
            "getmore": counters.getmore as i64,
            "command": counters.command as i64,
        },
        "ok": 1.0,
    }
}

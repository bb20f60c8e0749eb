//! `killCursors`: explicit close

use bson::{Document, doc};
use tracing::info;

use super::context::CommandContext;
use super::request::KillCursorsRequest;
use crate::cursor::CursorId;
use crate::error::{CursorError, Result};

/// Outcome of a killCursors request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillCursorsReply {
    pub killed: Vec<i64>,
    pub not_found: Vec<i64>,
}

impl KillCursorsReply {
    pub fn to_document(&self) -> Document {
        doc! {
            "cursorsKilled": self.killed.clone(),
            "cursorsNotFound": self.not_found.clone(),
            "cursorsAlive": [],
            "cursorsUnknown": [],
            "ok": 1.0,
        }
    }
}

impl CommandContext {
    /// Close cursors by id
    ///
    /// Cursors of another namespace are left alone and reported as not
    /// found. A cursor busy in another operation is unregistered at once;
    /// its holder discards it on release.
    pub async fn kill_cursors(&self, request: KillCursorsRequest) -> Result<KillCursorsReply> {
        self.counters.got_command();
        let mut reply = KillCursorsReply::default();

        for raw in request.cursor_ids {
            let Some(id) = CursorId::new(raw) else {
                reply.not_found.push(raw);
                continue;
            };

            match self.registry.pin(id) {
                Ok(pinned) if pinned.entry().namespace() == &request.ns => {
                    pinned.destroy().await?;
                    reply.killed.push(raw);
                }
                Ok(pinned) => {
                    pinned.release();
                    reply.not_found.push(raw);
                }
                Err(e) if matches!(e.as_cursor_error(), Some(CursorError::CursorInUse(_))) => {
                    if self.registry.remove(id) {
                        reply.killed.push(raw);
                    } else {
                        reply.not_found.push(raw);
                    }
                }
                Err(_) => reply.not_found.push(raw),
            }
        }

        info!(
            "killCursors on '{}': killed {:?}, not found {:?}",
            request.ns, reply.killed, reply.not_found
        );
        Ok(reply)
    }
}

//! `getMore`: continue an open cursor

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::context::CommandContext;
use super::request::GetMoreRequest;
use crate::cursor::{CursorId, EncodingMode};
use crate::error::{CursorError, Result};
use crate::wire::{CursorReply, ResponseType};

impl CommandContext {
    /// Execute a getMore
    ///
    /// Fails with `CursorNotFound` for unknown ids, `CursorInUse` while
    /// another getMore holds the cursor, and `NamespaceMismatch` when the
    /// collection differs from the cursor's; none of these disturb the
    /// cursor. A producer failure or cancellation kills it. Document
    /// sequence encoding is used only when requested and enabled. An inline
    /// batch whose next document overflows the message ceiling comes back
    /// empty with the cursor left open.
    pub async fn get_more(
        &self,
        request: GetMoreRequest,
        cancel: &CancellationToken,
    ) -> Result<CursorReply> {
        self.counters.got_get_more();

        let id = CursorId::new(request.cursor_id)
            .ok_or(CursorError::CursorNotFound(request.cursor_id))?;
        let mut pinned = self.registry.pin(id)?;

        if pinned.entry().namespace() != &request.ns {
            let expected = pinned.entry().namespace().full_name();
            pinned.release();
            return Err(CursorError::NamespaceMismatch {
                cursor_id: id.get(),
                expected,
                found: request.ns.full_name(),
            }
            .into());
        }

        let batch_request = request.batch_request(self.server.doc_sequences_enabled);
        if batch_request.mode == EncodingMode::Sequence {
            pinned.entry_mut().set_doc_sequences(true);
        }
        debug!(
            "Executing getMore on cursor {} ({:?}, batch size {:?})",
            id, batch_request.mode, batch_request.requested_count
        );

        let built = self
            .builder
            .build(
                pinned.entry_mut(),
                &batch_request,
                ResponseType::Subsequent,
                cancel,
            )
            .await;

        let batch = match built {
            Ok(batch) => batch,
            Err(e)
                if matches!(
                    e.as_cursor_error(),
                    Some(CursorError::ResponseTooLarge { .. })
                ) =>
            {
                // Larger than the sequence cap; the document stays stashed.
                pinned.release();
                return Err(e);
            }
            Err(e) => return self.discard_cursor(pinned, e).await,
        };

        let cursor_id = if batch.has_more {
            if pinned.release() { id.get() } else { 0 }
        } else {
            let total = pinned.entry().docs_returned();
            pinned.destroy().await?;
            info!("Cursor {} exhausted after {} documents", id, total);
            0
        };

        Ok(CursorReply {
            cursor_id,
            ns: request.ns.full_name(),
            batch: batch.documents,
            response_type: ResponseType::Subsequent,
            mode: batch_request.mode,
        })
    }
}

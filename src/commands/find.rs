//! `find`: open a cursor and return its first batch

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::context::CommandContext;
use super::request::FindRequest;
use crate::cursor::EncodingMode;
use crate::error::Result;
use crate::wire::{CursorReply, ResponseType};

impl CommandContext {
    /// Execute a find
    ///
    /// The first batch is always inline. The reply's cursor id is `0` when
    /// the results fit in the first batch (or `singleBatch` was requested),
    /// in which case no cursor remains registered. A first document too large
    /// for an inline reply yields an empty first batch and an open cursor.
    pub async fn find(
        &self,
        request: FindRequest,
        cancel: &CancellationToken,
    ) -> Result<CursorReply> {
        self.counters.got_query();
        debug!(
            "Executing find on '{}' with filter: {:?}",
            request.ns, request.filter
        );

        let producer = self.engine.open(&request.ns, &request.filter).await?;
        let mut pinned = self
            .registry
            .create_pinned(producer, request.ns.clone(), false)?;

        let batch = match self
            .builder
            .build(
                pinned.entry_mut(),
                &request.batch_request(),
                ResponseType::Initial,
                cancel,
            )
            .await
        {
            Ok(batch) => batch,
            Err(e) => return self.discard_cursor(pinned, e).await,
        };

        let id = pinned.id();
        let cursor_id = if batch.has_more && !request.single_batch {
            if pinned.release() {
                info!("Opened cursor {} on '{}'", id, request.ns);
                id.get()
            } else {
                0
            }
        } else {
            pinned.destroy().await?;
            0
        };

        Ok(CursorReply {
            cursor_id,
            ns: request.ns.full_name(),
            batch: batch.documents,
            response_type: ResponseType::Initial,
            mode: EncodingMode::Inline,
        })
    }
}

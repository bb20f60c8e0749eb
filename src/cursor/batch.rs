//! Batch building
//!
//! Pulls documents from a pinned cursor until the requested count, the
//! default count ceiling, the byte budget of the chosen encoding, or the end
//! of the producer is reached.
//!
//! Inline replies must fit in one message: the budget covers the OP_MSG
//! header, the reply body and every batch array element. Document sequence
//! replies only budget the sequence section, against a much larger cap.
//! A document that would overflow the budget is stashed in the cursor and
//! becomes the first document of the next batch. An inline batch whose first
//! document overflows comes back empty with the cursor still open, so the
//! client can continue with a document sequence getMore.

use bson::Document;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::entry::CursorEntry;
use crate::config::CursorConfig;
use crate::error::{CursorError, Result};
use crate::wire::op_msg::{
    FLAGS_LEN, HEADER_LEN, body_section_len, document_size, sequence_header_len,
};
use crate::wire::{CursorReply, ResponseType};

/// How the batch documents travel in the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingMode {
    /// Embedded as an array in the reply body, capped at the message ceiling
    #[default]
    Inline,
    /// Carried in a separate document sequence section
    Sequence,
}

/// Validated per-request batch parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchRequest {
    /// Upper bound on documents; `Some(0)` asks for an empty batch,
    /// `None` applies the default count ceiling
    pub requested_count: Option<u32>,
    pub mode: EncodingMode,
}

/// Size and count ceilings applied to every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_message_size: usize,
    pub max_doc_sequence_bytes: usize,
    pub default_batch_size: u32,
}

impl From<&CursorConfig> for BatchLimits {
    fn from(config: &CursorConfig) -> Self {
        Self {
            max_message_size: config.max_message_size_bytes,
            max_doc_sequence_bytes: config.max_doc_sequence_bytes,
            default_batch_size: config.default_batch_size,
        }
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::from(&CursorConfig::default())
    }
}

/// Documents produced for one reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    pub documents: Vec<Document>,
    /// Whether the cursor may still produce documents
    pub has_more: bool,
    /// Serialized size of the documents
    pub bytes: usize,
}

/// Running byte account for one reply.
#[derive(Debug, Clone)]
struct ReplyBudget {
    mode: EncodingMode,
    used: usize,
    limit: usize,
    docs: usize,
}

impl ReplyBudget {
    fn new(
        ns: &str,
        response_type: ResponseType,
        mode: EncodingMode,
        limits: &BatchLimits,
    ) -> Result<Self> {
        let (used, limit) = match mode {
            EncodingMode::Inline => {
                let empty = CursorReply {
                    cursor_id: 0,
                    ns: ns.to_string(),
                    batch: Vec::new(),
                    response_type,
                    mode,
                };
                let body = document_size(&empty.to_body())?;
                (HEADER_LEN + FLAGS_LEN + body_section_len(body), limits.max_message_size)
            }
            EncodingMode::Sequence => (
                sequence_header_len(response_type.sequence_identifier()),
                limits.max_doc_sequence_bytes,
            ),
        };

        Ok(Self {
            mode,
            used,
            limit,
            docs: 0,
        })
    }

    /// Bytes a document adds to the reply at the next position.
    fn cost(&self, doc_len: usize) -> usize {
        match self.mode {
            // element type byte + decimal index key + key terminator
            EncodingMode::Inline => 1 + decimal_len(self.docs) + 1 + doc_len,
            EncodingMode::Sequence => doc_len,
        }
    }

    fn fits(&self, doc_len: usize) -> bool {
        self.used + self.cost(doc_len) <= self.limit
    }

    fn add(&mut self, doc_len: usize) {
        self.used += self.cost(doc_len);
        self.docs += 1;
    }
}

fn decimal_len(mut n: usize) -> usize {
    let mut len = 1;
    while n >= 10 {
        n /= 10;
        len += 1;
    }
    len
}

/// Assembles batches under a fixed set of limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchBuilder {
    limits: BatchLimits,
}

impl BatchBuilder {
    pub fn new(limits: BatchLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    /// Build the next batch from `entry`.
    ///
    /// On error nothing is delivered: documents pulled so far are dropped.
    /// `ResponseTooLarge` is only raised for a document larger than the
    /// whole document sequence cap; it leaves the document stashed, so the
    /// cursor stays usable. Any other error leaves the cursor in an
    /// undefined position and the caller must destroy it.
    pub async fn build(
        &self,
        entry: &mut CursorEntry,
        request: &BatchRequest,
        response_type: ResponseType,
        cancel: &CancellationToken,
    ) -> Result<Batch> {
        let max_docs = request
            .requested_count
            .unwrap_or(self.limits.default_batch_size) as usize;
        let mut budget = ReplyBudget::new(
            &entry.namespace().full_name(),
            response_type,
            request.mode,
            &self.limits,
        )?;

        let id = entry.id();
        let mut documents = Vec::new();
        let mut bytes = 0;

        while documents.len() < max_docs {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let reason = format!("batch for cursor {id} cancelled");
                    return Err(CursorError::Cancelled(reason).into());
                }
                next = entry.next_document() => next?,
            };

            let Some(doc) = next else {
                break;
            };

            let size = document_size(&doc)?;
            if !budget.fits(size) {
                entry.stash(doc);
                if documents.is_empty() && request.mode == EncodingMode::Sequence {
                    return Err(CursorError::ResponseTooLarge {
                        document_size: size,
                        limit: budget.limit,
                    }
                    .into());
                }
                debug!(
                    "Cursor {} batch stopped at {} bytes by {:?} budget",
                    id,
                    budget.used,
                    request.mode
                );
                break;
            }

            budget.add(size);
            bytes += size;
            documents.push(doc);
        }

        entry.record_batch(documents.len());
        let has_more = entry.has_more();
        debug!(
            "Cursor {} produced {} document(s), {} bytes, has_more={}",
            id,
            documents.len(),
            bytes,
            has_more
        );

        Ok(Batch {
            documents,
            has_more,
            bytes,
        })
    }
}

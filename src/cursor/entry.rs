use bson::Document;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};

use super::producer::ResultProducer;
use super::{CursorId, Namespace};
use crate::error::Result;

/// Server-side state of one open cursor
///
/// Holds the paused result producer between getMore calls together with
/// the bookkeeping needed to resume it exactly where it stopped.
pub struct CursorEntry {
    /// Cursor identifier
    id: CursorId,

    /// Namespace the originating query ran against
    namespace: Namespace,

    /// Paused producer, exclusively owned by this entry
    producer: Box<dyn ResultProducer>,

    /// Document pulled from the producer but not yet delivered
    ///
    /// Set when a document did not fit in the previous batch; it is the
    /// first document of the next one.
    stash: Option<Document>,

    /// Number of documents delivered so far
    docs_returned: u64,

    /// Number of batches delivered so far
    batches_returned: u64,

    /// Whether the opening request negotiated document sequences
    doc_sequences: bool,

    /// Creation time, for lifetime accounting
    created_at: Instant,

    /// Wall-clock creation time, for reporting
    opened_at: DateTime<Utc>,

    /// Last time the cursor was pinned or released
    last_used: Instant,
}

impl CursorEntry {
    /// Create a new cursor entry
    ///
    /// # Arguments
    /// * `id` - Identifier allocated by the registry
    /// * `namespace` - Namespace of the originating query
    /// * `producer` - Producer to take ownership of
    /// * `doc_sequences` - Document sequence capability negotiated at creation
    pub fn new(
        id: CursorId,
        namespace: Namespace,
        producer: Box<dyn ResultProducer>,
        doc_sequences: bool,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            namespace,
            producer,
            stash: None,
            docs_returned: 0,
            batches_returned: 0,
            doc_sequences,
            created_at: now,
            opened_at: Utc::now(),
            last_used: now,
        }
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Get the number of documents retrieved so far
    pub fn docs_returned(&self) -> u64 {
        self.docs_returned
    }

    pub fn batches_returned(&self) -> u64 {
        self.batches_returned
    }

    pub fn doc_sequences(&self) -> bool {
        self.doc_sequences
    }

    /// Record the capability negotiated by a later getMore
    pub fn set_doc_sequences(&mut self, enabled: bool) {
        self.doc_sequences = enabled;
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Check whether the cursor has been idle longer than `timeout`
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.idle_for() > timeout
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Next document to deliver: the stash first, then the producer
    pub(crate) async fn next_document(&mut self) -> Result<Option<Document>> {
        if let Some(doc) = self.stash.take() {
            return Ok(Some(doc));
        }
        self.producer.try_next().await
    }

    /// Hold back a pulled document for the next batch
    pub(crate) fn stash(&mut self, doc: Document) {
        debug_assert!(self.stash.is_none(), "cursor stash already occupied");
        self.stash = Some(doc);
    }

    /// Whether any document may still be delivered
    pub fn has_more(&self) -> bool {
        self.stash.is_some() || !self.producer.is_exhausted()
    }

    /// Update delivery counters after a batch
    pub(crate) fn record_batch(&mut self, count: usize) {
        self.docs_returned += count as u64;
        self.batches_returned += 1;
    }

    /// Close the producer; the entry is unusable afterwards
    pub(crate) async fn close(&mut self) -> Result<()> {
        self.stash = None;
        self.producer.close().await
    }
}

/// Manual Debug implementation since the producer is a trait object
impl fmt::Debug for CursorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorEntry")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("docs_returned", &self.docs_returned)
            .field("batches_returned", &self.batches_returned)
            .field("doc_sequences", &self.doc_sequences)
            .field("stashed", &self.stash.is_some())
            .field("opened_at", &self.opened_at)
            .field("producer", &"<ResultProducer>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::producer::VecProducer;
    use bson::doc;

    fn entry(docs: Vec<Document>) -> CursorEntry {
        CursorEntry::new(
            CursorId::new(9).unwrap(),
            Namespace::new("db", "c").unwrap(),
            Box::new(VecProducer::new(docs)),
            false,
        )
    }

    #[tokio::test]
    async fn test_stash_is_delivered_first() {
        let mut entry = entry(vec![doc! {"_id": 1}, doc! {"_id": 2}]);
        let first = entry.next_document().await.unwrap().unwrap();
        entry.stash(first);
        assert_eq!(
            entry.next_document().await.unwrap(),
            Some(doc! {"_id": 1})
        );
        assert_eq!(
            entry.next_document().await.unwrap(),
            Some(doc! {"_id": 2})
        );
        assert!(!entry.has_more());
    }

    #[tokio::test]
    async fn test_stash_keeps_cursor_alive() {
        let mut entry = entry(vec![doc! {"_id": 1}]);
        let doc = entry.next_document().await.unwrap().unwrap();
        entry.stash(doc);
        assert!(entry.has_more());
    }

    #[test]
    fn test_counters_and_expiry() {
        let mut entry = entry(vec![]);
        entry.record_batch(3);
        entry.record_batch(0);
        assert_eq!(entry.docs_returned(), 3);
        assert_eq!(entry.batches_returned(), 2);
        assert!(!entry.is_expired(Duration::from_secs(600)));
    }
}

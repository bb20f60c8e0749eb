//! In-memory query engine
//!
//! Stores collections as insertion-ordered document lists and serves
//! queries by top-level equality matching. Each open producer works on a
//! snapshot taken when the query is opened.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;
use parking_lot::RwLock;
use tracing::debug;

use super::producer::{QueryEngine, ResultProducer, VecProducer};
use super::Namespace;
use crate::error::Result;

/// Shared, cloneable in-memory collection store.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    collections: Arc<RwLock<HashMap<Namespace, Vec<Document>>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a document to a collection, creating the collection if needed.
    pub fn insert(&self, ns: &Namespace, doc: Document) {
        self.collections
            .write()
            .entry(ns.clone())
            .or_default()
            .push(doc);
    }

    pub fn insert_many(&self, ns: &Namespace, docs: impl IntoIterator<Item = Document>) {
        self.collections
            .write()
            .entry(ns.clone())
            .or_default()
            .extend(docs);
    }

    /// Drop a collection. Returns whether it existed.
    pub fn drop_collection(&self, ns: &Namespace) -> bool {
        self.collections.write().remove(ns).is_some()
    }

    pub fn count(&self, ns: &Namespace) -> usize {
        self.collections.read().get(ns).map_or(0, Vec::len)
    }
}

/// Top-level equality match; an empty filter matches everything.
fn matches(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| doc.get(key) == Some(expected))
}

#[async_trait]
impl QueryEngine for MemoryEngine {
    async fn open(&self, ns: &Namespace, filter: &Document) -> Result<Box<dyn ResultProducer>> {
        let snapshot: Vec<Document> = self
            .collections
            .read()
            .get(ns)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        debug!("Opened producer on '{}' with {} matches", ns, snapshot.len());
        Ok(Box::new(VecProducer::new(snapshot)))
    }
}

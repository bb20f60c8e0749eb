//! Result producer abstractions
//!
//! A result producer is the query engine's side of a cursor: a lazy,
//! non-restartable sequence of documents pulled one at a time. Ownership
//! of a producer moves into the cursor entry that serves it.

use std::collections::VecDeque;

use async_trait::async_trait;
use bson::Document;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use tracing::debug;

use crate::cursor::Namespace;
use crate::error::{CursorError, Result};

/// Pull interface over the documents of one query.
#[async_trait]
pub trait ResultProducer: Send {
    /// Produce the next document, or `None` at end of stream.
    ///
    /// After `None` or an error the producer must not be pulled again.
    async fn try_next(&mut self) -> Result<Option<Document>>;

    /// Whether the producer already knows it has no more documents.
    ///
    /// `false` means "unknown or more available"; only a subsequent
    /// `try_next` returning `None` settles it.
    fn is_exhausted(&self) -> bool;

    /// Release underlying resources early.
    async fn close(&mut self) -> Result<()>;
}

/// Query-execution engine seam: opens producers for a namespace.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Open a producer over the documents of `ns` matching `filter`.
    async fn open(&self, ns: &Namespace, filter: &Document) -> Result<Box<dyn ResultProducer>>;
}

/// Producer over documents already materialized in memory.
pub struct VecProducer {
    docs: VecDeque<Document>,
    closed: bool,
}

impl VecProducer {
    pub fn new(docs: Vec<Document>) -> Self {
        Self {
            docs: docs.into(),
            closed: false,
        }
    }
}

#[async_trait]
impl ResultProducer for VecProducer {
    async fn try_next(&mut self) -> Result<Option<Document>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.docs.pop_front())
    }

    fn is_exhausted(&self) -> bool {
        self.closed || self.docs.is_empty()
    }

    async fn close(&mut self) -> Result<()> {
        self.docs.clear();
        self.closed = true;
        Ok(())
    }
}

/// Producer adapting an async document stream.
///
/// Stream errors are reported as `ProducerFailure`; after an error or the
/// end of the stream the producer is closed.
pub struct StreamProducer {
    stream: Option<BoxStream<'static, Result<Document>>>,
    produced: u64,
}

impl StreamProducer {
    pub fn new(stream: BoxStream<'static, Result<Document>>) -> Self {
        Self {
            stream: Some(stream),
            produced: 0,
        }
    }
}

#[async_trait]
impl ResultProducer for StreamProducer {
    async fn try_next(&mut self) -> Result<Option<Document>> {
        let stream = match self.stream.as_mut() {
            Some(s) => s,
            None => return Ok(None),
        };

        match stream.try_next().await {
            Ok(Some(doc)) => {
                self.produced += 1;
                Ok(Some(doc))
            }
            Ok(None) => {
                debug!("Stream producer exhausted after {} documents", self.produced);
                self.stream = None;
                Ok(None)
            }
            Err(e) => {
                // On error, drop the stream to release resources
                self.stream = None;
                Err(CursorError::ProducerFailure(e.to_string()).into())
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.stream.is_none()
    }

    async fn close(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            debug!("Closed stream producer after {} documents", self.produced);
        }
        Ok(())
    }
}

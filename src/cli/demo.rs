//! `cursord demo`: drive a find/getMore session end to end
//!
//! Fills an in-memory collection, opens a cursor through the command
//! router and drains it, recording the shape of every reply page.

use std::sync::Arc;

use bson::{Document, doc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::commands::{
    CommandContext, CommandReply, CommandRouter, DOC_SEQUENCE_OPT_IN, OpCountersSnapshot,
};
use crate::config::Config;
use crate::cursor::{MemoryEngine, Namespace, RegistryStats};
use crate::error::{CursordError, ErrorInfo, Result};
use crate::wire::{CursorReply, Section};

const DEMO_DB: &str = "demo";
const DEMO_COLLECTION: &str = "items";

/// Demo parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoOptions {
    pub docs: usize,
    pub doc_size: usize,
    pub batch_size: Option<u32>,
    pub doc_sequences: bool,
}

/// One reply page
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PageSummary {
    pub page: usize,
    pub command: &'static str,
    pub documents: usize,
    pub encoding: &'static str,
    pub wire_bytes: usize,
    pub cursor_id: i64,
}

/// Outcome of a demo run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DemoSummary {
    pub namespace: String,
    pub documents: usize,
    pub delivered: usize,
    pub pages: Vec<PageSummary>,
    pub opcounters: OpCountersSnapshot,
    pub cursors: RegistryStats,
}

fn padded_doc(id: i64, doc_size: usize) -> Document {
    // `_id` plus framing costs a few dozen bytes
    let padding = doc_size.saturating_sub(32);
    doc! {"_id": id, "payload": "x".repeat(padding)}
}

fn expect_cursor(reply: CommandReply) -> Result<CursorReply> {
    match reply {
        CommandReply::Cursor(cursor) => Ok(cursor),
        CommandReply::Document(body) => Err(ErrorInfo::from_reply(&body).into()),
    }
}

fn summarize(page: usize, command: &'static str, reply: &CursorReply) -> Result<PageSummary> {
    let msg = reply.to_op_msg(page as i32);
    let encoding = if msg.sections.iter().any(|s| matches!(s, Section::Sequence { .. })) {
        "sequence"
    } else {
        "inline"
    };

    Ok(PageSummary {
        page,
        command,
        documents: reply.batch.len(),
        encoding,
        wire_bytes: msg.encode()?.len(),
        cursor_id: reply.cursor_id,
    })
}

/// Run the demo session
pub async fn run_demo(config: &Config, options: &DemoOptions) -> Result<DemoSummary> {
    let ns = Namespace::new(DEMO_DB, DEMO_COLLECTION)?;
    let engine = MemoryEngine::new();
    engine.insert_many(
        &ns,
        (0..options.docs as i64).map(|i| padded_doc(i, options.doc_size)),
    );
    info!(
        "Loaded {} documents of ~{} bytes into '{}'",
        options.docs, options.doc_size, ns
    );

    let context = CommandContext::from_config(Arc::new(engine), config);
    let router = CommandRouter::new(context.clone());
    let cancel = CancellationToken::new();
    let reaper = context.registry().spawn_reaper(
        config.reaper_interval(),
        config.idle_timeout(),
        cancel.child_token(),
    );

    let mut find = doc! {"find": DEMO_COLLECTION, "$db": DEMO_DB};
    if let Some(batch_size) = options.batch_size {
        find.insert("batchSize", i64::from(batch_size));
    }

    let mut pages = Vec::new();
    let mut reply = expect_cursor(router.run_command(DEMO_DB, &find, &cancel).await)?;
    let mut delivered = reply.batch.len();
    pages.push(summarize(0, "find", &reply)?);

    while !reply.is_exhausted() {
        let mut get_more = doc! {
            "getMore": reply.cursor_id,
            "collection": DEMO_COLLECTION,
            "$db": DEMO_DB,
        };
        if let Some(batch_size) = options.batch_size.filter(|n| *n > 0) {
            get_more.insert("batchSize", i64::from(batch_size));
        }
        if options.doc_sequences {
            get_more.insert(DOC_SEQUENCE_OPT_IN, true);
        }

        reply = expect_cursor(router.run_command(DEMO_DB, &get_more, &cancel).await)?;
        delivered += reply.batch.len();
        pages.push(summarize(pages.len(), "getMore", &reply)?);

        // An open cursor with an empty getMore page holds a document too
        // large for an inline reply; retrying inline would never progress.
        if reply.batch.is_empty() && !reply.is_exhausted() {
            return Err(CursordError::Generic(format!(
                "cursor {} holds a document too large for an inline reply; rerun with --doc-sequences",
                reply.cursor_id
            )));
        }
    }

    cancel.cancel();
    if let Err(e) = reaper.await {
        tracing::warn!("Cursor reaper ended abnormally: {}", e);
    }

    Ok(DemoSummary {
        namespace: ns.full_name(),
        documents: options.docs,
        delivered,
        pages,
        opcounters: context.counters().snapshot(),
        cursors: context.registry().stats(),
    })
}

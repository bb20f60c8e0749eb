use super::*;
use crate::config::Config;
use crate::cursor::{MemoryEngine, Namespace, QueryEngine, ResultProducer, StreamProducer};
use crate::error::{CursordError, Result};
use crate::wire::CursorReply;
use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::StreamExt;
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

const MIB: usize = 1024 * 1024;

fn ns() -> Namespace {
    Namespace::new("test", "coll").unwrap()
}

fn numbered(n: usize) -> Vec<Document> {
    (0..n).map(|i| doc! {"_id": i as i64}).collect()
}

fn big_doc(i: i64, payload: usize) -> Document {
    doc! {"_id": i, "payload": "x".repeat(payload)}
}

fn context_with(engine: impl QueryEngine + 'static, config: &Config) -> CommandContext {
    CommandContext::from_config(Arc::new(engine), config)
}

fn context(docs: Vec<Document>) -> CommandContext {
    let engine = MemoryEngine::new();
    engine.insert_many(&ns(), docs);
    context_with(engine, &Config::default())
}

fn ids(batch: &[Document]) -> Vec<i64> {
    batch.iter().map(|d| d.get_i64("_id").unwrap()).collect()
}

async fn get_more(ctx: &CommandContext, id: i64, batch_size: Option<u32>) -> Result<CursorReply> {
    let mut req = GetMoreRequest::new(id, ns());
    req.batch_size = batch_size;
    ctx.get_more(req, &CancellationToken::new()).await
}

/// Producer that waits for a permit before yielding each document.
struct GatedProducer {
    docs: VecDeque<Document>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl ResultProducer for GatedProducer {
    async fn try_next(&mut self) -> Result<Option<Document>> {
        if self.docs.is_empty() {
            return Ok(None);
        }
        self.gate
            .acquire()
            .await
            .map_err(|e| CursordError::Generic(e.to_string()))?
            .forget();
        Ok(self.docs.pop_front())
    }

    fn is_exhausted(&self) -> bool {
        self.docs.is_empty()
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct GatedEngine {
    docs: Vec<Document>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl QueryEngine for GatedEngine {
    async fn open(&self, _ns: &Namespace, _filter: &Document) -> Result<Box<dyn ResultProducer>> {
        Ok(Box::new(GatedProducer {
            docs: self.docs.clone().into(),
            gate: self.gate.clone(),
        }))
    }
}

/// Engine whose producer fails after its documents.
struct FailingEngine {
    docs: Vec<Document>,
}

#[async_trait]
impl QueryEngine for FailingEngine {
    async fn open(&self, _ns: &Namespace, _filter: &Document) -> Result<Box<dyn ResultProducer>> {
        let items: Vec<Result<Document>> = self
            .docs
            .iter()
            .cloned()
            .map(Ok)
            .chain(std::iter::once(Err(CursordError::Generic("disk unavailable".into()))))
            .collect();
        Ok(Box::new(StreamProducer::new(futures::stream::iter(items).boxed())))
    }
}

async fn wait_until_pinned(ctx: &CommandContext) {
    while ctx.registry().stats().pinned == 0 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_find_then_get_more_delivers_in_order() {
    let ctx = context(numbered(10));
    let cancel = CancellationToken::new();

    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(4), &cancel)
        .await
        .unwrap();
    assert_ne!(first.cursor_id, 0);
    assert_eq!(ids(&first.batch), vec![0, 1, 2, 3]);
    assert_eq!(ctx.registry().len(), 1);

    let second = get_more(&ctx, first.cursor_id, Some(4)).await.unwrap();
    assert_eq!(second.cursor_id, first.cursor_id);
    assert_eq!(ids(&second.batch), vec![4, 5, 6, 7]);

    let last = get_more(&ctx, first.cursor_id, Some(4)).await.unwrap();
    assert_eq!(last.cursor_id, 0);
    assert_eq!(ids(&last.batch), vec![8, 9]);
    assert!(ctx.registry().is_empty());
}

#[tokio::test]
async fn test_exhausted_cursor_is_not_found() {
    let ctx = context(numbered(3));
    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(2), &CancellationToken::new())
        .await
        .unwrap();

    let last = assert_ok!(get_more(&ctx, first.cursor_id, None).await);
    assert_eq!(last.cursor_id, 0);

    let err = assert_err!(get_more(&ctx, first.cursor_id, None).await);
    assert_eq!(err.code(), 43);
    assert_eq!(err.code_name(), "CursorNotFound");
}

#[tokio::test]
async fn test_find_fitting_in_first_batch_closes_cursor() {
    let ctx = context(numbered(5));
    let reply = ctx
        .find(FindRequest::new(ns()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(reply.cursor_id, 0);
    assert_eq!(reply.batch.len(), 5);
    assert!(ctx.registry().is_empty());
}

#[tokio::test]
async fn test_find_default_batch_size() {
    let ctx = context(numbered(150));
    let reply = ctx
        .find(FindRequest::new(ns()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(reply.batch.len(), 101);
    assert_ne!(reply.cursor_id, 0);
}

#[tokio::test]
async fn test_single_batch_closes_cursor() {
    let ctx = context(numbered(5));
    let mut req = FindRequest::new(ns()).with_batch_size(2);
    req.single_batch = true;

    let reply = ctx.find(req, &CancellationToken::new()).await.unwrap();
    assert_eq!(reply.cursor_id, 0);
    assert_eq!(ids(&reply.batch), vec![0, 1]);
    assert!(ctx.registry().is_empty());
}

#[tokio::test]
async fn test_get_more_cursor_id_zero() {
    let ctx = context(numbered(1));
    let err = assert_err!(get_more(&ctx, 0, None).await);
    assert_eq!(err.code_name(), "CursorNotFound");
}

#[tokio::test]
async fn test_inline_reply_stays_under_message_limit() {
    let docs: Vec<Document> = (0..20).map(|i| big_doc(i, MIB)).collect();
    let ctx = context(docs);

    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(0), &CancellationToken::new())
        .await
        .unwrap();
    let reply = get_more(&ctx, first.cursor_id, Some(100)).await.unwrap();

    assert_eq!(reply.batch.len(), 15);
    let encoded = reply.to_op_msg(0).encode().unwrap();
    assert!(encoded.len() <= ctx.limits().max_message_size);

    let rest = get_more(&ctx, first.cursor_id, Some(100)).await.unwrap();
    assert_eq!(ids(&rest.batch), (15..20).collect::<Vec<_>>());
    assert_eq!(rest.cursor_id, 0);
}

#[tokio::test]
async fn test_large_documents_inline_one_per_batch() {
    let ctx = context(vec![big_doc(1, 15 * MIB), big_doc(2, 15 * MIB)]);

    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(0), &CancellationToken::new())
        .await
        .unwrap();
    assert_ne!(first.cursor_id, 0);
    assert!(first.batch.is_empty());

    let one = get_more(&ctx, first.cursor_id, None).await.unwrap();
    assert_eq!(ids(&one.batch), vec![1]);
    assert_eq!(one.cursor_id, first.cursor_id);
    assert!(one.to_op_msg(0).encode().unwrap().len() <= 16 * MIB);

    let two = get_more(&ctx, first.cursor_id, None).await.unwrap();
    assert_eq!(ids(&two.batch), vec![2]);
    assert_eq!(two.cursor_id, 0);
}

#[tokio::test]
async fn test_large_documents_in_one_sequence() {
    let ctx = context(vec![big_doc(1, 15 * MIB), big_doc(2, 15 * MIB)]);
    let cancel = CancellationToken::new();

    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(0), &cancel)
        .await
        .unwrap();

    let req = GetMoreRequest::new(first.cursor_id, ns()).with_doc_sequences(true);
    let reply = ctx.get_more(req, &cancel).await.unwrap();

    assert_eq!(reply.mode, crate::cursor::EncodingMode::Sequence);
    assert_eq!(ids(&reply.batch), vec![1, 2]);
    assert_eq!(reply.cursor_id, 0);

    let msg = reply.to_op_msg(7);
    assert_eq!(msg.sequence("cursor.nextBatch").map(<[Document]>::len), Some(2));
    assert!(msg.encode().unwrap().len() > 16 * MIB);
}

#[tokio::test]
async fn test_opt_in_ignored_when_disabled() {
    let mut config = Config::default();
    config.server.doc_sequences_enabled = false;
    let engine = MemoryEngine::new();
    engine.insert_many(&ns(), vec![big_doc(1, 15 * MIB), big_doc(2, 15 * MIB)]);
    let ctx = context_with(engine, &config);
    let cancel = CancellationToken::new();

    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(0), &cancel)
        .await
        .unwrap();
    let req = GetMoreRequest::new(first.cursor_id, ns()).with_doc_sequences(true);
    let reply = ctx.get_more(req, &cancel).await.unwrap();

    assert_eq!(reply.mode, crate::cursor::EncodingMode::Inline);
    assert_eq!(reply.batch.len(), 1);
}

#[tokio::test]
async fn test_oversized_document_keeps_cursor() {
    let ctx = context(vec![doc! {"_id": 0i64}, big_doc(1, 17 * MIB)]);
    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(1), &CancellationToken::new())
        .await
        .unwrap();

    let inline = get_more(&ctx, first.cursor_id, None).await.unwrap();
    assert!(inline.batch.is_empty());
    assert_eq!(inline.cursor_id, first.cursor_id);
    assert!(ctx.registry().contains(crate::cursor::CursorId::new(first.cursor_id).unwrap()));

    let req = GetMoreRequest::new(first.cursor_id, ns()).with_doc_sequences(true);
    let reply = ctx.get_more(req, &CancellationToken::new()).await.unwrap();
    assert_eq!(ids(&reply.batch), vec![1]);
}

#[tokio::test]
async fn test_find_keeps_cursor_when_first_document_overflows() {
    let ctx = context(vec![big_doc(1, 16 * MIB - 64), big_doc(2, 10)]);
    let cancel = CancellationToken::new();

    let first = ctx.find(FindRequest::new(ns()), &cancel).await.unwrap();
    assert!(first.batch.is_empty());
    assert_ne!(first.cursor_id, 0);

    let req = GetMoreRequest::new(first.cursor_id, ns()).with_doc_sequences(true);
    let reply = ctx.get_more(req, &cancel).await.unwrap();
    assert_eq!(ids(&reply.batch), vec![1, 2]);
}

#[tokio::test]
async fn test_namespace_mismatch_leaves_cursor_usable() {
    let ctx = context(numbered(4));
    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(2), &CancellationToken::new())
        .await
        .unwrap();

    let other = Namespace::new("test", "other").unwrap();
    let err = ctx
        .get_more(GetMoreRequest::new(first.cursor_id, other), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), 13);
    assert_eq!(err.code_name(), "NamespaceMismatch");

    let reply = get_more(&ctx, first.cursor_id, None).await.unwrap();
    assert_eq!(ids(&reply.batch), vec![2, 3]);
}

#[tokio::test]
async fn test_concurrent_get_more_is_rejected() {
    let gate = Arc::new(Semaphore::new(1));
    let engine = GatedEngine {
        docs: numbered(4),
        gate: gate.clone(),
    };
    let ctx = context_with(engine, &Config::default());

    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(1), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ids(&first.batch), vec![0]);
    let cursor_id = first.cursor_id;

    let holder = {
        let ctx = ctx.clone();
        tokio::spawn(async move { get_more(&ctx, cursor_id, Some(2)).await })
    };
    wait_until_pinned(&ctx).await;

    let err = get_more(&ctx, cursor_id, Some(2)).await.unwrap_err();
    assert_eq!(err.code(), 96);
    assert_eq!(err.code_name(), "CursorInUse");
    let CommandReply::Document(body) = CommandReply::error(&err) else {
        panic!("expected a document reply");
    };
    assert_eq!(
        body.get_array("errorLabels").unwrap(),
        &vec![Bson::String("RetryableError".into())]
    );

    gate.add_permits(2);
    let held = holder.await.unwrap().unwrap();
    assert_eq!(ids(&held.batch), vec![1, 2]);

    gate.add_permits(1);
    let rest = get_more(&ctx, cursor_id, None).await.unwrap();
    assert_eq!(ids(&rest.batch), vec![3]);
    assert_eq!(rest.cursor_id, 0);
}

#[tokio::test]
async fn test_producer_failure_kills_cursor() {
    let ctx = context_with(
        FailingEngine {
            docs: numbered(2),
        },
        &Config::default(),
    );

    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(1), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ids(&first.batch), vec![0]);

    let err = get_more(&ctx, first.cursor_id, Some(5)).await.unwrap_err();
    assert_eq!(err.code_name(), "ProducerFailure");
    assert!(ctx.registry().is_empty());

    let err = get_more(&ctx, first.cursor_id, None).await.unwrap_err();
    assert_eq!(err.code_name(), "CursorNotFound");
}

#[tokio::test]
async fn test_cancelled_get_more_releases_cursor() {
    let gate = Arc::new(Semaphore::new(1));
    let engine = GatedEngine {
        docs: numbered(3),
        gate: gate.clone(),
    };
    let ctx = context_with(engine, &Config::default());

    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(1), &CancellationToken::new())
        .await
        .unwrap();
    let cursor_id = first.cursor_id;

    let cancel = CancellationToken::new();
    let task = {
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            ctx.get_more(GetMoreRequest::new(cursor_id, ns()), &cancel)
                .await
        })
    };
    wait_until_pinned(&ctx).await;
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.code_name(), "Interrupted");
    assert_eq!(ctx.registry().stats().pinned, 0);

    let err = get_more(&ctx, cursor_id, None).await.unwrap_err();
    assert_eq!(err.code_name(), "CursorNotFound");
}

#[tokio::test]
async fn test_kill_cursors() {
    let ctx = context(numbered(10));
    let router = CommandRouter::new(ctx.clone());
    let cancel = CancellationToken::new();

    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(2), &cancel)
        .await
        .unwrap();

    let reply = router
        .run_command(
            "test",
            &doc! {"killCursors": "coll", "cursors": [first.cursor_id, 12345i64]},
            &cancel,
        )
        .await;
    let CommandReply::Document(body) = reply else {
        panic!("expected a document reply");
    };
    assert_eq!(body.get_array("cursorsKilled").unwrap(), &vec![Bson::Int64(first.cursor_id)]);
    assert_eq!(body.get_array("cursorsNotFound").unwrap(), &vec![Bson::Int64(12345)]);
    assert!(ctx.registry().is_empty());

    let err = get_more(&ctx, first.cursor_id, None).await.unwrap_err();
    assert_eq!(err.code_name(), "CursorNotFound");
}

#[tokio::test]
async fn test_kill_cursors_other_namespace() {
    let ctx = context(numbered(10));
    let first = ctx
        .find(FindRequest::new(ns()).with_batch_size(2), &CancellationToken::new())
        .await
        .unwrap();

    let reply = ctx
        .kill_cursors(KillCursorsRequest {
            ns: Namespace::new("test", "other").unwrap(),
            cursor_ids: vec![first.cursor_id],
        })
        .await
        .unwrap();
    assert!(reply.killed.is_empty());
    assert_eq!(reply.not_found, vec![first.cursor_id]);
    assert_eq!(ctx.registry().len(), 1);
}

#[tokio::test]
async fn test_router_round_trip() {
    let ctx = context(numbered(3));
    let router = CommandRouter::new(ctx.clone());
    let cancel = CancellationToken::new();

    let reply = router
        .run_command("ignored", &doc! {"find": "coll", "batchSize": 1, "$db": "test"}, &cancel)
        .await;
    let cursor = reply.as_cursor().unwrap().clone();
    assert_eq!(cursor.ns, "test.coll");
    assert_eq!(cursor.batch.len(), 1);

    let reply = router
        .run_command(
            "test",
            &doc! {"getMore": cursor.cursor_id, "collection": "coll"},
            &cancel,
        )
        .await;
    let rest = reply.as_cursor().unwrap();
    assert_eq!(ids(&rest.batch), vec![1, 2]);
    assert!(rest.is_exhausted());

    let status = router
        .run_command("admin", &doc! {"serverStatus": 1}, &cancel)
        .await;
    let CommandReply::Document(status) = status else {
        panic!("expected a document reply");
    };
    let opcounters = status.get_document("opcounters").unwrap();
    assert_eq!(opcounters.get_i64("query").unwrap(), 1);
    assert_eq!(opcounters.get_i64("getmore").unwrap(), 1);
    assert_eq!(opcounters.get_i64("command").unwrap(), 1);
    let cursor_metrics = status
        .get_document("metrics")
        .and_then(|m| m.get_document("cursor"))
        .unwrap();
    assert_eq!(cursor_metrics.get_i64("totalOpened").unwrap(), 1);
}

#[tokio::test]
async fn test_router_errors() {
    let router = CommandRouter::new(context(numbered(1)));
    let cancel = CancellationToken::new();

    let reply = router.run_command("test", &doc! {"insert": "coll"}, &cancel).await;
    assert!(!reply.is_ok());
    let CommandReply::Document(body) = reply else {
        panic!("expected a document reply");
    };
    assert_eq!(body.get_i32("code").unwrap(), 59);

    let reply = router
        .run_command("test", &doc! {"getMore": 1, "collection": "coll"}, &cancel)
        .await;
    let CommandReply::Document(body) = reply else {
        panic!("expected a document reply");
    };
    assert_eq!(body.get_str("codeName").unwrap(), "TypeMismatch");

    let err = router.execute("test", &Document::new(), &cancel).await.unwrap_err();
    assert_eq!(err.code_name(), "FailedToParse");
}

#[tokio::test]
async fn test_handle_op_msg() {
    let router = CommandRouter::new(context(numbered(2)));
    let request = crate::wire::OpMsg {
        request_id: 42,
        response_to: 0,
        flags: 0,
        sections: vec![crate::wire::Section::Body(doc! {"find": "coll", "$db": "test"})],
    };

    let reply = router
        .handle_message(&request, &CancellationToken::new())
        .await;
    assert_eq!(reply.response_to, 42);
    let parsed = CursorReply::from_op_msg(&reply).unwrap();
    assert_eq!(ids(&parsed.batch), vec![0, 1]);
}

#[tokio::test]
async fn test_handle_op_msg_without_db_replies_with_error() {
    let router = CommandRouter::new(context(numbered(2)));
    let request = crate::wire::OpMsg {
        request_id: 7,
        response_to: 0,
        flags: 0,
        sections: vec![crate::wire::Section::Body(doc! {"find": "coll"})],
    };

    let reply = router
        .handle_message(&request, &CancellationToken::new())
        .await;
    assert_eq!(reply.response_to, 7);
    let body = reply.body().unwrap();
    assert_eq!(body.get_f64("ok").unwrap(), 0.0);
    assert_eq!(body.get_str("codeName").unwrap(), "TypeMismatch");

    let err = CursorReply::from_op_msg(&reply).unwrap_err();
    assert_eq!(err.code(), 14);

    let empty = crate::wire::OpMsg {
        request_id: 8,
        response_to: 0,
        flags: 0,
        sections: Vec::new(),
    };
    let reply = router.handle_message(&empty, &CancellationToken::new()).await;
    assert_eq!(reply.body().unwrap().get_str("codeName").unwrap(), "FailedToParse");
}

fn drain_all(docs: usize, first: u32, sizes: &[u32]) -> Vec<i64> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let ctx = context(numbered(docs));
        let reply = ctx
            .find(FindRequest::new(ns()).with_batch_size(first), &CancellationToken::new())
            .await
            .unwrap();
        let mut seen = ids(&reply.batch);
        let mut cursor_id = reply.cursor_id;
        let mut round = 0;
        while cursor_id != 0 {
            let size = sizes[round % sizes.len()];
            let reply = get_more(&ctx, cursor_id, Some(size)).await.unwrap();
            seen.extend(ids(&reply.batch));
            cursor_id = reply.cursor_id;
            round += 1;
        }
        assert!(ctx.registry().is_empty());
        seen
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_every_document_delivered_once_in_order(
        docs in 0usize..250,
        first in 0u32..30,
        sizes in prop::collection::vec(1u32..40, 1..6),
    ) {
        let seen = drain_all(docs, first, &sizes);
        prop_assert_eq!(seen, (0..docs as i64).collect::<Vec<_>>());
    }
}

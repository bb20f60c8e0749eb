//! Cursor reply shaping
//!
//! Inline replies embed the batch in the body:
//!
//! ```text
//! { cursor: { firstBatch|nextBatch: [ ... ], id: <long>, ns: <string> }, ok: 1.0 }
//! ```
//!
//! Document sequence replies move the batch into a kind-1 section named
//! `cursor.firstBatch` or `cursor.nextBatch`, leaving `{ cursor: { id, ns }, ok: 1.0 }`
//! in the body.

use bson::{Bson, Document, doc};

use super::op_msg::{OpMsg, Section};
use crate::cursor::EncodingMode;
use crate::error::{CursordError, ErrorInfo, RequestError, Result};

const CURSOR_FIELD: &str = "cursor";
const ID_FIELD: &str = "id";
const NS_FIELD: &str = "ns";
const BATCH_FIELD: &str = "nextBatch";
const BATCH_FIELD_INITIAL: &str = "firstBatch";
const SEQUENCE_ID: &str = "cursor.nextBatch";
const SEQUENCE_ID_INITIAL: &str = "cursor.firstBatch";
const OK_FIELD: &str = "ok";
const WRITE_CONCERN_ERROR_FIELD: &str = "writeConcernError";
const OPLOG_TIMESTAMP_FIELD: &str = "$_internalLatestOplogTimestamp";

/// Whether a reply answers the opening command or a getMore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Initial,
    Subsequent,
}

impl ResponseType {
    pub fn batch_field(self) -> &'static str {
        match self {
            ResponseType::Initial => BATCH_FIELD_INITIAL,
            ResponseType::Subsequent => BATCH_FIELD,
        }
    }

    pub fn sequence_identifier(self) -> &'static str {
        match self {
            ResponseType::Initial => SEQUENCE_ID_INITIAL,
            ResponseType::Subsequent => SEQUENCE_ID,
        }
    }
}

/// Reply to `find` or `getMore`.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorReply {
    /// `0` when the cursor is exhausted and unregistered
    pub cursor_id: i64,
    /// Full `db.collection` name
    pub ns: String,
    pub batch: Vec<Document>,
    pub response_type: ResponseType,
    /// Encoding used when the reply is framed
    pub mode: EncodingMode,
}

impl CursorReply {
    pub fn is_exhausted(&self) -> bool {
        self.cursor_id == 0
    }

    /// Body of an inline reply, batch included.
    pub fn to_body(&self) -> Document {
        let batch: Vec<Bson> = self.batch.iter().cloned().map(Bson::Document).collect();
        let mut cursor = Document::new();
        cursor.insert(self.response_type.batch_field(), batch);
        cursor.insert(ID_FIELD, self.cursor_id);
        cursor.insert(NS_FIELD, self.ns.clone());
        doc! { CURSOR_FIELD: cursor, "ok": 1.0 }
    }

    /// Body of a document sequence reply: cursor metadata only.
    pub fn to_sequence_body(&self) -> Document {
        doc! {
            CURSOR_FIELD: { ID_FIELD: self.cursor_id, NS_FIELD: self.ns.clone() },
            "ok": 1.0,
        }
    }

    /// Frame the reply as OP_MSG sections according to its encoding mode.
    pub fn to_op_msg(&self, response_to: i32) -> OpMsg {
        let sections = match self.mode {
            EncodingMode::Inline => vec![Section::Body(self.to_body())],
            EncodingMode::Sequence => vec![
                Section::Body(self.to_sequence_body()),
                Section::Sequence {
                    identifier: self.response_type.sequence_identifier().to_string(),
                    documents: self.batch.clone(),
                },
            ],
        };
        OpMsg::reply(response_to, sections)
    }

    /// Parse a reply body that carries its batch inline.
    ///
    /// A failed reply (`ok` other than 1) comes back as the error it
    /// reports, code and codeName included.
    pub fn parse(body: &Document) -> Result<Self> {
        if !is_ok(body)? {
            return Err(ErrorInfo::from_reply(body).into());
        }

        match body.get(WRITE_CONCERN_ERROR_FIELD) {
            None | Some(Bson::Document(_)) => {}
            Some(_) => return Err(type_mismatch(WRITE_CONCERN_ERROR_FIELD, "object")),
        }
        match body.get(OPLOG_TIMESTAMP_FIELD) {
            None | Some(Bson::Timestamp(_)) => {}
            Some(_) => return Err(type_mismatch(OPLOG_TIMESTAMP_FIELD, "timestamp")),
        }

        let cursor = match body.get(CURSOR_FIELD) {
            Some(Bson::Document(cursor)) => cursor,
            _ => {
                return Err(type_mismatch(CURSOR_FIELD, "a nested object"));
            }
        };

        let cursor_id = match cursor.get(ID_FIELD) {
            Some(Bson::Int64(id)) => *id,
            _ => return Err(type_mismatch(ID_FIELD, "long")),
        };

        let ns = match cursor.get(NS_FIELD) {
            Some(Bson::String(ns)) => ns.clone(),
            _ => return Err(type_mismatch(NS_FIELD, "string")),
        };

        let next = cursor.get(BATCH_FIELD);
        let (response_type, batch) = match (next, cursor.get(BATCH_FIELD_INITIAL)) {
            (Some(batch), _) => (ResponseType::Subsequent, batch),
            (None, Some(batch)) => (ResponseType::Initial, batch),
            (None, None) => {
                return Err(RequestError::TypeMismatch {
                    field: format!("{BATCH_FIELD_INITIAL}' or '{BATCH_FIELD}"),
                    expected: "array",
                }
                .into());
            }
        };

        let Bson::Array(elements) = batch else {
            return Err(type_mismatch(response_type.batch_field(), "array"));
        };

        let batch = elements
            .iter()
            .map(|elt| match elt {
                Bson::Document(doc) => Ok(doc.clone()),
                other => Err(RequestError::BadValue(format!(
                    "getMore response batch contains a non-object element: {other}"
                ))
                .into()),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            cursor_id,
            ns,
            batch,
            response_type,
            mode: EncodingMode::Inline,
        })
    }

    /// Parse a framed reply, re-attaching a document sequence to the body.
    pub fn from_op_msg(msg: &OpMsg) -> Result<Self> {
        let body = msg
            .body()
            .ok_or_else(|| RequestError::FailedToParse("reply has no body section".into()))?;

        for response_type in [ResponseType::Subsequent, ResponseType::Initial] {
            if let Some(docs) = msg.sequence(response_type.sequence_identifier()) {
                let mut merged = body.clone();
                if let Ok(cursor) = merged.get_document_mut(CURSOR_FIELD) {
                    let batch: Vec<Bson> = docs.iter().cloned().map(Bson::Document).collect();
                    cursor.insert(response_type.batch_field(), batch);
                }
                let mut reply = Self::parse(&merged)?;
                reply.mode = EncodingMode::Sequence;
                return Ok(reply);
            }
        }

        Self::parse(body)
    }
}

/// Whether the `ok` field reports success. Any numeric type or a boolean is accepted.
fn is_ok(body: &Document) -> Result<bool> {
    match body.get(OK_FIELD) {
        Some(Bson::Double(ok)) => Ok(*ok == 1.0),
        Some(Bson::Int32(ok)) => Ok(*ok == 1),
        Some(Bson::Int64(ok)) => Ok(*ok == 1),
        Some(Bson::Boolean(ok)) => Ok(*ok),
        _ => Err(type_mismatch(OK_FIELD, "number")),
    }
}

fn type_mismatch(field: &str, expected: &'static str) -> CursordError {
    RequestError::TypeMismatch {
        field: field.to_string(),
        expected,
    }
    .into()
}

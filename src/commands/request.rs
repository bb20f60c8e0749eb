//! Command request parsing
//!
//! Turns BSON command documents into validated request values. Field
//! validation happens here once; handlers only see well-formed requests.

use bson::{Bson, Document};

use crate::cursor::{BatchRequest, EncodingMode, Namespace};
use crate::error::{RequestError, Result};

/// Opt-in flag that lets a getMore reply use a document sequence.
pub const DOC_SEQUENCE_OPT_IN: &str = "tempOptInToDocumentSequences";

/// Parsed `find` command.
#[derive(Debug, Clone, PartialEq)]
pub struct FindRequest {
    pub ns: Namespace,
    pub filter: Document,
    /// `None` applies the server default; `Some(0)` opens the cursor without results
    pub batch_size: Option<u32>,
    /// Close the cursor after the first batch
    pub single_batch: bool,
}

/// Parsed `getMore` command.
#[derive(Debug, Clone, PartialEq)]
pub struct GetMoreRequest {
    pub cursor_id: i64,
    pub ns: Namespace,
    /// Always positive when present
    pub batch_size: Option<u32>,
    pub doc_sequences: bool,
}

/// Parsed `killCursors` command.
#[derive(Debug, Clone, PartialEq)]
pub struct KillCursorsRequest {
    pub ns: Namespace,
    pub cursor_ids: Vec<i64>,
}

impl FindRequest {
    pub fn new(ns: Namespace) -> Self {
        Self {
            ns,
            filter: Document::new(),
            batch_size: None,
            single_batch: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }

    pub fn parse(db: &str, cmd: &Document) -> Result<Self> {
        let collection = string_field(cmd, "find")?;
        let ns = Namespace::new(db, collection)?;

        let filter = match cmd.get("filter") {
            None | Some(Bson::Null) => Document::new(),
            Some(Bson::Document(filter)) => filter.clone(),
            Some(_) => return Err(type_mismatch("filter", "object")),
        };

        let batch_size = match optional_integer(cmd, "batchSize")? {
            None => None,
            Some(n) if n < 0 => {
                return Err(RequestError::BadValue(format!(
                    "BatchSize value must be non-negative, but received: {n}"
                ))
                .into());
            }
            Some(n) => Some(clamp_u32(n)),
        };

        let single_batch = optional_bool(cmd, "singleBatch")?.unwrap_or(false);

        Ok(Self {
            ns,
            filter,
            batch_size,
            single_batch,
        })
    }

    pub fn batch_request(&self) -> BatchRequest {
        BatchRequest {
            requested_count: self.batch_size,
            mode: EncodingMode::Inline,
        }
    }
}

impl GetMoreRequest {
    pub fn new(cursor_id: i64, ns: Namespace) -> Self {
        Self {
            cursor_id,
            ns,
            batch_size: None,
            doc_sequences: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_doc_sequences(mut self, enabled: bool) -> Self {
        self.doc_sequences = enabled;
        self
    }

    pub fn parse(db: &str, cmd: &Document) -> Result<Self> {
        let cursor_id = match cmd.get("getMore") {
            Some(Bson::Int64(id)) => *id,
            _ => return Err(type_mismatch("getMore", "long")),
        };

        let collection = string_field(cmd, "collection")?;
        let ns = Namespace::new(db, collection)?;

        let batch_size = match optional_integer(cmd, "batchSize")? {
            None => None,
            Some(n) if n <= 0 => {
                return Err(RequestError::BadValue(format!(
                    "Batch size for getMore must be positive, but received: {n}"
                ))
                .into());
            }
            Some(n) => Some(clamp_u32(n)),
        };

        let doc_sequences = optional_bool(cmd, DOC_SEQUENCE_OPT_IN)?.unwrap_or(false);

        Ok(Self {
            cursor_id,
            ns,
            batch_size,
            doc_sequences,
        })
    }

    /// Batch parameters, honoring the opt-in only if the server allows it.
    pub fn batch_request(&self, sequences_enabled: bool) -> BatchRequest {
        let mode = if self.doc_sequences && sequences_enabled {
            EncodingMode::Sequence
        } else {
            EncodingMode::Inline
        };
        BatchRequest {
            requested_count: self.batch_size,
            mode,
        }
    }
}

impl KillCursorsRequest {
    pub fn parse(db: &str, cmd: &Document) -> Result<Self> {
        let collection = string_field(cmd, "killCursors")?;
        let ns = Namespace::new(db, collection)?;

        let ids = match cmd.get("cursors") {
            Some(Bson::Array(ids)) => ids,
            _ => return Err(type_mismatch("cursors", "array")),
        };
        if ids.is_empty() {
            return Err(RequestError::BadValue("Must specify at least one cursor id".into()).into());
        }

        let cursor_ids = ids
            .iter()
            .map(|id| match id {
                Bson::Int64(id) => Ok(*id),
                _ => Err(type_mismatch("cursors", "array of long")),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { ns, cursor_ids })
    }
}

fn type_mismatch(field: &str, expected: &'static str) -> crate::error::CursordError {
    RequestError::TypeMismatch {
        field: field.to_string(),
        expected,
    }
    .into()
}

fn string_field<'a>(cmd: &'a Document, field: &str) -> Result<&'a str> {
    match cmd.get(field) {
        Some(Bson::String(s)) => Ok(s.as_str()),
        _ => Err(type_mismatch(field, "string")),
    }
}

/// Read an integral number stored as int32, int64 or a whole double.
fn optional_integer(cmd: &Document, field: &str) -> Result<Option<i64>> {
    match cmd.get(field) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Int32(n)) => Ok(Some(i64::from(*n))),
        Some(Bson::Int64(n)) => Ok(Some(*n)),
        Some(Bson::Double(n)) if n.fract() == 0.0 && n.is_finite() => Ok(Some(*n as i64)),
        Some(_) => Err(type_mismatch(field, "number")),
    }
}

fn optional_bool(cmd: &Document, field: &str) -> Result<Option<bool>> {
    match cmd.get(field) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Boolean(b)) => Ok(Some(*b)),
        Some(_) => Err(type_mismatch(field, "bool")),
    }
}

fn clamp_u32(n: i64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

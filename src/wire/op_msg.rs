//! OP_MSG framing
//!
//! Layout (little-endian):
//!
//! ```text
//! header    messageLength:i32 requestID:i32 responseTo:i32 opCode:i32 (= 2013)
//! flagBits  u32
//! sections  kind 0: body document
//!           kind 1: size:i32 identifier:cstring document*
//! ```
//!
//! Only the parts needed to reason about size ceilings and section
//! boundaries are implemented; checksums and exhaust flags are not.

use bson::Document;

use crate::error::{RequestError, Result};

pub const OP_MSG: i32 = 2013;
pub const HEADER_LEN: usize = 16;
pub const FLAGS_LEN: usize = 4;

const KIND_BODY: u8 = 0;
const KIND_SEQUENCE: u8 = 1;

/// One OP_MSG section.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Body(Document),
    Sequence {
        identifier: String,
        documents: Vec<Document>,
    },
}

/// A framed OP_MSG message.
#[derive(Debug, Clone, PartialEq)]
pub struct OpMsg {
    pub request_id: i32,
    pub response_to: i32,
    pub flags: u32,
    pub sections: Vec<Section>,
}

/// Encoded size of a kind-0 section around a body of `body_len` bytes.
pub fn body_section_len(body_len: usize) -> usize {
    1 + body_len
}

/// Encoded size of a kind-1 section header (without its documents).
pub fn sequence_header_len(identifier: &str) -> usize {
    1 + 4 + identifier.len() + 1
}

/// Serialized BSON size of a document.
pub fn document_size(doc: &Document) -> Result<usize> {
    Ok(bson::to_vec(doc)?.len())
}

impl OpMsg {
    /// A reply message with the given sections.
    pub fn reply(response_to: i32, sections: Vec<Section>) -> Self {
        Self {
            request_id: 0,
            response_to,
            flags: 0,
            sections,
        }
    }

    /// The kind-0 body, if present.
    pub fn body(&self) -> Option<&Document> {
        self.sections.iter().find_map(|section| match section {
            Section::Body(doc) => Some(doc),
            Section::Sequence { .. } => None,
        })
    }

    /// Documents of the sequence named `identifier`, if present.
    pub fn sequence(&self, identifier: &str) -> Option<&[Document]> {
        self.sections.iter().find_map(|section| match section {
            Section::Sequence {
                identifier: id,
                documents,
            } if id == identifier => Some(documents.as_slice()),
            _ => None,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_LEN + FLAGS_LEN);
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.response_to.to_le_bytes());
        buf.extend_from_slice(&OP_MSG.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());

        for section in &self.sections {
            match section {
                Section::Body(doc) => {
                    buf.push(KIND_BODY);
                    doc.to_writer(&mut buf)?;
                }
                Section::Sequence {
                    identifier,
                    documents,
                } => {
                    buf.push(KIND_SEQUENCE);
                    let size_at = buf.len();
                    buf.extend_from_slice(&0i32.to_le_bytes());
                    buf.extend_from_slice(identifier.as_bytes());
                    buf.push(0);
                    for doc in documents {
                        doc.to_writer(&mut buf)?;
                    }
                    let size = to_i32(buf.len() - size_at)?;
                    buf[size_at..size_at + 4].copy_from_slice(&size.to_le_bytes());
                }
            }
        }

        let total = to_i32(buf.len())?;
        buf[0..4].copy_from_slice(&total.to_le_bytes());
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader { bytes, pos: 0 };

        let length = reader.i32()? as usize;
        if length != bytes.len() {
            return Err(malformed(format!(
                "message length {length} does not match {} received bytes",
                bytes.len()
            )));
        }
        let request_id = reader.i32()?;
        let response_to = reader.i32()?;
        let op_code = reader.i32()?;
        if op_code != OP_MSG {
            return Err(malformed(format!("unexpected opCode {op_code}")));
        }
        let flags = reader.i32()? as u32;

        let mut sections = Vec::new();
        while reader.remaining() > 0 {
            match reader.u8()? {
                KIND_BODY => sections.push(Section::Body(reader.document()?)),
                KIND_SEQUENCE => {
                    let start = reader.pos;
                    let size = reader.i32()? as usize;
                    let end = start
                        .checked_add(size)
                        .filter(|end| *end <= bytes.len())
                        .ok_or_else(|| malformed("sequence section overruns message"))?;
                    let identifier = reader.cstring()?;
                    let mut documents = Vec::new();
                    while reader.pos < end {
                        documents.push(reader.document()?);
                    }
                    if reader.pos != end {
                        return Err(malformed("sequence section size mismatch"));
                    }
                    sections.push(Section::Sequence {
                        identifier,
                        documents,
                    });
                }
                kind => return Err(malformed(format!("unknown section kind {kind}"))),
            }
        }

        Ok(Self {
            request_id,
            response_to,
            flags,
            sections,
        })
    }
}

fn to_i32(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| malformed(format!("message of {len} bytes exceeds i32 length")))
}

fn malformed(msg: impl Into<String>) -> crate::error::CursordError {
    RequestError::FailedToParse(msg.into()).into()
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(malformed("unexpected end of message"));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32> {
        let raw = self.take(4)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn cstring(&mut self) -> Result<String> {
        let rest = &self.bytes[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| malformed("unterminated section identifier"))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| malformed("section identifier is not UTF-8"))?
            .to_string();
        self.pos += nul + 1;
        Ok(s)
    }

    fn document(&mut self) -> Result<Document> {
        let start = self.pos;
        let len = self.i32()?;
        if len < 5 {
            return Err(malformed(format!("invalid document length {len}")));
        }
        self.pos = start;
        let raw = self.take(len as usize)?;
        Ok(Document::from_reader(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_body_only_layout() {
        let body = doc! {"ok": 1.0};
        let msg = OpMsg::reply(7, vec![Section::Body(body.clone())]);
        let bytes = msg.encode().unwrap();

        let expected = HEADER_LEN + FLAGS_LEN + body_section_len(document_size(&body).unwrap());
        assert_eq!(bytes.len(), expected);
        assert_eq!(i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize, expected);
        assert_eq!(i32::from_le_bytes(bytes[8..12].try_into().unwrap()), 7);
        assert_eq!(i32::from_le_bytes(bytes[12..16].try_into().unwrap()), OP_MSG);
    }

    #[test]
    fn test_sequence_section_size() {
        let docs = vec![doc! {"_id": 1}, doc! {"_id": 2}];
        let doc_bytes: usize = docs.iter().map(|d| document_size(d).unwrap()).sum();
        let msg = OpMsg::reply(
            0,
            vec![
                Section::Body(doc! {"ok": 1.0}),
                Section::Sequence {
                    identifier: "cursor.nextBatch".into(),
                    documents: docs.clone(),
                },
            ],
        );

        let bytes = msg.encode().unwrap();
        let body_len = document_size(&doc! {"ok": 1.0}).unwrap();
        assert_eq!(
            bytes.len(),
            HEADER_LEN
                + FLAGS_LEN
                + body_section_len(body_len)
                + sequence_header_len("cursor.nextBatch")
                + doc_bytes
        );

        let decoded = OpMsg::decode(&bytes).unwrap();
        assert_eq!(decoded.sequence("cursor.nextBatch"), Some(docs.as_slice()));
        assert_eq!(decoded.body(), Some(&doc! {"ok": 1.0}));
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = OpMsg::reply(0, vec![Section::Body(doc! {"a": 1})])
            .encode()
            .unwrap();
        assert!(OpMsg::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let mut bytes = OpMsg::reply(0, vec![Section::Body(doc! {"a": 1})])
            .encode()
            .unwrap();
        bytes[HEADER_LEN + FLAGS_LEN] = 9;
        let err = OpMsg::decode(&bytes).unwrap_err();
        assert_eq!(err.code_name(), "FailedToParse");
    }
}

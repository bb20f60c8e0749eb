//! Command reply types

use bson::Document;

use crate::error::{CursordError, ErrorInfo};
use crate::wire::{CursorReply, OpMsg, Section};

/// Reply produced by a command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    /// `find` / `getMore` reply, framed according to its encoding mode
    Cursor(CursorReply),

    /// Any other reply: a single body document
    Document(Document),
}

impl CommandReply {
    /// Error reply body for a failed command
    pub fn error(err: &CursordError) -> Self {
        CommandReply::Document(ErrorInfo::from_error(err).to_document())
    }

    /// Whether the reply reports success (`ok: 1`)
    pub fn is_ok(&self) -> bool {
        match self {
            CommandReply::Cursor(_) => true,
            CommandReply::Document(doc) => doc.get_f64("ok").is_ok_and(|ok| ok == 1.0),
        }
    }

    pub fn as_cursor(&self) -> Option<&CursorReply> {
        match self {
            CommandReply::Cursor(reply) => Some(reply),
            CommandReply::Document(_) => None,
        }
    }

    /// Frame the reply for the wire
    pub fn to_op_msg(&self, response_to: i32) -> OpMsg {
        match self {
            CommandReply::Cursor(reply) => reply.to_op_msg(response_to),
            CommandReply::Document(doc) => {
                OpMsg::reply(response_to, vec![Section::Body(doc.clone())])
            }
        }
    }
}

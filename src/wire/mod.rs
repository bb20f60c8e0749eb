//! Reply encoding
//!
//! - `op_msg`: OP_MSG framing with body and document sequence sections
//! - `reply`: cursor reply bodies for `find` and `getMore`, and their parsing

pub mod op_msg;
pub mod reply;

pub use op_msg::{OpMsg, Section};
pub use reply::{CursorReply, ResponseType};

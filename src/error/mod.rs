//! Error handling module for cursor operations.
//!
//! This module provides:
//! - Application-specific error types covering the cursor lifecycle,
//!   request validation and configuration
//! - Structured error replies (`{ok: 0, errmsg, code, codeName}`) for commands
//!
//! # Example
//!
//! ```rust
//! use cursord::error::{CursorError, CursordError, ErrorInfo};
//!
//! let err: CursordError = CursorError::CursorNotFound(17).into();
//! let reply = ErrorInfo::from_error(&err).to_document();
//! assert_eq!(reply.get_str("codeName").unwrap(), "CursorNotFound");
//! ```

pub mod kinds;
pub mod reply;

// Re-export commonly used types
pub use kinds::{ConfigError, CursorError, CursordError, RequestError, Result};
pub use reply::ErrorInfo;

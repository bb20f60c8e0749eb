use std::{fmt, io};

use super::reply::ErrorInfo;

/// Crate-wide `Result` type using [`CursordError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, CursordError>;

/// Top-level error type for cursord operations.
///
/// This type wraps more specific error kinds and provides a single
/// error type that can be used throughout the crate.
#[derive(Debug)]
pub enum CursordError {
    /// Cursor lifecycle and batch building errors.
    Cursor(CursorError),

    /// Malformed or invalid command requests.
    Request(RequestError),

    /// Configuration errors.
    Config(ConfigError),

    /// I/O errors.
    Io(io::Error),

    /// BSON serialization errors.
    Bson(String),

    /// Error reply (`ok: 0`) received from a server.
    Server(ErrorInfo),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Cursor-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    /// No live cursor with this id (never existed, exhausted, killed or reaped).
    CursorNotFound(i64),

    /// The namespace of a getMore does not match the cursor's namespace.
    NamespaceMismatch { cursor_id: i64, expected: String, found: String },

    /// Another operation currently holds this cursor.
    CursorInUse(i64),

    /// The result producer failed while generating a document.
    ProducerFailure(String),

    /// Cursor id space or cursor quota exhausted.
    ResourceExhausted(String),

    /// A single document exceeds the document sequence cap.
    ResponseTooLarge { document_size: usize, limit: usize },

    /// The operation was interrupted before the batch was complete.
    Cancelled(String),
}

/// Request parsing and validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The command document could not be parsed.
    FailedToParse(String),

    /// A field has the wrong BSON type.
    TypeMismatch { field: String, expected: &'static str },

    /// A field has an invalid value.
    BadValue(String),

    /// The command name is not recognized.
    CommandNotFound(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

impl CursordError {
    /// Numeric error code reported in command replies.
    pub fn code(&self) -> i32 {
        match self {
            CursordError::Cursor(e) => e.code(),
            CursordError::Request(e) => e.code(),
            CursordError::Config(_) => 2,
            CursordError::Server(info) => info.code(),
            CursordError::Io(_) | CursordError::Bson(_) | CursordError::Generic(_) => 1,
        }
    }

    /// Symbolic error name reported in command replies.
    pub fn code_name(&self) -> &str {
        match self {
            CursordError::Cursor(e) => e.code_name(),
            CursordError::Request(e) => e.code_name(),
            CursordError::Config(_) => "BadValue",
            CursordError::Server(info) => info.code_name(),
            CursordError::Io(_) | CursordError::Bson(_) | CursordError::Generic(_) => {
                "InternalError"
            }
        }
    }

    /// Returns the cursor error if this is one.
    pub fn as_cursor_error(&self) -> Option<&CursorError> {
        match self {
            CursordError::Cursor(e) => Some(e),
            _ => None,
        }
    }
}

impl CursorError {
    pub fn code(&self) -> i32 {
        match self {
            CursorError::CursorNotFound(_) => 43,
            CursorError::NamespaceMismatch { .. } => 13,
            CursorError::CursorInUse(_) => 96,
            CursorError::ProducerFailure(_) => 1,
            CursorError::ResourceExhausted(_) => 146,
            CursorError::ResponseTooLarge { .. } => 10334,
            CursorError::Cancelled(_) => 11601,
        }
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            CursorError::CursorNotFound(_) => "CursorNotFound",
            CursorError::NamespaceMismatch { .. } => "NamespaceMismatch",
            CursorError::CursorInUse(_) => "CursorInUse",
            CursorError::ProducerFailure(_) => "ProducerFailure",
            CursorError::ResourceExhausted(_) => "ResourceExhausted",
            CursorError::ResponseTooLarge { .. } => "BSONObjectTooLarge",
            CursorError::Cancelled(_) => "Interrupted",
        }
    }

    /// Whether the caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CursorError::CursorInUse(_))
    }
}

impl RequestError {
    pub fn code(&self) -> i32 {
        match self {
            RequestError::FailedToParse(_) => 9,
            RequestError::TypeMismatch { .. } => 14,
            RequestError::BadValue(_) => 2,
            RequestError::CommandNotFound(_) => 59,
        }
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            RequestError::FailedToParse(_) => "FailedToParse",
            RequestError::TypeMismatch { .. } => "TypeMismatch",
            RequestError::BadValue(_) => "BadValue",
            RequestError::CommandNotFound(_) => "CommandNotFound",
        }
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for CursordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursordError::Cursor(e) => write!(f, "{e}"),
            CursordError::Request(e) => write!(f, "{e}"),
            CursordError::Config(e) => write!(f, "Configuration error: {e}"),
            CursordError::Io(e) => write!(f, "I/O error: {e}"),
            CursordError::Bson(msg) => write!(f, "BSON error: {msg}"),
            CursordError::Server(info) => write!(f, "{}", info.message()),
            CursordError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for CursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorError::CursorNotFound(id) => write!(f, "cursor id {id} not found"),
            CursorError::NamespaceMismatch {
                cursor_id,
                expected,
                found,
            } => write!(
                f,
                "Requested getMore on namespace '{found}', but cursor {cursor_id} belongs to a different namespace {expected}"
            ),
            CursorError::CursorInUse(id) => write!(f, "cursor id {id} is already in use"),
            CursorError::ProducerFailure(msg) => write!(f, "Executor error during getMore: {msg}"),
            CursorError::ResourceExhausted(msg) => write!(f, "Cannot open cursor: {msg}"),
            CursorError::ResponseTooLarge {
                document_size,
                limit,
            } => write!(
                f,
                "Document of {document_size} bytes does not fit in a response limited to {limit} bytes"
            ),
            CursorError::Cancelled(msg) => write!(f, "Operation interrupted: {msg}"),
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::FailedToParse(msg) => write!(f, "Failed to parse: {msg}"),
            RequestError::TypeMismatch { field, expected } => {
                write!(f, "Field '{field}' must be of type {expected}")
            }
            RequestError::BadValue(msg) => write!(f, "{msg}"),
            RequestError::CommandNotFound(cmd) => write!(f, "no such command: '{cmd}'"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl std::error::Error for CursordError {}
impl std::error::Error for CursorError {}
impl std::error::Error for RequestError {}
impl std::error::Error for ConfigError {}

/* ========================= Conversions to CursordError ========================= */

impl From<io::Error> for CursordError {
    fn from(err: io::Error) -> Self {
        CursordError::Io(err)
    }
}

impl From<bson::ser::Error> for CursordError {
    fn from(err: bson::ser::Error) -> Self {
        CursordError::Bson(err.to_string())
    }
}

impl From<bson::de::Error> for CursordError {
    fn from(err: bson::de::Error) -> Self {
        CursordError::Bson(err.to_string())
    }
}

impl From<bson::raw::Error> for CursordError {
    fn from(err: bson::raw::Error) -> Self {
        CursordError::Bson(err.to_string())
    }
}

impl From<CursorError> for CursordError {
    fn from(err: CursorError) -> Self {
        CursordError::Cursor(err)
    }
}

impl From<RequestError> for CursordError {
    fn from(err: RequestError) -> Self {
        CursordError::Request(err)
    }
}

impl From<ConfigError> for CursordError {
    fn from(err: ConfigError) -> Self {
        CursordError::Config(err)
    }
}

impl From<ErrorInfo> for CursordError {
    fn from(info: ErrorInfo) -> Self {
        CursordError::Server(info)
    }
}

impl From<String> for CursordError {
    fn from(msg: String) -> Self {
        CursordError::Generic(msg)
    }
}

impl From<&str> for CursordError {
    fn from(msg: &str) -> Self {
        CursordError::Generic(msg.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_error_codes() {
        let err: CursordError = CursorError::CursorNotFound(7).into();
        assert_eq!(err.code(), 43);
        assert_eq!(err.code_name(), "CursorNotFound");
        assert_eq!(err.to_string(), "cursor id 7 not found");
    }

    #[test]
    fn test_only_in_use_is_retryable() {
        assert!(CursorError::CursorInUse(1).is_retryable());
        assert!(!CursorError::CursorNotFound(1).is_retryable());
        assert!(!CursorError::ProducerFailure("boom".into()).is_retryable());
    }

    #[test]
    fn test_request_error_display() {
        let err = RequestError::TypeMismatch {
            field: "batchSize".into(),
            expected: "number",
        };
        assert_eq!(err.to_string(), "Field 'batchSize' must be of type number");
        assert_eq!(CursordError::from(err).code(), 14);
    }
}

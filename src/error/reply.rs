use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use super::kinds::CursordError;

/// Structured error information extracted from a failed command.
///
/// This is serialized both into the BSON error reply and, for logging,
/// into JSON.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub(crate) ok: f64,
    #[serde(rename = "errmsg")]
    pub(crate) message: String,
    pub(crate) code: i32,
    #[serde(rename = "codeName")]
    pub(crate) code_name: String,
    #[serde(rename = "errorLabels", skip_serializing_if = "Vec::is_empty", default)]
    pub(crate) labels: Vec<String>,
}

impl ErrorInfo {
    /// Extract the reply fields from a crate error.
    pub fn from_error(error: &CursordError) -> Self {
        if let CursordError::Server(info) = error {
            return info.clone();
        }

        let mut labels = Vec::new();
        if error.as_cursor_error().is_some_and(|e| e.is_retryable()) {
            labels.push("RetryableError".to_string());
        }

        Self {
            ok: 0.0,
            message: error.to_string(),
            code: error.code(),
            code_name: error.code_name().to_string(),
            labels,
        }
    }

    /// Rebuild error info from the body of a failed reply.
    ///
    /// Missing fields fall back to `code: 1`, `codeName: "UnknownError"`
    /// and an empty message; a numeric code of any width is accepted.
    pub fn from_reply(body: &Document) -> Self {
        let code = match body.get("code") {
            Some(Bson::Int32(code)) => *code,
            Some(Bson::Int64(code)) => *code as i32,
            Some(Bson::Double(code)) => *code as i32,
            _ => 1,
        };
        let labels = body
            .get_array("errorLabels")
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|label| label.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            ok: 0.0,
            message: body.get_str("errmsg").unwrap_or_default().to_string(),
            code,
            code_name: body.get_str("codeName").unwrap_or("UnknownError").to_string(),
            labels,
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn code_name(&self) -> &str {
        &self.code_name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Convert to the BSON body of an error reply.
    pub fn to_document(&self) -> bson::Document {
        // Every field is a plain scalar or string array, so serialization cannot fail.
        bson::to_document(self).unwrap_or_else(|_| {
            bson::doc! {
                "ok": 0.0,
                "errmsg": &self.message,
                "code": self.code,
                "codeName": &self.code_name,
            }
        })
    }

    /// Convert error info to compact JSON string (single line).
    pub fn to_json_compact(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

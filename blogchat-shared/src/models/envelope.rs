use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message used on every successful response.
pub const SUCCESS_MESSAGE: &str = "success";

/// JSON body wrapping every HTTP response: `{code, message, data?}`.
///
/// `code` mirrors the HTTP status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    /// HTTP status code.
    pub code: u16,
    /// `"success"` or a human readable error.
    pub message: String,
    /// Payload for successful responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Optional structured error context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl<T> ApiEnvelope<T> {
    /// Creates a `200 success` envelope around `data`.
    ///
    /// # Arguments
    /// * `data` - The payload to wrap
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: SUCCESS_MESSAGE.to_string(),
            data: Some(data),
            details: None,
        }
    }

    /// Returns `true` when the envelope reports success.
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }
}

impl ApiEnvelope<Value> {
    /// Creates an error envelope without payload.
    ///
    /// # Arguments
    /// * `code` - HTTP status code
    /// * `message` - The error message
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            details: None,
        }
    }

    /// Attaches structured details to an error envelope.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

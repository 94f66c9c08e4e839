//! Error Handling Module
//!
//! A single error type covers the whole request pipeline:
//! - configuration errors raised before any network I/O
//! - transport errors (non-2xx responses, network failures, mixed content)
//! - parse errors for response bodies and rendered templates
//! - aborts, which are never reported to the user
//!
//! # Example
//!
//! ```rust,ignore
//! use llmchat::error::LlmError;
//!
//! let error = LlmError::api_error(404, "Not found");
//! assert_eq!(error.status_code(), Some(404));
//! assert!(!error.is_abort());
//! ```

use thiserror::Error;

/// Errors produced by the chat client.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// The preset cannot serve the request (missing endpoint path, invalid combination).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The caller asked for something the current state does not allow.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The request could not be sent or the connection failed mid-way.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The server answered with a non-success status.
    #[error("API request failed: {code} {message}")]
    ApiError { code: u16, message: String },

    /// The page is served over https and the target is a non-loopback http URL.
    #[error("Mixed content blocked: {0}")]
    MixedContent(String),

    /// A response body or rendered template could not be interpreted.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The event stream itself broke (not a single malformed frame).
    #[error("Stream error: {0}")]
    StreamError(String),

    /// The chat template failed to compile or render.
    #[error("Template error: {0}")]
    TemplateError(String),

    /// Reading or writing persisted state failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Generation was cancelled by the user or superseded by a conversation switch.
    #[error("Request aborted")]
    Aborted,
}

impl LlmError {
    pub fn api_error(code: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            code,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigurationError(message.into())
    }

    /// HTTP status code, when the error came from a server response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Aborts are a terminal condition, not a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Errors raised before any request was issued.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError(_) | Self::InvalidInput(_) | Self::MixedContent(_)
        )
    }

    /// Header and body suitable for an error notification.
    pub fn report(&self) -> (String, String) {
        let header = match self {
            Self::ConfigurationError(_) => "Configuration error",
            Self::InvalidInput(_) => "Invalid request",
            Self::HttpError(_) => "Network error",
            Self::ApiError { .. } => "API request failed",
            Self::MixedContent(_) => "Blocked insecure request",
            Self::ParseError(_) => "Unexpected response",
            Self::StreamError(_) => "Stream interrupted",
            Self::TemplateError(_) => "Chat template error",
            Self::StorageError(_) => "Storage error",
            Self::Aborted => "Aborted",
        };
        (header.to_string(), self.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(format!("JSON error: {err}"))
    }
}

impl From<minijinja::Error> for LlmError {
    fn from(err: minijinja::Error) -> Self {
        Self::TemplateError(err.to_string())
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::api_error(status.as_u16(), err.to_string());
        }
        Self::HttpError(err.to_string())
    }
}

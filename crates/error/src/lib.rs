//! # bibfed-error
//!
//! Unified error types for the bibfed federation layer.
//!
//! All errors carry:
//! - Numeric error codes (BIBFED-XXXX), stable across versions
//! - Structured context for programmatic handling
//! - Optional hints for self-correction

mod code;
mod context;
mod convert;

pub use code::{ErrorCategory, ErrorCode};
pub use context::ErrorContext;
pub use convert::closest_match;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The unified error type for all bibfed operations.
///
/// Everything the routing layer needs to translate a failure into an HTTP
/// response lives here; the core never panics on a remote's misbehavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BibfedError {
    /// Numeric error code (e.g., "BIBFED-2002")
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Structured context for programmatic handling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,

    /// Actionable suggestion for self-correction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl BibfedError {
    /// Create a new error with code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
            hint: None,
        }
    }

    /// Add structured context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Add an actionable hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Serialize to JSON for API responses
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize BibfedError: {}", e);
            format!(
                r#"{{"code":"{}","message":"Serialization failed"}}"#,
                self.code
            )
        })
    }

    /// True for errors raised during query compilation, before any I/O.
    pub fn is_compilation(&self) -> bool {
        self.code.category() == ErrorCategory::Query
    }
}

impl fmt::Display for BibfedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " (Hint: {})", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for BibfedError {}

/// Result type alias for bibfed operations
pub type Result<T> = std::result::Result<T, BibfedError>;

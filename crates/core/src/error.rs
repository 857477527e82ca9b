//! Error types for the Forgepilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use std::fmt;
use thiserror::Error;

/// The top-level error type for all Forgepilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model backend errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of a model backend call (other than breaker rejection).
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Coarse classification of a backend failure, used to pick the
/// user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Timeout,
    Unavailable,
    Unknown,
}

impl BackendError {
    /// Classify this failure for user-facing reporting.
    pub fn kind(&self) -> BackendErrorKind {
        match self {
            Self::Timeout(_) => BackendErrorKind::Timeout,
            Self::Network(_) | Self::RateLimited { .. } | Self::NotConfigured(_) => {
                BackendErrorKind::Unavailable
            }
            Self::ApiError { status_code, .. } if *status_code >= 500 => {
                BackendErrorKind::Unavailable
            }
            Self::ApiError { .. } | Self::AuthenticationFailed(_) | Self::MalformedResponse(_) => {
                BackendErrorKind::Unknown
            }
        }
    }
}

impl BackendErrorKind {
    /// The message shown to the end user for this class of failure.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Timeout => {
                "The assistant took too long to respond. Please try again in a moment."
            }
            Self::Unavailable => {
                "The assistant service is currently unavailable. Please try again shortly."
            }
            Self::Unknown => {
                "Something went wrong while generating a response. Please try again."
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("{0}")]
    Validation(ValidationError),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    /// Whether this error means the dependency itself misbehaved, as opposed
    /// to the model asking for something invalid.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::ExecutionFailed { .. } | Self::Timeout { .. })
    }
}

/// Every missing and invalid parameter found while validating one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub tool_name: String,
    pub missing: Vec<String>,
    pub invalid: Vec<InvalidField>,
}

/// A parameter that was present but had the wrong type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidField {
    pub name: String,
    pub expected: String,
    pub found: String,
}

impl ValidationError {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            missing: Vec::new(),
            invalid: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid parameters for {}", self.tool_name)?;
        if !self.missing.is_empty() {
            write!(f, "; missing: {}", self.missing.join(", "))?;
        }
        if !self.invalid.is_empty() {
            let invalid: Vec<String> = self
                .invalid
                .iter()
                .map(|i| format!("{} (expected {}, got {})", i.name, i.expected, i.found))
                .collect();
            write!(f, "; invalid: {}", invalid.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_displays_correctly() {
        let err = Error::Backend(BackendError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn backend_errors_are_classified() {
        assert_eq!(
            BackendError::Timeout("slow".into()).kind(),
            BackendErrorKind::Timeout
        );
        assert_eq!(
            BackendError::Network("refused".into()).kind(),
            BackendErrorKind::Unavailable
        );
        assert_eq!(
            BackendError::ApiError {
                status_code: 503,
                message: "down".into()
            }
            .kind(),
            BackendErrorKind::Unavailable
        );
        assert_eq!(
            BackendError::MalformedResponse("no choices".into()).kind(),
            BackendErrorKind::Unknown
        );
    }

    #[test]
    fn validation_error_lists_every_field() {
        let mut err = ValidationError::new("read_file");
        err.missing.push("path".into());
        err.invalid.push(InvalidField {
            name: "limit".into(),
            expected: "integer".into(),
            found: "string".into(),
        });
        let text = err.to_string();
        assert!(text.contains("read_file"));
        assert!(text.contains("missing: path"));
        assert!(text.contains("limit (expected integer, got string)"));
    }

    #[test]
    fn only_execution_failures_count_against_dependencies() {
        assert!(
            ToolError::ExecutionFailed {
                tool_name: "x".into(),
                reason: "boom".into()
            }
            .is_dependency_failure()
        );
        assert!(!ToolError::NotFound("x".into()).is_dependency_failure());
        assert!(!ToolError::Validation(ValidationError::new("x")).is_dependency_failure());
    }
}

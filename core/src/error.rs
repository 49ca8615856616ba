use serde::Serialize;
use utoipa::ToSchema;

use crate::analysis::EntityKind;

/// Structured error response shared by the API and the CLI.
/// Carries enough context for a client to show the operator what went wrong
/// and what to do next.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "not_found", "conflict")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const UPSTREAM_FAILED: &str = "upstream_failed";
}

/// Errors raised by the reconciliation pipeline.
///
/// Validation and state errors are detected locally; `Analysis` and
/// `Transport` wrap failures reported by the external boundaries.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("no document has been selected")]
    NoFile,
    #[error("document '{file_name}' is empty")]
    EmptyFile { file_name: String },
    #[error("document '{file_name}' has unsupported format '{received}'")]
    UnsupportedFormat { file_name: String, received: String },
    #[error("document '{file_name}' is {size_bytes} bytes, the limit is {max_bytes} bytes")]
    FileTooLarge {
        file_name: String,
        size_bytes: u64,
        max_bytes: u64,
    },
    #[error("no analysis result is available yet")]
    NoAnalysis,
    #[error("{operation} is already in progress")]
    Busy { operation: &'static str },
    #[error("unknown {kind} temp id '{temp_id}'")]
    UnknownTempId { kind: EntityKind, temp_id: String },
    #[error("exercise '{temp_id}' has no match suggestions to reuse")]
    NoMatchSuggestion { temp_id: String },
    #[error("'{existing_exercise_id}' is not a match suggestion for exercise '{temp_id}'")]
    UnknownCandidate {
        temp_id: String,
        existing_exercise_id: String,
    },
    #[error("invalid analysis result: {0}")]
    InvalidAnalysis(String),
    #[error("document analysis failed: {0}")]
    Analysis(String),
    #[error("import request could not be delivered: {0}")]
    Transport(String),
}

impl CoreError {
    /// Machine-readable code from [`codes`] for this error.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NoFile
            | CoreError::EmptyFile { .. }
            | CoreError::UnsupportedFormat { .. }
            | CoreError::FileTooLarge { .. }
            | CoreError::NoMatchSuggestion { .. }
            | CoreError::UnknownCandidate { .. }
            | CoreError::InvalidAnalysis(_) => codes::VALIDATION_FAILED,
            CoreError::UnknownTempId { .. } => codes::NOT_FOUND,
            CoreError::NoAnalysis | CoreError::Busy { .. } => codes::CONFLICT,
            CoreError::Analysis(_) | CoreError::Transport(_) => codes::UPSTREAM_FAILED,
        }
    }

    /// Field name the error relates to, when there is one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            CoreError::NoFile | CoreError::EmptyFile { .. } => Some("file"),
            CoreError::UnsupportedFormat { .. } => Some("mimeType"),
            CoreError::FileTooLarge { .. } => Some("contentBase64"),
            CoreError::NoMatchSuggestion { .. } | CoreError::UnknownCandidate { .. } => {
                Some("reuseExerciseId")
            }
            CoreError::UnknownTempId { .. } => Some("tempId"),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use physio_core::CoreError;
use physio_core::error::{self, ApiError};

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Unknown resource (404)
    NotFound { resource: String },
    /// Request conflicts with the session's current state (409)
    Conflict {
        message: String,
        docs_hint: Option<String>,
    },
    /// Analysis service or persistence backend failed (502)
    Upstream { message: String },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} not found"),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Conflict { message, docs_hint } => (
                StatusCode::CONFLICT,
                ApiError {
                    error: error::codes::CONFLICT.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Upstream { message } => {
                tracing::warn!("Upstream error: {}", message);
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError {
                        error: error::codes::UPSTREAM_FAILED.to_string(),
                        message,
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: Some(
                            "Your decisions are kept. Retry once the service is reachable."
                                .to_string(),
                        ),
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        let field = err.field().map(str::to_string);
        match err {
            CoreError::UnknownTempId { .. } => AppError::NotFound {
                resource: message.trim_start_matches("unknown ").to_string(),
            },
            CoreError::NoAnalysis => AppError::Conflict {
                message,
                docs_hint: Some("Upload a document and run the analysis first.".to_string()),
            },
            CoreError::Busy { .. } => AppError::Conflict {
                message,
                docs_hint: Some("Wait for the running call to finish.".to_string()),
            },
            CoreError::Analysis(_) | CoreError::Transport(_) => AppError::Upstream { message },
            CoreError::FileTooLarge { max_bytes, .. } => AppError::Validation {
                message,
                field,
                received: None,
                docs_hint: Some(format!("Documents must be at most {max_bytes} bytes.")),
            },
            CoreError::UnsupportedFormat { received, .. } => AppError::Validation {
                received: Some(serde_json::Value::String(received)),
                field,
                message,
                docs_hint: Some(
                    "Supported formats: pdf, png, jpeg, webp, heic, docx, txt.".to_string(),
                ),
            },
            CoreError::NoFile
            | CoreError::EmptyFile { .. }
            | CoreError::NoMatchSuggestion { .. }
            | CoreError::UnknownCandidate { .. }
            | CoreError::InvalidAnalysis(_) => AppError::Validation {
                field,
                message,
                received: None,
                docs_hint: None,
            },
        }
    }
}

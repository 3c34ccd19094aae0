//! Error types for the HTTP layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Errors surfaced by the job endpoints
#[derive(Error, Debug)]
pub enum AppError {
    /// Neither text content nor files were submitted
    #[error("Submission has no text content and no files")]
    EmptySubmission,

    #[error("Too many files: at most {max} per request")]
    TooManyFiles { max: usize },

    #[error("File '{name}' exceeds the {max} byte limit")]
    FileTooLarge { name: String, max: usize },

    /// Request body larger than the configured upload bound
    #[error("Request body too large: {0}")]
    BodyTooLarge(String),

    /// Malformed multipart body or an I/O failure while reading it
    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Message {0} not found")]
    MessageNotFound(usize),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::EmptySubmission | AppError::TooManyFiles { .. } => StatusCode::BAD_REQUEST,
            AppError::FileTooLarge { .. } | AppError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::JobNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upload(_) | AppError::MessageNotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            AppError::JobNotFound(_) => ErrorBody { error: "Job ID not found.", details: None },
            AppError::EmptySubmission => ErrorBody {
                error: "Send at least a text message or a file.",
                details: Some(self.to_string()),
            },
            AppError::TooManyFiles { .. } | AppError::FileTooLarge { .. } | AppError::BodyTooLarge(_) => ErrorBody {
                error: "Upload limits exceeded.",
                details: Some(self.to_string()),
            },
            AppError::Upload(_) | AppError::MessageNotFound(_) => ErrorBody {
                error: "Failed to process files.",
                details: Some(self.to_string()),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("[Api] {}", self);
        } else {
            tracing::debug!("[Api] rejected request: {}", self);
        }
        (status, Json(self.body())).into_response()
    }
}

impl From<axum_extra::extract::multipart::MultipartError> for AppError {
    fn from(e: axum_extra::extract::multipart::MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::BodyTooLarge(e.body_text())
        } else {
            AppError::Upload(e.body_text())
        }
    }
}

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
};
use serde_json::json;
use axum::Json;
use std::path::PathBuf;

/// Failures raised while scanning a delimited file.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Malformed record at line {line}: expected {expected} fields, found {found}")]
    MalformedRecord {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Column index {index} is out of bounds for a header of width {width}")]
    IndexOutOfBounds { index: usize, width: usize },

    #[error("Column index must not be negative, got {0}")]
    NegativeIndex(i64),

    #[error("Column not found in header: {0}")]
    ColumnNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Path is outside the data directory: {}", .0.display())]
    OutsideDataDir(PathBuf),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio_postgres::Error> for AppError {
    fn from(err: tokio_postgres::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Background task failed: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::OutsideDataDir(_) => StatusCode::FORBIDDEN,
            AppError::Profile(err) => match err {
                ProfileError::FileNotFound(_) => StatusCode::NOT_FOUND,
                ProfileError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                ProfileError::MalformedRecord { .. } | ProfileError::Csv(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ProfileError::IndexOutOfBounds { .. }
                | ProfileError::NegativeIndex(_)
                | ProfileError::ColumnNotFound(_) => StatusCode::BAD_REQUEST,
                ProfileError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

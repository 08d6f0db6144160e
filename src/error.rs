use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    /// Lock contention or a serialization conflict; safe to retry.
    #[error("Transient store error: {0}")]
    Transient(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("External service error: {0}")]
    External(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors worth replaying the store unit for: lock contention and
    /// timeouts. Other database failures fail the same way every time.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_) | AppError::Timeout(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(ref msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error occurred".to_string())
            }
            AppError::Transient(ref msg) => {
                tracing::warn!("Transient store error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Store busy, try again".to_string())
            }
            AppError::Timeout(duration) => {
                tracing::warn!("Store unit timed out after {:?}", duration);
                (StatusCode::SERVICE_UNAVAILABLE, "Store busy, try again".to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::External(ref msg) => {
                tracing::error!("External service error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "message": message,
            "data": null,
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            if matches!(primary, Some(5) | Some(6)) {
                return AppError::Transient(err.to_string());
            }
        }
        match err {
            sqlx::Error::PoolTimedOut => AppError::Transient(err.to_string()),
            other => AppError::Database(other.to_string()),
        }
    }
}

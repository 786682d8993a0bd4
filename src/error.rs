use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::error::Error;
use std::fmt;

use crate::lending::LendingError;

/// Error returned by every handler.
///
/// Rendered as `{success: false, message, error: {code, details?}, status, timestamp}`.
/// Messages are shown to workshop staff and therefore German; log lines stay English.
#[derive(Debug)]
pub enum AppError {
    /// Unexpected failure; the cause is logged under an error id and not returned.
    Internal(anyhow::Error),
    BadRequest(String),
    NotFound(String),
    /// The request contradicts the current inventory state (tool already lent, stock too low, ...).
    Conflict(String),
    /// SQLite busy or the pool exhausted; the client may retry.
    ServiceUnavailable(String),
    /// Database failure other than busy/constraint; logged, hidden from the client.
    Database(String),
    Unauthorized(String),
    RateLimited { retry_after_seconds: u64 },
    ValidationError { field: String, message: String },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::RateLimited { retry_after_seconds } => {
                write!(f, "Rate limited. Retry after {} seconds", retry_after_seconds)
            }
            AppError::ValidationError { field, message } => {
                write!(f, "Validation error on field '{}': {}", field, message)
            }
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Internal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Stable machine-readable code for `error.code`.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::ValidationError { .. } => "VALIDATION_ERROR",
        }
    }

    // Client-facing message and optional details; server-side causes are logged here.
    fn into_public(self) -> (String, Option<Value>) {
        match self {
            AppError::Internal(e) => {
                let error_id = uuid::Uuid::new_v4();
                tracing::error!(%error_id, "Internal error: {:?}", e);
                ("Ein interner Fehler ist aufgetreten".to_string(), Some(json!({ "error_id": error_id.to_string() })))
            }
            AppError::Database(msg) => {
                let error_id = uuid::Uuid::new_v4();
                tracing::error!(%error_id, "Database error: {}", msg);
                ("Ein Datenbankfehler ist aufgetreten".to_string(), Some(json!({ "error_id": error_id.to_string() })))
            }
            AppError::RateLimited { retry_after_seconds } => (
                format!("Zu viele Anfragen. Bitte in {} Sekunden erneut versuchen", retry_after_seconds),
                Some(json!({ "retry_after_seconds": retry_after_seconds })),
            ),
            AppError::ValidationError { field, message } => (
                format!("Ungültiger Wert für '{}': {}", field, message),
                Some(json!({ "field": field, "message": message })),
            ),
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::ServiceUnavailable(msg)
            | AppError::Unauthorized(msg) => (msg, None),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let (message, details) = self.into_public();

        let mut error = json!({ "code": code });
        if let Some(details) = details {
            error["details"] = details;
        }
        let body = json!({
            "success": false,
            "message": message,
            "error": error,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Datensatz nicht gefunden".to_string()),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();
                let lower = msg.to_lowercase();
                if lower.contains("unique constraint") {
                    AppError::Conflict("Eintrag existiert bereits".to_string())
                } else if lower.contains("database is locked") || lower.contains("busy") {
                    AppError::ServiceUnavailable(
                        "Datenbank ausgelastet, bitte erneut versuchen".to_string(),
                    )
                } else {
                    AppError::Database(msg)
                }
            }
            sqlx::Error::PoolTimedOut => {
                AppError::ServiceUnavailable("Datenbank ausgelastet, bitte erneut versuchen".to_string())
            }
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<LendingError> for AppError {
    fn from(err: LendingError) -> Self {
        let message = err.to_string();
        match err {
            LendingError::ToolNotFound(_)
            | LendingError::WorkerNotFound(_)
            | LendingError::ConsumableNotFound(_) => AppError::NotFound(message),
            LendingError::AlreadyLent { .. }
            | LendingError::ToolDefect(_)
            | LendingError::NoOpenLending(_)
            | LendingError::NotLentByWorker { .. }
            | LendingError::InsufficientStock { .. } => AppError::Conflict(message),
            LendingError::InvalidQuantity(_) => AppError::ValidationError {
                field: "quantity".to_string(),
                message,
            },
            LendingError::Database(e) => AppError::from(e),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub trait OptionExt<T> {
    /// Converts `None` into `AppError::NotFound("<entity> nicht gefunden")`.
    fn ok_or_not_found(self, entity: &str) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(format!("{} nicht gefunden", entity)))
    }
}

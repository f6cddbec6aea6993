use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::money::format_minor;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(
        "insufficient balance: required {}, available {}",
        format_minor(*.required),
        format_minor(*.available)
    )]
    InsufficientBalance { required: i64, available: i64 },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payment gateway error: {0}")]
    ExternalGateway(String),

    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        AppError::NotFound(format!("{what} {id}"))
    }

    /// Request field the caller should look at, when there is one.
    fn field_hint(&self) -> Option<&'static str> {
        match self {
            AppError::InsufficientBalance { .. } => Some("balance"),
            AppError::Conflict(_) => Some("start"),
            AppError::InvalidState(_) => Some("status"),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Storage(e.into())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let field = self.field_hint();
        let (status, message) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Conflict(_) | AppError::InvalidState(_) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            AppError::InsufficientBalance { .. } => {
                (StatusCode::PAYMENT_REQUIRED, self.to_string())
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::ExternalGateway(e) => {
                error!(error = %e, "payment gateway failure");
                (
                    StatusCode::BAD_GATEWAY,
                    "Payment provider unavailable".to_string(),
                )
            }
            AppError::InternalInconsistency(e) => {
                error!(error = %e, "reconciliation failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Payment could not be applied; retry later".to_string(),
                )
            }
            AppError::Storage(e) => {
                error!(error = ?e, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message,
            field,
        });

        (status, body).into_response()
    }
}

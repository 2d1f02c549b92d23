//! Shared error types
//!
//! Library-boundary errors (Gateway, Store) are typed enums so callers can match
//! on disposition per the error-handling table. Application-boundary errors
//! (handlers, workers) wrap those in context-chained `anyhow::Error`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by an `ExchangeGateway` implementation.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error("transient upstream error: {0}")]
    Transient(String),
    #[error("authentication failed with exchange")]
    Auth,
    #[error("insufficient funds for order")]
    InsufficientFunds,
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// Errors surfaced by the Position Ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("position has only {available} but {requested} was requested")]
    InsufficientPosition { available: f64, requested: f64 },
    #[error("concurrent modification, retry the compute-then-write step")]
    Conflict,
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

/// Errors surfaced by the Strategy Store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("strategy not found: {0}")]
    NotFound(String),
    #[error("lease held by another worker")]
    LeaseConflict,
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

/// Top-level application error used at the HTTP boundary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error")]
    Validation { fields: Vec<String>, message: String },
    #[error("not found")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited")]
    RateLimited,
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Internal(anyhow::Error::new(e))
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => AppError::NotFound(id),
            StoreError::LeaseConflict => AppError::Conflict("lease held by another worker".into()),
            StoreError::Db(err) => AppError::Internal(anyhow::Error::new(err)),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientPosition { .. } => AppError::Conflict(e.to_string()),
            LedgerError::Conflict => AppError::Conflict("concurrent modification".into()),
            LedgerError::Db(err) => AppError::Internal(anyhow::Error::new(err)),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Transient(msg) => AppError::Upstream(msg),
            GatewayError::Auth => AppError::Upstream("exchange authentication failed".into()),
            GatewayError::InsufficientFunds => AppError::Upstream("insufficient funds".into()),
            GatewayError::InvalidOrder(msg) => AppError::Upstream(msg),
            GatewayError::UnknownSymbol(sym) => AppError::Upstream(format!("unknown symbol: {sym}")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            AppError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let details = match &self {
            AppError::Validation { fields, .. } => {
                Some(serde_json::json!({ "fields": fields }))
            }
            _ => None,
        };
        let message = self.to_string();
        let body = crate::api::response::Envelope::<()>::error(ErrorBody {
            kind,
            message,
            details,
        });
        (status, axum::Json(body)).into_response()
    }
}

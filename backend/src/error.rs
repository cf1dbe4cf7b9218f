//! Error handling for the stock engine
//!
//! Every failure inside a primitive surfaces as an `AppError` and rolls back
//! the enclosing transaction. Callers that need a serializable answer convert
//! it into a [`Failure`] (kind + message).

use rust_decimal::Decimal;
use serde::Serialize;
use shared::{PostingError, UnitError};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Validation error: {0}")]
    InvalidInput(#[from] validator::ValidationErrors),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Stock errors
    #[error("Insufficient stock: available {available}, requested {requested}")]
    InsufficientStock {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Warehouse resolution failed: {0}")]
    WarehouseResolutionFailed(String),

    // Accounting errors
    #[error("Accounting imbalance: debits {debit} != credits {credit}")]
    AccountingImbalance { debit: Decimal, credit: Decimal },

    #[error("Accounting posting failed: {0}")]
    AccountingPostingFailed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable classification of an [`AppError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    InsufficientStock,
    WarehouseResolutionFailed,
    AccountingImbalance,
    AccountingPostingFailed,
    Configuration,
    Database,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InsufficientStock => "INSUFFICIENT_STOCK",
            ErrorKind::WarehouseResolutionFailed => "WAREHOUSE_RESOLUTION_FAILED",
            ErrorKind::AccountingImbalance => "ACCOUNTING_IMBALANCE",
            ErrorKind::AccountingPostingFailed => "ACCOUNTING_POSTING_FAILED",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::Database => "DATABASE_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Structured failure returned across the primitive boundary
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<Decimal>,
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation { .. } | AppError::InvalidInput(_) => ErrorKind::ValidationError,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            AppError::WarehouseResolutionFailed(_) => ErrorKind::WarehouseResolutionFailed,
            AppError::AccountingImbalance { .. } => ErrorKind::AccountingImbalance,
            AppError::AccountingPostingFailed(_) => ErrorKind::AccountingPostingFailed,
            AppError::Configuration(_) => ErrorKind::Configuration,
            AppError::DatabaseError(_) => ErrorKind::Database,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Row lock waits that hit `lock_timeout` surface as SQLSTATE 55P03
    pub fn is_lock_timeout(&self) -> bool {
        match self {
            AppError::DatabaseError(sqlx::Error::Database(db_err)) => {
                db_err.code().as_deref() == Some("55P03")
            }
            _ => false,
        }
    }
}

impl From<&AppError> for Failure {
    fn from(err: &AppError) -> Self {
        let (field, available, requested) = match err {
            AppError::Validation { field, .. } => (Some(field.clone()), None, None),
            AppError::InsufficientStock {
                available,
                requested,
            } => (None, Some(*available), Some(*requested)),
            _ => (None, None, None),
        };
        // Storage details stay in the logs
        let message = match err {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            other => other.to_string(),
        };
        Failure {
            kind: err.kind(),
            message,
            field,
            available,
            requested,
        }
    }
}

impl From<AppError> for Failure {
    fn from(err: AppError) -> Self {
        Failure::from(&err)
    }
}

impl From<UnitError> for AppError {
    fn from(err: UnitError) -> Self {
        AppError::validation("unit", err.to_string())
    }
}

impl From<PostingError> for AppError {
    fn from(err: PostingError) -> Self {
        match err {
            PostingError::Imbalance { debit, credit } => {
                AppError::AccountingImbalance { debit, credit }
            }
            other => AppError::AccountingPostingFailed(other.to_string()),
        }
    }
}

/// Result type alias for services
pub type AppResult<T> = Result<T, AppError>;

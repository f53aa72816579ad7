use thiserror::Error;

use crate::{ledger::LedgerError, validation::FieldError};

/// Coarse classification used by the API layer to pick a status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

/// Canonical error type returned by every service operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed input; carries every failing field, not just the first.
    #[error("validation failed ({} field errors)", .0.len())]
    Validation(Vec<FieldError>),

    /// Missing or unknown bearer credential.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// Authenticated caller acting on a record it does not own.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    /// Store fault; anything not classified above ends up as a 500.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl ServiceError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ServiceError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::Unauthorized(_) => ErrorKind::Unauthorized,
            ServiceError::Forbidden(_) => ErrorKind::Forbidden,
            ServiceError::NotFound { .. } => ErrorKind::NotFound,
            ServiceError::Conflict(_) => ErrorKind::Conflict,
            ServiceError::Ledger(err) => match err {
                LedgerError::Conflict { .. }
                | LedgerError::SelfReferral { .. }
                | LedgerError::DuplicateCommission { .. }
                | LedgerError::DuplicateTransaction { .. }
                | LedgerError::DuplicateRecord { .. }
                | LedgerError::InvalidTransition { .. }
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::AmountOverflow { .. } => ErrorKind::Conflict,
                LedgerError::UnknownUser { .. }
                | LedgerError::UnknownInvestment { .. }
                | LedgerError::UnknownWithdrawal { .. } => ErrorKind::NotFound,
                _ => ErrorKind::Internal,
            },
        }
    }
}

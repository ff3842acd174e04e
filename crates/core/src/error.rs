//! Domain error model.

use thiserror::Error;

use crate::transaction::RequestState;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic failures only: malformed values and illegal request
/// transitions. Ledger and storage failures belong to the crates that own
/// them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. an empty account name).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Malformed decimal text, or an amount with too many fractional digits.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The amount does not fit the minor-unit or ledger base-unit range.
    #[error("amount overflow: {0}")]
    AmountOverflow(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A request tried to move backwards, or out of a terminal state.
    #[error("illegal request transition {from} -> {to}")]
    IllegalTransition { from: RequestState, to: RequestState },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn overflow(msg: impl Into<String>) -> Self {
        Self::AmountOverflow(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

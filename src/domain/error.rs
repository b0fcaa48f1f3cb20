//! Error taxonomy for the booking core
//!
//! Every service propagates these kinds upward unchanged; no retry logic
//! lives below the HTTP layer. `ReactivationForbidden` is deliberately
//! distinct from `InvalidTransition` so callers can render a
//! non-retryable explanation instead of a "try again" prompt.

use crate::domain::booking::BookingStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BookingError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BookingError {
    #[error("booking not found")]
    NotFound,

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    #[error("booking was cancelled by an admin and cannot be reactivated")]
    ReactivationForbidden,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation deadline exceeded")]
    Timeout,

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("invalid booking record: {0}")]
    InvalidRecord(String),
}

impl BookingError {
    /// Stable machine-readable kind, exposed in HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::NotFound => "not_found",
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::ReactivationForbidden => "reactivation_forbidden",
            BookingError::Conflict(_) => "conflict",
            BookingError::Timeout => "timeout",
            BookingError::Storage(_) => "storage",
            BookingError::InvalidRecord(_) => "invalid_record",
        }
    }
}

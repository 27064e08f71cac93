//! Error taxonomy for the daybook core.
//!
//! Three caller-facing categories plus storage plumbing:
//! - [`DomainError::Validation`] — malformed or missing input (zero amount,
//!   empty description, bad store code)
//! - [`DomainError::InvalidState`] — a transition attempted from a
//!   non-eligible state (deciding an already-decided sale, converting a
//!   cancelled hand bill)
//! - [`DomainError::Forbidden`] — role/scope check failed
//!
//! All are terminal to the triggering request; nothing is retried. The
//! presentation layer surfaces the message verbatim.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        DomainError::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        DomainError::InvalidState(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        DomainError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        DomainError::NotFound(msg.into())
    }

    /// Stable category tag used in per-record bulk outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::InvalidState(_) => "invalid_state_error",
            DomainError::Forbidden(_) => "forbidden_error",
            DomainError::NotFound(_) => "not_found_error",
            DomainError::Storage(_) => "storage_error",
        }
    }
}

impl From<rusqlite::Error> for DomainError {
    fn from(e: rusqlite::Error) -> Self {
        DomainError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(
            DomainError::validation("amount must be positive").kind(),
            "validation_error"
        );
        assert_eq!(
            DomainError::invalid_state("already decided").kind(),
            "invalid_state_error"
        );
        assert_eq!(DomainError::forbidden("wrong store").kind(), "forbidden_error");
    }

    #[test]
    fn test_message_surfaces_verbatim() {
        let err = DomainError::validation("Enter at least one entry");
        assert_eq!(err.to_string(), "Enter at least one entry");
    }
}

//! Errors raised by pure domain logic.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic input failures. Storage and transport errors live in infra.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Identifier text that does not parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::RequestId;

    #[test]
    fn unparseable_request_id_is_invalid_id() {
        let err = "abc".parse::<RequestId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(ref m) if m.starts_with("RequestId")));
        assert_eq!(DomainError::validation("x").to_string(), "validation failed: x");
    }
}

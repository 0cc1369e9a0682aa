//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including path validation failures and invalid state transitions.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid relative path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path escapes the synchronized root (contains `..` components)
    #[error("Path escapes the sync root: {0}")]
    PathEscapesRoot(String),

    /// Invalid session state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidPath("bad\0path".to_string());
        assert!(err.to_string().starts_with("Invalid path:"));

        let err = DomainError::InvalidState {
            from: "Watching".to_string(),
            to: "Initializing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from Watching to Initializing"
        );
    }

    #[test]
    fn test_error_equality() {
        let a = DomainError::PathEscapesRoot("../x".to_string());
        let b = DomainError::PathEscapesRoot("../x".to_string());
        assert_eq!(a, b);
    }
}

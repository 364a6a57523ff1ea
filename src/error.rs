//! Error taxonomy shared by the key provider and the credential store.
//!
//! Every failure a caller can see maps to exactly one [`ErrorKind`] so the
//! enclosing service can pick a response code without string matching.

use thiserror::Error;

/// Coarse classification of a [`RegistryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Persistence,
    Crypto,
    KeyAcquisition,
}

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A record failed validation, or its id presence was wrong for the operation.
    #[error("invalid input for field '{field}': {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// The operation targeted an id that does not exist.
    #[error("oauth outgoing connection '{id}' not found")]
    NotFound { id: String },

    /// The backend rejected or failed the statement.
    #[error("failed to {operation}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A secret could not be sealed or opened.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// The master key could not be obtained at bootstrap.
    #[error("master key acquisition failed: {0}")]
    KeyAcquisition(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::InvalidInput { .. } => ErrorKind::InvalidInput,
            RegistryError::NotFound { .. } => ErrorKind::NotFound,
            RegistryError::Persistence { .. } => ErrorKind::Persistence,
            RegistryError::Crypto(_) => ErrorKind::Crypto,
            RegistryError::KeyAcquisition(_) => ErrorKind::KeyAcquisition,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        RegistryError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn persistence(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| RegistryError::Persistence { operation, source }
    }
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        let errors = [
            RegistryError::invalid("id", "must be empty"),
            RegistryError::NotFound { id: "x".into() },
            RegistryError::Persistence {
                operation: "save oauth outgoing connection",
                source: rusqlite::Error::QueryReturnedNoRows,
            },
            RegistryError::Crypto("bad tag".into()),
            RegistryError::KeyAcquisition("exit status 1".into()),
        ];

        let kinds: Vec<ErrorKind> = errors.iter().map(RegistryError::kind).collect();
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_display_carries_context() {
        let err = RegistryError::invalid("audiences", "at least one audience is required");
        assert_eq!(
            err.to_string(),
            "invalid input for field 'audiences': at least one audience is required"
        );

        let err = RegistryError::Persistence {
            operation: "update oauth outgoing connection",
            source: rusqlite::Error::QueryReturnedNoRows,
        };
        assert_eq!(err.to_string(), "failed to update oauth outgoing connection");
        assert!(std::error::Error::source(&err).is_some());
    }
}

use thiserror::Error;

use crate::template::CompileError;

/// Broad classification of a [`PolicyError`], for callers that only need to
/// tell "does not exist" apart from real failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Compile,
    Serialization,
    InvalidPolicy,
    Config,
    Backend,
}

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Policy not found: {0}")]
    NotFound(String),

    #[error("Template compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("Conditions serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[source] anyhow::Error),

    /// The transaction failed and rolling it back failed too.
    #[error("{cause} (rollback failed: {rollback})")]
    RollbackFailed {
        cause: Box<PolicyError>,
        #[source]
        rollback: anyhow::Error,
    },
}

impl PolicyError {
    pub fn backend(error: impl Into<anyhow::Error>) -> Self {
        Self::Backend(error.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Compile(_) => ErrorKind::Compile,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::InvalidPolicy(_) => ErrorKind::InvalidPolicy,
            Self::Config(_) => ErrorKind::Config,
            Self::Backend(_) => ErrorKind::Backend,
            // The original failure decides what went wrong.
            Self::RollbackFailed { cause, .. } => cause.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<sqlx::Error> for PolicyError {
    fn from(error: sqlx::Error) -> Self {
        Self::Backend(error.into())
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_failure_keeps_cause_kind() {
        let error = PolicyError::RollbackFailed {
            cause: Box::new(PolicyError::NotFound("p1".to_string())),
            rollback: anyhow::anyhow!("connection reset"),
        };

        assert_eq!(error.kind(), ErrorKind::NotFound);
        let message = error.to_string();
        assert!(message.contains("p1"));
        assert!(message.contains("connection reset"));
    }

    #[test]
    fn test_sqlx_errors_are_backend_errors() {
        let error = PolicyError::from(sqlx::Error::PoolClosed);
        assert_eq!(error.kind(), ErrorKind::Backend);
        assert!(!error.is_not_found());
    }
}

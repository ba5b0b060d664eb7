//! Audit log errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt audit log at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

/// Result type for audit operations
pub type AuditResult<T> = Result<T, AuditError>;

//! Domain-level errors (no external dependencies)

use thiserror::Error;

/// Domain errors represent violations of the hierarchy and session contracts.
/// These are independent of infrastructure concerns.
#[derive(Error, Debug)]
pub enum DomainError {
    /// Malformed flat source records. Fatal to store construction.
    #[error("invalid source record at position {position}: {reason}")]
    SourceData { position: usize, reason: String },

    /// Persisted store bytes are unreadable, tampered or of another version.
    #[error("corrupt hierarchy store: {reason}")]
    CorruptStore { reason: String },

    /// Session blob is unreadable, tampered, truncated or of another version.
    #[error("invalid session state: {reason}")]
    SessionDecode { reason: String },
}

impl DomainError {
    pub fn corrupt_store(reason: impl Into<String>) -> Self {
        Self::CorruptStore {
            reason: reason.into(),
        }
    }

    pub fn session_decode(reason: impl Into<String>) -> Self {
        Self::SessionDecode {
            reason: reason.into(),
        }
    }
}

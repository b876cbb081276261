//! Error taxonomy for the sync engine
//!
//! Every fallible collaborator call maps its failure into one of these
//! variants. The executor and the pruner branch on the variant, never on
//! message text.

use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network hiccup, 5xx, 429 or timeout. Retried with backoff.
    #[error("Transient fetch failure for {target}: {message}")]
    TransientFetch { target: String, message: String },

    /// Upstream session is gone. Aborts the whole run.
    #[error("Upstream authentication required: {message}")]
    AuthRequired { message: String },

    /// External API budget spent. Remaining work is deferred to the next run.
    #[error("External quota exhausted: {message}")]
    QuotaExhausted { message: String },

    #[error("Run deadline exceeded")]
    DeadlineExceeded,

    /// Upstream says the resource does not exist. Not retried.
    #[error("Upstream resource not found: {target}")]
    NotFound { target: String },

    /// Store read/write failure. Never interpreted as "absent".
    #[error("Persistence failure on '{key}': {message}")]
    Persistence { key: String, message: String },

    /// A stored document exists but cannot be decoded.
    #[error("Failed to decode '{key}': {message}")]
    Decode { key: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    pub fn transient(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientFetch {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn persistence(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Persistence {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Whether the retry policy may try the same call again.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_fetch_is_retryable() {
        assert!(SyncError::transient("item/1", "503").is_transient());
        assert!(!SyncError::AuthRequired { message: "login".into() }.is_transient());
        assert!(!SyncError::NotFound { target: "item/1".into() }.is_transient());
        assert!(!SyncError::persistence("items/1.json", "disk full").is_transient());
    }
}

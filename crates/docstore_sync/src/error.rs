//! Error types for copy, sync and verification.

use docstore_core::{CoreError, NodeId, VersionId};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by the copy and synchronization algorithms.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Error reported by a store session.
    #[error("store error: {0}")]
    Core(#[from] CoreError),

    /// I/O error while streaming content.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The tree is deeper than the configured copy depth.
    #[error("reached maximum copy depth of {max_depth}")]
    MaxDepthExceeded {
        /// Configured maximum depth.
        max_depth: usize,
    },

    /// The rename strategy did not produce a free alias in time.
    #[error("could not find a valid alias name for {alias} after {attempts} attempts")]
    AliasExhausted {
        /// Alias that was being renamed.
        alias: String,
        /// Number of rename attempts.
        attempts: u32,
    },

    /// The rename strategy refused to rename an alias.
    #[error("cannot rename alias {alias}: {message}")]
    AliasRename {
        /// Alias that was being renamed.
        alias: String,
        /// Reason given by the strategy.
        message: String,
    },

    /// A pending translation was selected to become the original language.
    #[error("cannot copy pending translation to original language: {version} {lang}")]
    PendingTranslation {
        /// Version being copied.
        version: VersionId,
        /// Pending translation language.
        lang: String,
    },

    /// Child reconciliation left the target children out of order.
    #[error("synchronisation of child nodes of {parent} failed: expected {expected}, found {found}")]
    IdMismatch {
        /// Group whose children were reconciled.
        parent: NodeId,
        /// Source child id.
        expected: NodeId,
        /// Target child id at the same position.
        found: NodeId,
    },

    /// A session was in the wrong translation mode for the operation.
    #[error("translation mode error: {0}")]
    TranslationMode(String),
}

impl SyncError {
    /// Creates a translation mode error.
    pub fn translation_mode(message: impl Into<String>) -> Self {
        Self::TranslationMode(message.into())
    }

    /// Returns true if the user cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Core(e) if e.is_cancelled())
    }

    /// Returns true for programming faults rather than domain errors.
    pub fn is_invariant(&self) -> bool {
        match self {
            SyncError::IdMismatch { .. } => true,
            SyncError::Core(e) => e.is_invariant(),
            _ => false,
        }
    }

    /// Returns true if a whole-version copy may be retried after this error.
    pub fn is_retryable(&self) -> bool {
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_retryable() {
        let err = SyncError::from(CoreError::Cancelled);
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());
    }

    #[test]
    fn classification() {
        let mismatch = SyncError::IdMismatch {
            parent: NodeId::new("1"),
            expected: NodeId::new("2"),
            found: NodeId::new("3"),
        };
        assert!(mismatch.is_invariant());
        assert!(mismatch.is_retryable());

        let depth = SyncError::MaxDepthExceeded { max_depth: 60 };
        assert!(!depth.is_invariant());
        assert!(depth.to_string().contains("60"));

        assert!(SyncError::from(CoreError::invariant("broken")).is_invariant());
    }

    #[test]
    fn error_display() {
        let err = SyncError::AliasExhausted {
            alias: "intro".into(),
            attempts: 100,
        };
        assert!(err.to_string().contains("intro"));
        assert!(err.to_string().contains("100"));
    }
}

//! Error types for the document store core.

use std::io;
use thiserror::Error;

use crate::types::{NodeId, VersionId};

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in document store core operations.
///
/// All variants except [`CoreError::Invariant`] are domain errors: expected
/// failures that callers surface to users. `Invariant` marks a programming
/// fault such as a broken parent/child relation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error while reading or writing content.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Store does not exist.
    #[error("store not found: {store_id}")]
    StoreNotFound {
        /// The requested store.
        store_id: String,
    },

    /// Store already exists.
    #[error("store already exists: {store_id}")]
    StoreExists {
        /// The conflicting store.
        store_id: String,
    },

    /// Version does not exist in the store.
    #[error("version {version} not found in store {store_id}")]
    VersionNotFound {
        /// The store searched.
        store_id: String,
        /// The requested version.
        version: VersionId,
    },

    /// Version already exists in the store.
    #[error("version {version} already exists in store {store_id}")]
    VersionExists {
        /// The store.
        store_id: String,
        /// The conflicting version.
        version: VersionId,
    },

    /// Version id could not be parsed.
    #[error("invalid version id: {value:?}")]
    InvalidVersionId {
        /// The rejected input.
        value: String,
    },

    /// No store is open in the session.
    #[error("no store is open in this session")]
    NoStoreOpen,

    /// Node does not exist in the open version.
    #[error("node not found: {id}")]
    NodeNotFound {
        /// The requested node id.
        id: NodeId,
    },

    /// A node with this id already exists.
    #[error("node id already in use: {id}")]
    NodeIdInUse {
        /// The conflicting node id.
        id: NodeId,
    },

    /// Alias is assigned to another node.
    #[error("alias {alias:?} is already assigned to node {owner}")]
    AliasInUse {
        /// The conflicting alias.
        alias: String,
        /// Node currently holding the alias.
        owner: NodeId,
    },

    /// Alias does not match the allowed character set.
    #[error("invalid alias: {alias:?}")]
    InvalidAlias {
        /// The rejected alias.
        alias: String,
    },

    /// Version state transition is not allowed.
    #[error("invalid version state transition: {message}")]
    InvalidStateTransition {
        /// Why the transition was refused.
        message: String,
    },

    /// Other users are connected to the store or version.
    #[error("users connected: {message}")]
    UsersConnected {
        /// Description of the blocked operation.
        message: String,
    },

    /// Transaction started twice or finished without being started.
    #[error("transaction error: {message}")]
    Transaction {
        /// Description of the misuse.
        message: String,
    },

    /// Image rendition definition is invalid or conflicts.
    #[error("image rendition error: {message}")]
    Rendition {
        /// Description of the problem.
        message: String,
    },

    /// UUID assignment conflict.
    #[error("UUID error: {message}")]
    Uuid {
        /// Description of the conflict.
        message: String,
    },

    /// Operation was cancelled through the progress sink.
    #[error("operation cancelled by user")]
    Cancelled,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Internal invariant violated.
    #[error("invariant violated: {message}")]
    Invariant {
        /// Description of the broken invariant.
        message: String,
    },
}

impl CoreError {
    /// Creates a store not found error.
    pub fn store_not_found(store_id: impl Into<String>) -> Self {
        Self::StoreNotFound {
            store_id: store_id.into(),
        }
    }

    /// Creates a version not found error.
    pub fn version_not_found(store_id: impl Into<String>, version: &VersionId) -> Self {
        Self::VersionNotFound {
            store_id: store_id.into(),
            version: version.clone(),
        }
    }

    /// Creates a node not found error.
    pub fn node_not_found(id: &NodeId) -> Self {
        Self::NodeNotFound { id: id.clone() }
    }

    /// Creates an invalid state transition error.
    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            message: message.into(),
        }
    }

    /// Creates a users connected error.
    pub fn users_connected(message: impl Into<String>) -> Self {
        Self::UsersConnected {
            message: message.into(),
        }
    }

    /// Creates a transaction misuse error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Creates an image rendition error.
    pub fn rendition(message: impl Into<String>) -> Self {
        Self::Rendition {
            message: message.into(),
        }
    }

    /// Creates a UUID conflict error.
    pub fn uuid(message: impl Into<String>) -> Self {
        Self::Uuid {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// Returns true for programming faults rather than domain errors.
    #[must_use]
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant { .. })
    }

    /// Returns true if the operation was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_classification() {
        assert!(CoreError::invariant("broken").is_invariant());
        assert!(!CoreError::invalid_operation("nope").is_invariant());
        assert!(!CoreError::NoStoreOpen.is_invariant());
    }

    #[test]
    fn messages_include_context() {
        let err = CoreError::version_not_found("manual", &VersionId::parse("1.2").unwrap());
        assert_eq!(err.to_string(), "version 1.2 not found in store manual");

        let err = CoreError::AliasInUse {
            alias: "intro".into(),
            owner: NodeId::new("7"),
        };
        assert!(err.to_string().contains("intro"));
    }
}

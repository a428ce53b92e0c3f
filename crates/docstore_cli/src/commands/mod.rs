//! CLI command implementations.

pub mod copy;
pub mod inspect;
pub mod snapshot;
pub mod verify;

use std::path::PathBuf;

use docstore_core::{CoreError, VersionId};
use docstore_sync::SyncError;
use thiserror::Error;

/// Errors reported by the CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Snapshot file could not be read or written.
    #[error("snapshot {path}: {source}")]
    Snapshot {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Store layer error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Copy or verification error.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// JSON output failed.
    #[error("json output: {0}")]
    Json(#[from] serde_json::Error),

    /// Verification found differences.
    #[error("verification of {store} {version} found {errors} difference(s)")]
    VerifyFailed {
        /// Verified store.
        store: String,
        /// Verified version.
        version: VersionId,
        /// Number of differences.
        errors: usize,
    },

    /// Copy with verification found differences.
    #[error("copy to {store} verified with {errors} difference(s)")]
    CopyVerifyFailed {
        /// Target store.
        store: String,
        /// Number of differences over all versions.
        errors: usize,
    },
}

/// Result type of the CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// User name under which the CLI opens sessions.
pub const CLI_USER: &str = "docstore-cli";

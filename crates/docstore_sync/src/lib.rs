//! # Docstore Sync
//!
//! Moves document trees between docstore sessions.
//!
//! This crate provides:
//! - [`NodeCopier`]: copy of nodes or subtrees with alias de-duplication
//!   and node id policies
//! - [`NodeSync`]: incremental, id-matched synchronization of a target tree
//!   with a source tree, including language remapping
//! - [`StoreCopier`]: whole-store copy over the version forest with retry
//!   and optional verification
//! - [`Verifier`]: structural and content comparison of two versions
//!
//! ## Key Invariants
//!
//! - After a sync, the target tree has the source's node ids in the
//!   source's order, every field and every content stream equal
//! - Synchronizing a tree with an identical tree writes nothing
//! - Aliases stay unique in the target; a copy renames colliding aliases,
//!   a sync claims them from the node that held them
//! - A subtree deeper than [`SyncConfig::max_copy_depth`] is refused
//! - Cancellation rolls back the transaction that was running
//!
//! ## Example
//!
//! ```rust
//! use docstore_core::{DefaultProgress, DocStoreSession, MemoryBackend, NodeKind, VersionId};
//! use docstore_sync::{StoreCopier, StoreCopyOptions};
//!
//! let backend = MemoryBackend::default();
//! let mut author = backend.session("author");
//! let v1 = VersionId::parse("1.0").unwrap();
//! author.create_doc_store("manual", &[]).unwrap();
//! author.create_version("manual", None, &v1).unwrap();
//! author.open_doc_store("manual", &v1).unwrap();
//! let root = author.root().unwrap();
//! let doc = author.create_node(NodeKind::XmlDoc, None).unwrap();
//! author.append_child(&root, &doc).unwrap();
//! author.close_doc_store().unwrap();
//!
//! let mut source = backend.session("copier");
//! let mut target = backend.session("copier");
//! let options = StoreCopyOptions::new().with_verify(true);
//! let report = StoreCopier::default()
//!     .copy_doc_store(&mut source, "manual", &mut target, "manual-copy", &options, &DefaultProgress::new())
//!     .unwrap();
//! assert_eq!(report.verify_errors(), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compare;
mod config;
mod copy;
mod error;
mod store_copy;
mod strategy;
mod sync;
mod verify;

pub use compare::streams_equal;
pub use config::SyncConfig;
pub use copy::{create_node_of_same_type, NodeCopier, NodeIdPolicy};
pub use error::{SyncError, SyncResult};
pub use store_copy::{CopyVersionStats, StoreCopier, StoreCopyOptions, StoreCopyReport};
pub use strategy::{AliasRenameStrategy, ContentCopyStrategy, StreamContentCopy, SuffixAliasRename};
pub use sync::{
    delete_single_node, sync_node_attributes, translation_languages_recursive, NodeSync,
    NodeSyncOptions,
};
pub use verify::Verifier;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! # Docstore Core
//!
//! Storage core of a hierarchical, multi-language, versioned document store.
//!
//! This crate provides:
//! - The node/group/content model with per-language fields
//! - Ordered version ids and the per-language version life cycle
//! - The [`DocStoreSession`] contract with transactions and translation mode
//! - Advisory locks, structural change events and the UUID registry
//! - A store manager for shared, reference-counted store objects
//! - An in-memory reference backend with JSON snapshots
//!
//! ## Key Invariants
//!
//! - A node has at most one parent group; moving means re-inserting
//! - Aliases are unique within a version tree
//! - Node ids are stable across the versions of a store
//! - `TranslationPending` is derived on read, never stored
//! - Internal `docstore.*` / `docversion.*` properties never show up in
//!   user-visible property listings
//!
//! ## Example
//!
//! ```rust
//! use docstore_core::{DocStoreSession, MemoryBackend, NodeKind, VersionId, VersionState};
//!
//! let backend = MemoryBackend::default();
//! let mut session = backend.session("editor");
//! let v1 = VersionId::parse("1.0").unwrap();
//! session.create_doc_store("manual", &[]).unwrap();
//! session.create_version("manual", None, &v1).unwrap();
//! session.open_doc_store("manual", &v1).unwrap();
//!
//! let root = session.root().unwrap();
//! let chapter = session.create_node(NodeKind::XmlDoc, None).unwrap();
//! session.append_child(&root, &chapter).unwrap();
//! session.set_title(&chapter, Some("Getting started"), None).unwrap();
//!
//! session.set_version_state("manual", &v1, VersionState::Released).unwrap();
//! assert!(session.version_release_date("manual", &v1).is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod lock;
mod manager;
mod memory;
mod progress;
mod properties;
mod session;
mod types;
mod uuid_registry;

pub use error::{CoreError, CoreResult};
pub use event::{compress_events, DocEvent, DocListener, EventKind, EventQueue};
pub use lock::{Lock, LockListener, LockManager};
pub use manager::{SharedStore, StoreManager};
pub use memory::{MemoryBackend, MemoryConfig, MemoryRepository, MemorySession};
pub use progress::{
    check_cancelled, DefaultProgress, LogLevel, LogMessage, ProgressCallback, ProgressConfig,
};
pub use properties::{
    is_internal_store_property, is_internal_version_property, parse_name_list, release_date_key,
    version_state_key, ImageFormat, ImageRendition, PROP_RENDITION_NAMES, PROP_STORE_UUID,
    PROP_VERSION_CREATION_DATE, PROP_VERSION_RELEASE_DATE, PROP_VERSION_STATE, PROP_VERSION_UUID,
};
pub use session::{DocStoreSession, LocalTransaction, TranslationScope};
pub use types::{
    is_valid_alias, now_millis, HistoryEntry, ListenerResult, NodeId, NodeKind, PropertyUpdate,
    Timestamp, VersionAddress, VersionId, VersionState,
};
pub use uuid_registry::{store_uuid_from_seed, version_uuid_from_seed, UuidRegistry, UuidTarget};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! # Docstore Testkit
//!
//! Test utilities for docstore.
//!
//! This crate provides:
//! - Tree builders and sample stores over the in-memory backend
//! - JSON snapshot files in temporary directories
//! - Property-based generators for random node trees
//!
//! ## Usage
//!
//! ```rust
//! use docstore_core::DocStoreSession;
//! use docstore_testkit::prelude::*;
//!
//! let backend = released_store("manual");
//! let session = backend.session("reader");
//! assert_eq!(session.list_versions("manual").unwrap().len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;

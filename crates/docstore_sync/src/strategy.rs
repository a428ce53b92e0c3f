//! Pluggable collaborators of the copy algorithm.

use docstore_core::{DocStoreSession, NodeId};

use crate::error::SyncResult;

/// Produces a new candidate when a copied alias is already taken.
///
/// The copier calls the strategy repeatedly until the candidate is free, so
/// every call must return a different name than its input.
pub trait AliasRenameStrategy: Send + Sync {
    /// Returns the next candidate for `alias`.
    fn rename_alias(&self, alias: &str) -> SyncResult<String>;
}

/// Increments a trailing `_<n>` suffix, or appends `_2`.
///
/// `intro` becomes `intro_2`, `intro_2` becomes `intro_3`, and `my_alias`
/// (non-numeric suffix) becomes `my_alias_2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixAliasRename;

impl AliasRenameStrategy for SuffixAliasRename {
    fn rename_alias(&self, alias: &str) -> SyncResult<String> {
        if let Some((prefix, suffix)) = alias.rsplit_once('_') {
            if let Ok(n) = suffix.parse::<u64>() {
                if let Some(next) = n.checked_add(1) {
                    return Ok(format!("{prefix}_{next}"));
                }
            }
        }
        Ok(format!("{alias}_2"))
    }
}

/// Copies the content stream of one node to another.
///
/// Both sessions are already in the translation mode of the variant being
/// copied; implementations read and write through the scoped accessors.
pub trait ContentCopyStrategy: Send + Sync {
    /// Copies the content of `source_node` to `target_node`.
    fn copy_content(
        &self,
        source: &dyn DocStoreSession,
        source_node: &NodeId,
        target: &mut dyn DocStoreSession,
        target_node: &NodeId,
    ) -> SyncResult<()>;
}

/// Streams the source bytes into the target node.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamContentCopy;

impl ContentCopyStrategy for StreamContentCopy {
    fn copy_content(
        &self,
        source: &dyn DocStoreSession,
        source_node: &NodeId,
        target: &mut dyn DocStoreSession,
        target_node: &NodeId,
    ) -> SyncResult<()> {
        if let Some(mut reader) = source.content_stream(source_node)? {
            target.set_content_stream(target_node, &mut *reader)?;
        }
        Ok(())
    }
}

//! Incremental synchronization of a target tree with a source tree.
//!
//! [`NodeSync`] reconciles a target node (and its subtree) with a source
//! node that carries the same id, writing only the fields that differ.
//! Children are matched by id, created with the source id when missing,
//! moved into source order and deleted when the source no longer has them.
//!
//! One local transaction covers a sibling level. For targets reporting
//! [`DocStoreSession::is_db_store`] the transaction is additionally split
//! around content comparisons and after every node.

use std::collections::BTreeSet;

use docstore_core::{
    check_cancelled, DocStoreSession, LocalTransaction, NodeId, NodeKind, ProgressCallback,
};

use crate::compare::streams_equal;
use crate::config::SyncConfig;
use crate::copy::kind_of;
use crate::error::{SyncError, SyncResult};

/// Runs `f` inside a progress work level of `steps` steps.
pub(crate) fn with_work_level<T>(
    progress: Option<&dyn ProgressCallback>,
    steps: usize,
    f: impl FnOnce() -> T,
) -> T {
    if let Some(p) = progress {
        p.start_work(steps);
    }
    let result = f();
    if let Some(p) = progress {
        p.finish_work();
    }
    result
}

/// Language remapping and backend hints for a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSyncOptions {
    /// Translations to synchronize; `None` means the union of the source
    /// and target translations of each node.
    pub translations: Option<BTreeSet<String>>,
    /// Source translation written into the target's original slot.
    pub trans_as_orig: Option<String>,
    /// Target translation receiving the source's original language.
    pub orig_as_trans: Option<String>,
    /// Split transactions for targets with expensive commits.
    pub db_target: bool,
}

impl NodeSyncOptions {
    /// Creates options that sync every translation one to one.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the synchronized translations.
    #[must_use]
    pub fn with_translations<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.translations = Some(languages.into_iter().map(Into::into).collect());
        self
    }

    /// Promotes a source translation to the target's original language.
    #[must_use]
    pub fn with_trans_as_orig(mut self, lang: impl Into<String>) -> Self {
        self.trans_as_orig = Some(lang.into());
        self
    }

    /// Demotes the source's original language to a target translation.
    #[must_use]
    pub fn with_orig_as_trans(mut self, lang: impl Into<String>) -> Self {
        self.orig_as_trans = Some(lang.into());
        self
    }

    /// Marks the target as a store with expensive commits.
    #[must_use]
    pub fn with_db_target(mut self, db_target: bool) -> Self {
        self.db_target = db_target;
        self
    }
}

/// Minimal-write reconciliation of a target tree with a source tree.
#[derive(Debug, Clone, Default)]
pub struct NodeSync {
    config: SyncConfig,
    options: NodeSyncOptions,
}

impl NodeSync {
    /// Creates a synchronizer.
    pub fn new(config: SyncConfig, options: NodeSyncOptions) -> Self {
        Self { config, options }
    }

    /// The options of this run.
    pub fn options(&self) -> &NodeSyncOptions {
        &self.options
    }

    /// Synchronizes `target_node` and its subtree with `source_node`.
    ///
    /// Returns the number of synchronized nodes. With a progress sink, each
    /// first-level child counts as one step and cancellation is checked
    /// after each of them.
    ///
    /// # Errors
    ///
    /// Rolls back the transaction this call started and returns the error.
    /// [`SyncError::IdMismatch`] signals a reconciliation fault.
    pub fn sync_tree(
        &self,
        source: &dyn DocStoreSession,
        source_node: &NodeId,
        target: &mut dyn DocStoreSession,
        target_node: &NodeId,
        progress: Option<&dyn ProgressCallback>,
    ) -> SyncResult<usize> {
        self.sync_at(source, source_node, target, target_node, progress, 0)
    }

    fn sync_at(
        &self,
        source: &dyn DocStoreSession,
        source_node: &NodeId,
        target: &mut dyn DocStoreSession,
        target_node: &NodeId,
        progress: Option<&dyn ProgressCallback>,
        depth: usize,
    ) -> SyncResult<usize> {
        if depth > self.config.max_copy_depth {
            return Err(SyncError::MaxDepthExceeded {
                max_depth: self.config.max_copy_depth,
            });
        }
        check_cancelled(progress)?;

        let mut tx = LocalTransaction::begin(target)?;
        let count = self.sync_level(source, source_node, &mut *tx, target_node, progress, depth)?;
        tx.commit()?;
        Ok(count)
    }

    fn sync_level(
        &self,
        source: &dyn DocStoreSession,
        source_node: &NodeId,
        target: &mut dyn DocStoreSession,
        target_node: &NodeId,
        progress: Option<&dyn ProgressCallback>,
        depth: usize,
    ) -> SyncResult<usize> {
        let mut count = 1;
        self.sync_node_shallow(source, source_node, target, target_node)?;

        let groups = kind_of(source, source_node)?.is_group() && kind_of(target, target_node)?.is_group();
        if !groups {
            return Ok(count);
        }

        let src_children = source.child_nodes(source_node)?;
        let mut tar_children = target.child_nodes(target_node)?;

        for (src_pos, child) in src_children.iter().enumerate() {
            let kind = kind_of(source, child)?;
            let mut tar_pos = tar_children
                .iter()
                .skip(src_pos)
                .position(|c| c == child)
                .map(|p| p + src_pos);
            let mut exists = tar_pos.is_some() || target.node_id_exists(child);

            if exists && target.node_kind(child) != Some(kind) {
                // Same id, other kind: the node was deleted and recreated in
                // the source, so the stale target node is replaced.
                delete_single_node(target, child, target_node)?;
                tar_children = target.child_nodes(target_node)?;
                exists = false;
                tar_pos = None;
            }
            if !exists {
                target.create_node(kind, Some(child))?;
            }
            if tar_pos.map_or(true, |p| p > src_pos) {
                let reference = tar_children.get(src_pos).cloned();
                target.insert_before(target_node, child, reference.as_ref())?;
                tar_children = target.child_nodes(target_node)?;
            }
        }

        // Trailing children that still exist in the source are left alone;
        // they are moved when their source parent is reconciled.
        let mut removed = false;
        let mut i = src_children.len();
        while i < tar_children.len() {
            let child = tar_children[i].clone();
            if source.node_id_exists(&child) {
                i += 1;
            } else {
                delete_single_node(target, &child, target_node)?;
                tar_children = target.child_nodes(target_node)?;
                removed = true;
            }
        }

        let db = self.options.db_target;
        if db && (!src_children.is_empty() || removed) && target.running_transaction() {
            target.commit_transaction()?;
            target.start_transaction()?;
        }

        count += with_work_level(progress, src_children.len(), || -> SyncResult<usize> {
            let mut synced = 0;
            for (pos, child) in src_children.iter().enumerate() {
                match tar_children.get(pos) {
                    Some(found) if found == child => {}
                    found => {
                        return Err(SyncError::IdMismatch {
                            parent: target_node.clone(),
                            expected: child.clone(),
                            found: found.cloned().unwrap_or_else(|| NodeId::new("")),
                        })
                    }
                }
                synced += self.sync_at(source, child, &mut *target, child, None, depth + 1)?;
                if let Some(p) = progress {
                    p.step_finished();
                    check_cancelled(progress)?;
                }
            }
            if db && !src_children.is_empty() && target.running_transaction() {
                target.commit_transaction()?;
            }
            Ok(synced)
        })?;
        Ok(count)
    }

    /// Synchronizes the fields of one node, in the original language and in
    /// every selected translation.
    ///
    /// A translation the target has but the source lacks is deleted in the
    /// target. The languages remapped by `trans_as_orig` and `orig_as_trans`
    /// are handled once, before the translation loop.
    ///
    /// # Errors
    ///
    /// Returns the first session or I/O error.
    pub fn sync_node_shallow(
        &self,
        source: &dyn DocStoreSession,
        source_node: &NodeId,
        target: &mut dyn DocStoreSession,
        target_node: &NodeId,
    ) -> SyncResult<()> {
        let trans_as_orig = self.options.trans_as_orig.as_deref();
        let orig_as_trans = self.options.orig_as_trans.as_deref();

        self.sync_node_shallow_lang(source, source_node, target, target_node, trans_as_orig, None)?;
        if let Some(lang) = orig_as_trans {
            self.sync_node_shallow_lang(source, source_node, target, target_node, None, Some(lang))?;
        }

        let languages: BTreeSet<String> = match &self.options.translations {
            Some(languages) => languages.clone(),
            None => source
                .translations(source_node)
                .into_iter()
                .chain(target.translations(target_node))
                .collect(),
        };
        for lang in &languages {
            let lang = lang.as_str();
            if Some(lang) == trans_as_orig || Some(lang) == orig_as_trans {
                continue;
            }
            if target.has_translation(target_node, lang) && !source.has_translation(source_node, lang) {
                target.delete_translation(target_node, lang)?;
            } else {
                self.sync_node_shallow_lang(source, source_node, target, target_node, Some(lang), Some(lang))?;
            }
        }
        Ok(())
    }

    /// Synchronizes the `source_lang` variant of the source node into the
    /// `target_lang` variant of the target node.
    ///
    /// Writing a translation into the original slot falls back to the
    /// source's original value where the translation has none.
    fn sync_node_shallow_lang(
        &self,
        source: &dyn DocStoreSession,
        source_node: &NodeId,
        target: &mut dyn DocStoreSession,
        target_node: &NodeId,
        source_lang: Option<&str>,
        target_lang: Option<&str>,
    ) -> SyncResult<()> {
        let convert = target_lang.is_none() && source_lang.is_some();
        let source_kind = kind_of(source, source_node)?;
        let target_kind = kind_of(target, target_node)?;

        if target_lang.is_none() {
            let aliases = source.aliases(source_node);
            if aliases != target.aliases(target_node) {
                claim_aliases(target, target_node, &aliases)?;
                target.set_aliases(target_node, &aliases)?;
            }
            if source_kind.is_reference() && target_kind.is_reference() {
                let alias = source.target_alias(source_node);
                if alias != target.target_alias(target_node) {
                    target.set_target_alias(target_node, alias.as_deref())?;
                }
            }
        }

        let title = with_fallback(convert, source.title_lang(source_node, source_lang), || {
            source.title_lang(source_node, None)
        });
        if title != target.title_lang(target_node, target_lang) {
            target.set_title(target_node, title.as_deref(), target_lang)?;
        }

        sync_node_attributes(source, source_node, source_lang, target, target_node, target_lang)?;

        if source_kind.is_content() && target_kind.is_content() {
            let content_type = with_fallback(convert, source.content_type_lang(source_node, source_lang), || {
                source.content_type_lang(source_node, None)
            });
            if content_type != target.content_type_lang(target_node, target_lang) {
                target.set_content_type(target_node, content_type.as_deref(), target_lang)?;
            }
            let extension = with_fallback(convert, source.file_extension_lang(source_node, source_lang), || {
                source.file_extension_lang(source_node, None)
            });
            if extension != target.file_extension_lang(target_node, target_lang) {
                target.set_file_extension(target_node, extension.as_deref(), target_lang)?;
            }
            self.sync_content(source, source_node, target, target_node, source_lang, target_lang)?;
        } else if self.options.db_target && target.running_transaction() {
            target.commit_transaction()?;
            target.start_transaction()?;
        }
        Ok(())
    }

    fn sync_content(
        &self,
        source: &dyn DocStoreSession,
        source_node: &NodeId,
        target: &mut dyn DocStoreSession,
        target_node: &NodeId,
        source_lang: Option<&str>,
        target_lang: Option<&str>,
    ) -> SyncResult<()> {
        let convert = target_lang.is_none() && source_lang.is_some();
        // Comparing outside the target transaction keeps the two sessions
        // from holding overlapping transactions on a shared database.
        let split = self.options.db_target && target.running_transaction();
        if split {
            target.commit_transaction()?;
        }

        let has_source = source.has_content(source_node, source_lang);
        let read_lang = if has_source { source_lang } else { None };
        let mut source_reader = if has_source || convert {
            source.content_reader(source_node, read_lang)?
        } else {
            None
        };
        let mut target_reader = if target.has_content(target_node, target_lang) {
            target.content_reader(target_node, target_lang)?
        } else {
            None
        };
        let has_source = source_reader.is_some();
        let equal = streams_equal(
            source_reader.as_deref_mut(),
            target_reader.as_deref_mut(),
            self.config.compare_chunk_size,
        )?;
        drop(source_reader);
        drop(target_reader);

        if !equal {
            match has_source.then(|| source.content_reader(source_node, read_lang)).transpose()?.flatten() {
                Some(mut reader) => target.set_content(target_node, target_lang, &mut *reader)?,
                None => target.delete_content(target_node, target_lang)?,
            }
            tracing::trace!(node = %target_node, lang = ?target_lang, "content rewritten");
        }
        if split {
            target.start_transaction()?;
        }
        Ok(())
    }
}

fn with_fallback(
    convert: bool,
    value: Option<String>,
    original: impl FnOnce() -> Option<String>,
) -> Option<String> {
    match value {
        None if convert => original(),
        value => value,
    }
}

/// Removes `aliases` from every node other than `owner` that carries one of
/// them, so they can be assigned to `owner`.
fn claim_aliases(target: &mut dyn DocStoreSession, owner: &NodeId, aliases: &[String]) -> SyncResult<()> {
    for alias in aliases {
        let Some(holder) = target.node_id_by_alias(alias) else {
            continue;
        };
        if &holder == owner {
            continue;
        }
        let remaining: Vec<String> = target
            .aliases(&holder)
            .into_iter()
            .filter(|a| a != alias)
            .collect();
        target.set_aliases(&holder, &remaining)?;
        tracing::debug!(%alias, from = %holder, to = %owner, "alias moved");
    }
    Ok(())
}

/// Synchronizes the attributes of one language variant.
///
/// Every original attribute name of the source is compared; writing a
/// translation into the original slot falls back to the original value.
/// In the original slot, target attributes the source does not have are
/// removed together with their translations.
///
/// # Errors
///
/// Returns the first session error.
pub fn sync_node_attributes(
    source: &dyn DocStoreSession,
    source_node: &NodeId,
    source_lang: Option<&str>,
    target: &mut dyn DocStoreSession,
    target_node: &NodeId,
    target_lang: Option<&str>,
) -> SyncResult<()> {
    let convert = target_lang.is_none() && source_lang.is_some();
    let originals = source.attributes_lang(source_node, None);
    let translated = match source_lang {
        Some(lang) => source.attributes_lang(source_node, Some(lang)),
        None => originals.clone(),
    };
    let existing = target.attributes_lang(target_node, target_lang);

    for name in originals.keys() {
        let value = with_fallback(convert, translated.get(name).cloned(), || originals.get(name).cloned());
        if value.as_ref() != existing.get(name) {
            target.set_attribute(target_node, name, value.as_deref(), target_lang)?;
        }
    }
    if target_lang.is_none() {
        for name in existing.keys().filter(|n| !originals.contains_key(*n)) {
            target.set_attribute(target_node, name, None, None)?;
        }
    }
    Ok(())
}

/// Deletes a single node from the target tree.
///
/// Content is dropped; the children of a group are appended to
/// `replacement` first so that only the node itself goes away. A running
/// transaction is committed and restarted so the id can be reused at once.
/// Returns the number of relocated children.
///
/// # Errors
///
/// Returns the first session error.
pub fn delete_single_node(
    target: &mut dyn DocStoreSession,
    node: &NodeId,
    replacement: &NodeId,
) -> SyncResult<usize> {
    let mut moved = 0;
    match target.node_kind(node) {
        Some(kind) if kind.is_content() => target.delete_content(node, None)?,
        Some(NodeKind::Group) => {
            for child in target.child_nodes(node)? {
                target.append_child(replacement, &child)?;
                moved += 1;
            }
        }
        _ => {}
    }
    match target.parent_group(node) {
        Some(parent) => target.remove_child(&parent, node)?,
        None => tracing::error!(%node, "node to be deleted has no parent group"),
    }
    if target.running_transaction() {
        target.commit_transaction()?;
        target.start_transaction()?;
    }
    tracing::debug!(%node, moved, "node deleted");
    Ok(moved)
}

/// All languages translated anywhere in the subtree of `node`, itself
/// included.
///
/// # Errors
///
/// Fails if a group of the subtree cannot be listed.
pub fn translation_languages_recursive(
    session: &dyn DocStoreSession,
    node: &NodeId,
) -> SyncResult<BTreeSet<String>> {
    let mut languages = BTreeSet::new();
    collect_languages(session, node, &mut languages)?;
    Ok(languages)
}

fn collect_languages(
    session: &dyn DocStoreSession,
    node: &NodeId,
    languages: &mut BTreeSet<String>,
) -> SyncResult<()> {
    languages.extend(session.translations(node));
    if session.node_kind(node).is_some_and(NodeKind::is_group) {
        for child in session.child_nodes(node)? {
            collect_languages(session, &child, languages)?;
        }
    }
    Ok(())
}

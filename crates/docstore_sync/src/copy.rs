//! Deep copy of nodes between two sessions.
//!
//! [`NodeCopier`] clones a node, a subtree or a list of nodes from a source
//! session into a target session. Copied aliases that are already taken in
//! the target are renamed through an [`AliasRenameStrategy`]; content is
//! transferred through a [`ContentCopyStrategy`]. Both renames and id
//! reassignments are recorded so callers can fix up references afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use docstore_core::{DocStoreSession, NodeId, NodeKind, TranslationScope};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::strategy::{AliasRenameStrategy, ContentCopyStrategy, StreamContentCopy, SuffixAliasRename};

/// How a copied node gets its id in the target session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeIdPolicy {
    /// Always allocate a new id.
    #[default]
    Reassign,
    /// Use the source id; fails if the target already has it.
    Keep,
    /// Use the source id unless the target already has it.
    TryKeep,
}

/// Creates an unattached node of `kind` in the target session.
///
/// # Errors
///
/// With [`NodeIdPolicy::Keep`], fails if `source_id` is already in use.
pub fn create_node_of_same_type(
    target: &mut dyn DocStoreSession,
    kind: NodeKind,
    source_id: &NodeId,
    policy: NodeIdPolicy,
) -> SyncResult<NodeId> {
    let id = match policy {
        NodeIdPolicy::Keep => Some(source_id),
        NodeIdPolicy::TryKeep => (!target.node_id_exists(source_id)).then_some(source_id),
        NodeIdPolicy::Reassign => None,
    };
    Ok(target.create_node(kind, id)?)
}

pub(crate) fn kind_of(session: &dyn DocStoreSession, id: &NodeId) -> SyncResult<NodeKind> {
    session
        .node_kind(id)
        .ok_or_else(|| docstore_core::CoreError::node_not_found(id).into())
}

/// Copies nodes and subtrees from one session into another.
pub struct NodeCopier {
    config: SyncConfig,
    languages: Option<Vec<String>>,
    commit_each_node: bool,
    id_policy: NodeIdPolicy,
    alias_rename: Arc<dyn AliasRenameStrategy>,
    content_copy: Arc<dyn ContentCopyStrategy>,
    node_id_map: BTreeMap<NodeId, NodeId>,
    alias_map: BTreeMap<String, String>,
}

impl NodeCopier {
    /// Creates a copier that reassigns ids and copies every translation.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            languages: None,
            commit_each_node: false,
            id_policy: NodeIdPolicy::default(),
            alias_rename: Arc::new(SuffixAliasRename),
            content_copy: Arc::new(StreamContentCopy),
            node_id_map: BTreeMap::new(),
            alias_map: BTreeMap::new(),
        }
    }

    /// Restricts the copied translations to `languages`.
    ///
    /// An empty list copies the original language only. Without a list every
    /// translation of a node is copied, unless the source session is in
    /// translation mode, in which case only that mode's view is copied.
    #[must_use]
    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = Some(languages);
        self
    }

    /// Commits the target transaction after every copied node.
    #[must_use]
    pub fn with_commit_each_node(mut self, commit: bool) -> Self {
        self.commit_each_node = commit;
        self
    }

    /// Sets the id policy for created nodes.
    #[must_use]
    pub fn with_id_policy(mut self, policy: NodeIdPolicy) -> Self {
        self.id_policy = policy;
        self
    }

    /// Replaces the alias rename strategy.
    #[must_use]
    pub fn with_alias_rename(mut self, strategy: Arc<dyn AliasRenameStrategy>) -> Self {
        self.alias_rename = strategy;
        self
    }

    /// Replaces the content copy strategy.
    #[must_use]
    pub fn with_content_copy(mut self, strategy: Arc<dyn ContentCopyStrategy>) -> Self {
        self.content_copy = strategy;
        self
    }

    /// Source ids mapped to the differing target ids they were copied to.
    pub fn node_id_map(&self) -> &BTreeMap<NodeId, NodeId> {
        &self.node_id_map
    }

    /// Original aliases mapped to the names they were renamed to.
    pub fn alias_map(&self) -> &BTreeMap<String, String> {
        &self.alias_map
    }

    /// Copies `nodes` into `target_parent`, each inserted before
    /// `node_after` (appended if `None`). Returns the number of copied
    /// nodes including descendants.
    ///
    /// # Errors
    ///
    /// Rolls back a transaction this call started and returns the error.
    pub fn copy_nodes_to_position(
        &mut self,
        source: &mut dyn DocStoreSession,
        nodes: &[NodeId],
        target: &mut dyn DocStoreSession,
        target_parent: &NodeId,
        node_after: Option<&NodeId>,
    ) -> SyncResult<usize> {
        let mut started = false;
        let result = self.copy_nodes_inner(source, nodes, target, target_parent, node_after, &mut started);
        if result.is_err() && started && target.running_transaction() {
            target.rollback_transaction();
        }
        result
    }

    fn copy_nodes_inner(
        &mut self,
        source: &mut dyn DocStoreSession,
        nodes: &[NodeId],
        target: &mut dyn DocStoreSession,
        target_parent: &NodeId,
        node_after: Option<&NodeId>,
        started: &mut bool,
    ) -> SyncResult<usize> {
        let mut count = 0;
        for node in nodes {
            if self.commit_each_node && !target.running_transaction() {
                target.start_transaction()?;
                *started = true;
            }
            let kind = kind_of(source, node)?;
            let copy = create_node_of_same_type(target, kind, node, self.id_policy)?;
            self.record_id(node, &copy);
            target.insert_before(target_parent, &copy, node_after)?;
            count += self.copy_node(source, node, target, &copy)?;
            if self.commit_each_node && target.running_transaction() {
                target.commit_transaction()?;
            }
        }
        Ok(count)
    }

    /// Copies `source_node` onto the existing `target_node`, then its
    /// descendants. Returns the number of copied nodes.
    ///
    /// # Errors
    ///
    /// Fails on session errors, alias exhaustion or when the subtree is
    /// deeper than the configured maximum.
    pub fn copy_node(
        &mut self,
        source: &mut dyn DocStoreSession,
        source_node: &NodeId,
        target: &mut dyn DocStoreSession,
        target_node: &NodeId,
    ) -> SyncResult<usize> {
        let started = self.commit_each_node && !target.running_transaction();
        if started {
            target.start_transaction()?;
        }
        let shallow = self.copy_node_shallow(source, source_node, target, target_node).and_then(|()| {
            if self.commit_each_node && target.running_transaction() {
                target.commit_transaction()?;
            }
            Ok(())
        });
        if let Err(e) = shallow {
            if started && target.running_transaction() {
                target.rollback_transaction();
            }
            return Err(e);
        }

        let mut count = 1;
        let both_groups = kind_of(source, source_node)?.is_group() && kind_of(target, target_node)?.is_group();
        if both_groups {
            count += self.copy_node_children(source, source_node, target, target_node)?;
        }
        Ok(count)
    }

    /// Appends copies of every child of `source_group` to `target_group`,
    /// recursively.
    ///
    /// # Errors
    ///
    /// See [`NodeCopier::copy_node`].
    pub fn copy_node_children(
        &mut self,
        source: &mut dyn DocStoreSession,
        source_group: &NodeId,
        target: &mut dyn DocStoreSession,
        target_group: &NodeId,
    ) -> SyncResult<usize> {
        let mut started = false;
        let result = self.copy_children_at(source, source_group, target, target_group, 0, &mut started);
        if result.is_err() && started && target.running_transaction() {
            target.rollback_transaction();
        }
        result
    }

    fn copy_children_at(
        &mut self,
        source: &mut dyn DocStoreSession,
        source_group: &NodeId,
        target: &mut dyn DocStoreSession,
        target_group: &NodeId,
        depth: usize,
        started: &mut bool,
    ) -> SyncResult<usize> {
        if depth > self.config.max_copy_depth {
            return Err(SyncError::MaxDepthExceeded {
                max_depth: self.config.max_copy_depth,
            });
        }
        let mut count = 0;
        for child in source.child_nodes(source_group)? {
            if self.commit_each_node && !target.running_transaction() {
                target.start_transaction()?;
                *started = true;
            }
            let kind = kind_of(source, &child)?;
            let clone = create_node_of_same_type(target, kind, &child, self.id_policy)?;
            self.record_id(&child, &clone);
            target.append_child(target_group, &clone)?;
            self.copy_node_shallow(source, &child, target, &clone)?;
            if self.commit_each_node && target.running_transaction() {
                target.commit_transaction()?;
            }
            count += 1;
            if kind.is_group() {
                count += self.copy_children_at(source, &child, target, &clone, depth + 1, started)?;
            }
        }
        Ok(count)
    }

    /// Copies the fields of one node: aliases, reference target, title,
    /// attributes and content, then the selected translations.
    ///
    /// # Errors
    ///
    /// Fails if the target session is in translation mode, or if a language
    /// list was given while the source session is in translation mode.
    pub fn copy_node_shallow(
        &mut self,
        source: &mut dyn DocStoreSession,
        source_node: &NodeId,
        target: &mut dyn DocStoreSession,
        target_node: &NodeId,
    ) -> SyncResult<()> {
        if target.translation_mode().is_some() {
            return Err(SyncError::translation_mode(
                "target session has to be in original mode",
            ));
        }
        let source_translating = source.translation_mode().is_some();
        if self.languages.is_some() && source_translating {
            return Err(SyncError::translation_mode(
                "languages must not be given while the source session is in translation mode",
            ));
        }

        let mut aliases = source.aliases(source_node);
        self.rename_aliases_if_not_unique(&mut aliases, &*target)?;
        target.set_aliases(target_node, &aliases)?;

        let source_kind = kind_of(source, source_node)?;
        let target_kind = kind_of(target, target_node)?;
        if source_kind.is_reference() && target_kind.is_reference() {
            target.set_target_alias(target_node, source.target_alias(source_node).as_deref())?;
        }

        target.set_title(target_node, source.title(source_node).as_deref(), None)?;
        for (name, value) in source.attributes(source_node) {
            target.set_attribute(target_node, &name, Some(&value), None)?;
        }

        let is_content = source_kind.is_content() && target_kind.is_content();
        if is_content {
            target.set_content_type(target_node, source.content_type(source_node).as_deref(), None)?;
            target.set_file_extension(target_node, source.file_extension(source_node).as_deref(), None)?;
            self.content_copy
                .copy_content(&*source, source_node, &mut *target, target_node)?;
        }

        let languages = match &self.languages {
            Some(languages) => languages.clone(),
            None if !source_translating => source.translations(source_node),
            None => Vec::new(),
        };
        let names = source.attribute_names(source_node);
        for lang in languages.iter().map(String::as_str) {
            if let Some(title) = source.title_lang(source_node, Some(lang)) {
                target.set_title(target_node, Some(&title), Some(lang))?;
            }
            let translated = source.attributes_lang(source_node, Some(lang));
            for name in &names {
                if let Some(value) = translated.get(name) {
                    target.set_attribute(target_node, name, Some(value), Some(lang))?;
                }
            }
            if is_content && source.has_content(source_node, Some(lang)) {
                self.copy_translated_content(source, source_node, target, target_node, lang)?;
            }
        }
        tracing::trace!(source = %source_node, target = %target_node, "node copied");
        Ok(())
    }

    fn copy_translated_content(
        &self,
        source: &mut dyn DocStoreSession,
        source_node: &NodeId,
        target: &mut dyn DocStoreSession,
        target_node: &NodeId,
        lang: &str,
    ) -> SyncResult<()> {
        let orig_type = source.content_type_lang(source_node, None);
        let orig_ext = source.file_extension_lang(source_node, None);
        if let Some(t) = source.content_type_lang(source_node, Some(lang)) {
            if orig_type.as_deref() != Some(t.as_str()) {
                target.set_content_type(target_node, Some(&t), Some(lang))?;
            }
        }
        if let Some(ext) = source.file_extension_lang(source_node, Some(lang)) {
            if orig_ext.as_deref() != Some(ext.as_str()) {
                target.set_file_extension(target_node, Some(&ext), Some(lang))?;
            }
        }
        let source_scope = TranslationScope::enter(source, Some(lang));
        let mut target_scope = TranslationScope::enter(target, Some(lang));
        self.content_copy
            .copy_content(&*source_scope, source_node, &mut *target_scope, target_node)
    }

    /// Renames every alias that is taken in the target or by another alias
    /// of the same batch, recording renames in the alias map.
    fn rename_aliases_if_not_unique(
        &mut self,
        aliases: &mut [String],
        target: &dyn DocStoreSession,
    ) -> SyncResult<()> {
        for i in 0..aliases.len() {
            let original = aliases[i].clone();
            let mut candidate = original.clone();
            let mut attempts = 0u32;
            loop {
                let taken = target.node_id_by_alias(&candidate).is_some()
                    || (attempts > 0
                        && aliases
                            .iter()
                            .enumerate()
                            .any(|(j, a)| j != i && *a == candidate));
                if !taken {
                    break;
                }
                attempts += 1;
                if attempts > self.config.max_alias_attempts {
                    return Err(SyncError::AliasExhausted {
                        alias: original,
                        attempts: self.config.max_alias_attempts,
                    });
                }
                candidate = self.alias_rename.rename_alias(&candidate)?;
            }
            if attempts > 0 {
                tracing::debug!(from = %original, to = %candidate, "alias renamed");
                self.alias_map.insert(original, candidate.clone());
                aliases[i] = candidate;
            }
        }
        Ok(())
    }

    fn record_id(&mut self, source_id: &NodeId, copy_id: &NodeId) {
        if source_id != copy_id {
            self.node_id_map.insert(source_id.clone(), copy_id.clone());
        }
    }
}

impl Default for NodeCopier {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_core::{MemoryBackend, MemorySession, VersionId};

    struct NeverUnique;

    impl AliasRenameStrategy for NeverUnique {
        fn rename_alias(&self, alias: &str) -> SyncResult<String> {
            Ok(alias.to_string())
        }
    }

    fn open(backend: &MemoryBackend, store: &str) -> MemorySession {
        let v = VersionId::parse("1.0").unwrap();
        let mut s = backend.session("tester");
        s.create_doc_store(store, &[]).unwrap();
        s.create_version(store, None, &v).unwrap();
        s.open_doc_store(store, &v).unwrap();
        s
    }

    fn add(s: &mut MemorySession, parent: &NodeId, kind: NodeKind, alias: Option<&str>) -> NodeId {
        let id = s.create_node(kind, None).unwrap();
        s.append_child(parent, &id).unwrap();
        if let Some(alias) = alias {
            s.set_aliases(&id, &[alias.to_string()]).unwrap();
        }
        id
    }

    #[test]
    fn id_policies() {
        let backend = MemoryBackend::default();
        let mut s = open(&backend, "a");
        let root = s.root().unwrap();
        let existing = add(&mut s, &root, NodeKind::File, None);

        let err = create_node_of_same_type(&mut s, NodeKind::File, &existing, NodeIdPolicy::Keep);
        assert!(err.is_err());

        let fresh = create_node_of_same_type(&mut s, NodeKind::File, &existing, NodeIdPolicy::TryKeep).unwrap();
        assert_ne!(fresh, existing);

        let wanted = NodeId::new("777");
        let kept = create_node_of_same_type(&mut s, NodeKind::Group, &wanted, NodeIdPolicy::TryKeep).unwrap();
        assert_eq!(kept, wanted);
        assert_eq!(s.node_kind(&kept), Some(NodeKind::Group));
    }

    #[test]
    fn colliding_aliases_are_renamed() {
        let backend = MemoryBackend::default();
        let mut source = open(&backend, "src");
        let mut target = open(&backend, "dst");
        let s_root = source.root().unwrap();
        let t_root = target.root().unwrap();
        let node = add(&mut source, &s_root, NodeKind::XmlDoc, None);
        source
            .set_aliases(&node, &["intro".to_string(), "intro_2".to_string()])
            .unwrap();
        add(&mut target, &t_root, NodeKind::XmlDoc, Some("intro"));

        let mut copier = NodeCopier::default();
        copier
            .copy_nodes_to_position(&mut source, &[node], &mut target, &t_root, None)
            .unwrap();

        let copied = target.child_nodes(&t_root).unwrap()[1].clone();
        let aliases = target.aliases(&copied);
        assert_eq!(aliases.len(), 2);
        assert_ne!(aliases[0], aliases[1]);
        assert!(!aliases.contains(&"intro".to_string()));
        assert_eq!(copier.alias_map().get("intro").map(String::as_str), Some(aliases[0].as_str()));
    }

    #[test]
    fn rename_loop_is_bounded() {
        let backend = MemoryBackend::default();
        let mut source = open(&backend, "src");
        let mut target = open(&backend, "dst");
        let s_root = source.root().unwrap();
        let t_root = target.root().unwrap();
        let node = add(&mut source, &s_root, NodeKind::File, Some("logo"));
        add(&mut target, &t_root, NodeKind::File, Some("logo"));

        let mut copier = NodeCopier::default().with_alias_rename(Arc::new(NeverUnique));
        let err = copier
            .copy_nodes_to_position(&mut source, &[node], &mut target, &t_root, None)
            .unwrap_err();
        assert!(matches!(err, SyncError::AliasExhausted { attempts: 100, .. }));
    }

    #[test]
    fn depth_is_bounded() {
        let backend = MemoryBackend::default();
        let mut source = open(&backend, "src");
        let mut target = open(&backend, "dst");
        let mut parent = source.root().unwrap();
        for _ in 0..5 {
            parent = add(&mut source, &parent, NodeKind::Group, None);
        }
        let s_root = source.root().unwrap();
        let t_root = target.root().unwrap();

        let mut shallow = NodeCopier::new(SyncConfig::new().with_max_copy_depth(2));
        let err = shallow
            .copy_node_children(&mut source, &s_root, &mut target, &t_root)
            .unwrap_err();
        assert!(matches!(err, SyncError::MaxDepthExceeded { max_depth: 2 }));

        let mut deep = NodeCopier::default();
        let mut target2 = open(&backend, "dst2");
        let t2_root = target2.root().unwrap();
        assert_eq!(
            deep.copy_node_children(&mut source, &s_root, &mut target2, &t2_root).unwrap(),
            5
        );
    }

    #[test]
    fn target_in_translation_mode_is_refused() {
        let backend = MemoryBackend::default();
        let mut source = open(&backend, "src");
        let mut target = open(&backend, "dst");
        let s_root = source.root().unwrap();
        let t_root = target.root().unwrap();
        target.enter_translation_mode("de");
        let err = NodeCopier::default()
            .copy_node_shallow(&mut source, &s_root, &mut target, &t_root)
            .unwrap_err();
        assert!(matches!(err, SyncError::TranslationMode(_)));

        target.leave_translation_mode();
        source.enter_translation_mode("de");
        let err = NodeCopier::default()
            .with_languages(vec!["fr".into()])
            .copy_node_shallow(&mut source, &s_root, &mut target, &t_root)
            .unwrap_err();
        assert!(matches!(err, SyncError::TranslationMode(_)));
    }

    #[test]
    fn translations_and_id_map() {
        let backend = MemoryBackend::default();
        let mut source = open(&backend, "src");
        let mut target = open(&backend, "dst");
        let s_root = source.root().unwrap();
        let t_root = target.root().unwrap();
        // takes the id the source hands out next
        add(&mut target, &t_root, NodeKind::File, None);
        let doc = add(&mut source, &s_root, NodeKind::XmlDoc, None);
        source.set_title(&doc, Some("Intro"), None).unwrap();
        source.set_title(&doc, Some("Einleitung"), Some("de")).unwrap();
        source.set_attribute(&doc, "color", Some("red"), None).unwrap();
        source.set_attribute(&doc, "color", Some("rot"), Some("de")).unwrap();
        source.set_content_type(&doc, Some("text/xml"), None).unwrap();
        source.set_content_bytes(&doc, None, b"<p>hello</p>").unwrap();
        source.set_content_bytes(&doc, Some("de"), b"<p>hallo</p>").unwrap();
        source.set_content_type(&doc, Some("application/xml"), Some("de")).unwrap();

        let mut copier = NodeCopier::default();
        let count = copier
            .copy_nodes_to_position(&mut source, &[doc.clone()], &mut target, &t_root, None)
            .unwrap();
        assert_eq!(count, 1);
        let copy = target.child_nodes(&t_root).unwrap()[1].clone();
        assert_ne!(copy, doc);
        assert_eq!(copier.node_id_map().get(&doc), Some(&copy));

        assert_eq!(target.title_lang(&copy, Some("de")).as_deref(), Some("Einleitung"));
        assert_eq!(target.attributes_lang(&copy, Some("de")).get("color").map(String::as_str), Some("rot"));
        assert_eq!(target.content_bytes(&copy, None).unwrap().unwrap(), b"<p>hello</p>");
        assert_eq!(target.content_bytes(&copy, Some("de")).unwrap().unwrap(), b"<p>hallo</p>");
        assert_eq!(target.content_type_lang(&copy, Some("de")).as_deref(), Some("application/xml"));
        assert_eq!(target.translation_mode(), None);

        let mut original_only = NodeCopier::default().with_languages(Vec::new());
        original_only
            .copy_nodes_to_position(&mut source, &[doc], &mut target, &t_root, None)
            .unwrap();
        let second = target.child_nodes(&t_root).unwrap()[2].clone();
        assert!(target.translations(&second).is_empty());
    }
}

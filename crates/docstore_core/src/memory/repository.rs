//! Persistent state of the in-memory backend.
//!
//! A [`MemoryRepository`] is plain data: stores, their version forest and a
//! node arena per version. Parent/child relations are ids into the arena.
//! The whole repository serializes to JSON for snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{HistoryEntry, NodeId, NodeKind, VersionId};

/// Id of the root group of every root version. Generated ids start at 1,
/// so the root never collides with them and root ids match across stores.
pub(crate) const ROOT_NODE_ID: &str = "0";

/// Original value plus per-language translations of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Variants<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original: Option<T>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    translations: BTreeMap<String, T>,
}

impl<T> Default for Variants<T> {
    fn default() -> Self {
        Self {
            original: None,
            translations: BTreeMap::new(),
        }
    }
}

impl<T> Variants<T> {
    pub(crate) fn get(&self, lang: Option<&str>) -> Option<&T> {
        match lang {
            Some(lang) => self.translations.get(lang),
            None => self.original.as_ref(),
        }
    }

    /// Sets or removes one variant; returns true if anything changed.
    pub(crate) fn set(&mut self, lang: Option<&str>, value: Option<T>) -> bool
    where
        T: PartialEq,
    {
        match lang {
            Some(lang) => {
                if self.translations.get(lang) == value.as_ref() {
                    return false;
                }
                match value {
                    Some(v) => self.translations.insert(lang.to_string(), v),
                    None => self.translations.remove(lang),
                };
            }
            None => {
                if self.original == value {
                    return false;
                }
                self.original = value;
            }
        }
        true
    }

    pub(crate) fn languages(&self) -> impl Iterator<Item = &str> {
        self.translations.keys().map(String::as_str)
    }

    pub(crate) fn remove_translation(&mut self, lang: &str) -> bool {
        self.translations.remove(lang).is_some()
    }
}

/// One node of a version tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NodeRecord {
    pub(crate) kind: NodeKind,
    #[serde(default)]
    pub(crate) parent: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) children: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) aliases: Vec<String>,
    #[serde(default)]
    pub(crate) title: Variants<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) attributes: BTreeMap<String, String>,
    /// Language to translated attribute values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) translated_attributes: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub(crate) content: Variants<Arc<[u8]>>,
    #[serde(default)]
    pub(crate) content_type: Variants<String>,
    #[serde(default)]
    pub(crate) file_extension: Variants<String>,
    #[serde(default)]
    pub(crate) target_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) history: Vec<HistoryEntry>,
}

impl NodeRecord {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            aliases: Vec::new(),
            title: Variants::default(),
            attributes: BTreeMap::new(),
            translated_attributes: BTreeMap::new(),
            content: Variants::default(),
            content_type: Variants::default(),
            file_extension: Variants::default(),
            target_alias: None,
            history: Vec::new(),
        }
    }

    /// Languages with at least one translated field.
    pub(crate) fn translations(&self) -> BTreeSet<String> {
        let mut langs: BTreeSet<String> = BTreeSet::new();
        langs.extend(self.title.languages().map(str::to_string));
        langs.extend(self.content.languages().map(str::to_string));
        langs.extend(self.content_type.languages().map(str::to_string));
        langs.extend(self.file_extension.languages().map(str::to_string));
        langs.extend(
            self.translated_attributes
                .iter()
                .filter(|(_, values)| !values.is_empty())
                .map(|(lang, _)| lang.clone()),
        );
        langs
    }

    /// Drops every translated field of `lang`; returns true if any existed.
    pub(crate) fn delete_translation(&mut self, lang: &str) -> bool {
        let mut changed = self.title.remove_translation(lang);
        changed |= self.content.remove_translation(lang);
        changed |= self.content_type.remove_translation(lang);
        changed |= self.file_extension.remove_translation(lang);
        changed |= self.translated_attributes.remove(lang).is_some();
        changed
    }
}

/// Node arena of one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NodeTree {
    pub(crate) root: NodeId,
    pub(crate) nodes: BTreeMap<NodeId, NodeRecord>,
}

impl NodeTree {
    pub(crate) fn new(root: NodeId) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(root.clone(), NodeRecord::new(NodeKind::Group));
        Self { root, nodes }
    }

    pub(crate) fn get(&self, id: &NodeId) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub(crate) fn node(&self, id: &NodeId) -> CoreResult<&NodeRecord> {
        self.nodes.get(id).ok_or_else(|| CoreError::node_not_found(id))
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> CoreResult<&mut NodeRecord> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| CoreError::node_not_found(id))
    }

    pub(crate) fn group(&self, id: &NodeId) -> CoreResult<&NodeRecord> {
        let node = self.node(id)?;
        if !node.kind.is_group() {
            return Err(CoreError::invalid_operation(format!(
                "node {id} is not a group"
            )));
        }
        Ok(node)
    }

    pub(crate) fn node_by_alias(&self, alias: &str) -> Option<&NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.aliases.iter().any(|a| a == alias))
            .map(|(id, _)| id)
    }

    pub(crate) fn insert_node(&mut self, id: NodeId, kind: NodeKind) -> CoreResult<()> {
        if self.nodes.contains_key(&id) {
            return Err(CoreError::NodeIdInUse { id });
        }
        self.nodes.insert(id, NodeRecord::new(kind));
        Ok(())
    }

    fn is_ancestor_or_self<'a>(&'a self, candidate: &NodeId, mut id: &'a NodeId) -> bool {
        loop {
            if id == candidate {
                return true;
            }
            match self.nodes.get(id).and_then(|n| n.parent.as_ref()) {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }

    /// Inserts (or moves) `child` into `group` before `reference`.
    pub(crate) fn insert_before(
        &mut self,
        group: &NodeId,
        child: &NodeId,
        reference: Option<&NodeId>,
    ) -> CoreResult<()> {
        self.group(group)?;
        self.node(child)?;
        if *child == self.root {
            return Err(CoreError::invalid_operation("the root group cannot be moved"));
        }
        if self.is_ancestor_or_self(child, group) {
            return Err(CoreError::invalid_operation(format!(
                "cannot insert {child} into its own descendant {group}"
            )));
        }
        if let Some(reference) = reference {
            if reference == child {
                return Ok(());
            }
            if self.node(reference)?.parent.as_ref() != Some(group) {
                return Err(CoreError::invalid_operation(format!(
                    "reference node {reference} is not a child of {group}"
                )));
            }
        }

        if let Some(old_parent) = self.node(child)?.parent.clone() {
            self.node_mut(&old_parent)?.children.retain(|c| c != child);
        }
        let children = &mut self.node_mut(group)?.children;
        let index = reference
            .and_then(|r| children.iter().position(|c| c == r))
            .unwrap_or(children.len());
        children.insert(index, child.clone());
        self.node_mut(child)?.parent = Some(group.clone());
        Ok(())
    }

    /// Detaches `child` from `group` and destroys it with its descendants.
    ///
    /// Returns every destroyed id, `child` first.
    pub(crate) fn remove_child(&mut self, group: &NodeId, child: &NodeId) -> CoreResult<Vec<NodeId>> {
        if self.node(child)?.parent.as_ref() != Some(group) {
            return Err(CoreError::invalid_operation(format!(
                "node {child} is not a child of {group}"
            )));
        }
        self.node_mut(group)?.children.retain(|c| c != child);
        self.node_mut(child)?.parent = None;
        Ok(self.destroy(child))
    }

    fn destroy(&mut self, id: &NodeId) -> Vec<NodeId> {
        let mut destroyed = Vec::new();
        let mut pending = vec![id.clone()];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                pending.extend(node.children);
                destroyed.push(next);
            }
        }
        destroyed
    }

    /// Destroys every node without a parent except the root.
    pub(crate) fn purge_orphans(&mut self) -> usize {
        let orphans: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(id, node)| node.parent.is_none() && **id != self.root)
            .map(|(id, _)| id.clone())
            .collect();
        orphans.iter().map(|id| self.destroy(id).len()).sum()
    }

    /// Number of nodes reachable from the root, root included.
    pub(crate) fn attached_count(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![&self.root];
        while let Some(id) = pending.pop() {
            if let Some(node) = self.nodes.get(id) {
                count += 1;
                pending.extend(node.children.iter());
            }
        }
        count
    }
}

/// One version of a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct VersionData {
    #[serde(default)]
    pub(crate) derived_from: Option<VersionId>,
    #[serde(default)]
    pub(crate) properties: BTreeMap<String, String>,
    pub(crate) tree: NodeTree,
}

/// One store with its version forest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreData {
    #[serde(default)]
    pub(crate) properties: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) versions: BTreeMap<VersionId, VersionData>,
    /// Next generated node id; ids are unique across the store's versions.
    #[serde(default)]
    pub(crate) next_node_id: u64,
}

impl StoreData {
    pub(crate) fn allocate_node_id(&mut self) -> NodeId {
        self.next_node_id += 1;
        NodeId::new(self.next_node_id.to_string())
    }

    /// Keeps generated ids clear of an explicitly assigned one.
    pub(crate) fn reserve_node_id(&mut self, id: &NodeId) {
        if let Ok(n) = id.as_str().parse::<u64>() {
            self.next_node_id = self.next_node_id.max(n);
        }
    }

    pub(crate) fn version(&self, store_id: &str, version: &VersionId) -> CoreResult<&VersionData> {
        self.versions
            .get(version)
            .ok_or_else(|| CoreError::version_not_found(store_id, version))
    }

    pub(crate) fn version_mut(&mut self, store_id: &str, version: &VersionId) -> CoreResult<&mut VersionData> {
        self.versions
            .get_mut(version)
            .ok_or_else(|| CoreError::version_not_found(store_id, version))
    }
}

/// All stores of an in-memory backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryRepository {
    #[serde(default)]
    pub(crate) stores: BTreeMap<String, StoreData>,
}

impl MemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes the repository as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Fails if serialization fails.
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::invalid_operation(format!("cannot serialize snapshot: {e}")))
    }

    /// Parses a repository from JSON.
    ///
    /// # Errors
    ///
    /// Fails for malformed JSON or a snapshot with a dangling root.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let repo: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::invalid_operation(format!("malformed snapshot: {e}")))?;
        for (store_id, store) in &repo.stores {
            for (version, data) in &store.versions {
                if data.tree.get(&data.tree.root).is_none() {
                    return Err(CoreError::invariant(format!(
                        "version {version} of store {store_id} has no root node"
                    )));
                }
            }
        }
        Ok(repo)
    }

    /// Ids of all stores.
    pub fn store_ids(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    /// Number of nodes reachable from the root of a version.
    #[must_use]
    pub fn node_count(&self, store_id: &str, version: &VersionId) -> Option<usize> {
        self.stores
            .get(store_id)
            .and_then(|s| s.versions.get(version))
            .map(|v| v.tree.attached_count())
    }

    pub(crate) fn store(&self, store_id: &str) -> CoreResult<&StoreData> {
        self.stores
            .get(store_id)
            .ok_or_else(|| CoreError::store_not_found(store_id))
    }

    pub(crate) fn store_mut(&mut self, store_id: &str) -> CoreResult<&mut StoreData> {
        self.stores
            .get_mut(store_id)
            .ok_or_else(|| CoreError::store_not_found(store_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    fn tree_with(children: &[(&str, NodeKind)]) -> NodeTree {
        let mut tree = NodeTree::new(id("0"));
        for (child, kind) in children {
            tree.insert_node(id(child), *kind).unwrap();
            tree.insert_before(&id("0"), &id(child), None).unwrap();
        }
        tree
    }

    #[test]
    fn variants_track_changes() {
        let mut v: Variants<String> = Variants::default();
        assert!(v.set(None, Some("a".into())));
        assert!(!v.set(None, Some("a".into())));
        assert!(v.set(Some("de"), Some("b".into())));
        assert_eq!(v.get(Some("de")).map(String::as_str), Some("b"));
        assert_eq!(v.get(Some("fr")), None);
        assert!(v.set(Some("de"), None));
        assert!(!v.set(Some("de"), None));
    }

    #[test]
    fn insert_before_moves_existing_child() {
        let mut tree = tree_with(&[("1", NodeKind::Group), ("2", NodeKind::File)]);
        tree.insert_before(&id("1"), &id("2"), None).unwrap();
        assert!(tree.get(&id("0")).unwrap().children == vec![id("1")]);
        assert_eq!(tree.get(&id("2")).unwrap().parent, Some(id("1")));

        tree.insert_before(&id("0"), &id("2"), Some(&id("1"))).unwrap();
        assert_eq!(tree.get(&id("0")).unwrap().children, vec![id("2"), id("1")]);
        assert!(tree.get(&id("1")).unwrap().children.is_empty());
    }

    #[test]
    fn insert_rejects_cycles() {
        let mut tree = tree_with(&[("1", NodeKind::Group)]);
        tree.insert_node(id("2"), NodeKind::Group).unwrap();
        tree.insert_before(&id("1"), &id("2"), None).unwrap();
        assert!(tree.insert_before(&id("2"), &id("1"), None).is_err());
        assert!(tree.insert_before(&id("1"), &id("1"), None).is_err());
        assert!(tree.insert_before(&id("1"), &id("0"), None).is_err());
    }

    #[test]
    fn remove_child_destroys_subtree() {
        let mut tree = tree_with(&[("1", NodeKind::Group)]);
        tree.insert_node(id("2"), NodeKind::File).unwrap();
        tree.insert_before(&id("1"), &id("2"), None).unwrap();
        let destroyed = tree.remove_child(&id("0"), &id("1")).unwrap();
        assert_eq!(destroyed.len(), 2);
        assert!(tree.get(&id("2")).is_none());
        assert_eq!(tree.attached_count(), 1);
    }

    #[test]
    fn purge_orphans_keeps_root() {
        let mut tree = tree_with(&[("1", NodeKind::File)]);
        tree.insert_node(id("9"), NodeKind::Group).unwrap();
        assert_eq!(tree.purge_orphans(), 1);
        assert!(tree.get(&id("0")).is_some());
        assert!(tree.get(&id("1")).is_some());
    }

    #[test]
    fn node_ids_skip_reserved() {
        let mut store = StoreData::default();
        store.reserve_node_id(&id("41"));
        store.reserve_node_id(&id("abc"));
        assert_eq!(store.allocate_node_id(), id("42"));
    }

    #[test]
    fn snapshot_round_trip_keeps_tree() {
        let mut repo = MemoryRepository::new();
        let mut store = StoreData::default();
        store.versions.insert(
            VersionId::parse("1.0").unwrap(),
            VersionData {
                derived_from: None,
                properties: BTreeMap::new(),
                tree: tree_with(&[("1", NodeKind::XmlDoc)]),
            },
        );
        repo.stores.insert("manual".into(), store);
        let json = repo.to_json().unwrap();
        let back = MemoryRepository::from_json(&json).unwrap();
        assert_eq!(back.node_count("manual", &VersionId::parse("1.0").unwrap()), Some(2));
    }
}

//! Session over the in-memory repository.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::event::{DocEvent, DocListener};
use crate::lock::LockListener;
use crate::manager::SharedStore;
use crate::properties::{self, PROP_VERSION_CREATION_DATE};
use crate::session::DocStoreSession;
use crate::types::{
    is_valid_alias, now_millis, HistoryEntry, NodeId, NodeKind, PropertyUpdate, VersionAddress,
    VersionId,
};
use crate::uuid_registry::UuidRegistry;

use super::repository::{NodeRecord, NodeTree, StoreData, VersionData, ROOT_NODE_ID};
use super::BackendInner;

struct OpenStore {
    address: VersionAddress,
    shared: Arc<SharedStore>,
    /// Working copy of the tree while a transaction runs.
    working: Option<NodeTree>,
}

/// A session of a [`MemoryBackend`](super::MemoryBackend).
///
/// Outside a transaction every write goes straight to the repository. Inside
/// one, writes go to a private copy of the open version's tree that is
/// published by `commit_transaction`.
pub struct MemorySession {
    backend: Arc<BackendInner>,
    session_id: String,
    user_id: String,
    open: Option<OpenStore>,
    translation_mode: Option<String>,
    doc_listeners: Vec<Arc<dyn DocListener>>,
    lock_listeners: Vec<Arc<dyn LockListener>>,
}

fn apply_properties(target: &mut BTreeMap<String, String>, updates: &[PropertyUpdate]) {
    for (name, value) in updates {
        match value {
            Some(value) => {
                target.insert(name.clone(), value.clone());
            }
            None => {
                target.remove(name);
            }
        }
    }
}

fn require_content_record(id: &NodeId, node: &NodeRecord) -> CoreResult<()> {
    if node.kind.is_content() {
        Ok(())
    } else {
        Err(CoreError::invalid_operation(format!(
            "node {id} is a {}, not a content node",
            node.kind
        )))
    }
}

impl MemorySession {
    pub(super) fn new(backend: Arc<BackendInner>, session_id: String, user_id: String) -> Self {
        Self {
            backend,
            session_id,
            user_id,
            open: None,
            translation_mode: None,
            doc_listeners: Vec::new(),
            lock_listeners: Vec::new(),
        }
    }

    fn open_store(&self) -> CoreResult<&OpenStore> {
        self.open.as_ref().ok_or(CoreError::NoStoreOpen)
    }

    fn read_tree<R>(&self, f: impl FnOnce(&NodeTree) -> R) -> CoreResult<R> {
        let open = self.open_store()?;
        if let Some(tree) = &open.working {
            return Ok(f(tree));
        }
        let repo = self.backend.repo.read();
        let address = &open.address;
        let version = repo
            .store(&address.store_id)?
            .version(&address.store_id, &address.version)?;
        Ok(f(&version.tree))
    }

    fn write_tree<R>(&mut self, f: impl FnOnce(&mut NodeTree) -> CoreResult<R>) -> CoreResult<R> {
        let open = self.open.as_mut().ok_or(CoreError::NoStoreOpen)?;
        self.backend.record_write();
        if let Some(tree) = open.working.as_mut() {
            return f(tree);
        }
        let mut repo = self.backend.repo.write();
        let address = &open.address;
        let version = repo
            .store_mut(&address.store_id)?
            .version_mut(&address.store_id, &address.version)?;
        f(&mut version.tree)
    }

    fn read_node<R>(&self, id: &NodeId, f: impl FnOnce(&NodeRecord) -> R) -> Option<R> {
        self.read_tree(|tree| tree.get(id).map(f)).ok().flatten()
    }

    fn update_node<R>(
        &mut self,
        id: &NodeId,
        lang: Option<&str>,
        f: impl FnOnce(&mut NodeRecord) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let result = self.write_tree(|tree| f(tree.node_mut(id)?))?;
        let parent = self.parent_group(id);
        self.emit(DocEvent::changed(
            parent,
            vec![id.clone()],
            lang.map(str::to_owned),
        ));
        Ok(result)
    }

    fn emit(&self, event: DocEvent) {
        if let Some(open) = &self.open {
            open.shared.events().push(event);
            if open.working.is_none() {
                open.shared.events().dispatch();
            }
        }
    }

    fn with_store<R>(&self, store_id: &str, f: impl FnOnce(&StoreData) -> R) -> CoreResult<R> {
        let repo = self.backend.repo.read();
        Ok(f(repo.store(store_id)?))
    }

    fn with_version<R>(
        &self,
        store_id: &str,
        version: &VersionId,
        f: impl FnOnce(&VersionData) -> R,
    ) -> CoreResult<R> {
        let repo = self.backend.repo.read();
        Ok(f(repo.store(store_id)?.version(store_id, version)?))
    }

    fn has_open(&self, store_id: &str, version: Option<&VersionId>) -> bool {
        self.open.as_ref().is_some_and(|open| {
            open.address.store_id == store_id && version.map_or(true, |v| open.address.version == *v)
        })
    }

    fn attach_listeners(&self, shared: &SharedStore) {
        for listener in &self.doc_listeners {
            shared.events().add_listener(Arc::clone(listener));
        }
        for listener in &self.lock_listeners {
            shared.locks().add_listener(Arc::clone(listener));
        }
    }

    fn detach_listeners(&self, shared: &SharedStore) {
        for listener in &self.doc_listeners {
            shared.events().remove_listener(listener);
        }
        for listener in &self.lock_listeners {
            shared.locks().remove_listener(listener);
        }
    }

    fn allocate_node_id(&mut self, requested: Option<&NodeId>) -> CoreResult<NodeId> {
        let open = self.open_store()?;
        let address = &open.address;
        let mut repo = self.backend.repo.write();
        let store = repo.store_mut(&address.store_id)?;
        let id = match requested {
            Some(id) => id.clone(),
            None => loop {
                let candidate = store.allocate_node_id();
                let taken = match &open.working {
                    Some(tree) => tree.get(&candidate).is_some(),
                    None => store
                        .version(&address.store_id, &address.version)?
                        .tree
                        .get(&candidate)
                        .is_some(),
                };
                if !taken {
                    break candidate;
                }
            },
        };
        store.reserve_node_id(&id);
        Ok(id)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.open.is_some() {
            let _ = self.close_doc_store();
        }
        self.backend.manager.close_session(&self.session_id);
    }
}

impl DocStoreSession for MemorySession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn store_id(&self) -> Option<&str> {
        self.open.as_ref().map(|o| o.address.store_id.as_str())
    }

    fn version_id(&self) -> Option<&VersionId> {
        self.open.as_ref().map(|o| &o.address.version)
    }

    fn open_doc_store(&mut self, store_id: &str, version: &VersionId) -> CoreResult<()> {
        self.with_version(store_id, version, |_| ())?;
        if self.open.is_some() {
            self.close_doc_store()?;
        }
        let address = VersionAddress::new(store_id, version.clone());
        let shared = self
            .backend
            .manager
            .acquire_store(&self.session_id, &address)?;
        self.attach_listeners(&shared);
        tracing::debug!(session = %self.session_id, store = %address, "store opened");
        self.open = Some(OpenStore {
            address,
            shared,
            working: None,
        });
        Ok(())
    }

    fn close_doc_store(&mut self) -> CoreResult<()> {
        let open = self.open.take().ok_or(CoreError::NoStoreOpen)?;
        if open.working.is_some() {
            tracing::warn!(session = %self.session_id, store = %open.address, "closing store with running transaction; rolling back");
            open.shared.events().discard();
        }
        self.detach_listeners(&open.shared);
        self.backend.manager.release_store(&self.session_id);
        Ok(())
    }

    fn shared_store(&self) -> CoreResult<Arc<SharedStore>> {
        Ok(Arc::clone(&self.open_store()?.shared))
    }

    fn uuid_registry(&self) -> Arc<UuidRegistry> {
        self.backend.manager.uuid_registry()
    }

    fn list_doc_stores(&self) -> Vec<String> {
        self.backend.repo.read().store_ids().map(str::to_string).collect()
    }

    fn is_db_store(&self, _store_id: &str) -> bool {
        self.backend.config.db_store
    }

    fn create_doc_store(&mut self, store_id: &str, properties: &[PropertyUpdate]) -> CoreResult<()> {
        if store_id.trim().is_empty() {
            return Err(CoreError::invalid_operation("store id must not be empty"));
        }
        let mut repo = self.backend.repo.write();
        if repo.stores.contains_key(store_id) {
            return Err(CoreError::StoreExists {
                store_id: store_id.to_string(),
            });
        }
        let mut store = StoreData::default();
        apply_properties(&mut store.properties, properties);
        repo.stores.insert(store_id.to_string(), store);
        self.backend.record_write();
        tracing::info!(store = store_id, user = %self.user_id, "store created");
        Ok(())
    }

    fn delete_doc_store(&mut self, store_id: &str) -> CoreResult<()> {
        self.with_store(store_id, |_| ())?;
        if self
            .backend
            .manager
            .in_use_by_others(&self.session_id, store_id, None)
        {
            return Err(CoreError::users_connected(format!(
                "cannot delete store {store_id}: users are connected"
            )));
        }
        if self.has_open(store_id, None) {
            self.close_doc_store()?;
        }
        self.backend.manager.destroy_store_instances(store_id)?;
        self.backend.repo.write().stores.remove(store_id);
        self.backend.record_write();
        self.backend.manager.uuid_registry().reset();
        tracing::info!(store = store_id, "store deleted");
        Ok(())
    }

    fn doc_store_property(&self, store_id: &str, name: &str) -> Option<String> {
        self.with_store(store_id, |s| s.properties.get(name).cloned())
            .ok()
            .flatten()
    }

    fn set_doc_store_properties(&mut self, store_id: &str, properties: &[PropertyUpdate]) -> CoreResult<()> {
        let mut repo = self.backend.repo.write();
        apply_properties(&mut repo.store_mut(store_id)?.properties, properties);
        self.backend.record_write();
        Ok(())
    }

    fn all_doc_store_property_names(&self, store_id: &str) -> CoreResult<Vec<String>> {
        self.with_store(store_id, |s| s.properties.keys().cloned().collect())
    }

    fn list_versions(&self, store_id: &str) -> CoreResult<Vec<VersionId>> {
        self.with_store(store_id, |s| s.versions.keys().cloned().collect())
    }

    fn version_derived_from(&self, store_id: &str, version: &VersionId) -> CoreResult<Option<VersionId>> {
        self.with_version(store_id, version, |v| v.derived_from.clone())
    }

    fn create_version(&mut self, store_id: &str, base: Option<&VersionId>, new_version: &VersionId) -> CoreResult<()> {
        self.check_create_version(store_id, base, new_version)?;
        let mut repo = self.backend.repo.write();
        let store = repo.store_mut(store_id)?;
        let mut data = match base {
            Some(base) => {
                let base_data = store.version(store_id, base)?;
                let mut properties = base_data.properties.clone();
                properties.retain(|name, _| !properties::is_internal_version_property(name));
                VersionData {
                    derived_from: Some(base.clone()),
                    properties,
                    tree: base_data.tree.clone(),
                }
            }
            None => VersionData {
                derived_from: None,
                properties: BTreeMap::new(),
                tree: NodeTree::new(NodeId::new(ROOT_NODE_ID)),
            },
        };
        data.properties.insert(
            PROP_VERSION_CREATION_DATE.to_string(),
            now_millis().to_string(),
        );
        store.versions.insert(new_version.clone(), data);
        self.backend.record_write();
        tracing::info!(store = store_id, version = %new_version, base = ?base.map(VersionId::as_str), "version created");
        Ok(())
    }

    fn delete_version(&mut self, store_id: &str, version: &VersionId) -> CoreResult<()> {
        self.with_version(store_id, version, |_| ())?;
        let subs = self.sub_versions(store_id, version)?;
        if !subs.is_empty() {
            return Err(CoreError::invalid_operation(format!(
                "cannot delete version {version}: versions {subs:?} are derived from it"
            )));
        }
        if self
            .backend
            .manager
            .in_use_by_others(&self.session_id, store_id, Some(version))
        {
            return Err(CoreError::users_connected(format!(
                "cannot delete version {version} of {store_id}: users are connected"
            )));
        }
        if self.has_open(store_id, Some(version)) {
            self.close_doc_store()?;
        }
        self.backend
            .manager
            .destroy_store_instance(&VersionAddress::new(store_id, version.clone()))?;
        self.backend
            .repo
            .write()
            .store_mut(store_id)?
            .versions
            .remove(version);
        self.backend.record_write();
        self.backend.manager.uuid_registry().reset();
        tracing::info!(store = store_id, %version, "version deleted");
        Ok(())
    }

    fn version_property(&self, store_id: &str, version: &VersionId, name: &str) -> Option<String> {
        self.with_version(store_id, version, |v| v.properties.get(name).cloned())
            .ok()
            .flatten()
    }

    fn set_version_properties(&mut self, store_id: &str, version: &VersionId, properties: &[PropertyUpdate]) -> CoreResult<()> {
        let mut repo = self.backend.repo.write();
        let data = repo.store_mut(store_id)?.version_mut(store_id, version)?;
        apply_properties(&mut data.properties, properties);
        self.backend.record_write();
        Ok(())
    }

    fn all_version_property_names(&self, store_id: &str, version: &VersionId) -> CoreResult<Vec<String>> {
        self.with_version(store_id, version, |v| v.properties.keys().cloned().collect())
    }

    fn on_release_translation(&mut self, store_id: &str, version: &VersionId, lang: &str) -> CoreResult<()> {
        tracing::info!(store = store_id, %version, lang, "translation released");
        Ok(())
    }

    fn set_translation_back_to_pending(&mut self, store_id: &str, version: &VersionId, lang: &str) -> CoreResult<()> {
        let mut repo = self.backend.repo.write();
        let data = repo.store_mut(store_id)?.version_mut(store_id, version)?;
        data.properties.remove(&properties::version_state_key(Some(lang)));
        data.properties.remove(&properties::release_date_key(Some(lang)));
        let mut dropped = 0usize;
        for node in data.tree.nodes.values_mut() {
            if node.content.set(Some(lang), None) {
                dropped += 1;
            }
        }
        self.backend.record_write();
        tracing::info!(store = store_id, %version, lang, dropped, "translation set back to pending");
        Ok(())
    }

    fn translation_mode(&self) -> Option<&str> {
        self.translation_mode.as_deref()
    }

    fn enter_translation_mode(&mut self, lang: &str) {
        self.translation_mode = Some(lang.to_string());
    }

    fn leave_translation_mode(&mut self) {
        self.translation_mode = None;
    }

    fn start_transaction(&mut self) -> CoreResult<()> {
        let open = self.open_store()?;
        if open.working.is_some() {
            return Err(CoreError::transaction("transaction already running"));
        }
        let tree = self.read_tree(NodeTree::clone)?;
        if let Some(open) = self.open.as_mut() {
            open.working = Some(tree);
        }
        Ok(())
    }

    fn commit_transaction(&mut self) -> CoreResult<()> {
        let open = self.open.as_mut().ok_or(CoreError::NoStoreOpen)?;
        let mut tree = open
            .working
            .take()
            .ok_or_else(|| CoreError::transaction("no transaction running"))?;
        let purged = tree.purge_orphans();
        let address = &open.address;
        {
            let mut repo = self.backend.repo.write();
            let version = repo
                .store_mut(&address.store_id)?
                .version_mut(&address.store_id, &address.version)?;
            version.tree = tree;
        }
        if purged > 0 {
            tracing::debug!(store = %address, purged, "detached nodes destroyed at commit");
        }
        open.shared.events().dispatch();
        Ok(())
    }

    fn rollback_transaction(&mut self) {
        if let Some(open) = self.open.as_mut() {
            if open.working.take().is_some() {
                open.shared.events().discard();
                tracing::debug!(session = %self.session_id, "transaction rolled back");
            }
        }
    }

    fn running_transaction(&self) -> bool {
        self.open.as_ref().is_some_and(|o| o.working.is_some())
    }

    fn add_doc_listener(&mut self, listener: Arc<dyn DocListener>) {
        if self.doc_listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return;
        }
        if let Some(open) = &self.open {
            open.shared.events().add_listener(Arc::clone(&listener));
        }
        self.doc_listeners.push(listener);
    }

    fn remove_doc_listener(&mut self, listener: &Arc<dyn DocListener>) -> bool {
        let before = self.doc_listeners.len();
        self.doc_listeners.retain(|l| !Arc::ptr_eq(l, listener));
        if let Some(open) = &self.open {
            open.shared.events().remove_listener(listener);
        }
        self.doc_listeners.len() != before
    }

    fn add_lock_listener(&mut self, listener: Arc<dyn LockListener>) {
        if self.lock_listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return;
        }
        if let Some(open) = &self.open {
            open.shared.locks().add_listener(Arc::clone(&listener));
        }
        self.lock_listeners.push(listener);
    }

    fn remove_lock_listener(&mut self, listener: &Arc<dyn LockListener>) -> bool {
        let before = self.lock_listeners.len();
        self.lock_listeners.retain(|l| !Arc::ptr_eq(l, listener));
        if let Some(open) = &self.open {
            open.shared.locks().remove_listener(listener);
        }
        self.lock_listeners.len() != before
    }

    fn root(&self) -> CoreResult<NodeId> {
        self.read_tree(|tree| tree.root.clone())
    }

    fn node_kind(&self, id: &NodeId) -> Option<NodeKind> {
        self.read_node(id, |n| n.kind)
    }

    fn node_id_by_alias(&self, alias: &str) -> Option<NodeId> {
        self.read_tree(|tree| tree.node_by_alias(alias).cloned())
            .ok()
            .flatten()
    }

    fn create_node(&mut self, kind: NodeKind, id: Option<&NodeId>) -> CoreResult<NodeId> {
        if let Some(id) = id {
            if self.node_id_exists(id) {
                return Err(CoreError::NodeIdInUse { id: id.clone() });
            }
        }
        let id = self.allocate_node_id(id)?;
        self.write_tree(|tree| tree.insert_node(id.clone(), kind))?;
        Ok(id)
    }

    fn parent_group(&self, id: &NodeId) -> Option<NodeId> {
        self.read_node(id, |n| n.parent.clone()).flatten()
    }

    fn child_nodes(&self, group: &NodeId) -> CoreResult<Vec<NodeId>> {
        self.read_tree(|tree| tree.group(group).map(|g| g.children.clone()))?
    }

    fn insert_before(&mut self, group: &NodeId, child: &NodeId, reference: Option<&NodeId>) -> CoreResult<()> {
        let old_parent = self.parent_group(child);
        self.write_tree(|tree| tree.insert_before(group, child, reference))?;
        if let Some(old_parent) = old_parent.filter(|p| p != group) {
            self.emit(DocEvent::removed(&old_parent, vec![child.clone()]));
        }
        self.emit(DocEvent::added(group, vec![child.clone()]));
        Ok(())
    }

    fn remove_child(&mut self, group: &NodeId, child: &NodeId) -> CoreResult<()> {
        let destroyed = self.write_tree(|tree| tree.remove_child(group, child))?;
        tracing::trace!(%group, %child, destroyed = destroyed.len(), "child removed");
        self.emit(DocEvent::removed(group, vec![child.clone()]));
        Ok(())
    }

    fn aliases(&self, id: &NodeId) -> Vec<String> {
        self.read_node(id, |n| n.aliases.clone()).unwrap_or_default()
    }

    fn set_aliases(&mut self, id: &NodeId, aliases: &[String]) -> CoreResult<()> {
        let mut unique: Vec<String> = Vec::with_capacity(aliases.len());
        for alias in aliases {
            if !is_valid_alias(alias) {
                return Err(CoreError::InvalidAlias {
                    alias: alias.clone(),
                });
            }
            if !unique.contains(alias) {
                unique.push(alias.clone());
            }
        }
        self.write_tree(|tree| {
            for alias in &unique {
                if let Some(owner) = tree.node_by_alias(alias) {
                    if owner != id {
                        return Err(CoreError::AliasInUse {
                            alias: alias.clone(),
                            owner: owner.clone(),
                        });
                    }
                }
            }
            tree.node_mut(id)?.aliases = unique;
            Ok(())
        })?;
        let parent = self.parent_group(id);
        self.emit(DocEvent::changed(parent, vec![id.clone()], None));
        Ok(())
    }

    fn title_lang(&self, id: &NodeId, lang: Option<&str>) -> Option<String> {
        self.read_node(id, |n| n.title.get(lang).cloned()).flatten()
    }

    fn set_title(&mut self, id: &NodeId, title: Option<&str>, lang: Option<&str>) -> CoreResult<()> {
        self.update_node(id, lang, |n| {
            n.title.set(lang, title.map(str::to_owned));
            Ok(())
        })
    }

    fn attributes_lang(&self, id: &NodeId, lang: Option<&str>) -> BTreeMap<String, String> {
        self.read_node(id, |n| match lang {
            None => n.attributes.clone(),
            Some(lang) => n
                .translated_attributes
                .get(lang)
                .cloned()
                .unwrap_or_default(),
        })
        .unwrap_or_default()
    }

    fn set_attribute(&mut self, id: &NodeId, name: &str, value: Option<&str>, lang: Option<&str>) -> CoreResult<()> {
        self.update_node(id, lang, |n| {
            match (lang, value) {
                (None, Some(value)) => {
                    n.attributes.insert(name.to_string(), value.to_string());
                }
                (None, None) => {
                    n.attributes.remove(name);
                    for values in n.translated_attributes.values_mut() {
                        values.remove(name);
                    }
                    n.translated_attributes.retain(|_, values| !values.is_empty());
                }
                (Some(lang), Some(value)) => {
                    n.translated_attributes
                        .entry(lang.to_string())
                        .or_default()
                        .insert(name.to_string(), value.to_string());
                }
                (Some(lang), None) => {
                    if let Some(values) = n.translated_attributes.get_mut(lang) {
                        values.remove(name);
                        if values.is_empty() {
                            n.translated_attributes.remove(lang);
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn translations(&self, id: &NodeId) -> Vec<String> {
        self.read_node(id, |n| n.translations().into_iter().collect())
            .unwrap_or_default()
    }

    fn delete_translation(&mut self, id: &NodeId, lang: &str) -> CoreResult<()> {
        self.update_node(id, Some(lang), |n| {
            n.delete_translation(lang);
            Ok(())
        })
    }

    fn target_alias(&self, id: &NodeId) -> Option<String> {
        self.read_node(id, |n| n.target_alias.clone()).flatten()
    }

    fn set_target_alias(&mut self, id: &NodeId, alias: Option<&str>) -> CoreResult<()> {
        self.update_node(id, None, |n| {
            if !n.kind.is_reference() {
                return Err(CoreError::invalid_operation(format!(
                    "node {id} is not a reference node"
                )));
            }
            n.target_alias = alias.map(str::to_owned);
            Ok(())
        })
    }

    fn content_type_lang(&self, id: &NodeId, lang: Option<&str>) -> Option<String> {
        self.read_node(id, |n| n.content_type.get(lang).cloned())
            .flatten()
    }

    fn set_content_type(&mut self, id: &NodeId, value: Option<&str>, lang: Option<&str>) -> CoreResult<()> {
        self.update_node(id, lang, |n| {
            require_content_record(id, n)?;
            n.content_type.set(lang, value.map(str::to_owned));
            Ok(())
        })
    }

    fn file_extension_lang(&self, id: &NodeId, lang: Option<&str>) -> Option<String> {
        self.read_node(id, |n| n.file_extension.get(lang).cloned())
            .flatten()
    }

    fn set_file_extension(&mut self, id: &NodeId, value: Option<&str>, lang: Option<&str>) -> CoreResult<()> {
        self.update_node(id, lang, |n| {
            require_content_record(id, n)?;
            n.file_extension.set(lang, value.map(str::to_owned));
            Ok(())
        })
    }

    fn has_content(&self, id: &NodeId, lang: Option<&str>) -> bool {
        self.read_node(id, |n| n.content.get(lang).is_some())
            .unwrap_or(false)
    }

    fn content_reader(&self, id: &NodeId, lang: Option<&str>) -> CoreResult<Option<Box<dyn Read>>> {
        let bytes = self.read_tree(|tree| {
            let node = tree.node(id)?;
            require_content_record(id, node)?;
            Ok::<_, CoreError>(node.content.get(lang).cloned())
        })??;
        Ok(bytes.map(|b| Box::new(Cursor::new(b)) as Box<dyn Read>))
    }

    fn content_length_lang(&self, id: &NodeId, lang: Option<&str>) -> u64 {
        self.read_node(id, |n| n.content.get(lang).map_or(0, |b| b.len() as u64))
            .unwrap_or(0)
    }

    fn set_content(&mut self, id: &NodeId, lang: Option<&str>, content: &mut dyn Read) -> CoreResult<()> {
        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes)?;
        let entry = HistoryEntry {
            timestamp: now_millis(),
            user: self.user_id.clone(),
            lang: lang.map(str::to_owned),
            length: bytes.len() as u64,
        };
        self.update_node(id, lang, |n| {
            require_content_record(id, n)?;
            n.content.set(lang, Some(Arc::from(bytes)));
            n.history.push(entry);
            Ok(())
        })
    }

    fn delete_content(&mut self, id: &NodeId, lang: Option<&str>) -> CoreResult<()> {
        self.update_node(id, lang, |n| {
            require_content_record(id, n)?;
            n.content.set(lang, None);
            Ok(())
        })
    }

    fn content_history(&self, id: &NodeId) -> Vec<HistoryEntry> {
        self.read_node(id, |n| n.history.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, MemoryConfig};
    use crate::types::VersionState;

    fn v(s: &str) -> VersionId {
        VersionId::parse(s).unwrap()
    }

    fn opened(backend: &MemoryBackend) -> MemorySession {
        let mut session = backend.session("alice");
        session.create_doc_store("manual", &[]).unwrap();
        session.create_version("manual", None, &v("1.0")).unwrap();
        session.open_doc_store("manual", &v("1.0")).unwrap();
        session
    }

    #[test]
    fn nodes_and_fields() {
        let backend = MemoryBackend::default();
        let mut s = opened(&backend);
        let root = s.root().unwrap();
        let doc = s.create_node(NodeKind::XmlDoc, None).unwrap();
        s.append_child(&root, &doc).unwrap();
        s.set_title(&doc, Some("Intro"), None).unwrap();
        s.set_title(&doc, Some("Einleitung"), Some("de")).unwrap();
        s.set_content_bytes(&doc, None, b"<p/>").unwrap();

        assert_eq!(s.child_nodes(&root).unwrap(), vec![doc.clone()]);
        assert_eq!(s.title(&doc).as_deref(), Some("Intro"));
        s.enter_translation_mode("de");
        assert_eq!(s.title(&doc).as_deref(), Some("Einleitung"));
        assert_eq!(s.content_bytes(&doc, None).unwrap().unwrap(), b"<p/>");
        assert_eq!(s.content_length(&doc), 4);
        s.leave_translation_mode();
        assert_eq!(s.translations(&doc), vec!["de"]);
        assert_eq!(s.content_history(&doc).len(), 1);
    }

    #[test]
    fn alias_uniqueness() {
        let backend = MemoryBackend::default();
        let mut s = opened(&backend);
        let a = s.create_node(NodeKind::File, None).unwrap();
        let b = s.create_node(NodeKind::File, None).unwrap();
        s.set_aliases(&a, &["logo".to_string()]).unwrap();
        assert!(matches!(
            s.set_aliases(&b, &["logo".to_string()]),
            Err(CoreError::AliasInUse { .. })
        ));
        assert!(matches!(
            s.set_aliases(&b, &["bad alias".to_string()]),
            Err(CoreError::InvalidAlias { .. })
        ));
        assert_eq!(s.node_id_by_alias("logo"), Some(a));
    }

    #[test]
    fn rollback_discards_working_copy() {
        let backend = MemoryBackend::default();
        let mut s = opened(&backend);
        let root = s.root().unwrap();
        s.start_transaction().unwrap();
        let n = s.create_node(NodeKind::Group, None).unwrap();
        s.append_child(&root, &n).unwrap();
        assert!(s.node_id_exists(&n));
        s.rollback_transaction();
        assert!(!s.node_id_exists(&n));
        assert!(s.child_nodes(&root).unwrap().is_empty());
    }

    #[test]
    fn commit_purges_unattached_nodes() {
        let backend = MemoryBackend::default();
        let mut s = opened(&backend);
        let root = s.root().unwrap();
        s.start_transaction().unwrap();
        let kept = s.create_node(NodeKind::File, None).unwrap();
        let stray = s.create_node(NodeKind::File, None).unwrap();
        s.append_child(&root, &kept).unwrap();
        assert!(s.start_transaction().is_err());
        s.commit_transaction().unwrap();
        assert!(s.node_id_exists(&kept));
        assert!(!s.node_id_exists(&stray));
        assert!(s.commit_transaction().is_err());
    }

    #[test]
    fn removed_group_id_can_be_reused() {
        let backend = MemoryBackend::default();
        let mut s = opened(&backend);
        let root = s.root().unwrap();
        s.start_transaction().unwrap();
        let g = s.create_node(NodeKind::Group, Some(&NodeId::new("77"))).unwrap();
        s.append_child(&root, &g).unwrap();
        s.remove_child(&root, &g).unwrap();
        let f = s.create_node(NodeKind::File, Some(&NodeId::new("77"))).unwrap();
        s.append_child(&root, &f).unwrap();
        s.commit_transaction().unwrap();
        assert_eq!(s.node_kind(&NodeId::new("77")), Some(NodeKind::File));
    }

    #[test]
    fn derived_version_copies_tree_and_user_properties() {
        let backend = MemoryBackend::default();
        let mut s = opened(&backend);
        let root = s.root().unwrap();
        let doc = s.create_node(NodeKind::XmlDoc, None).unwrap();
        s.append_child(&root, &doc).unwrap();
        s.set_version_property("manual", &v("1.0"), "author", Some("ann"))
            .unwrap();
        s.set_version_state("manual", &v("1.0"), VersionState::Released)
            .unwrap();
        s.create_version("manual", Some(&v("1.0")), &v("1.1")).unwrap();

        assert_eq!(
            s.version_property("manual", &v("1.1"), "author").as_deref(),
            Some("ann")
        );
        assert_eq!(
            s.version_state("manual", &v("1.1")).unwrap(),
            VersionState::Draft
        );
        s.open_doc_store("manual", &v("1.1")).unwrap();
        assert!(s.node_id_exists(&doc));
        assert_eq!(s.root().unwrap(), root);
    }

    #[test]
    fn delete_version_refuses_with_subs_and_other_users() {
        let backend = MemoryBackend::default();
        let mut s = opened(&backend);
        s.set_version_state("manual", &v("1.0"), VersionState::Released)
            .unwrap();
        s.create_version("manual", Some(&v("1.0")), &v("2.0")).unwrap();
        assert!(s.delete_version("manual", &v("1.0")).is_err());

        let mut other = backend.session("bob");
        other.open_doc_store("manual", &v("2.0")).unwrap();
        assert!(matches!(
            s.delete_version("manual", &v("2.0")),
            Err(CoreError::UsersConnected { .. })
        ));
        other.close_doc_store().unwrap();
        s.delete_versions_recursive("manual", &v("1.0"), None).unwrap();
        assert!(s.list_versions("manual").unwrap().is_empty());
        assert!(s.store_id().is_none());
    }

    #[test]
    fn db_store_hint() {
        let backend = MemoryBackend::new(MemoryConfig::new().db_store(true));
        let s = backend.session("alice");
        assert!(s.is_db_store("anything"));
    }

    #[test]
    fn write_counter_counts_mutations() {
        let backend = MemoryBackend::default();
        let mut s = opened(&backend);
        let root = s.root().unwrap();
        let before = backend.write_count();
        let _ = s.title(&root);
        let _ = s.child_nodes(&root);
        assert_eq!(backend.write_count(), before);
        s.set_title(&root, Some("Manual"), None).unwrap();
        assert_eq!(backend.write_count(), before + 1);
    }
}

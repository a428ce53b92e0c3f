//! The session contract.
//!
//! A [`DocStoreSession`] is a per-user connection to a document store
//! backend. It may have one (store, version) pair open, carries a
//! translation mode and a transaction flag, and exposes the node tree of the
//! open version through id-based accessors.
//!
//! Backends implement the required methods. The provided methods build the
//! version life cycle, image renditions, UUIDs, content locks and the
//! translation-mode scoped accessors on top of them, so every backend shares
//! the same rules.
//!
//! # Language scoping
//!
//! Accessors with a `lang` parameter read or write exactly that variant
//! (`None` is the original language) and never fall back. Accessors without
//! one follow the session's translation mode and fall back to the original
//! value when the translation has none.

mod guard;

pub use guard::{LocalTransaction, TranslationScope};

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::event::DocListener;
use crate::lock::{Lock, LockListener};
use crate::manager::SharedStore;
use crate::progress::{check_cancelled, ProgressCallback};
use crate::properties::{
    self, ImageRendition, PROP_RENDITION_NAMES, PROP_STORE_UUID, PROP_VERSION_CREATION_DATE,
    PROP_VERSION_UUID,
};
use crate::types::{
    now_millis, HistoryEntry, NodeId, NodeKind, PropertyUpdate, Timestamp, VersionAddress,
    VersionId, VersionState,
};
use crate::uuid_registry::{
    store_uuid_from_seed, version_uuid_from_seed, UuidRegistry, UuidTarget,
};

/// A connection to a document store backend.
///
/// # Invariants
///
/// - A node has at most one parent group; inserting a node that already has
///   a parent moves it.
/// - Aliases are unique within the open version.
/// - Node ids are stable across the versions of a store.
/// - `start_transaction` fails while a transaction is running, `commit` and
///   `rollback` require one.
pub trait DocStoreSession {
    // ---------------------------------------------------------------
    // Identity
    // ---------------------------------------------------------------

    /// Session id assigned by the store manager.
    fn session_id(&self) -> &str;

    /// User owning the session.
    fn user_id(&self) -> &str;

    /// Store of the open version, if any.
    fn store_id(&self) -> Option<&str>;

    /// Open version, if any.
    fn version_id(&self) -> Option<&VersionId>;

    /// Opens `version` of `store_id`, closing any previously open version.
    ///
    /// # Errors
    ///
    /// Fails if the store or version does not exist.
    fn open_doc_store(&mut self, store_id: &str, version: &VersionId) -> CoreResult<()>;

    /// Closes the open version. A running transaction is rolled back.
    ///
    /// # Errors
    ///
    /// Returns `NoStoreOpen` if nothing is open.
    fn close_doc_store(&mut self) -> CoreResult<()>;

    /// The shared object of the open version.
    ///
    /// # Errors
    ///
    /// Returns `NoStoreOpen` if nothing is open.
    fn shared_store(&self) -> CoreResult<Arc<SharedStore>>;

    /// The process-wide UUID registry.
    fn uuid_registry(&self) -> Arc<UuidRegistry>;

    // ---------------------------------------------------------------
    // Stores
    // ---------------------------------------------------------------

    /// Ids of all stores, sorted.
    fn list_doc_stores(&self) -> Vec<String>;

    /// Hint that commits in this store are expensive and should be split.
    fn is_db_store(&self, store_id: &str) -> bool;

    /// Creates a store with initial properties.
    ///
    /// # Errors
    ///
    /// Returns `StoreExists` if the id is taken.
    fn create_doc_store(&mut self, store_id: &str, properties: &[PropertyUpdate]) -> CoreResult<()>;

    /// Deletes a store with all its versions.
    ///
    /// # Errors
    ///
    /// Fails while other sessions have a version of the store open.
    fn delete_doc_store(&mut self, store_id: &str) -> CoreResult<()>;

    /// Reads a store property, internal ones included.
    fn doc_store_property(&self, store_id: &str, name: &str) -> Option<String>;

    /// Writes store properties; `None` removes the property.
    ///
    /// # Errors
    ///
    /// Returns `StoreNotFound` if the store does not exist.
    fn set_doc_store_properties(&mut self, store_id: &str, properties: &[PropertyUpdate]) -> CoreResult<()>;

    /// All store property names, internal ones included.
    ///
    /// # Errors
    ///
    /// Returns `StoreNotFound` if the store does not exist.
    fn all_doc_store_property_names(&self, store_id: &str) -> CoreResult<Vec<String>>;

    // ---------------------------------------------------------------
    // Versions
    // ---------------------------------------------------------------

    /// All versions of the store in ascending order.
    ///
    /// # Errors
    ///
    /// Returns `StoreNotFound` if the store does not exist.
    fn list_versions(&self, store_id: &str) -> CoreResult<Vec<VersionId>>;

    /// Base version `version` was derived from.
    ///
    /// # Errors
    ///
    /// Fails if the store or version does not exist.
    fn version_derived_from(&self, store_id: &str, version: &VersionId) -> CoreResult<Option<VersionId>>;

    /// Creates `new_version`, derived from `base` if given.
    ///
    /// A derived version starts as a copy of the base's node tree and user
    /// properties. Implementations call [`DocStoreSession::check_create_version`].
    ///
    /// # Errors
    ///
    /// Fails if the base is not released, the new id is not higher than the
    /// base, or the version exists.
    fn create_version(&mut self, store_id: &str, base: Option<&VersionId>, new_version: &VersionId) -> CoreResult<()>;

    /// Deletes a version.
    ///
    /// # Errors
    ///
    /// Fails while versions are derived from it or other sessions have it open.
    fn delete_version(&mut self, store_id: &str, version: &VersionId) -> CoreResult<()>;

    /// Reads a version property, internal ones included.
    fn version_property(&self, store_id: &str, version: &VersionId, name: &str) -> Option<String>;

    /// Writes version properties; `None` removes the property.
    ///
    /// # Errors
    ///
    /// Fails if the store or version does not exist.
    fn set_version_properties(&mut self, store_id: &str, version: &VersionId, properties: &[PropertyUpdate]) -> CoreResult<()>;

    /// All version property names, internal ones included.
    ///
    /// # Errors
    ///
    /// Fails if the store or version does not exist.
    fn all_version_property_names(&self, store_id: &str, version: &VersionId) -> CoreResult<Vec<String>>;

    /// Backend hook run when a translation is released.
    ///
    /// # Errors
    ///
    /// Backend specific.
    fn on_release_translation(&mut self, store_id: &str, version: &VersionId, lang: &str) -> CoreResult<()>;

    /// Backend hook run when the base translation of `version` is unreleased.
    ///
    /// # Errors
    ///
    /// Backend specific.
    fn set_translation_back_to_pending(&mut self, store_id: &str, version: &VersionId, lang: &str) -> CoreResult<()>;

    // ---------------------------------------------------------------
    // Translation mode, transactions, listeners
    // ---------------------------------------------------------------

    /// Current translation language; `None` is the original language.
    fn translation_mode(&self) -> Option<&str>;

    /// Switches scoped accessors to `lang`.
    fn enter_translation_mode(&mut self, lang: &str);

    /// Switches scoped accessors back to the original language.
    fn leave_translation_mode(&mut self);

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Fails if no store is open or a transaction is already running.
    fn start_transaction(&mut self) -> CoreResult<()>;

    /// Commits the running transaction and flushes queued events.
    ///
    /// # Errors
    ///
    /// Fails if no transaction is running.
    fn commit_transaction(&mut self) -> CoreResult<()>;

    /// Discards the running transaction and its queued events.
    fn rollback_transaction(&mut self);

    /// Returns true while a transaction is running.
    fn running_transaction(&self) -> bool;

    /// Registers a structural change listener for this session.
    fn add_doc_listener(&mut self, listener: Arc<dyn DocListener>);

    /// Unregisters a structural change listener.
    fn remove_doc_listener(&mut self, listener: &Arc<dyn DocListener>) -> bool;

    /// Registers a lock listener for this session.
    fn add_lock_listener(&mut self, listener: Arc<dyn LockListener>);

    /// Unregisters a lock listener.
    fn remove_lock_listener(&mut self, listener: &Arc<dyn LockListener>) -> bool;

    // ---------------------------------------------------------------
    // Node tree of the open version
    // ---------------------------------------------------------------

    /// Root group of the open version.
    ///
    /// # Errors
    ///
    /// Returns `NoStoreOpen` if nothing is open.
    fn root(&self) -> CoreResult<NodeId>;

    /// Kind of the node, or `None` if it does not exist.
    fn node_kind(&self, id: &NodeId) -> Option<NodeKind>;

    /// Node carrying `alias`.
    fn node_id_by_alias(&self, alias: &str) -> Option<NodeId>;

    /// Creates a detached node. With `id` given the node gets exactly that id.
    ///
    /// # Errors
    ///
    /// Returns `NodeIdInUse` if `id` is taken.
    fn create_node(&mut self, kind: NodeKind, id: Option<&NodeId>) -> CoreResult<NodeId>;

    /// Parent group of the node.
    fn parent_group(&self, id: &NodeId) -> Option<NodeId>;

    /// Children of a group in order.
    ///
    /// # Errors
    ///
    /// Fails if `group` is not an existing group.
    fn child_nodes(&self, group: &NodeId) -> CoreResult<Vec<NodeId>>;

    /// Inserts `child` into `group` before `reference`, or appends it.
    ///
    /// A child that already has a parent is moved.
    ///
    /// # Errors
    ///
    /// Fails if a node is missing, `reference` is not a child of `group`,
    /// or the move would create a cycle.
    fn insert_before(&mut self, group: &NodeId, child: &NodeId, reference: Option<&NodeId>) -> CoreResult<()>;

    /// Removes `child` from `group`. The child and its descendants are
    /// destroyed when the removal is committed.
    ///
    /// # Errors
    ///
    /// Fails if `child` is not a child of `group`.
    fn remove_child(&mut self, group: &NodeId, child: &NodeId) -> CoreResult<()>;

    /// Aliases of the node in order.
    fn aliases(&self, id: &NodeId) -> Vec<String>;

    /// Replaces the aliases of the node.
    ///
    /// # Errors
    ///
    /// Fails for malformed aliases or aliases held by another node.
    fn set_aliases(&mut self, id: &NodeId, aliases: &[String]) -> CoreResult<()>;

    /// Title variant for `lang`.
    fn title_lang(&self, id: &NodeId, lang: Option<&str>) -> Option<String>;

    /// Writes the title variant for `lang`; `None` removes it.
    ///
    /// # Errors
    ///
    /// Fails if the node does not exist.
    fn set_title(&mut self, id: &NodeId, title: Option<&str>, lang: Option<&str>) -> CoreResult<()>;

    /// Attribute variants for `lang`.
    fn attributes_lang(&self, id: &NodeId, lang: Option<&str>) -> BTreeMap<String, String>;

    /// Writes one attribute variant. Removing an original attribute also
    /// removes its translations.
    ///
    /// # Errors
    ///
    /// Fails if the node does not exist.
    fn set_attribute(&mut self, id: &NodeId, name: &str, value: Option<&str>, lang: Option<&str>) -> CoreResult<()>;

    /// Languages with at least one translated field, sorted.
    fn translations(&self, id: &NodeId) -> Vec<String>;

    /// Removes every translated field of `lang`.
    ///
    /// # Errors
    ///
    /// Fails if the node does not exist.
    fn delete_translation(&mut self, id: &NodeId, lang: &str) -> CoreResult<()>;

    /// Target alias of a reference node.
    fn target_alias(&self, id: &NodeId) -> Option<String>;

    /// Writes the target alias of a reference node.
    ///
    /// # Errors
    ///
    /// Fails if the node is not a reference node.
    fn set_target_alias(&mut self, id: &NodeId, alias: Option<&str>) -> CoreResult<()>;

    /// Content type variant for `lang`.
    fn content_type_lang(&self, id: &NodeId, lang: Option<&str>) -> Option<String>;

    /// Writes the content type variant for `lang`.
    ///
    /// # Errors
    ///
    /// Fails if the node is not a content node.
    fn set_content_type(&mut self, id: &NodeId, value: Option<&str>, lang: Option<&str>) -> CoreResult<()>;

    /// File extension variant for `lang`.
    fn file_extension_lang(&self, id: &NodeId, lang: Option<&str>) -> Option<String>;

    /// Writes the file extension variant for `lang`.
    ///
    /// # Errors
    ///
    /// Fails if the node is not a content node.
    fn set_file_extension(&mut self, id: &NodeId, value: Option<&str>, lang: Option<&str>) -> CoreResult<()>;

    /// Returns true if content exists for exactly `lang`.
    fn has_content(&self, id: &NodeId, lang: Option<&str>) -> bool;

    /// Reader over the content variant for `lang`.
    ///
    /// # Errors
    ///
    /// Fails if the node is not a content node.
    fn content_reader(&self, id: &NodeId, lang: Option<&str>) -> CoreResult<Option<Box<dyn Read>>>;

    /// Length of the content variant for `lang`; zero if absent.
    fn content_length_lang(&self, id: &NodeId, lang: Option<&str>) -> u64;

    /// Replaces the content variant for `lang` with everything `content`
    /// yields and records a history entry.
    ///
    /// # Errors
    ///
    /// Fails if the node is not a content node or reading fails.
    fn set_content(&mut self, id: &NodeId, lang: Option<&str>, content: &mut dyn Read) -> CoreResult<()>;

    /// Removes the content variant for `lang`.
    ///
    /// # Errors
    ///
    /// Fails if the node is not a content node.
    fn delete_content(&mut self, id: &NodeId, lang: Option<&str>) -> CoreResult<()>;

    /// Write history of a content node, oldest first.
    fn content_history(&self, id: &NodeId) -> Vec<HistoryEntry>;

    // ---------------------------------------------------------------
    // Provided: node helpers and scoped accessors
    // ---------------------------------------------------------------

    /// Returns true if a node with this id exists in the open version.
    fn node_id_exists(&self, id: &NodeId) -> bool {
        self.node_kind(id).is_some()
    }

    /// First alias of the node.
    fn alias(&self, id: &NodeId) -> Option<String> {
        self.aliases(id).into_iter().next()
    }

    /// Appends `child` to `group`, moving it if it has a parent.
    ///
    /// # Errors
    ///
    /// See [`DocStoreSession::insert_before`].
    fn append_child(&mut self, group: &NodeId, child: &NodeId) -> CoreResult<()> {
        self.insert_before(group, child, None)
    }

    /// Position of `child` within `group`.
    ///
    /// # Errors
    ///
    /// Fails if `group` is not a group.
    fn child_position(&self, group: &NodeId, child: &NodeId) -> CoreResult<Option<usize>> {
        Ok(self.child_nodes(group)?.iter().position(|c| c == child))
    }

    /// Title in the current translation mode, falling back to the original.
    fn title(&self, id: &NodeId) -> Option<String> {
        self.translation_mode()
            .and_then(|lang| self.title_lang(id, Some(lang)))
            .or_else(|| self.title_lang(id, None))
    }

    /// Names of the node's original attributes.
    fn attribute_names(&self, id: &NodeId) -> Vec<String> {
        self.attributes_lang(id, None).into_keys().collect()
    }

    /// Attributes in the current translation mode.
    ///
    /// Every original attribute is reported with its translated value if one
    /// exists, else with the original value.
    fn attributes(&self, id: &NodeId) -> BTreeMap<String, String> {
        let mut attributes = self.attributes_lang(id, None);
        if let Some(lang) = self.translation_mode() {
            let translated = self.attributes_lang(id, Some(lang));
            for (name, value) in attributes.iter_mut() {
                if let Some(t) = translated.get(name) {
                    value.clone_from(t);
                }
            }
        }
        attributes
    }

    /// One attribute in the current translation mode.
    fn attribute(&self, id: &NodeId, name: &str) -> Option<String> {
        self.attributes(id).remove(name)
    }

    /// Returns true if the node has any translated field for `lang`.
    fn has_translation(&self, id: &NodeId, lang: &str) -> bool {
        self.translations(id).iter().any(|l| l == lang)
    }

    /// Content type in the current translation mode.
    fn content_type(&self, id: &NodeId) -> Option<String> {
        self.translation_mode()
            .and_then(|lang| self.content_type_lang(id, Some(lang)))
            .or_else(|| self.content_type_lang(id, None))
    }

    /// File extension in the current translation mode.
    fn file_extension(&self, id: &NodeId) -> Option<String> {
        self.translation_mode()
            .and_then(|lang| self.file_extension_lang(id, Some(lang)))
            .or_else(|| self.file_extension_lang(id, None))
    }

    /// Content reader in the current translation mode.
    ///
    /// # Errors
    ///
    /// Fails if the node is not a content node.
    fn content_stream(&self, id: &NodeId) -> CoreResult<Option<Box<dyn Read>>> {
        match self.translation_mode() {
            Some(lang) if self.has_content(id, Some(lang)) => self.content_reader(id, Some(lang)),
            _ => self.content_reader(id, None),
        }
    }

    /// Content length in the current translation mode.
    fn content_length(&self, id: &NodeId) -> u64 {
        match self.translation_mode() {
            Some(lang) if self.has_content(id, Some(lang)) => self.content_length_lang(id, Some(lang)),
            _ => self.content_length_lang(id, None),
        }
    }

    /// Writes content for the current translation mode.
    ///
    /// # Errors
    ///
    /// See [`DocStoreSession::set_content`].
    fn set_content_stream(&mut self, id: &NodeId, content: &mut dyn Read) -> CoreResult<()> {
        let lang = self.translation_mode().map(str::to_owned);
        self.set_content(id, lang.as_deref(), content)
    }

    /// Reads the whole content variant for `lang`.
    ///
    /// # Errors
    ///
    /// Fails if the node is not a content node or reading fails.
    fn content_bytes(&self, id: &NodeId, lang: Option<&str>) -> CoreResult<Option<Vec<u8>>> {
        match self.content_reader(id, lang)? {
            Some(mut reader) => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    /// Replaces the content variant for `lang` with `bytes`.
    ///
    /// # Errors
    ///
    /// See [`DocStoreSession::set_content`].
    fn set_content_bytes(&mut self, id: &NodeId, lang: Option<&str>, bytes: &[u8]) -> CoreResult<()> {
        let mut reader = bytes;
        self.set_content(id, lang, &mut reader)
    }

    // ---------------------------------------------------------------
    // Provided: content locks
    // ---------------------------------------------------------------

    /// Acquires a named advisory lock on a content node for the session user.
    ///
    /// # Errors
    ///
    /// Fails if nothing is open or the node is not a content node.
    fn set_content_lock(&self, id: &NodeId, lock_name: &str, timeout: Duration) -> CoreResult<bool> {
        self.require_content(id)?;
        Ok(self
            .shared_store()?
            .locks()
            .set_lock(id.as_str(), lock_name, self.user_id(), timeout))
    }

    /// Extends a named lock on a content node.
    ///
    /// # Errors
    ///
    /// Fails if nothing is open or the node is not a content node.
    fn refresh_content_lock(&self, id: &NodeId, lock_name: &str, timeout: Duration) -> CoreResult<bool> {
        self.require_content(id)?;
        Ok(self
            .shared_store()?
            .locks()
            .refresh_lock(id.as_str(), lock_name, timeout))
    }

    /// Reads a named lock on a content node.
    ///
    /// # Errors
    ///
    /// Fails if nothing is open or the node is not a content node.
    fn content_lock(&self, id: &NodeId, lock_name: &str) -> CoreResult<Option<Lock>> {
        self.require_content(id)?;
        Ok(self.shared_store()?.locks().get_lock(id.as_str(), lock_name))
    }

    /// Removes a named lock on a content node.
    ///
    /// # Errors
    ///
    /// Fails if nothing is open or the node is not a content node.
    fn remove_content_lock(&self, id: &NodeId, lock_name: &str) -> CoreResult<Option<Lock>> {
        self.require_content(id)?;
        Ok(self.shared_store()?.locks().remove_lock(id.as_str(), lock_name))
    }

    /// Fails unless `id` is an existing content node.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` or `InvalidOperation`.
    fn require_content(&self, id: &NodeId) -> CoreResult<NodeKind> {
        match self.node_kind(id) {
            Some(kind) if kind.is_content() => Ok(kind),
            Some(kind) => Err(CoreError::invalid_operation(format!(
                "node {id} is a {kind}, not a content node"
            ))),
            None => Err(CoreError::node_not_found(id)),
        }
    }

    // ---------------------------------------------------------------
    // Provided: properties
    // ---------------------------------------------------------------

    /// User-visible store property names.
    ///
    /// # Errors
    ///
    /// Returns `StoreNotFound` if the store does not exist.
    fn doc_store_property_names(&self, store_id: &str) -> CoreResult<Vec<String>> {
        let mut names = self.all_doc_store_property_names(store_id)?;
        names.retain(|n| !properties::is_internal_store_property(n));
        Ok(names)
    }

    /// Writes a single store property.
    ///
    /// # Errors
    ///
    /// Returns `StoreNotFound` if the store does not exist.
    fn set_doc_store_property(&mut self, store_id: &str, name: &str, value: Option<&str>) -> CoreResult<()> {
        self.set_doc_store_properties(store_id, &[(name.to_string(), value.map(str::to_owned))])
    }

    /// User-visible version property names.
    ///
    /// # Errors
    ///
    /// Fails if the store or version does not exist.
    fn version_property_names(&self, store_id: &str, version: &VersionId) -> CoreResult<Vec<String>> {
        let mut names = self.all_version_property_names(store_id, version)?;
        names.retain(|n| !properties::is_internal_version_property(n));
        Ok(names)
    }

    /// Writes a single version property.
    ///
    /// # Errors
    ///
    /// Fails if the store or version does not exist.
    fn set_version_property(&mut self, store_id: &str, version: &VersionId, name: &str, value: Option<&str>) -> CoreResult<()> {
        self.set_version_properties(store_id, version, &[(name.to_string(), value.map(str::to_owned))])
    }

    // ---------------------------------------------------------------
    // Provided: version forest and life cycle
    // ---------------------------------------------------------------

    /// Versions without a base, ascending.
    ///
    /// # Errors
    ///
    /// Returns `StoreNotFound` if the store does not exist.
    fn root_versions(&self, store_id: &str) -> CoreResult<Vec<VersionId>> {
        let mut roots = Vec::new();
        for version in self.list_versions(store_id)? {
            if self.version_derived_from(store_id, &version)?.is_none() {
                roots.push(version);
            }
        }
        Ok(roots)
    }

    /// Versions directly derived from `version`, ascending.
    ///
    /// # Errors
    ///
    /// Returns `StoreNotFound` if the store does not exist.
    fn sub_versions(&self, store_id: &str, version: &VersionId) -> CoreResult<Vec<VersionId>> {
        let mut subs = Vec::new();
        for candidate in self.list_versions(store_id)? {
            if self.version_derived_from(store_id, &candidate)?.as_ref() == Some(version) {
                subs.push(candidate);
            }
        }
        Ok(subs)
    }

    /// Validates a version creation request.
    ///
    /// # Errors
    ///
    /// Fails if the version exists, the base is missing or not released, or
    /// the new id is not higher than the base.
    fn check_create_version(&self, store_id: &str, base: Option<&VersionId>, new_version: &VersionId) -> CoreResult<()> {
        let versions = self.list_versions(store_id)?;
        if versions.contains(new_version) {
            return Err(CoreError::VersionExists {
                store_id: store_id.to_string(),
                version: new_version.clone(),
            });
        }
        if let Some(base) = base {
            if !versions.contains(base) {
                return Err(CoreError::version_not_found(store_id, base));
            }
            if self.version_state_in(store_id, base, None)? != VersionState::Released {
                return Err(CoreError::invalid_transition(format!(
                    "base version {base} must be released before deriving {new_version}"
                )));
            }
            if !new_version.is_higher_than(base) {
                return Err(CoreError::invalid_operation(format!(
                    "version {new_version} must be higher than its base {base}"
                )));
            }
        }
        Ok(())
    }

    /// Deletes `version` after deleting every version derived from it.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the progress sink is cancelled, or the first
    /// deletion error.
    fn delete_versions_recursive(&mut self, store_id: &str, version: &VersionId, progress: Option<&dyn ProgressCallback>) -> CoreResult<()> {
        check_cancelled(progress)?;
        for sub in self.sub_versions(store_id, version)? {
            self.delete_versions_recursive(store_id, &sub, progress)?;
        }
        self.delete_version(store_id, version)
    }

    /// Deletes every version of the store.
    ///
    /// # Errors
    ///
    /// See [`DocStoreSession::delete_versions_recursive`].
    fn delete_all_versions(&mut self, store_id: &str, progress: Option<&dyn ProgressCallback>) -> CoreResult<()> {
        for root in self.root_versions(store_id)? {
            self.delete_versions_recursive(store_id, &root, progress)?;
        }
        Ok(())
    }

    /// Creation date of the version.
    fn version_creation_date(&self, store_id: &str, version: &VersionId) -> Option<Timestamp> {
        self.version_property(store_id, version, PROP_VERSION_CREATION_DATE)
            .and_then(|v| v.trim().parse().ok())
    }

    /// Sets the creation date of the version.
    ///
    /// # Errors
    ///
    /// Fails if the store or version does not exist.
    fn set_version_creation_date(&mut self, store_id: &str, version: &VersionId, date: Timestamp) -> CoreResult<()> {
        self.set_version_property(store_id, version, PROP_VERSION_CREATION_DATE, Some(&date.to_string()))
    }

    /// Release date of the version for `lang`.
    fn version_release_date_in(&self, store_id: &str, version: &VersionId, lang: Option<&str>) -> Option<Timestamp> {
        self.version_property(store_id, version, &properties::release_date_key(lang))
            .and_then(|v| v.trim().parse().ok())
    }

    /// Sets or clears the release date of the version for `lang`.
    ///
    /// # Errors
    ///
    /// Fails if the store or version does not exist.
    fn set_version_release_date_in(&mut self, store_id: &str, version: &VersionId, lang: Option<&str>, date: Option<Timestamp>) -> CoreResult<()> {
        let value = date.map(|d| d.to_string());
        self.set_version_property(store_id, version, &properties::release_date_key(lang), value.as_deref())
    }

    /// Release date in the current translation mode.
    fn version_release_date(&self, store_id: &str, version: &VersionId) -> Option<Timestamp> {
        self.version_release_date_in(store_id, version, self.translation_mode())
    }

    /// State of the version for `lang`.
    ///
    /// An unset state reads as `Draft`. An unset translation state of a
    /// derived version reads as `TranslationPending` unless the base
    /// version has released that language.
    ///
    /// # Errors
    ///
    /// Fails if the version lineage cannot be read or a stored state is
    /// malformed.
    fn version_state_in(&self, store_id: &str, version: &VersionId, lang: Option<&str>) -> CoreResult<VersionState> {
        let key = properties::version_state_key(lang);
        if let Some(value) = self.version_property(store_id, version, &key) {
            if !value.trim().is_empty() {
                return value.parse();
            }
        }
        if lang.is_some() {
            if let Some(base) = self.version_derived_from(store_id, version)? {
                let base_state = self.version_property(store_id, &base, &key);
                let base_released = base_state
                    .and_then(|s| s.parse::<VersionState>().ok())
                    .is_some_and(|s| s == VersionState::Released);
                if !base_released {
                    return Ok(VersionState::TranslationPending);
                }
            }
        }
        Ok(VersionState::Draft)
    }

    /// State of the version in the current translation mode.
    ///
    /// # Errors
    ///
    /// See [`DocStoreSession::version_state_in`].
    fn version_state(&self, store_id: &str, version: &VersionId) -> CoreResult<VersionState> {
        self.version_state_in(store_id, version, self.translation_mode())
    }

    /// Moves the version to `new_state` for `lang`.
    ///
    /// Releasing sets the release date, unreleasing clears it. Releasing a
    /// translation runs [`DocStoreSession::on_release_translation`].
    /// Unreleasing a translation sends every derived version's translation
    /// back to pending.
    ///
    /// # Errors
    ///
    /// Fails for pending translations, for `TranslationPending` as target,
    /// when unreleasing an original that has derived versions, and when
    /// unreleasing a translation that a derived version has released.
    fn set_version_state_in(&mut self, store_id: &str, version: &VersionId, lang: Option<&str>, new_state: VersionState) -> CoreResult<()> {
        let old_state = self.version_state_in(store_id, version, lang)?;
        if old_state == new_state {
            return Ok(());
        }
        if old_state == VersionState::TranslationPending {
            return Err(CoreError::invalid_transition(format!(
                "cannot change state of pending translation {} of version {version}",
                lang.unwrap_or_default()
            )));
        }
        if new_state == VersionState::TranslationPending {
            return Err(CoreError::invalid_transition(
                "translation pending cannot be assigned directly",
            ));
        }

        if let Some(lang) = lang {
            if old_state == VersionState::Draft && new_state == VersionState::Released {
                self.on_release_translation(store_id, version, lang)?;
            }
        }

        if old_state == VersionState::Released && new_state == VersionState::Draft {
            let subs = self.sub_versions(store_id, version)?;
            match lang {
                None => {
                    if !subs.is_empty() {
                        return Err(CoreError::invalid_transition(
                            "Cannot unrelease version. Another version is derived from this version.",
                        ));
                    }
                }
                Some(lang) => {
                    for sub in &subs {
                        if self.version_state_in(store_id, sub, Some(lang))? == VersionState::Released {
                            return Err(CoreError::invalid_transition(format!(
                                "Cannot unrelease translation {lang}. Derived version {sub} is released."
                            )));
                        }
                    }
                    for sub in &subs {
                        self.set_translation_back_to_pending(store_id, sub, lang)?;
                    }
                }
            }
        }

        let release_date = (new_state == VersionState::Released).then(now_millis);
        self.set_version_properties(
            store_id,
            version,
            &[
                (
                    properties::version_state_key(lang),
                    Some(new_state.as_str().to_string()),
                ),
                (
                    properties::release_date_key(lang),
                    release_date.map(|d| d.to_string()),
                ),
            ],
        )?;
        tracing::debug!(store = store_id, %version, lang = ?lang, state = %new_state, "version state changed");
        Ok(())
    }

    /// Moves the version to `new_state` in the current translation mode.
    ///
    /// # Errors
    ///
    /// See [`DocStoreSession::set_version_state_in`].
    fn set_version_state(&mut self, store_id: &str, version: &VersionId, new_state: VersionState) -> CoreResult<()> {
        let lang = self.translation_mode().map(str::to_owned);
        self.set_version_state_in(store_id, version, lang.as_deref(), new_state)
    }

    // ---------------------------------------------------------------
    // Provided: image renditions of the open store
    // ---------------------------------------------------------------

    /// Rendition definitions of the open store, sorted by name.
    ///
    /// # Errors
    ///
    /// Fails if nothing is open or a definition is malformed.
    fn image_renditions(&self) -> CoreResult<Vec<ImageRendition>> {
        let store_id = self.store_id().ok_or(CoreError::NoStoreOpen)?;
        let names = properties::parse_name_list(
            self.doc_store_property(store_id, PROP_RENDITION_NAMES).as_deref(),
        );
        let mut renditions = Vec::with_capacity(names.len());
        for name in names {
            if let Some(rendition) = self.image_rendition(&name)? {
                renditions.push(rendition);
            }
        }
        Ok(renditions)
    }

    /// Rendition definition by name.
    ///
    /// # Errors
    ///
    /// Fails if nothing is open or the definition is malformed.
    fn image_rendition(&self, name: &str) -> CoreResult<Option<ImageRendition>> {
        let store_id = self.store_id().ok_or(CoreError::NoStoreOpen)?;
        let Some(format) = self.doc_store_property(store_id, &ImageRendition::format_key(name)) else {
            return Ok(None);
        };
        let dimension = |key: String| -> CoreResult<u32> {
            self.doc_store_property(store_id, &key)
                .map_or(Ok(0), |v| {
                    v.trim().parse().map_err(|_| {
                        CoreError::rendition(format!("malformed dimension {key} = {v:?}"))
                    })
                })
        };
        let rendition = ImageRendition::new(
            name,
            format.parse()?,
            dimension(ImageRendition::max_width_key(name))?,
            dimension(ImageRendition::max_height_key(name))?,
        )?;
        Ok(Some(rendition))
    }

    /// Registers a rendition definition on the open store.
    ///
    /// # Errors
    ///
    /// Fails if nothing is open or the name is already registered.
    fn add_image_rendition(&mut self, rendition: &ImageRendition) -> CoreResult<()> {
        let store_id = self.store_id().ok_or(CoreError::NoStoreOpen)?.to_string();
        let mut names = properties::parse_name_list(
            self.doc_store_property(&store_id, PROP_RENDITION_NAMES).as_deref(),
        );
        if names.iter().any(|n| n == rendition.name()) {
            return Err(CoreError::rendition(format!(
                "image rendition {} already exists",
                rendition.name()
            )));
        }
        names.push(rendition.name().to_string());
        names.sort();
        let name = rendition.name();
        self.set_doc_store_properties(
            &store_id,
            &[
                (PROP_RENDITION_NAMES.to_string(), Some(names.join(","))),
                (ImageRendition::format_key(name), Some(rendition.format().to_string())),
                (ImageRendition::max_width_key(name), Some(rendition.max_width().to_string())),
                (ImageRendition::max_height_key(name), Some(rendition.max_height().to_string())),
            ],
        )
    }

    /// Removes a rendition definition. Returns false if it was not registered.
    ///
    /// # Errors
    ///
    /// Fails if nothing is open.
    fn delete_image_rendition(&mut self, name: &str) -> CoreResult<bool> {
        let store_id = self.store_id().ok_or(CoreError::NoStoreOpen)?.to_string();
        let mut names = properties::parse_name_list(
            self.doc_store_property(&store_id, PROP_RENDITION_NAMES).as_deref(),
        );
        let before = names.len();
        names.retain(|n| n != name);
        if names.len() == before {
            return Ok(false);
        }
        let joined = (!names.is_empty()).then(|| names.join(","));
        self.set_doc_store_properties(
            &store_id,
            &[
                (PROP_RENDITION_NAMES.to_string(), joined),
                (ImageRendition::format_key(name), None),
                (ImageRendition::max_width_key(name), None),
                (ImageRendition::max_height_key(name), None),
            ],
        )?;
        Ok(true)
    }

    // ---------------------------------------------------------------
    // Provided: UUIDs
    // ---------------------------------------------------------------

    /// UUID of the store, assigned on first request.
    ///
    /// # Errors
    ///
    /// Fails if the store does not exist or the stored UUID is malformed.
    fn doc_store_uuid(&mut self, store_id: &str) -> CoreResult<Uuid> {
        if let Some(value) = self.doc_store_property(store_id, PROP_STORE_UUID) {
            return parse_uuid(&value);
        }
        let uuid = store_uuid_from_seed(store_id, now_millis());
        self.set_doc_store_property(store_id, PROP_STORE_UUID, Some(&uuid.to_string()))?;
        self.uuid_registry()
            .register(uuid, UuidTarget::Store(store_id.to_string()))?;
        Ok(uuid)
    }

    /// Assigns an explicit UUID to a store that has none.
    ///
    /// # Errors
    ///
    /// Fails if the store already has a UUID or the UUID belongs elsewhere.
    fn set_doc_store_uuid(&mut self, store_id: &str, uuid: Uuid) -> CoreResult<()> {
        if self.doc_store_property(store_id, PROP_STORE_UUID).is_some() {
            return Err(CoreError::uuid(format!("store {store_id} already has a UUID")));
        }
        self.uuid_registry()
            .register(uuid, UuidTarget::Store(store_id.to_string()))?;
        self.set_doc_store_property(store_id, PROP_STORE_UUID, Some(&uuid.to_string()))
    }

    /// UUID of the version, assigned on first request.
    ///
    /// # Errors
    ///
    /// Fails if the version does not exist or the stored UUID is malformed.
    fn version_uuid(&mut self, store_id: &str, version: &VersionId) -> CoreResult<Uuid> {
        if let Some(value) = self.version_property(store_id, version, PROP_VERSION_UUID) {
            return parse_uuid(&value);
        }
        let uuid = version_uuid_from_seed(store_id, version, now_millis());
        self.set_version_property(store_id, version, PROP_VERSION_UUID, Some(&uuid.to_string()))?;
        self.uuid_registry().register(
            uuid,
            UuidTarget::Version(VersionAddress::new(store_id, version.clone())),
        )?;
        Ok(uuid)
    }

    /// Assigns an explicit UUID to a version that has none.
    ///
    /// # Errors
    ///
    /// Fails if the version already has a UUID or the UUID belongs elsewhere.
    fn set_version_uuid(&mut self, store_id: &str, version: &VersionId, uuid: Uuid) -> CoreResult<()> {
        if self.version_property(store_id, version, PROP_VERSION_UUID).is_some() {
            return Err(CoreError::uuid(format!(
                "version {version} of store {store_id} already has a UUID"
            )));
        }
        self.uuid_registry().register(
            uuid,
            UuidTarget::Version(VersionAddress::new(store_id, version.clone())),
        )?;
        self.set_version_property(store_id, version, PROP_VERSION_UUID, Some(&uuid.to_string()))
    }

    /// Store identified by `uuid`. The first lookup scans every store.
    fn doc_store_id_by_uuid(&mut self, uuid: &Uuid) -> Option<String> {
        match self.lookup_uuid(uuid) {
            Some(UuidTarget::Store(store_id)) => Some(store_id),
            _ => None,
        }
    }

    /// Version identified by `uuid`. The first lookup scans every store.
    fn version_address_by_uuid(&mut self, uuid: &Uuid) -> Option<VersionAddress> {
        match self.lookup_uuid(uuid) {
            Some(UuidTarget::Version(address)) => Some(address),
            _ => None,
        }
    }

    /// Looks up a UUID, building the registry on first use.
    fn lookup_uuid(&mut self, uuid: &Uuid) -> Option<UuidTarget> {
        let registry = self.uuid_registry();
        if !registry.is_built() {
            let scanned = self.scan_uuids();
            registry.install(scanned);
        }
        registry.lookup(uuid)
    }

    /// Reads (and assigns where missing) the UUID of every store and version.
    ///
    /// Failures are logged and skipped.
    fn scan_uuids(&mut self) -> HashMap<Uuid, UuidTarget> {
        let mut scanned = HashMap::new();
        for store_id in self.list_doc_stores() {
            match self.doc_store_uuid(&store_id) {
                Ok(uuid) => {
                    scanned.insert(uuid, UuidTarget::Store(store_id.clone()));
                }
                Err(e) => tracing::error!(store = %store_id, error = %e, "cannot read store UUID"),
            }
            let versions = match self.list_versions(&store_id) {
                Ok(versions) => versions,
                Err(e) => {
                    tracing::error!(store = %store_id, error = %e, "cannot list versions");
                    continue;
                }
            };
            for version in versions {
                match self.version_uuid(&store_id, &version) {
                    Ok(uuid) => {
                        scanned.insert(
                            uuid,
                            UuidTarget::Version(VersionAddress::new(store_id.clone(), version)),
                        );
                    }
                    Err(e) => {
                        tracing::error!(store = %store_id, %version, error = %e, "cannot read version UUID");
                    }
                }
            }
        }
        scanned
    }
}

fn parse_uuid(value: &str) -> CoreResult<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|e| CoreError::uuid(format!("malformed UUID {value:?}: {e}")))
}

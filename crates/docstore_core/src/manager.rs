//! Session table and shared store instances.
//!
//! A [`StoreManager`] is created once per process (or per backend) and owns
//! all process-scoped registries: the connected-session table, the shared
//! per-(store, version) objects that hold the lock manager and event queue,
//! and the UUID registry. Shared stores are reference-counted by the
//! sessions that opened them and destroyed when the last one releases it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::event::EventQueue;
use crate::lock::LockManager;
use crate::types::{VersionAddress, VersionId};
use crate::uuid_registry::UuidRegistry;

/// State shared by every session that has the same (store, version) open.
pub struct SharedStore {
    address: VersionAddress,
    locks: LockManager,
    events: EventQueue,
}

impl SharedStore {
    fn new(address: VersionAddress) -> Self {
        Self {
            address,
            locks: LockManager::new(),
            events: EventQueue::new(),
        }
    }

    /// The (store, version) this object belongs to.
    pub fn address(&self) -> &VersionAddress {
        &self.address
    }

    /// Advisory locks of this store version.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Structural change events of this store version.
    pub fn events(&self) -> &EventQueue {
        &self.events
    }
}

#[derive(Debug, Clone)]
struct SessionEntry {
    user_id: String,
    open: Option<VersionAddress>,
}

#[derive(Default)]
struct ManagerState {
    next_session_id: u64,
    sessions: BTreeMap<String, SessionEntry>,
    stores: HashMap<VersionAddress, Arc<SharedStore>>,
}

impl ManagerState {
    fn is_open_elsewhere(&self, address: &VersionAddress) -> bool {
        self.sessions
            .values()
            .any(|s| s.open.as_ref() == Some(address))
    }

    fn release(&mut self, session_id: &str) {
        let Some(address) = self
            .sessions
            .get_mut(session_id)
            .and_then(|entry| entry.open.take())
        else {
            return;
        };
        if !self.is_open_elsewhere(&address) {
            self.stores.remove(&address);
            tracing::debug!(store = %address, "shared store destroyed");
        }
    }
}

/// Owner of the session table, shared stores and UUID registry.
pub struct StoreManager {
    state: Mutex<ManagerState>,
    uuids: Arc<UuidRegistry>,
}

impl StoreManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManagerState::default()),
            uuids: Arc::new(UuidRegistry::new()),
        }
    }

    /// Registers a new session for `user_id` and returns its id.
    ///
    /// Session ids are sequential.
    pub fn create_session(&self, user_id: &str) -> String {
        let mut state = self.state.lock();
        state.next_session_id += 1;
        let session_id = state.next_session_id.to_string();
        state.sessions.insert(
            session_id.clone(),
            SessionEntry {
                user_id: user_id.to_string(),
                open: None,
            },
        );
        tracing::debug!(session = %session_id, user = user_id, "session created");
        session_id
    }

    /// Unregisters a session, releasing its open store.
    pub fn close_session(&self, session_id: &str) {
        let mut state = self.state.lock();
        state.release(session_id);
        state.sessions.remove(session_id);
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Binds the session to `address`, creating the shared store on first use.
    ///
    /// A store previously opened by the session is released first.
    ///
    /// # Errors
    ///
    /// Fails if the session is not registered.
    pub fn acquire_store(
        &self,
        session_id: &str,
        address: &VersionAddress,
    ) -> CoreResult<Arc<SharedStore>> {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(session_id) {
            return Err(CoreError::invalid_operation(format!(
                "unknown session: {session_id}"
            )));
        }
        state.release(session_id);
        let store = state
            .stores
            .entry(address.clone())
            .or_insert_with(|| Arc::new(SharedStore::new(address.clone())))
            .clone();
        if let Some(entry) = state.sessions.get_mut(session_id) {
            entry.open = Some(address.clone());
        }
        Ok(store)
    }

    /// Unbinds the session from its open store.
    pub fn release_store(&self, session_id: &str) {
        self.state.lock().release(session_id);
    }

    /// Returns the shared store for `address` if any session has it open.
    pub fn shared_store(&self, address: &VersionAddress) -> Option<Arc<SharedStore>> {
        self.state.lock().stores.get(address).cloned()
    }

    /// Users connected to a store, optionally narrowed to one version.
    ///
    /// With `store_id == None` all users with any open store are returned.
    pub fn connected_users(&self, store_id: Option<&str>, version: Option<&VersionId>) -> Vec<String> {
        let state = self.state.lock();
        let users: BTreeSet<String> = state
            .sessions
            .values()
            .filter(|s| match (&s.open, store_id) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(addr), Some(store)) => {
                    addr.store_id == store && version.map_or(true, |v| addr.version == *v)
                }
            })
            .map(|s| s.user_id.clone())
            .collect();
        users.into_iter().collect()
    }

    /// Returns true if a session other than `except_session` has the store
    /// (or the given version of it) open.
    pub fn in_use_by_others(
        &self,
        except_session: &str,
        store_id: &str,
        version: Option<&VersionId>,
    ) -> bool {
        let state = self.state.lock();
        state.sessions.iter().any(|(id, s)| {
            id != except_session
                && s.open.as_ref().is_some_and(|addr| {
                    addr.store_id == store_id && version.map_or(true, |v| addr.version == *v)
                })
        })
    }

    /// Destroys the shared store for `address`.
    ///
    /// # Errors
    ///
    /// Fails while any user is connected to it.
    pub fn destroy_store_instance(&self, address: &VersionAddress) -> CoreResult<()> {
        let users = self.connected_users(Some(&address.store_id), Some(&address.version));
        if !users.is_empty() {
            return Err(CoreError::users_connected(format!(
                "cannot destroy {address}: connected users {users:?}"
            )));
        }
        self.state.lock().stores.remove(address);
        Ok(())
    }

    /// Destroys all shared stores of `store_id`.
    ///
    /// # Errors
    ///
    /// Fails while any user is connected to any version of the store.
    pub fn destroy_store_instances(&self, store_id: &str) -> CoreResult<()> {
        let users = self.connected_users(Some(store_id), None);
        if !users.is_empty() {
            return Err(CoreError::users_connected(format!(
                "cannot destroy {store_id}: connected users {users:?}"
            )));
        }
        self.state
            .lock()
            .stores
            .retain(|addr, _| addr.store_id != store_id);
        Ok(())
    }

    /// The process-wide UUID registry.
    pub fn uuid_registry(&self) -> Arc<UuidRegistry> {
        Arc::clone(&self.uuids)
    }

    /// Drops every session and shared store and forgets the UUID map.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.sessions.clear();
        state.stores.clear();
        self.uuids.reset();
        tracing::info!("store manager shut down");
    }
}

impl Default for StoreManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(store: &str, version: &str) -> VersionAddress {
        VersionAddress::new(store, VersionId::parse(version).unwrap())
    }

    #[test]
    fn session_ids_are_sequential() {
        let manager = StoreManager::new();
        assert_eq!(manager.create_session("alice"), "1");
        assert_eq!(manager.create_session("bob"), "2");
        assert_eq!(manager.session_count(), 2);
    }

    #[test]
    fn shared_store_is_reference_counted() {
        let manager = StoreManager::new();
        let s1 = manager.create_session("alice");
        let s2 = manager.create_session("bob");
        let a = addr("manual", "1.0");

        let first = manager.acquire_store(&s1, &a).unwrap();
        let second = manager.acquire_store(&s2, &a).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        manager.release_store(&s1);
        assert!(manager.shared_store(&a).is_some());
        manager.close_session(&s2);
        assert!(manager.shared_store(&a).is_none());
    }

    #[test]
    fn acquiring_another_store_releases_previous() {
        let manager = StoreManager::new();
        let s1 = manager.create_session("alice");
        manager.acquire_store(&s1, &addr("manual", "1.0")).unwrap();
        manager.acquire_store(&s1, &addr("manual", "1.1")).unwrap();
        assert!(manager.shared_store(&addr("manual", "1.0")).is_none());
        assert!(manager.shared_store(&addr("manual", "1.1")).is_some());
    }

    #[test]
    fn connected_users_filtering() {
        let manager = StoreManager::new();
        let s1 = manager.create_session("alice");
        let s2 = manager.create_session("bob");
        manager.create_session("carol");
        manager.acquire_store(&s1, &addr("manual", "1.0")).unwrap();
        manager.acquire_store(&s2, &addr("guide", "2.0")).unwrap();

        assert_eq!(manager.connected_users(None, None), vec!["alice", "bob"]);
        assert_eq!(manager.connected_users(Some("manual"), None), vec!["alice"]);
        let v11 = VersionId::parse("1.1").unwrap();
        assert!(manager.connected_users(Some("manual"), Some(&v11)).is_empty());
        assert!(manager.in_use_by_others(&s2, "manual", None));
        assert!(!manager.in_use_by_others(&s1, "manual", None));
    }

    #[test]
    fn destroy_refuses_while_connected() {
        let manager = StoreManager::new();
        let s1 = manager.create_session("alice");
        let a = addr("manual", "1.0");
        manager.acquire_store(&s1, &a).unwrap();
        assert!(matches!(
            manager.destroy_store_instance(&a),
            Err(CoreError::UsersConnected { .. })
        ));
        assert!(manager.destroy_store_instances("manual").is_err());
        manager.release_store(&s1);
        manager.destroy_store_instances("manual").unwrap();
    }

    #[test]
    fn unknown_session_cannot_acquire() {
        let manager = StoreManager::new();
        assert!(manager.acquire_store("42", &addr("manual", "1.0")).is_err());
    }
}

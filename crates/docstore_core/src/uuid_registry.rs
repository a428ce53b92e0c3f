//! Reverse lookup from UUID to store or version.
//!
//! The map is built lazily by the first lookup, which scans every store
//! once. Afterwards it is maintained by explicit registration. Registration
//! never triggers the scan: before the first lookup it is a no-op, since the
//! scan will pick the UUID up from the store properties anyway.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::types::{Timestamp, VersionAddress, VersionId};

/// What a UUID identifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UuidTarget {
    /// A store.
    Store(String),
    /// A version within a store.
    Version(VersionAddress),
}

/// Deterministic store UUID from its id and a timestamp seed.
#[must_use]
pub fn store_uuid_from_seed(store_id: &str, seed: Timestamp) -> Uuid {
    Uuid::new_v3(&Uuid::NAMESPACE_OID, format!("{store_id}_{seed}").as_bytes())
}

/// Deterministic version UUID from its address and a timestamp seed.
#[must_use]
pub fn version_uuid_from_seed(store_id: &str, version: &VersionId, seed: Timestamp) -> Uuid {
    Uuid::new_v3(
        &Uuid::NAMESPACE_OID,
        format!("{store_id}_{version}_{seed}").as_bytes(),
    )
}

/// Process-wide UUID registry, internally synchronized.
pub struct UuidRegistry {
    map: Mutex<Option<HashMap<Uuid, UuidTarget>>>,
}

impl UuidRegistry {
    /// Creates an unbuilt registry.
    pub fn new() -> Self {
        Self {
            map: Mutex::new(None),
        }
    }

    /// Returns true once the initial scan has been installed.
    pub fn is_built(&self) -> bool {
        self.map.lock().is_some()
    }

    /// Registers a UUID.
    ///
    /// # Errors
    ///
    /// Fails if the UUID is already registered for a different target.
    pub fn register(&self, uuid: Uuid, target: UuidTarget) -> CoreResult<()> {
        let mut guard = self.map.lock();
        let Some(map) = guard.as_mut() else {
            return Ok(());
        };
        match map.get(&uuid) {
            Some(existing) if *existing != target => Err(CoreError::uuid(format!(
                "Cannot reassign UUID! {uuid} is assigned to {existing:?}"
            ))),
            _ => {
                map.insert(uuid, target);
                Ok(())
            }
        }
    }

    /// Installs the result of a full scan.
    ///
    /// If another scan finished first, entries missing from the current map
    /// are added and existing ones are kept.
    pub fn install(&self, scanned: HashMap<Uuid, UuidTarget>) {
        let mut guard = self.map.lock();
        match guard.as_mut() {
            Some(map) => {
                for (uuid, target) in scanned {
                    map.entry(uuid).or_insert(target);
                }
            }
            None => *guard = Some(scanned),
        }
    }

    /// Looks up a UUID in the built map.
    pub fn lookup(&self, uuid: &Uuid) -> Option<UuidTarget> {
        self.map.lock().as_ref().and_then(|m| m.get(uuid).cloned())
    }

    /// Number of registered UUIDs; zero while unbuilt.
    pub fn len(&self) -> usize {
        self.map.lock().as_ref().map_or(0, HashMap::len)
    }

    /// Returns true if no UUID is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets the map; the next lookup rescans.
    pub fn reset(&self) {
        *self.map.lock() = None;
    }
}

impl Default for UuidRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_uuids_are_deterministic() {
        assert_eq!(store_uuid_from_seed("a", 5), store_uuid_from_seed("a", 5));
        assert_ne!(store_uuid_from_seed("a", 5), store_uuid_from_seed("a", 6));
        let v = VersionId::parse("1.0").unwrap();
        assert_ne!(version_uuid_from_seed("a", &v, 5), store_uuid_from_seed("a", 5));
    }

    #[test]
    fn register_before_build_is_noop() {
        let registry = UuidRegistry::new();
        registry
            .register(store_uuid_from_seed("a", 1), UuidTarget::Store("a".into()))
            .unwrap();
        assert!(!registry.is_built());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn register_after_build() {
        let registry = UuidRegistry::new();
        registry.install(HashMap::new());
        let uuid = store_uuid_from_seed("a", 1);
        registry.register(uuid, UuidTarget::Store("a".into())).unwrap();
        assert_eq!(registry.lookup(&uuid), Some(UuidTarget::Store("a".into())));

        // same target again is fine
        registry.register(uuid, UuidTarget::Store("a".into())).unwrap();
        let err = registry
            .register(uuid, UuidTarget::Store("b".into()))
            .unwrap_err();
        assert!(err.to_string().contains("Cannot reassign UUID"));
    }

    #[test]
    fn install_merges_into_existing() {
        let registry = UuidRegistry::new();
        let a = store_uuid_from_seed("a", 1);
        let b = store_uuid_from_seed("b", 1);
        registry.install(HashMap::from([(a, UuidTarget::Store("a".into()))]));
        registry.install(HashMap::from([
            (a, UuidTarget::Store("other".into())),
            (b, UuidTarget::Store("b".into())),
        ]));
        assert_eq!(registry.lookup(&a), Some(UuidTarget::Store("a".into())));
        assert_eq!(registry.lookup(&b), Some(UuidTarget::Store("b".into())));
        registry.reset();
        assert!(registry.lookup(&a).is_none());
    }
}

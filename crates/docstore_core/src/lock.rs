//! Advisory named locks.
//!
//! A lock is keyed by `(object_id, lock_name)` and records the owning user,
//! its creation time and a timeout. Locks never block writes to store data;
//! they are a cooperative signal used to avoid editing collisions.
//!
//! Expiry is evaluated by the caller through [`LockManager::check_timeout`]
//! or [`Lock::is_expired`]; there is no background sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::types::{now_millis, ListenerResult, Timestamp};

/// An advisory lock on an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    /// Locked object.
    pub object_id: String,
    /// Lock name; one object may carry several independent locks.
    pub name: String,
    /// Owning user.
    pub user: String,
    /// Creation or last refresh time.
    pub created_at: Timestamp,
    /// Lifetime after `created_at`; zero means the lock never expires.
    pub timeout: Duration,
}

impl Lock {
    /// Returns true if the lock's timeout has elapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        !self.timeout.is_zero()
            && now > self.created_at.saturating_add(self.timeout.as_millis() as u64)
    }
}

/// Receives lock notifications.
///
/// Errors returned by a listener are logged as warnings and do not stop
/// delivery to the remaining listeners.
pub trait LockListener: Send + Sync {
    /// A lock was created.
    fn lock_added(&self, lock: &Lock) -> ListenerResult;

    /// A lock was removed by its owner or an administrator.
    fn lock_removed(&self, lock: &Lock) -> ListenerResult;

    /// A lock was found expired and discarded.
    fn lock_timeout(&self, lock: &Lock) -> ListenerResult;
}

#[derive(Clone, Copy)]
enum LockEvent {
    Added,
    Removed,
    Timeout,
}

/// Internally synchronized table of advisory locks.
pub struct LockManager {
    locks: Mutex<HashMap<(String, String), Lock>>,
    listeners: Mutex<Vec<Arc<dyn LockListener>>>,
}

impl LockManager {
    /// Creates an empty lock manager.
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Acquires `lock_name` on `object_id` for `user`.
    ///
    /// Returns false if a live lock with that name is held by another user.
    /// An expired lock is discarded (notifying `lock_timeout`) and replaced.
    pub fn set_lock(&self, object_id: &str, lock_name: &str, user: &str, timeout: Duration) -> bool {
        let now = now_millis();
        let key = (object_id.to_string(), lock_name.to_string());
        let lock = Lock {
            object_id: object_id.to_string(),
            name: lock_name.to_string(),
            user: user.to_string(),
            created_at: now,
            timeout,
        };

        let expired = {
            let mut locks = self.locks.lock();
            let existing = locks
                .get(&key)
                .map(|l| (l.is_expired(now), l.user == user));
            let expired = match existing {
                Some((true, _)) => locks.remove(&key),
                Some((false, false)) => return false,
                _ => None,
            };
            locks.insert(key, lock.clone());
            expired
        };

        if let Some(old) = expired {
            self.notify(LockEvent::Timeout, &old);
        }
        self.notify(LockEvent::Added, &lock);
        true
    }

    /// Restarts the lifetime of an existing lock with a new timeout.
    ///
    /// Returns false if no such lock exists.
    pub fn refresh_lock(&self, object_id: &str, lock_name: &str, timeout: Duration) -> bool {
        let key = (object_id.to_string(), lock_name.to_string());
        let mut locks = self.locks.lock();
        match locks.get_mut(&key) {
            Some(lock) => {
                lock.created_at = now_millis();
                lock.timeout = timeout;
                true
            }
            None => false,
        }
    }

    /// Returns the lock, expired or not.
    pub fn get_lock(&self, object_id: &str, lock_name: &str) -> Option<Lock> {
        self.locks
            .lock()
            .get(&(object_id.to_string(), lock_name.to_string()))
            .cloned()
    }

    /// Removes the lock and returns it.
    pub fn remove_lock(&self, object_id: &str, lock_name: &str) -> Option<Lock> {
        let removed = self
            .locks
            .lock()
            .remove(&(object_id.to_string(), lock_name.to_string()));
        if let Some(lock) = &removed {
            self.notify(LockEvent::Removed, lock);
        }
        removed
    }

    /// Discards the lock if it has expired.
    ///
    /// Returns true if an expired lock was removed.
    pub fn check_timeout(&self, object_id: &str, lock_name: &str) -> bool {
        let key = (object_id.to_string(), lock_name.to_string());
        let expired = {
            let mut locks = self.locks.lock();
            let expired = locks.get(&key).is_some_and(|l| l.is_expired(now_millis()));
            if expired {
                locks.remove(&key)
            } else {
                None
            }
        };
        match expired {
            Some(lock) => {
                self.notify(LockEvent::Timeout, &lock);
                true
            }
            None => false,
        }
    }

    /// Number of locks currently held, including expired ones.
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Registers a listener. Registering the same listener twice is a no-op.
    pub fn add_listener(&self, listener: Arc<dyn LockListener>) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Unregisters a listener. Returns true if it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn LockListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn notify(&self, event: LockEvent, lock: &Lock) {
        // Listeners run outside the table lock so they may query the manager.
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            let result = match event {
                LockEvent::Added => listener.lock_added(lock),
                LockEvent::Removed => listener.lock_removed(lock),
                LockEvent::Timeout => listener.lock_timeout(lock),
            };
            if let Err(e) = result {
                tracing::warn!(
                    object_id = %lock.object_id,
                    lock = %lock.name,
                    error = %e,
                    "lock listener failed"
                );
            }
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

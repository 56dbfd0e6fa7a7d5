//! Handle registry for live sessions.
//!
//! Uses DashMap so distinct handles never contend on a global lock. Each
//! session sits behind its own mutex, which serializes calls on one handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Opaque caller-visible session handle. Zero is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Reserved "no session" value.
    pub const INVALID: Self = Self(0);

    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Thread-safe registry mapping handles to exclusively locked sessions.
pub struct SessionRegistry<S> {
    sessions: DashMap<SessionHandle, Arc<Mutex<S>>>,
    next_id: AtomicU64,
}

impl<S> SessionRegistry<S> {
    pub fn new() -> Self {
        Self { sessions: DashMap::new(), next_id: AtomicU64::new(1) }
    }

    /// Register a session and return its fresh handle.
    pub fn insert(&self, session: S) -> SessionHandle {
        let handle = SessionHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sessions.insert(handle, Arc::new(Mutex::new(session)));
        handle
    }

    /// Shared reference to a live session. Lock it for the duration of a call.
    pub fn get(&self, handle: SessionHandle) -> Option<Arc<Mutex<S>>> {
        if !handle.is_valid() {
            return None;
        }
        self.sessions.get(&handle).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, handle: SessionHandle) -> bool {
        self.sessions.contains_key(&handle)
    }

    /// Unregister a session. The session is dropped once the last in-flight
    /// call holding it returns.
    pub fn remove(&self, handle: SessionHandle) -> Option<Arc<Mutex<S>>> {
        if !handle.is_valid() {
            return None;
        }
        self.sessions.remove(&handle).map(|(_, session)| session)
    }

    /// Unregister every session.
    pub fn drain(&self) -> Vec<Arc<Mutex<S>>> {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|entry| *entry.key()).collect();
        handles.into_iter().filter_map(|h| self.remove(h)).collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_start_at_one_and_are_unique() {
        let registry = SessionRegistry::new();
        let a = registry.insert("a");
        let b = registry.insert("b");

        assert_eq!(a.id(), 1);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_zero_handle_resolves_to_nothing() {
        let registry = SessionRegistry::new();
        registry.insert(1u8);

        assert!(registry.get(SessionHandle::INVALID).is_none());
        assert!(registry.remove(SessionHandle::INVALID).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_removed_handle_is_never_reused() {
        let registry = SessionRegistry::new();
        let first = registry.insert(1u8);
        assert!(registry.remove(first).is_some());
        assert!(registry.remove(first).is_none());

        let second = registry.insert(2u8);
        assert_ne!(first, second);
        assert!(registry.get(first).is_none());
    }

    #[test]
    fn test_in_flight_session_outlives_removal() {
        let registry = SessionRegistry::new();
        let handle = registry.insert(String::from("live"));
        let held = registry.get(handle).unwrap();

        let removed = registry.remove(handle).unwrap();
        drop(removed);

        assert_eq!(held.lock().as_str(), "live");
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = SessionRegistry::new();
        registry.insert(1u8);
        registry.insert(2u8);

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }
}

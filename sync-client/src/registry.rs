//! Registry of live sync handles.
//!
//! Whoever owns the host's network-reachability listener holds a
//! [`ConnectionRegistry`] and calls [`ConnectionRegistry::set_online`]. Every
//! handle registered at that moment gets the signal, so a handle that was
//! waiting out a backoff delay reconnects as soon as the network is back.
//!
//! Handles register on `connect()` and unregister on `disconnect()` or drop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::client::Command;

/// Identifies a handle inside a registry.
pub type HandleId = u64;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique handle id.
pub(crate) fn next_handle_id() -> HandleId {
    NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Shared list of handles interested in reachability changes.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Debug)]
struct RegistryInner {
    online: bool,
    handles: BTreeMap<HandleId, mpsc::UnboundedSender<Command>>,
}

impl ConnectionRegistry {
    /// Create an empty registry. A fresh registry assumes the host is online.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                online: true,
                handles: BTreeMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the host's reachability and forward it to every handle.
    pub fn set_online(&self, online: bool) {
        let mut inner = self.lock();
        inner.online = online;
        inner
            .handles
            .retain(|_, tx| tx.send(Command::Reachability(online)).is_ok());
        tracing::debug!(online, handles = inner.handles.len(), "reachability changed");
    }

    /// Last reported reachability.
    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    /// Whether no handle is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().handles.is_empty()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: HandleId) -> bool {
        self.lock().handles.contains_key(&id)
    }

    /// Add a handle. Re-registering replaces the sender.
    ///
    /// A handle joining an offline registry is told so right away.
    pub(crate) fn register(&self, id: HandleId, tx: mpsc::UnboundedSender<Command>) {
        let mut inner = self.lock();
        if !inner.online {
            let _ = tx.send(Command::Reachability(false));
        }
        inner.handles.insert(id, tx);
    }

    /// Remove a handle. Unknown ids are ignored.
    pub(crate) fn unregister(&self, id: HandleId) {
        self.lock().handles.remove(&id);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_registry_is_online_and_empty() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_online());
        assert!(registry.is_empty());
    }

    #[test]
    fn set_online_reaches_every_handle() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register(1, tx1);
        registry.register(2, tx2);

        registry.set_online(false);

        assert!(!registry.is_online());
        assert!(matches!(rx1.try_recv(), Ok(Command::Reachability(false))));
        assert!(matches!(rx2.try_recv(), Ok(Command::Reachability(false))));
    }

    #[test]
    fn unregistered_handles_are_not_signalled() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(1, tx);
        registry.unregister(1);

        registry.set_online(true);

        assert!(rx.try_recv().is_err());
        assert!(!registry.contains(1));
    }

    #[test]
    fn registering_twice_keeps_one_entry() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(9, tx.clone());
        registry.register(9, tx);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dead_handles_are_dropped_on_broadcast() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(1, tx);
        drop(rx);

        registry.set_online(true);

        assert!(registry.is_empty());
    }

    #[test]
    fn joining_offline_registry_learns_it() {
        let registry = ConnectionRegistry::new();
        registry.set_online(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(1, tx);
        assert!(matches!(rx.try_recv(), Ok(Command::Reachability(false))));
    }

    #[test]
    fn clones_share_state() {
        let registry = ConnectionRegistry::new();
        let other = registry.clone();
        other.set_online(false);
        assert!(!registry.is_online());
    }

    #[test]
    fn handle_ids_are_unique() {
        assert_ne!(next_handle_id(), next_handle_id());
    }
}

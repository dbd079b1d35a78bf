//! # Subscription registry: live endpoints per severity class.
//!
//! One lock-guarded map per class, keyed by a generated [`SubscriptionId`].
//! Dispatchers never iterate under the lock: they take a [`snapshot`](Registry::snapshot)
//! at the start of each message and deliver outside it, so subscribe/unsubscribe
//! can proceed while a slow delivery is in flight.
//!
//! ## Rules
//! - Ids are unique for the process lifetime (never reused).
//! - Removing an endpoint drops the registry's sender; the subscriber's stream
//!   ends once buffered messages are drained and no delivery holds a sender clone.
//! - [`close`](Registry::close) empties every class and rejects further registrations.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;

use crate::error::BusError;
use crate::messages::{Message, Severity};

/// Global counter for subscription ids.
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Identity of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw id (e.g. one received back from a client).
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Delivery endpoint of one subscriber.
pub(crate) type Endpoint = mpsc::Sender<Message>;

type ClassMap = RwLock<HashMap<SubscriptionId, Endpoint>>;

/// Per-class subscriber sets.
pub(crate) struct Registry {
    classes: [ClassMap; Severity::CLASSES.len()],
    capacity: usize,
    closed: AtomicBool,
}

impl Registry {
    /// Creates an empty registry; each new subscriber gets a queue of `capacity` (min 1).
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            classes: std::array::from_fn(|_| RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    fn read(&self, class: Severity) -> RwLockReadGuard<'_, HashMap<SubscriptionId, Endpoint>> {
        self.classes[class.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, class: Severity) -> RwLockWriteGuard<'_, HashMap<SubscriptionId, Endpoint>> {
        self.classes[class.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an endpoint under `class` and returns its id and receiving half.
    ///
    /// # Errors
    /// [`BusError::Closed`] once the registry has been closed.
    pub(crate) fn register(
        &self,
        class: Severity,
    ) -> Result<(SubscriptionId, mpsc::Receiver<Message>), BusError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = SubscriptionId::next();

        let mut set = self.write(class);
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        set.insert(id, tx);
        Ok((id, rx))
    }

    /// Removes `id` from `class`. Returns `true` if it was present.
    pub(crate) fn remove(&self, class: Severity, id: SubscriptionId) -> bool {
        self.write(class).remove(&id).is_some()
    }

    /// Removes `id` from whichever class holds it.
    pub(crate) fn remove_any(&self, id: SubscriptionId) -> bool {
        Severity::CLASSES
            .into_iter()
            .any(|class| self.remove(class, id))
    }

    /// Consistent copy of the endpoints registered under `class` right now.
    pub(crate) fn snapshot(&self, class: Severity) -> Vec<(SubscriptionId, Endpoint)> {
        self.read(class)
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect()
    }

    pub(crate) fn len(&self, class: Severity) -> usize {
        self.read(class).len()
    }

    /// Drops every endpoint and rejects further registrations.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for class in Severity::CLASSES {
            self.write(class).clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let reg = Registry::new(4);
        let (a, _ra) = reg.register(Severity::Info).unwrap();
        let (b, _rb) = reg.register(Severity::Info).unwrap();
        let (c, _rc) = reg.register(Severity::Error).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(reg.len(Severity::Info), 2);
        assert_eq!(reg.len(Severity::Error), 1);
    }

    #[test]
    fn remove_any_finds_the_class() {
        let reg = Registry::new(4);
        let (id, _rx) = reg.register(Severity::Critical).unwrap();
        assert!(reg.remove_any(id));
        assert!(!reg.remove_any(id));
        assert_eq!(reg.len(Severity::Critical), 0);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_changes() {
        let reg = Registry::new(4);
        let (a, _ra) = reg.register(Severity::All).unwrap();
        let snap = reg.snapshot(Severity::All);

        let (_b, _rb) = reg.register(Severity::All).unwrap();
        reg.remove(Severity::All, a);

        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].0, a);
        assert_eq!(reg.len(Severity::All), 1);
    }

    #[tokio::test]
    async fn close_ends_streams_and_rejects_new() {
        let reg = Registry::new(4);
        let (_id, mut rx) = reg.register(Severity::Warning).unwrap();
        reg.close();

        assert!(rx.recv().await.is_none());
        assert!(matches!(reg.register(Severity::Warning), Err(BusError::Closed)));
    }

    #[test]
    fn capacity_is_clamped() {
        let reg = Registry::new(0);
        let (_id, rx) = reg.register(Severity::Debug).unwrap();
        assert_eq!(rx.max_capacity(), 1);
    }
}

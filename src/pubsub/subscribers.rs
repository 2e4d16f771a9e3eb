//! Registered-subscriber set
//!
//! Written from the broker's dispatch task (register, deregister) and read
//! from whichever task calls `publish()`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::connection::{Connection, ConnectionStatus};

/// Outcome of registering an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First time this identifier was seen
    New,
    /// The previous connection had closed and was replaced
    Replaced,
    /// Already registered with a live connection
    Existing,
}

/// Thread-safe map of subscriber identifier to reverse connection
#[derive(Default)]
pub struct SubscriberSet {
    entries: RwLock<HashMap<String, Arc<Connection>>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection for `identifier` unless a live one exists.
    ///
    /// `make` runs only when a connection is actually inserted.
    pub fn register<F>(&self, identifier: &str, make: F) -> (Registration, Arc<Connection>)
    where
        F: FnOnce() -> Arc<Connection>,
    {
        let mut entries = self.write();

        let registration = match entries.get(identifier) {
            Some(existing) if existing.status() != ConnectionStatus::Closed => {
                return (Registration::Existing, Arc::clone(existing));
            }
            Some(_) => Registration::Replaced,
            None => Registration::New,
        };

        let connection = make();
        entries.insert(identifier.to_string(), Arc::clone(&connection));
        (registration, connection)
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<Connection>> {
        self.read().get(identifier).cloned()
    }

    pub fn remove(&self, identifier: &str) -> Option<Arc<Connection>> {
        self.write().remove(identifier)
    }

    /// Copy of the current entries, so callers never hold the lock across I/O
    pub fn snapshot(&self) -> Vec<(String, Arc<Connection>)> {
        self.read()
            .iter()
            .map(|(id, conn)| (id.clone(), Arc::clone(conn)))
            .collect()
    }

    /// Remove every entry
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        self.write().drain().map(|(_, conn)| conn).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Connection>>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Connection>>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelNamespace;
    use crate::connection::ConnectionConfig;

    fn connection(name: &str) -> Arc<Connection> {
        Connection::new(
            ChannelNamespace::in_dir("/tmp/framebus-unused"),
            name,
            ConnectionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_register_insert_if_absent() {
        let set = SubscriberSet::new();

        let (first, conn) = set.register("A1", || connection("pub.A1"));
        assert_eq!(first, Registration::New);

        let (second, same) = set.register("A1", || panic!("must not build a second connection"));
        assert_eq!(second, Registration::Existing);
        assert!(Arc::ptr_eq(&conn, &same));
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_entry_is_replaced() {
        let set = SubscriberSet::new();
        let (_, old) = set.register("A1", || connection("pub.A1"));
        old.close();

        let (registration, new) = set.register("A1", || connection("pub.A1"));
        assert_eq!(registration, Registration::Replaced);
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_snapshot() {
        let set = SubscriberSet::new();
        set.register("A1", || connection("pub.A1"));
        set.register("B2", || connection("pub.B2"));

        let mut ids: Vec<_> = set.snapshot().into_iter().map(|(id, _)| id).collect();
        ids.sort();
        assert_eq!(ids, vec!["A1", "B2"]);

        assert!(set.remove("A1").is_some());
        assert!(set.remove("A1").is_none());
        assert!(set.get("B2").is_some());

        assert_eq!(set.drain().len(), 1);
        assert!(set.is_empty());
    }
}

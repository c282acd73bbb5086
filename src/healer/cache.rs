//! Local copy of the connections the healer is responsible for.

use std::collections::BTreeMap;

use crate::connection::{Connection, State, SENTINEL_CONNECTION_ID};

/// Connections keyed by the id they were last known under.
///
/// After a failed recovery an entry keeps its key while its connection id is
/// reset to the sentinel, so the next sweep can find it again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionCache {
    entries: BTreeMap<String, Connection>,
}

impl ConnectionCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Connection> {
        self.entries.get(key)
    }

    /// Insert or replace the entry keyed by `connection.id`.
    pub fn insert(&mut self, connection: Connection) -> Option<Connection> {
        self.entries.insert(connection.id.clone(), connection)
    }

    /// Replace the entry under `stale_key` with `connection`, keyed by its own id.
    pub fn replace(&mut self, stale_key: &str, connection: Connection) {
        self.entries.remove(stale_key);
        self.insert(connection);
    }

    /// Drop the entry under `key`, returning it.
    pub fn remove(&mut self, key: &str) -> Option<Connection> {
        self.entries.remove(key)
    }

    /// Mark the entry under `key` as unrecovered.
    pub fn reset_id(&mut self, key: &str) {
        if let Some(conn) = self.entries.get_mut(key) {
            SENTINEL_CONNECTION_ID.clone_into(&mut conn.id);
        }
    }

    /// Assume every connection is broken until a snapshot says otherwise.
    pub fn mark_all_down(&mut self) {
        for conn in self.entries.values_mut() {
            conn.state = State::Down;
        }
    }

    /// Keys of entries that need a recovery attempt.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, c)| !c.is_up())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Every entry, keyed by the id it was last known under.
    #[must_use]
    pub fn connections(&self) -> &BTreeMap<String, Connection> {
        &self.entries
    }

    /// Number of cached connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Connection> for ConnectionCache {
    fn from_iter<I: IntoIterator<Item = Connection>>(iter: I) -> Self {
        let mut cache = Self::new();
        for conn in iter {
            cache.insert(conn);
        }
        cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_keys_only_down() {
        let cache: ConnectionCache = [
            Connection::new("a", "svc"),
            Connection::new("b", "svc").with_state(State::Down),
        ]
        .into_iter()
        .collect();
        assert_eq!(cache.pending_keys(), vec!["b".to_string()]);
    }

    #[test]
    fn test_reset_id_keeps_key() {
        let mut cache: ConnectionCache = [Connection::new("a", "svc")].into_iter().collect();
        cache.reset_id("a");
        let entry = cache.get("a").unwrap();
        assert_eq!(entry.id, SENTINEL_CONNECTION_ID);
    }

    #[test]
    fn test_replace_rekeys() {
        let mut cache: ConnectionCache = [Connection::new("a", "svc").with_state(State::Down)]
            .into_iter()
            .collect();
        cache.replace("a", Connection::new("a2", "svc"));
        assert!(cache.get("a").is_none());
        assert!(cache.get("a2").unwrap().is_up());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_mark_all_down() {
        let mut cache: ConnectionCache = [Connection::new("a", "svc"), Connection::new("b", "svc")]
            .into_iter()
            .collect();
        cache.mark_all_down();
        assert_eq!(cache.pending_keys().len(), 2);
    }
}

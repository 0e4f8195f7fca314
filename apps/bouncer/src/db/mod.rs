pub mod memory;
pub mod sqlite;

use serde_json::Value;

use crate::config::StorageMode;
use crate::error::StoreError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// An entry of the active-subscription table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSubscription {
    pub client_id: String,
    /// Namespaced upstream-facing key.
    pub key: String,
    pub filters: Vec<Value>,
}

/// The three session tables: active subscriptions, delivered-event records
/// and the recent-writes journal.
///
/// Calls are synchronous and made while the multiplexer lock is held, so
/// implementations need no interior locking. Snapshot methods return owned
/// data in insertion order.
pub trait SessionStore: Send {
    /// Record (or replace) the filters for a subscription.
    fn insert_subscription(
        &mut self,
        client_id: &str,
        key: &str,
        filters: &[Value],
    ) -> Result<(), StoreError>;

    fn has_subscription(&self, client_id: &str, key: &str) -> Result<bool, StoreError>;

    /// Drop a subscription together with its delivered-event records.
    fn remove_subscription(&mut self, client_id: &str, key: &str) -> Result<(), StoreError>;

    /// Keys of every subscription owned by a client.
    fn client_subscriptions(&self, client_id: &str) -> Result<Vec<String>, StoreError>;

    fn subscriptions(&self) -> Result<Vec<StoredSubscription>, StoreError>;

    /// Test-and-insert. Returns `true` if the record is new, i.e. the event
    /// should be delivered.
    fn mark_delivered(
        &mut self,
        client_id: &str,
        key: &str,
        event_id: &str,
    ) -> Result<bool, StoreError>;

    fn push_recent_write(&mut self, client_id: &str, frame: &str) -> Result<(), StoreError>;

    fn recent_writes(&self) -> Result<Vec<String>, StoreError>;

    /// Drop every row belonging to a client across all three tables.
    fn remove_client(&mut self, client_id: &str) -> Result<(), StoreError>;
}

/// Open the backend selected by configuration.
pub fn open(mode: &StorageMode) -> Result<Box<dyn SessionStore>, StoreError> {
    match mode {
        StorageMode::Memory => Ok(Box::new(MemoryStore::new())),
        StorageMode::Disk(path) => {
            tracing::info!(path = %path.display(), "using file-backed session store");
            Ok(Box::new(SqliteStore::open(path)?))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Behaviour every backend must share.
    pub(crate) fn exercise(store: &mut dyn SessionStore) {
        let filters = vec![json!({"kinds": [1]})];

        store.insert_subscription("cl_a", "cl_a:feed", &filters).unwrap();
        store.insert_subscription("cl_a", "cl_a:dm", &filters).unwrap();
        store.insert_subscription("cl_b", "cl_b:feed", &filters).unwrap();
        assert!(store.has_subscription("cl_a", "cl_a:feed").unwrap());
        assert!(!store.has_subscription("cl_b", "cl_a:feed").unwrap());

        // Replacing keeps a single row.
        let replaced = vec![json!({"kinds": [7]})];
        store.insert_subscription("cl_a", "cl_a:feed", &replaced).unwrap();
        let subs = store.subscriptions().unwrap();
        assert_eq!(subs.len(), 3);
        let feed = subs.iter().find(|s| s.key == "cl_a:feed").unwrap();
        assert_eq!(feed.filters, replaced);

        let mut owned = store.client_subscriptions("cl_a").unwrap();
        owned.sort();
        assert_eq!(owned, vec!["cl_a:dm", "cl_a:feed"]);

        // Test-and-insert.
        assert!(store.mark_delivered("cl_a", "cl_a:feed", "e1").unwrap());
        assert!(!store.mark_delivered("cl_a", "cl_a:feed", "e1").unwrap());
        assert!(store.mark_delivered("cl_a", "cl_a:dm", "e1").unwrap());

        // Removing a subscription clears its delivered records only.
        store.remove_subscription("cl_a", "cl_a:feed").unwrap();
        assert!(!store.has_subscription("cl_a", "cl_a:feed").unwrap());
        assert!(store.mark_delivered("cl_a", "cl_a:feed", "e1").unwrap());
        assert!(!store.mark_delivered("cl_a", "cl_a:dm", "e1").unwrap());

        // Journal keeps insertion order.
        store.push_recent_write("cl_a", "[\"EVENT\",1]").unwrap();
        store.push_recent_write("cl_b", "[\"EVENT\",2]").unwrap();
        store.push_recent_write("cl_a", "[\"EVENT\",3]").unwrap();
        assert_eq!(
            store.recent_writes().unwrap(),
            vec!["[\"EVENT\",1]", "[\"EVENT\",2]", "[\"EVENT\",3]"]
        );

        // Client removal cascades across all tables.
        store.remove_client("cl_a").unwrap();
        assert!(store.client_subscriptions("cl_a").unwrap().is_empty());
        assert!(store.mark_delivered("cl_a", "cl_a:dm", "e1").unwrap());
        assert_eq!(store.recent_writes().unwrap(), vec!["[\"EVENT\",2]"]);
        assert_eq!(store.subscriptions().unwrap().len(), 1);
    }

    #[test]
    fn open_memory_backend() {
        let mut store = open(&StorageMode::Memory).unwrap();
        exercise(store.as_mut());
    }
}

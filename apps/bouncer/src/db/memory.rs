use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::{SessionStore, StoredSubscription};
use crate::error::StoreError;

type SubKey = (String, String);

/// Session tables held in plain collections. Lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    /// Filters per (client, key), tagged with an insertion sequence number
    /// so snapshots keep insertion order.
    subscriptions: HashMap<SubKey, (u64, Vec<Value>)>,
    next_seq: u64,
    /// Delivered event ids per (client, key).
    delivered: HashMap<SubKey, HashSet<String>>,
    recent: Vec<(String, String)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sub_key(client_id: &str, key: &str) -> SubKey {
        (client_id.to_string(), key.to_string())
    }

    /// Subscriptions matching `keep`, oldest first.
    fn ordered(&self, keep: impl Fn(&SubKey) -> bool) -> Vec<(&SubKey, &Vec<Value>)> {
        let mut subs: Vec<_> = self
            .subscriptions
            .iter()
            .filter(|(k, _)| keep(*k))
            .map(|(k, (seq, filters))| (*seq, k, filters))
            .collect();
        subs.sort_unstable_by_key(|(seq, _, _)| *seq);
        subs.into_iter().map(|(_, k, filters)| (k, filters)).collect()
    }
}

impl SessionStore for MemoryStore {
    fn insert_subscription(
        &mut self,
        client_id: &str,
        key: &str,
        filters: &[Value],
    ) -> Result<(), StoreError> {
        match self.subscriptions.get_mut(&Self::sub_key(client_id, key)) {
            Some((_, existing)) => *existing = filters.to_vec(),
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.subscriptions
                    .insert(Self::sub_key(client_id, key), (seq, filters.to_vec()));
            }
        }
        Ok(())
    }

    fn has_subscription(&self, client_id: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .subscriptions
            .contains_key(&Self::sub_key(client_id, key)))
    }

    fn remove_subscription(&mut self, client_id: &str, key: &str) -> Result<(), StoreError> {
        let sub_key = Self::sub_key(client_id, key);
        self.subscriptions.remove(&sub_key);
        self.delivered.remove(&sub_key);
        Ok(())
    }

    fn client_subscriptions(&self, client_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .ordered(|(cid, _)| cid == client_id)
            .into_iter()
            .map(|((_, key), _)| key.clone())
            .collect())
    }

    fn subscriptions(&self) -> Result<Vec<StoredSubscription>, StoreError> {
        Ok(self
            .ordered(|_| true)
            .into_iter()
            .map(|((client_id, key), filters)| StoredSubscription {
                client_id: client_id.clone(),
                key: key.clone(),
                filters: filters.clone(),
            })
            .collect())
    }

    fn mark_delivered(
        &mut self,
        client_id: &str,
        key: &str,
        event_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .delivered
            .entry(Self::sub_key(client_id, key))
            .or_default()
            .insert(event_id.to_string()))
    }

    fn push_recent_write(&mut self, client_id: &str, frame: &str) -> Result<(), StoreError> {
        self.recent.push((client_id.to_string(), frame.to_string()));
        Ok(())
    }

    fn recent_writes(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.recent.iter().map(|(_, frame)| frame.clone()).collect())
    }

    fn remove_client(&mut self, client_id: &str) -> Result<(), StoreError> {
        self.subscriptions.retain(|(cid, _), _| cid != client_id);
        self.delivered.retain(|(cid, _), _| cid != client_id);
        self.recent.retain(|(cid, _)| cid != client_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_contract() {
        let mut store = MemoryStore::new();
        crate::db::tests::exercise(&mut store);
    }

    #[test]
    fn removing_client_leaves_nothing_behind() {
        let mut store = MemoryStore::new();
        for round in 0..50 {
            let key = format!("cl_x:{round}");
            store.insert_subscription("cl_x", &key, &[]).unwrap();
            store.mark_delivered("cl_x", &key, "e").unwrap();
            store.push_recent_write("cl_x", "frame").unwrap();
            store.remove_client("cl_x").unwrap();
        }
        assert!(store.subscriptions.is_empty());
        assert!(store.delivered.is_empty());
        assert!(store.recent.is_empty());
    }

    #[test]
    fn replacing_filters_keeps_insertion_order() {
        let mut store = MemoryStore::new();
        store.insert_subscription("cl_a", "cl_a:1", &[]).unwrap();
        store.insert_subscription("cl_b", "cl_b:1", &[]).unwrap();
        store.insert_subscription("cl_a", "cl_a:2", &[]).unwrap();
        store
            .insert_subscription("cl_a", "cl_a:1", &[serde_json::json!({"limit": 1})])
            .unwrap();

        let keys: Vec<_> = store
            .subscriptions()
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(keys, ["cl_a:1", "cl_b:1", "cl_a:2"]);
        assert_eq!(store.client_subscriptions("cl_a").unwrap(), ["cl_a:1", "cl_a:2"]);
        assert_eq!(store.subscriptions().unwrap()[0].filters.len(), 1);
    }
}

//! Registry of connected clients, used to route upstream results back to the
//! connection that owns a subscription.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

/// Shared registry of all downstream connections.
///
/// Uses `DashMap` for shard-level concurrency so upstream tasks can deliver
/// without contending on a global lock.
pub struct SessionRegistry {
    clients: Arc<DashMap<String, mpsc::UnboundedSender<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
        }
    }

    pub fn register(&self, client_id: &str, tx: mpsc::UnboundedSender<String>) {
        self.clients.insert(client_id.to_string(), tx);
    }

    /// Queue a frame for a client. Returns `false` if the client is gone.
    pub fn send(&self, client_id: &str, frame: String) -> bool {
        match self.clients.get(client_id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, client_id: &str) -> bool {
        self.clients.remove(client_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_reaches_registered_client() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("cl_a", tx);

        assert!(registry.send("cl_a", "hello".into()));
        assert_eq!(rx.try_recv().unwrap(), "hello");
        assert!(!registry.send("cl_missing", "hello".into()));
    }

    #[test]
    fn send_after_receiver_dropped_fails() {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("cl_a", tx);
        drop(rx);
        assert!(!registry.send("cl_a", "hello".into()));
    }

    #[test]
    fn remove_unregisters() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("cl_a", tx);
        assert_eq!(registry.len(), 1);

        assert!(registry.remove("cl_a"));
        assert!(!registry.remove("cl_a"));
        assert!(!registry.send("cl_a", "hello".into()));
        assert!(registry.is_empty());
    }
}

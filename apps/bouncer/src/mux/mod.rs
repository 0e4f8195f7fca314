//! Subscription multiplexing: fan client writes and subscriptions out to every
//! live upstream, fan matching events back in to exactly one client.
//!
//! All bookkeeping touched from both directions (active subscriptions,
//! delivered-event records, EOSE counters, limits, search filters and the set
//! of live upstream links) sits behind one lock. Broadcasts and deliveries are
//! plain channel sends and happen inside the critical section, so a
//! subscription recorded here is seen by an upstream exactly once: either by
//! the broadcast or by that upstream's replay, never both.

pub mod filter;
pub mod namespace;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bouncer_common::Event;
use parking_lot::Mutex;
use serde_json::Value;

use crate::db::SessionStore;
use crate::error::StoreError;
use crate::gateway::frames::Outbound;
use crate::gateway::registry::SessionRegistry;
use crate::upstream::LinkSender;

use filter::{Limit, SearchFilter};

/// Result of a subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscribed {
    /// Recorded and sent upstream.
    Forwarded,
    /// Limit below one: nothing to fetch, answer EOSE right away.
    Empty,
}

/// What happened to an event an upstream sent us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Delivered,
    /// Delivered, and it used up the subscription's limit.
    DeliveredAndExhausted,
    Duplicate,
    /// Content did not match the subscription's search string.
    Filtered,
    /// No such subscription any more. The upstream should be told to close it.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EoseOutcome {
    /// EOSE already sent (or never expected) for this key.
    Ignored,
    /// Still waiting on other upstreams. `received` counts distinct links.
    Waiting { received: usize },
    /// Last upstream reported; the client got its EOSE.
    Completed,
}

struct MuxState {
    store: Box<dyn SessionStore>,
    /// Links that have sent EOSE, per key. Present until the client's EOSE
    /// is sent.
    pending_eose: HashMap<String, HashSet<usize>>,
    /// Remaining results per key.
    limits: HashMap<String, u64>,
    search: HashMap<String, SearchFilter>,
    links: BTreeMap<usize, LinkSender>,
}

impl MuxState {
    /// Send to every live upstream. Links whose task has gone away are
    /// dropped; the rest still get the frame.
    fn broadcast(&mut self, frame: &str) {
        self.links.retain(|link_id, tx| {
            let alive = tx.send(frame.to_string()).is_ok();
            if !alive {
                tracing::debug!(link_id, "dropping closed upstream link");
            }
            alive
        });
    }

    fn forget(&mut self, key: &str) {
        self.pending_eose.remove(key);
        self.limits.remove(key);
        self.search.remove(key);
    }
}

pub struct Multiplexer {
    state: Mutex<MuxState>,
    sessions: Arc<SessionRegistry>,
    upstream_count: usize,
}

impl Multiplexer {
    /// `upstream_count` is the number of configured relays, the target for
    /// EOSE aggregation regardless of how many are currently connected.
    pub fn new(
        store: Box<dyn SessionStore>,
        sessions: Arc<SessionRegistry>,
        upstream_count: usize,
    ) -> Self {
        Self {
            state: Mutex::new(MuxState {
                store,
                pending_eose: HashMap::new(),
                limits: HashMap::new(),
                search: HashMap::new(),
                links: BTreeMap::new(),
            }),
            sessions,
            upstream_count,
        }
    }

    pub fn configured_upstreams(&self) -> usize {
        self.upstream_count
    }

    pub fn live_upstreams(&self) -> usize {
        self.state.lock().links.len()
    }

    // -----------------------------------------------------------------------
    // Client side
    // -----------------------------------------------------------------------

    /// Journal a client write and send it to every live upstream.
    pub fn publish(&self, client_id: &str, event: &Event) -> Result<(), StoreError> {
        let frame = Outbound::publish(event).to_string();
        let mut state = self.state.lock();
        state.store.push_recent_write(client_id, &frame)?;
        state.broadcast(&frame);
        Ok(())
    }

    /// Open (or replace) a subscription. `limit` and `search` are taken from
    /// the first filter.
    pub fn subscribe(
        &self,
        client_id: &str,
        subscription_id: &str,
        filters: &[Value],
    ) -> Result<Subscribed, StoreError> {
        let first = filters.first();
        let limit = first.map_or(Limit::Unbounded, Limit::from_filter);
        let key = namespace::encode(client_id, subscription_id);
        let mut state = self.state.lock();

        if limit == Limit::Empty {
            // Nothing to fetch, but a live subscription under this id is
            // still replaced: close it everywhere.
            if state.store.has_subscription(client_id, &key)? {
                state.broadcast(&Outbound::close(&key).to_string());
                state.forget(&key);
                state.store.remove_subscription(client_id, &key)?;
            }
            return Ok(Subscribed::Empty);
        }

        state.store.insert_subscription(client_id, &key, filters)?;

        state.forget(&key);
        if let Some(search) = first.and_then(SearchFilter::from_filter) {
            state.search.insert(key.clone(), search);
        }
        state.pending_eose.insert(key.clone(), HashSet::new());
        if let Limit::Count(n) = limit {
            state.limits.insert(key.clone(), n);
        }

        state.broadcast(&Outbound::req(&key, filters).to_string());
        Ok(Subscribed::Forwarded)
    }

    pub fn unsubscribe(&self, client_id: &str, subscription_id: &str) -> Result<(), StoreError> {
        let key = namespace::encode(client_id, subscription_id);
        let mut state = self.state.lock();
        state.broadcast(&Outbound::close(&key).to_string());
        state.forget(&key);
        state.store.remove_subscription(client_id, &key)
    }

    /// Close every subscription a client owns and drop all of its rows.
    /// Returns how many subscriptions were closed.
    pub fn disconnect(&self, client_id: &str) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        let keys = state.store.client_subscriptions(client_id)?;
        for key in &keys {
            state.broadcast(&Outbound::close(key).to_string());
            state.forget(key);
        }
        state.store.remove_client(client_id)?;
        Ok(keys.len())
    }

    // -----------------------------------------------------------------------
    // Upstream side
    // -----------------------------------------------------------------------

    /// Register a freshly opened upstream link and queue the full replay on
    /// it: recent writes first, then every active subscription. Returns the
    /// number of frames queued.
    pub fn attach_upstream(&self, link_id: usize, tx: LinkSender) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        let writes = state.store.recent_writes()?;
        let subscriptions = state.store.subscriptions()?;

        let replay = writes.into_iter().chain(
            subscriptions
                .iter()
                .map(|sub| Outbound::req(&sub.key, &sub.filters).to_string()),
        );

        let mut queued = 0;
        for frame in replay {
            if tx.send(frame).is_err() {
                // Link died mid-replay; the next connect replays from scratch.
                return Ok(queued);
            }
            queued += 1;
        }

        state.links.insert(link_id, tx);
        Ok(queued)
    }

    pub fn detach_upstream(&self, link_id: usize) -> bool {
        self.state.lock().links.remove(&link_id).is_some()
    }

    /// Route one upstream event to its owning client.
    pub fn route_event(
        &self,
        key: &str,
        event_id: &str,
        event: &Value,
    ) -> Result<EventOutcome, StoreError> {
        let Some((client_id, subscription_id)) = namespace::decode(key) else {
            return Ok(EventOutcome::Stale);
        };

        let mut state = self.state.lock();

        if let Some(search) = state.search.get(key) {
            if !search.matches(event) {
                return Ok(EventOutcome::Filtered);
            }
        }
        if !state.store.has_subscription(client_id, key)? {
            return Ok(EventOutcome::Stale);
        }
        if !state.store.mark_delivered(client_id, key, event_id)? {
            return Ok(EventOutcome::Duplicate);
        }

        self.sessions
            .send(client_id, Outbound::event(subscription_id, event).to_string());

        if !state.pending_eose.contains_key(key) {
            return Ok(EventOutcome::Delivered);
        }
        let Some(remaining) = state.limits.get_mut(key) else {
            return Ok(EventOutcome::Delivered);
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining > 0 {
            return Ok(EventOutcome::Delivered);
        }

        self.sessions
            .send(client_id, Outbound::eose(subscription_id).to_string());
        state.pending_eose.remove(key);
        state.limits.remove(key);
        Ok(EventOutcome::DeliveredAndExhausted)
    }

    /// Record an EOSE from one upstream link; the client hears about it once
    /// every configured upstream has reported. A link that repeats its EOSE
    /// (after a reconnect and replay, say) is only counted once.
    pub fn route_eose(&self, key: &str, link_id: usize) -> EoseOutcome {
        let mut state = self.state.lock();
        let Some(reported) = state.pending_eose.get_mut(key) else {
            return EoseOutcome::Ignored;
        };
        reported.insert(link_id);
        if reported.len() < self.upstream_count {
            return EoseOutcome::Waiting {
                received: reported.len(),
            };
        }

        state.pending_eose.remove(key);
        state.limits.remove(key);
        if let Some((client_id, subscription_id)) = namespace::decode(key) {
            self.sessions
                .send(client_id, Outbound::eose(subscription_id).to_string());
        }
        EoseOutcome::Completed
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        let state = self.state.lock();
        state.pending_eose.len() + state.limits.len() + state.search.len()
    }
}

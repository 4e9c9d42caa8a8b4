//! In-process signaling hub
//!
//! A [`MemoryHub`] plays the relay role; every swarm (or test) gets its own
//! [`MemoryHubClient`] from [`MemoryHub::client`], mirroring how each swarm
//! owns its own connection to a shared hub server. Closing one client
//! removes only that client's subscriptions; the relay and the other
//! clients keep working.

use super::{HubError, SignalingHub, Subscription};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct Shared {
    topics: RwLock<HashMap<String, Vec<(u64, mpsc::UnboundedSender<Value>)>>>,
    next_sub: AtomicU64,
}

impl Shared {
    fn deliver(&self, topic: &str, message: &Value) {
        let mut topics = self.topics.write();
        if let Some(subs) = topics.get_mut(topic) {
            // Deliver to every live subscriber, dropping dead ones as we go.
            subs.retain(|(_, tx)| tx.send(message.clone()).is_ok());
        }
    }

    fn unsubscribe(&self, owned: &[(String, u64)]) {
        let mut topics = self.topics.write();
        for (topic, id) in owned {
            if let Some(subs) = topics.get_mut(topic) {
                subs.retain(|(sub_id, _)| sub_id != id);
            }
        }
    }
}

/// The in-process relay. Hand each participant its own client.
#[derive(Clone, Default)]
pub struct MemoryHub {
    shared: Arc<Shared>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh client sharing this relay's topics
    pub fn client(&self) -> MemoryHubClient {
        MemoryHubClient {
            shared: Arc::clone(&self.shared),
            owned: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live subscriptions on a topic, across all clients
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared
            .topics
            .read()
            .get(topic)
            .map(|subs| subs.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

/// One participant's handle onto a [`MemoryHub`]
pub struct MemoryHubClient {
    shared: Arc<Shared>,
    /// (topic, subscription id) pairs this client opened
    owned: Mutex<Vec<(String, u64)>>,
    closed: AtomicBool,
}

#[async_trait]
impl SignalingHub for MemoryHubClient {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, HubError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HubError::Closed);
        }
        let id = self.shared.next_sub.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push((id, tx));
        self.owned.lock().push((topic.to_string(), id));
        debug!(topic, id, "memory hub subscription added");
        Ok(Subscription::new(rx))
    }

    async fn broadcast(&self, topic: &str, message: Value) -> Result<(), HubError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HubError::Closed);
        }
        self.shared.deliver(topic, &message);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), HubError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping this client's senders ends its subscription streams;
        // other clients of the relay are untouched.
        let owned = std::mem::take(&mut *self.owned.lock());
        self.shared.unsubscribe(&owned);
        Ok(())
    }
}

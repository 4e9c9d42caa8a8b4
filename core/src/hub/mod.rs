//! Signaling hub abstraction
//!
//! The swarm never talks to a concrete relay; it exchanges handshake
//! metadata through this topic-addressed broadcast interface. Two
//! implementations ship with the crate:
//! - [`memory::MemoryHub`] — in-process fan-out for tests and local demos
//! - [`ws::WsHub`] — client for a websocket hub server

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Signaling hub error types
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Hub is closed")]
    Closed,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),
}

/// One topic subscription: a lazy, unbounded sequence of inbound frames.
///
/// The subscription is live from the moment the `subscribe` call that
/// produced it resolved; that resolution doubles as the one-time "ready"
/// notification.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    /// Wrap a raw frame receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { receiver }
    }

    /// Next inbound frame for this topic; `None` once the hub has closed
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }
}

/// A topic-addressed broadcast relay carrying handshake metadata.
///
/// Delivery is at-least-once best-effort to the current subscribers of a
/// topic, including the sender's own subscriptions; nothing stronger is
/// promised and the swarm does not rely on anything stronger.
#[async_trait]
pub trait SignalingHub: Send + Sync {
    /// Subscribe to a topic. Resolving successfully means the subscription
    /// is ready and frames will start flowing into the returned stream.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, HubError>;

    /// Send a frame to every current subscriber of a topic. Resolves once
    /// the local send attempt completes, not once anyone received it.
    async fn broadcast(&self, topic: &str, message: Value) -> Result<(), HubError>;

    /// Whether the hub currently considers itself open
    fn is_open(&self) -> bool;

    /// Graceful shutdown; terminates all subscriptions
    async fn close(&self) -> Result<(), HubError>;
}

//! Peer connection capability
//!
//! The swarm does not negotiate transports itself; it drives an opaque
//! connection capability through handshake payloads and reacts to the
//! events the capability emits. [`sim::SimConnector`] provides an
//! in-process implementation for tests and demos; a real deployment plugs
//! in whatever performs the actual point-to-point negotiation.

pub mod sim;

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Options a connection is opened with
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Whether the local side drives the handshake (sends the offer)
    pub initiator: bool,
    /// Opaque transport options forwarded from the swarm configuration
    pub transport: Value,
}

/// Events a connection emits while negotiating and living
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A locally generated handshake payload that must reach the remote side
    Signal(Value),
    /// The direct transport is established
    Connect,
    /// Unrecoverable transport error
    Error(String),
    /// Transport-level negotiation failed
    TransportFailed(String),
    /// The connection is gone; emitted exactly once
    Close,
}

/// One live (or negotiating) point-to-point connection.
///
/// Exclusively owned by its peer record for bookkeeping purposes; the
/// handle itself is shared so event consumers can hold it after
/// `peer-connected` fires.
pub trait Connection: Send + Sync {
    /// Feed an inbound handshake payload received over the signaling hub
    fn signal(&self, payload: Value);

    /// Tear the connection down. Idempotent; the first call eventually
    /// emits [`ConnectionEvent::Close`] on the event stream.
    fn destroy(&self);
}

/// Factory for [`Connection`] instances.
///
/// Returns the connection handle together with the stream of events it
/// will emit; an initiator is expected to produce its first
/// [`ConnectionEvent::Signal`] (the offer) without any input.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        options: ConnectOptions,
    ) -> (Arc<dyn Connection>, mpsc::UnboundedReceiver<ConnectionEvent>);
}

//! Swarm coordinator — public lifecycle, configuration and events
//!
//! A [`Swarm`] forms a full mesh of direct peer connections among the
//! participants of one signaling hub: it announces itself on the shared
//! discovery topic, elects an initiator for every pairwise connection,
//! relays handshake payloads over each participant's private topic, and
//! keeps re-announcing with jitter until its capacity is reached.

mod actor;
mod peer;
mod registry;

pub use peer::{PeerRole, PeerState};

use actor::{SwarmActor, Turn};
use crate::connection::{Connection, Connector};
use crate::hub::{HubError, SignalingHub, Subscription};
use crate::identity::{generate_election_token, generate_peer_id};
use crate::protocol::{Transform, BROADCAST_TOPIC};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

/// Swarm error types
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Signaling hub error: {0}")]
    Hub(#[from] HubError),
}

/// Swarm configuration
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Maximum number of connected peers; `None` means unbounded
    pub max_peers: Option<usize>,
    /// Local identity; generated when absent. Must be unique per swarm
    /// instance for the process lifetime.
    pub local_id: Option<String>,
    /// Election token; generated when absent. Injectable for
    /// deterministic tests.
    pub election_token: Option<String>,
    /// Encode/decode hooks applied to every hub frame
    pub transform: Transform,
    /// Opaque options forwarded to the connection capability
    pub transport: Value,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_peers: None,
            local_id: None,
            election_token: None,
            transform: Transform::default(),
            transport: Value::Null,
        }
    }
}

/// Events raised by a swarm
#[derive(Clone)]
pub enum SwarmEvent {
    /// A direct connection to a peer was established
    PeerConnected {
        peer: Arc<dyn Connection>,
        remote_id: String,
    },
    /// A peer's record was retired (transport error, negotiation failure,
    /// explicit close or swarm shutdown)
    PeerDisconnected {
        peer: Arc<dyn Connection>,
        remote_id: String,
    },
    /// The swarm finished closing; raised exactly once
    Closed,
}

impl fmt::Debug for SwarmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwarmEvent::PeerConnected { remote_id, .. } => f
                .debug_struct("PeerConnected")
                .field("remote_id", remote_id)
                .finish_non_exhaustive(),
            SwarmEvent::PeerDisconnected { remote_id, .. } => f
                .debug_struct("PeerDisconnected")
                .field("remote_id", remote_id)
                .finish_non_exhaustive(),
            SwarmEvent::Closed => f.write_str("Closed"),
        }
    }
}

/// Handle to a running swarm
pub struct Swarm {
    local_id: String,
    turns: mpsc::UnboundedSender<Turn>,
    events: broadcast::Sender<SwarmEvent>,
    closed_rx: watch::Receiver<bool>,
}

impl Swarm {
    /// Join a swarm: subscribe to the discovery topic and the local
    /// identity's topic, start the swarm loop, and send the first
    /// announce. Resolves once both subscriptions are live.
    pub async fn join(
        hub: Arc<dyn SignalingHub>,
        connector: Arc<dyn Connector>,
        config: SwarmConfig,
    ) -> Result<Self, SwarmError> {
        let local_id = config.local_id.unwrap_or_else(generate_peer_id);
        let election_token = config
            .election_token
            .unwrap_or_else(generate_election_token);
        debug!(%local_id, %election_token, "joining swarm");

        let broadcast_sub = hub.subscribe(BROADCAST_TOPIC).await?;
        let directed_sub = hub.subscribe(&local_id).await?;

        let (turns_tx, turns_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(64);
        let (closed_tx, closed_rx) = watch::channel(false);

        pump(broadcast_sub, turns_tx.clone(), Turn::BroadcastFrame);
        pump(directed_sub, turns_tx.clone(), Turn::DirectedFrame);

        let actor = SwarmActor::new(
            local_id.clone(),
            election_token,
            config.max_peers.unwrap_or(usize::MAX),
            config.transform,
            config.transport,
            hub,
            connector,
            turns_tx.clone(),
            events_tx.clone(),
            closed_tx,
        );
        tokio::spawn(actor.run(turns_rx));

        // The directed subscription is live, so the remote side of any
        // resulting election can reach us: announce immediately. The
        // scheduler takes over from here.
        let _ = turns_tx.send(Turn::Announce);

        Ok(Self {
            local_id,
            turns: turns_tx,
            events: events_tx,
            closed_rx,
        })
    }

    /// This swarm instance's identity
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Subscribe to swarm events. Each receiver sees every event raised
    /// after the call.
    pub fn events(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    /// Identities of currently connected peers, in connection order
    pub async fn connected_peers(&self) -> Vec<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.turns.send(Turn::ConnectedPeers(reply_tx)).is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Close the swarm: gracefully close the hub if it is still open,
    /// destroy every peer connection, and resolve once the swarm-closed
    /// event has fired. Idempotent; concurrent and repeated calls all
    /// resolve after the single shutdown completes.
    pub async fn close(&self) {
        let _ = self.turns.send(Turn::Close);
        let mut closed = self.closed_rx.clone();
        while !*closed.borrow() {
            if closed.changed().await.is_err() {
                break;
            }
        }
    }

    /// Whether the swarm has finished closing
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }
}

/// Forward every frame of a subscription into the swarm loop.
fn pump(
    mut subscription: Subscription,
    turns: mpsc::UnboundedSender<Turn>,
    make: fn(Value) -> Turn,
) {
    tokio::spawn(async move {
        while let Some(frame) = subscription.recv().await {
            if turns.send(make(frame)).is_err() {
                break;
            }
        }
    });
}

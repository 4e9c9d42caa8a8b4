//! The swarm loop
//!
//! All swarm state lives inside one task. Every stimulus (hub frames,
//! connection events, send completions, scheduler ticks, close requests)
//! arrives as a [`Turn`] on a single queue and is processed to completion
//! before the next one, so the per-peer state machines only ever interleave
//! between turns and no locking is needed. Deferred work (destroys during
//! shutdown) is expressed by pushing turns onto the same queue.

use super::peer::{PeerRecord, PeerRole, PeerState};
use super::registry::PeerRegistry;
use super::SwarmEvent;
use crate::connection::{ConnectOptions, ConnectionEvent, Connector};
use crate::hub::{HubError, SignalingHub};
use crate::protocol::{initiates, is_offer, SignalMessage, Transform, BROADCAST_TOPIC};
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// One unit of work for the swarm loop
pub(crate) enum Turn {
    /// Frame from the discovery ("all") topic
    BroadcastFrame(Value),
    /// Frame from the local identity's topic
    DirectedFrame(Value),
    /// Event from one connection, tagged with the record it belongs to
    ConnectionEvent {
        remote_id: String,
        instance: u64,
        event: ConnectionEvent,
    },
    /// An outbound handshake payload send finished
    SendComplete {
        remote_id: String,
        instance: u64,
        result: Result<(), HubError>,
    },
    /// Announce scheduler tick
    Announce,
    /// The announce broadcast was acknowledged by the hub
    AnnounceSent(Result<(), HubError>),
    /// The hub finished its graceful close during swarm shutdown
    HubClosed,
    /// Deferred destroy of one record's connection
    Destroy { remote_id: String, instance: u64 },
    /// Close the swarm
    Close,
    /// Snapshot of currently connected identities
    ConnectedPeers(oneshot::Sender<Vec<String>>),
}

pub(crate) struct SwarmActor {
    local_id: String,
    election_token: String,
    max_peers: usize,
    transform: Transform,
    transport: Value,
    hub: Arc<dyn SignalingHub>,
    connector: Arc<dyn Connector>,
    registry: PeerRegistry,
    closed: bool,
    done: bool,
    next_instance: u64,
    turns: mpsc::UnboundedSender<Turn>,
    events: broadcast::Sender<SwarmEvent>,
    closed_tx: watch::Sender<bool>,
}

impl SwarmActor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_id: String,
        election_token: String,
        max_peers: usize,
        transform: Transform,
        transport: Value,
        hub: Arc<dyn SignalingHub>,
        connector: Arc<dyn Connector>,
        turns: mpsc::UnboundedSender<Turn>,
        events: broadcast::Sender<SwarmEvent>,
        closed_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            local_id,
            election_token,
            max_peers,
            transform,
            transport,
            hub,
            connector,
            registry: PeerRegistry::new(),
            closed: false,
            done: false,
            next_instance: 0,
            turns,
            events,
            closed_tx,
        }
    }

    pub async fn run(mut self, mut turns: mpsc::UnboundedReceiver<Turn>) {
        while let Some(turn) = turns.recv().await {
            self.handle(turn);
            if self.done {
                break;
            }
        }
        debug!(local_id = %self.local_id, "swarm loop ended");
    }

    fn handle(&mut self, turn: Turn) {
        match turn {
            Turn::BroadcastFrame(raw) => self.on_broadcast(raw),
            Turn::DirectedFrame(raw) => self.on_directed(raw),
            Turn::ConnectionEvent {
                remote_id,
                instance,
                event,
            } => self.on_connection_event(&remote_id, instance, event),
            Turn::SendComplete {
                remote_id,
                instance,
                result,
            } => self.on_send_complete(&remote_id, instance, result),
            Turn::Announce => self.on_announce_tick(),
            Turn::AnnounceSent(result) => self.on_announce_sent(result),
            Turn::HubClosed => self.destroy_all_records(),
            Turn::Destroy {
                remote_id,
                instance,
            } => self.on_destroy(&remote_id, instance),
            Turn::Close => self.on_close(),
            Turn::ConnectedPeers(reply) => {
                let _ = reply.send(self.registry.connected_ids());
            }
        }
    }

    // ------------------------------------------------------------------
    // Discovery protocol (broadcast topic)
    // ------------------------------------------------------------------

    fn on_broadcast(&mut self, raw: Value) {
        let Some(message) = self.decode(raw, BROADCAST_TOPIC) else {
            return;
        };
        match message {
            SignalMessage::Announce { from, token } => self.on_announce(from, &token),
            SignalMessage::Disconnect { from } => self.on_disconnect_message(&from),
            SignalMessage::Signal { from, .. } => {
                debug!(%from, "ignoring signal payload on broadcast topic");
            }
        }
    }

    fn on_announce(&mut self, from: String, remote_token: &str) {
        if self.at_capacity() {
            debug!(%from, "ignoring announce, peer capacity reached");
            return;
        }
        if self.registry.contains(&from) {
            debug!(%from, "ignoring announce, record already exists");
            return;
        }
        if !initiates(&self.election_token, remote_token) {
            // Lost the election: the remote side should initiate. Nudge it
            // with a fresh announce; it will observe the reversed
            // comparison and open the connection.
            debug!(%from, "lost initiator election, nudging remote side");
            self.spawn_nudge_announce();
            return;
        }
        info!(%from, "connecting to new peer as initiator");
        self.open_connection(from, PeerRole::Initiator);
    }

    /// Best-effort Disconnect handling; the authoritative removal path is
    /// the connection's own close event.
    fn on_disconnect_message(&mut self, from: &str) {
        let Some(mut record) = self.registry.remove(from) else {
            return;
        };
        debug!(%from, "peer announced disconnect");
        record.state = PeerState::Closed;
        record.connection.destroy();
        self.emit(SwarmEvent::PeerDisconnected {
            peer: Arc::clone(&record.connection),
            remote_id: from.to_string(),
        });
        if self.closed && self.registry.is_empty() {
            self.finish_close();
        }
    }

    // ------------------------------------------------------------------
    // Directed signaling (local identity topic)
    // ------------------------------------------------------------------

    fn on_directed(&mut self, raw: Value) {
        let topic = self.local_id.clone();
        let Some(message) = self.decode(raw, &topic) else {
            return;
        };
        match message {
            SignalMessage::Signal { from, payload } => self.on_signal(from, payload),
            SignalMessage::Disconnect { from } => self.on_disconnect_message(&from),
            SignalMessage::Announce { from, .. } => {
                debug!(%from, "ignoring announce on directed topic");
            }
        }
    }

    fn on_signal(&mut self, from: String, payload: Value) {
        if !self.registry.contains(&from) {
            // Only an offer may originate a passive connection; any other
            // fragment without a prior record is stale or out of order.
            if !is_offer(&payload) {
                debug!(%from, "dropping non-offer payload from unknown peer");
                return;
            }
            info!(%from, "connecting to new peer as responder");
            self.open_connection(from.clone(), PeerRole::Responder);
        }
        if let Some(record) = self.registry.get(&from) {
            record.connection.signal(payload);
        }
    }

    // ------------------------------------------------------------------
    // Peer record lifecycle
    // ------------------------------------------------------------------

    fn open_connection(&mut self, remote_id: String, role: PeerRole) {
        let instance = self.next_instance;
        self.next_instance += 1;

        let (connection, mut events) = self.connector.open(ConnectOptions {
            initiator: role == PeerRole::Initiator,
            transport: self.transport.clone(),
        });

        let turns = self.turns.clone();
        let id = remote_id.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let turn = Turn::ConnectionEvent {
                    remote_id: id.clone(),
                    instance,
                    event,
                };
                if turns.send(turn).is_err() {
                    break;
                }
            }
        });

        let record = PeerRecord::new(remote_id, instance, role, connection);
        if let Err(record) = self.registry.insert(record) {
            // Callers check for an existing record first; refuse duplicates
            // all the same so the uniqueness invariant cannot break.
            debug!(remote_id = %record.remote_id, "duplicate record refused");
            record.connection.destroy();
        }
    }

    fn on_connection_event(&mut self, remote_id: &str, instance: u64, event: ConnectionEvent) {
        match self.registry.get(remote_id) {
            Some(record) if record.instance == instance => {}
            _ => {
                debug!(%remote_id, instance, "dropping event for retired record");
                return;
            }
        }
        match event {
            ConnectionEvent::Signal(payload) => {
                if let Some(record) = self.registry.get_mut(remote_id) {
                    record.queue.push(payload);
                }
                self.drain(remote_id);
            }
            ConnectionEvent::Connect => self.on_peer_connected(remote_id),
            ConnectionEvent::Error(reason) => {
                warn!(%remote_id, %reason, "peer connection error");
                self.close_record(remote_id, instance, true);
            }
            ConnectionEvent::TransportFailed(reason) => {
                warn!(%remote_id, %reason, "peer transport negotiation failed");
                self.close_record(remote_id, instance, true);
            }
            ConnectionEvent::Close => self.close_record(remote_id, instance, false),
        }
    }

    fn on_peer_connected(&mut self, remote_id: &str) {
        let peer = match self.registry.get_mut(remote_id) {
            Some(record) if record.state == PeerState::Pending => {
                record.state = PeerState::Connected;
                Some((Arc::clone(&record.connection), record.role))
            }
            _ => None,
        };
        let Some((peer, role)) = peer else { return };
        self.registry.mark_connected(remote_id);
        info!(
            %remote_id,
            ?role,
            connected = self.registry.connected_count(),
            "peer connected"
        );
        self.emit(SwarmEvent::PeerConnected {
            peer,
            remote_id: remote_id.to_string(),
        });
    }

    /// Drive one record through the closed transition. Idempotent: the
    /// instance-guarded removal means only the first trigger has effect,
    /// and a record superseded by a newer one for the same identity is
    /// left alone.
    fn close_record(&mut self, remote_id: &str, instance: u64, destroy_connection: bool) {
        let Some(mut record) = self.registry.remove_if_instance(remote_id, instance) else {
            return;
        };
        debug!(%remote_id, instance, "peer record retired");
        record.state = PeerState::Closed;
        if destroy_connection {
            record.connection.destroy();
        }

        // Best-effort goodbye so the remote side can retire its record
        // without waiting for its own transport to notice.
        if let Some(frame) = self.encode(
            &SignalMessage::Disconnect {
                from: self.local_id.clone(),
            },
            remote_id,
        ) {
            let hub = Arc::clone(&self.hub);
            let topic = remote_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = hub.broadcast(&topic, frame).await {
                    debug!(error = %e, "goodbye broadcast failed");
                }
            });
        }

        self.emit(SwarmEvent::PeerDisconnected {
            peer: record.connection,
            remote_id: remote_id.to_string(),
        });
        if self.closed && self.registry.is_empty() {
            self.finish_close();
        }
    }

    // ------------------------------------------------------------------
    // Signal queue drain
    // ------------------------------------------------------------------

    fn drain(&mut self, remote_id: &str) {
        let Some(record) = self.registry.get_mut(remote_id) else {
            return;
        };
        let instance = record.instance;
        let Some(payload) = record.queue.start_send(self.closed) else {
            return;
        };
        debug!(%remote_id, pending = record.queue.len(), "dispatching handshake payload");
        let message = SignalMessage::Signal {
            from: self.local_id.clone(),
            payload,
        };
        let Some(frame) = self.encode(&message, remote_id) else {
            if let Some(record) = self.registry.get_mut(remote_id) {
                record.queue.complete();
            }
            return;
        };

        let hub = Arc::clone(&self.hub);
        let turns = self.turns.clone();
        let topic = remote_id.to_string();
        tokio::spawn(async move {
            let result = hub.broadcast(&topic, frame).await;
            let _ = turns.send(Turn::SendComplete {
                remote_id: topic,
                instance,
                result,
            });
        });
    }

    fn on_send_complete(&mut self, remote_id: &str, instance: u64, result: Result<(), HubError>) {
        let Some(record) = self.registry.get_mut(remote_id) else {
            return;
        };
        if record.instance != instance {
            return;
        }
        record.queue.complete();
        if let Err(e) = result {
            // The payload was already dequeued and is not retried; the
            // periodic announce loop is the recovery path for a flaky hub.
            warn!(%remote_id, error = %e, "handshake payload send failed");
        }
        self.drain(remote_id);
    }

    // ------------------------------------------------------------------
    // Reconnection scheduler
    // ------------------------------------------------------------------

    fn on_announce_tick(&mut self) {
        if self.closed {
            return;
        }
        if self.at_capacity() {
            debug!("peer capacity reached, stopping announcements");
            return;
        }
        let Some(frame) = self.encode(
            &SignalMessage::Announce {
                from: self.local_id.clone(),
                token: self.election_token.clone(),
            },
            BROADCAST_TOPIC,
        ) else {
            return;
        };
        let hub = Arc::clone(&self.hub);
        let turns = self.turns.clone();
        tokio::spawn(async move {
            let result = hub.broadcast(BROADCAST_TOPIC, frame).await;
            let _ = turns.send(Turn::AnnounceSent(result));
        });
    }

    fn on_announce_sent(&mut self, result: Result<(), HubError>) {
        if let Err(e) = result {
            debug!(error = %e, "announce broadcast failed");
        }
        if self.closed {
            return;
        }
        let delay = self.announce_delay();
        let turns = self.turns.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = turns.send(Turn::Announce);
        });
    }

    /// Jittered re-announce delay: aggressive while isolated, polite once
    /// at least one peer is connected.
    fn announce_delay(&self) -> Duration {
        let base = if self.registry.connected_count() == 0 {
            3_000
        } else {
            13_000
        };
        Duration::from_millis(base + rand::thread_rng().gen_range(0..2_000))
    }

    /// One-shot announce used to nudge the election winner; deliberately
    /// detached from the scheduler so it does not reschedule anything.
    fn spawn_nudge_announce(&self) {
        let Some(frame) = self.encode(
            &SignalMessage::Announce {
                from: self.local_id.clone(),
                token: self.election_token.clone(),
            },
            BROADCAST_TOPIC,
        ) else {
            return;
        };
        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            if let Err(e) = hub.broadcast(BROADCAST_TOPIC, frame).await {
                debug!(error = %e, "nudge announce failed");
            }
        });
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    fn on_close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!(local_id = %self.local_id, peers = self.registry.len(), "closing swarm");
        if self.hub.is_open() {
            let hub = Arc::clone(&self.hub);
            let turns = self.turns.clone();
            tokio::spawn(async move {
                if let Err(e) = hub.close().await {
                    warn!(error = %e, "hub close failed");
                }
                let _ = turns.send(Turn::HubClosed);
            });
        } else {
            self.destroy_all_records();
        }
    }

    fn destroy_all_records(&mut self) {
        if self.registry.is_empty() {
            self.finish_close();
            return;
        }
        // Destroys are deferred through the turn queue rather than run
        // inline, so each one happens in its own turn after this handler
        // returns; their close events drive the records out one by one.
        for (remote_id, instance) in self.registry.all_instances() {
            let _ = self.turns.send(Turn::Destroy {
                remote_id,
                instance,
            });
        }
    }

    fn on_destroy(&mut self, remote_id: &str, instance: u64) {
        if let Some(record) = self.registry.get(remote_id) {
            if record.instance == instance {
                record.connection.destroy();
            }
        }
    }

    fn finish_close(&mut self) {
        info!(local_id = %self.local_id, "swarm closed");
        self.emit(SwarmEvent::Closed);
        let _ = self.closed_tx.send(true);
        self.done = true;
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn at_capacity(&self) -> bool {
        self.registry.connected_count() >= self.max_peers
    }

    fn emit(&self, event: SwarmEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    fn encode(&self, message: &SignalMessage, topic: &str) -> Option<Value> {
        match serde_json::to_value(message) {
            Ok(value) => Some(self.transform.wrap(value, topic)),
            Err(e) => {
                warn!(error = %e, "failed to encode signaling frame");
                None
            }
        }
    }

    /// Unwrap, parse and pre-filter one inbound frame. Anything malformed
    /// or self-authored is dropped silently, matching the error taxonomy:
    /// bad frames are a diagnostic, never an error.
    fn decode(&self, raw: Value, topic: &str) -> Option<SignalMessage> {
        let frame = self.transform.unwrap(raw, topic)?;
        if self.closed {
            return None;
        }
        let message: SignalMessage = match serde_json::from_value(frame) {
            Ok(message) => message,
            Err(e) => {
                debug!(topic, error = %e, "dropping malformed frame");
                return None;
            }
        };
        if message.from() == self.local_id {
            debug!("skipping own message");
            return None;
        }
        Some(message)
    }
}

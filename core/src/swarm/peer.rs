//! Per-remote-peer bookkeeping: record, lifecycle state and outbound queue

use crate::connection::Connection;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// Which side of the pairwise handshake this record plays. Fixed at
/// creation, never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Won the election; opened the connection and sent the offer
    Initiator,
    /// Created passively upon receiving an offer
    Responder,
}

/// Lifecycle of a peer record: `Pending → Connected → Closed`, no
/// transition skips `Pending` and `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Pending,
    Connected,
    Closed,
}

/// Ordered outbound handshake queue with at most one payload in flight.
///
/// Handshake payloads are only meaningful to the remote side in generation
/// order (offer before candidates), so the queue never overlaps sends: a
/// payload enqueued while another is in flight waits for its completion.
/// The flags live here as plain fields so the discipline is inspectable.
#[derive(Debug, Default)]
pub(crate) struct SignalQueue {
    pending: VecDeque<Value>,
    in_flight: bool,
}

impl SignalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a freshly generated payload
    pub fn push(&mut self, payload: Value) {
        self.pending.push_back(payload);
    }

    /// One drain step: take the oldest payload and mark it in flight.
    /// Returns `None` while the swarm is closed, a send is already in
    /// flight, or there is nothing to send.
    pub fn start_send(&mut self, swarm_closed: bool) -> Option<Value> {
        if swarm_closed || self.in_flight {
            return None;
        }
        let payload = self.pending.pop_front()?;
        self.in_flight = true;
        Some(payload)
    }

    /// The in-flight send finished (successfully or not); the next
    /// `start_send` may dispatch again.
    pub fn complete(&mut self) {
        self.in_flight = false;
    }

    #[cfg(test)]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Bookkeeping for one remote identity the swarm is connecting to or
/// connected with. Owns the connection capability exclusively.
pub(crate) struct PeerRecord {
    pub remote_id: String,
    /// Distinguishes this record from earlier, superseded records for the
    /// same identity; connection-originated events carry it and are
    /// ignored on mismatch.
    pub instance: u64,
    pub role: PeerRole,
    pub state: PeerState,
    pub connection: Arc<dyn Connection>,
    pub queue: SignalQueue,
}

impl std::fmt::Debug for PeerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRecord")
            .field("remote_id", &self.remote_id)
            .field("instance", &self.instance)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl PeerRecord {
    pub fn new(
        remote_id: String,
        instance: u64,
        role: PeerRole,
        connection: Arc<dyn Connection>,
    ) -> Self {
        Self {
            remote_id,
            instance,
            role,
            state: PeerState::Pending,
            connection,
            queue: SignalQueue::new(),
        }
    }
}

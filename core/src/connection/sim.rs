//! Simulated peer connection
//!
//! A connection capability that "negotiates" purely through the signaling
//! path: the initiator emits an offer on open, the responder answers and
//! connects on receiving the offer, the initiator connects on receiving the
//! answer. Connections whose connectors share a [`SimNetwork`] are linked
//! by their handshake session, so destroying one side closes the other:
//! the same observable behavior a real transport gives when a remote
//! process goes away.

use super::{ConnectOptions, Connection, ConnectionEvent, Connector};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Negotiation state of a simulated connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimState {
    Negotiating,
    Connected,
    Closed,
}

/// Links simulated connections by handshake session. Share one network
/// across the connectors of every participant in a test or demo.
#[derive(Default)]
pub struct SimNetwork {
    links: Mutex<HashMap<String, Vec<Weak<SimConnection>>>>,
}

impl SimNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, session: &str, connection: Weak<SimConnection>) {
        self.links
            .lock()
            .entry(session.to_string())
            .or_default()
            .push(connection);
    }

    /// One endpoint of a session went away; close the others.
    fn endpoint_closed(&self, session: &str, source: *const SimConnection) {
        let peers: Vec<Arc<SimConnection>> = {
            let mut links = self.links.lock();
            match links.get_mut(session) {
                Some(entries) => {
                    entries.retain(|w| w.strong_count() > 0);
                    entries.iter().filter_map(Weak::upgrade).collect()
                }
                None => return,
            }
        };
        for peer in peers {
            if !std::ptr::eq(Arc::as_ptr(&peer), source) {
                peer.remote_closed();
            }
        }
    }
}

/// One simulated connection
pub struct SimConnection {
    this: Weak<SimConnection>,
    network: Arc<SimNetwork>,
    initiator: bool,
    session: Mutex<Option<String>>,
    state: Mutex<SimState>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl SimConnection {
    fn emit(&self, event: ConnectionEvent) {
        // The receiver disappears once the peer record is retired; late
        // events are simply dropped.
        let _ = self.events.send(event);
    }

    fn notify_network(&self) {
        if let Some(session) = self.session.lock().clone() {
            self.network.endpoint_closed(&session, self as *const _);
        }
    }

    /// The linked remote endpoint closed; mirror it locally.
    fn remote_closed(&self) {
        let mut state = self.state.lock();
        if *state == SimState::Closed {
            return;
        }
        *state = SimState::Closed;
        drop(state);
        self.emit(ConnectionEvent::Close);
    }

    /// Inject an unrecoverable transport error, for failure-path tests.
    pub fn fail(&self, reason: &str) {
        let mut state = self.state.lock();
        if *state == SimState::Closed {
            return;
        }
        *state = SimState::Closed;
        drop(state);
        self.emit(ConnectionEvent::Error(reason.to_string()));
        self.emit(ConnectionEvent::Close);
        self.notify_network();
    }

    /// Whether the handshake completed
    pub fn is_connected(&self) -> bool {
        *self.state.lock() == SimState::Connected
    }

    /// Which side of the handshake this endpoint plays
    pub fn is_initiator(&self) -> bool {
        self.initiator
    }
}

impl Connection for SimConnection {
    fn signal(&self, payload: Value) {
        let mut state = self.state.lock();
        if *state != SimState::Negotiating {
            return;
        }
        let kind = payload.get("type").and_then(Value::as_str);
        match kind {
            Some("offer") if !self.initiator => {
                let session = payload
                    .get("session")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                *state = SimState::Connected;
                drop(state);
                *self.session.lock() = Some(session.clone());
                self.network.register(&session, self.this.clone());
                self.emit(ConnectionEvent::Signal(
                    json!({"type": "answer", "session": session}),
                ));
                self.emit(ConnectionEvent::Connect);
            }
            Some("answer") if self.initiator => {
                *state = SimState::Connected;
                drop(state);
                self.emit(ConnectionEvent::Connect);
            }
            other => {
                debug!(kind = ?other, "ignoring handshake fragment");
            }
        }
    }

    fn destroy(&self) {
        let mut state = self.state.lock();
        if *state == SimState::Closed {
            return;
        }
        *state = SimState::Closed;
        drop(state);
        self.emit(ConnectionEvent::Close);
        self.notify_network();
    }
}

/// Factory for simulated connections.
///
/// Keeps a handle to every connection it opened so tests and demos can
/// reach in and inject failures or inspect roles.
pub struct SimConnector {
    network: Arc<SimNetwork>,
    opened: Mutex<Vec<Arc<SimConnection>>>,
}

impl SimConnector {
    /// Connector with a private network; its connections only ever link
    /// to each other.
    pub fn new() -> Self {
        Self::with_network(SimNetwork::new())
    }

    /// Connector participating in a shared network
    pub fn with_network(network: Arc<SimNetwork>) -> Self {
        Self {
            network,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Every connection opened through this connector, in open order
    pub fn opened(&self) -> Vec<Arc<SimConnection>> {
        self.opened.lock().clone()
    }
}

impl Default for SimConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for SimConnector {
    fn open(
        &self,
        options: ConnectOptions,
    ) -> (Arc<dyn Connection>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let network = Arc::clone(&self.network);
        let session = options.initiator.then(|| Uuid::new_v4().to_string());
        let connection = Arc::new_cyclic(|this| SimConnection {
            this: this.clone(),
            network,
            initiator: options.initiator,
            session: Mutex::new(session.clone()),
            state: Mutex::new(SimState::Negotiating),
            events: tx,
        });
        if let Some(session) = session {
            self.network
                .register(&session, Arc::downgrade(&connection));
            connection.emit(ConnectionEvent::Signal(
                json!({"type": "offer", "session": session}),
            ));
        }
        self.opened.lock().push(Arc::clone(&connection));
        (connection, rx)
    }
}
